use std::{sync::OnceLock, time::Duration};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build a header map from `(name, value)` pairs, skipping pairs that are not
/// valid HTTP header syntax.
pub fn header_map(pairs: &[(String, String)]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        match (
            name.parse::<HeaderName>(),
            value.parse::<HeaderValue>(),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "Ignoring invalid HTTP header"),
        }
    }
    headers
}

/// Create a client with the shared TLS provider, a request timeout and
/// default headers applied to every request.
pub fn build_client(
    timeout: Duration,
    default_headers: HeaderMap,
) -> reqwest::Result<reqwest::Client> {
    install_rustls_provider();
    reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(default_headers)
        .user_agent(concat!("nvr-notify/", env!("CARGO_PKG_VERSION")))
        .build()
}
