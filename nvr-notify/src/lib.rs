//! nvr-notify library crate.
//!
//! Turns NVR detection events into filtered, deduplicated notifications.
//! The modules are public so integration tests can drive the pipeline with
//! fake upstreams.

pub mod app;
pub mod config;
pub mod dedup;
pub mod domain;
pub mod error;
pub mod heartbeat;
pub mod ingest;
pub mod logging;
pub mod notification;
pub mod nvr;
pub mod pipeline;
pub mod status;
pub mod utils;

pub use error::{Error, Result};
