//! Message templates.
//!
//! Templates use `{name}` placeholders. `{{` and `}}` produce literal braces.
//! Supported placeholders:
//! - `{camera}`, `{label}`, `{sub_label}`, `{zones}`
//! - `{score}`: normalized to 0-100, no decimals
//! - `{time}`: detection start in the configured timezone
//! - `{id}`, `{severity}`
//! - `{review_url}`, `{clip_url}`: empty when unknown

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const DEFAULT_TITLE: &str = "{label} detected on {camera}";
const DEFAULT_BODY: &str = "{label} ({score}%) in {zones} at {time}";

/// Known placeholder names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Placeholder {
    Camera,
    Label,
    SubLabel,
    Score,
    Zones,
    Time,
    Id,
    ReviewUrl,
    ClipUrl,
    Severity,
}

/// Values substituted into a template.
#[derive(Debug, Clone, Default)]
pub struct TemplateValues {
    pub camera: String,
    pub label: String,
    pub sub_label: String,
    pub score: String,
    pub zones: String,
    pub time: String,
    pub id: String,
    pub review_url: String,
    pub clip_url: String,
    pub severity: String,
}

impl TemplateValues {
    fn get(&self, placeholder: Placeholder) -> &str {
        match placeholder {
            Placeholder::Camera => &self.camera,
            Placeholder::Label => &self.label,
            Placeholder::SubLabel => &self.sub_label,
            Placeholder::Score => &self.score,
            Placeholder::Zones => &self.zones,
            Placeholder::Time => &self.time,
            Placeholder::Id => &self.id,
            Placeholder::ReviewUrl => &self.review_url,
            Placeholder::ClipUrl => &self.clip_url,
            Placeholder::Severity => &self.severity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Value(Placeholder),
}

/// Parse a template string into segments.
fn parse(template: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '{' if chars.peek().map(|(_, n)| *n) == Some('{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek().map(|(_, n)| *n) == Some('}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for (_, n) in chars.by_ref() {
                    if n == '}' {
                        closed = true;
                        break;
                    }
                    name.push(n);
                }
                if !closed {
                    return Err(Error::template(format!("unclosed '{{' at offset {}", pos)));
                }
                let placeholder = Placeholder::from_str(name.trim())
                    .map_err(|_| Error::template(format!("unknown placeholder '{{{}}}'", name)))?;
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Value(placeholder));
            }
            '}' => {
                return Err(Error::template(format!("unmatched '}}' at offset {}", pos)));
            }
            c => literal.push(c),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

fn render(template: &str, values: &TemplateValues) -> Result<String> {
    let mut out = String::with_capacity(template.len() + 32);
    for segment in parse(template)? {
        match segment {
            Segment::Literal(text) => out.push_str(&text),
            Segment::Value(placeholder) => out.push_str(values.get(placeholder)),
        }
    }
    Ok(out)
}

/// Title and body templates for one profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_body")]
    pub body: String,
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

fn default_body() -> String {
    DEFAULT_BODY.to_string()
}

impl Default for MessageTemplate {
    fn default() -> Self {
        Self {
            title: default_title(),
            body: default_body(),
        }
    }
}

impl MessageTemplate {
    /// Check both templates without rendering them.
    pub fn validate(&self) -> Result<()> {
        parse(&self.title).map_err(|e| Error::template(format!("title: {}", e)))?;
        parse(&self.body).map_err(|e| Error::template(format!("body: {}", e)))?;
        Ok(())
    }

    /// Render `(title, body)`.
    pub fn render(&self, values: &TemplateValues) -> Result<(String, String)> {
        Ok((render(&self.title, values)?, render(&self.body, values)?))
    }
}
