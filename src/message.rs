//! Size-targeted synthetic message bodies.
//!
//! A message is a fixed skeleton (timestamp, id, type tag) plus a `data`
//! filler field. The skeleton is serialized once without filler to measure
//! its overhead, then the filler is padded so the final body lands close to
//! the requested byte size.

use chrono::{DateTime, SecondsFormat, Utc};
use rand::{Rng, distr::Alphanumeric};
use serde::Serialize;

use crate::config::MessageFormat;

pub const MESSAGE_TYPE: &str = "test_message";

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("Failed to serialize JSON message: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct GeneratedMessage {
    pub body: String,
    pub actual_size_bytes: usize,
}

impl GeneratedMessage {
    fn new(body: String) -> Self {
        Self {
            actual_size_bytes: body.len(),
            body,
        }
    }
}

#[derive(Serialize)]
struct Skeleton<'a> {
    timestamp: &'a str,
    message_id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    data: &'a str,
}

impl Skeleton<'_> {
    fn render(&self, format: MessageFormat) -> Result<String, PayloadError> {
        match format {
            MessageFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            MessageFormat::Xml => Ok(self.render_xml()),
        }
    }

    fn render_xml(&self) -> String {
        let mut out = String::with_capacity(128 + self.data.len());
        out.push_str("<message>");
        push_element(&mut out, "timestamp", self.timestamp);
        push_element(&mut out, "message_id", self.message_id);
        push_element(&mut out, "type", self.kind);
        push_element(&mut out, "data", self.data);
        out.push_str("</message>");
        out
    }
}

fn push_element(out: &mut String, name: &str, text: &str) {
    if text.is_empty() {
        out.push('<');
        out.push_str(name);
        out.push_str(" />");
        return;
    }

    out.push('<');
    out.push_str(name);
    out.push('>');
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

/// Builds message bodies of a given format, drawing every random value
/// (message ids and filler) from the injected generator.
pub struct PayloadGenerator<R> {
    format: MessageFormat,
    rng: R,
}

impl<R: Rng> PayloadGenerator<R> {
    pub fn new(format: MessageFormat, rng: R) -> Self {
        Self { format, rng }
    }

    pub fn generate(
        &mut self,
        target_size_bytes: usize,
    ) -> Result<GeneratedMessage, PayloadError> {
        self.generate_at(Utc::now(), target_size_bytes)
    }

    pub fn generate_at(
        &mut self,
        now: DateTime<Utc>,
        target_size_bytes: usize,
    ) -> Result<GeneratedMessage, PayloadError> {
        let timestamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        let message_id = self.rng.random_range(100_000..=999_999u32).to_string();

        let mut skeleton = Skeleton {
            timestamp: &timestamp,
            message_id: &message_id,
            kind: MESSAGE_TYPE,
            data: "",
        };

        let overhead = skeleton.render(self.format)?.len();
        let filler_length = target_size_bytes
            .saturating_sub(overhead)
            .saturating_sub(self.format.buffer_bytes());

        if filler_length == 0 {
            return Ok(GeneratedMessage::new(skeleton.render(self.format)?));
        }

        let filler = self.random_alphanumeric(filler_length);
        skeleton.data = &filler;

        Ok(GeneratedMessage::new(skeleton.render(self.format)?))
    }

    fn random_alphanumeric(&mut self, length: usize) -> String {
        (&mut self.rng)
            .sample_iter(Alphanumeric)
            .take(length)
            .map(char::from)
            .collect()
    }
}
