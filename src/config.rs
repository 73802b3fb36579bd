use std::{fmt, time::Duration};

// Serialization format of generated message bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    Json,
    Xml,
}

impl MessageFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            MessageFormat::Json => "application/json",
            MessageFormat::Xml => "application/xml",
        }
    }

    // Margin reserved for the bytes added when the filler is embedded
    pub fn buffer_bytes(self) -> usize {
        match self {
            MessageFormat::Json => 10,
            MessageFormat::Xml => 20,
        }
    }
}

impl fmt::Display for MessageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageFormat::Json => f.write_str("JSON"),
            MessageFormat::Xml => f.write_str("XML"),
        }
    }
}

// What to send and how fast
#[derive(Debug, Clone)]
pub struct MessageConfig {
    pub format: MessageFormat,
    pub target_size_bytes: usize,
    pub count: u64,
    pub rate_per_second: f64,
}

impl MessageConfig {
    /// Pause inserted between two consecutive sends.
    ///
    /// `None` means unlimited: the rate is zero, negative or not a finite number.
    pub fn delay(&self) -> Option<Duration> {
        let rate = self.rate_per_second;
        if rate > 0.0 && rate.is_finite() {
            Duration::try_from_secs_f64(1.0 / rate).ok()
        } else {
            None
        }
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

// Where the broker lives and how to talk to it
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
    // Ask the broker to acknowledge every SEND with a RECEIPT frame
    pub receipts: bool,
}

impl BrokerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
