//! Command-line arguments for the producer.

use clap::{Parser, ValueEnum};
use tracing::warn;

use crate::config::{BrokerConfig, Credentials, MessageConfig, MessageFormat};

/// Send synthetic messages to a STOMP broker queue.
#[derive(Parser, Debug)]
#[command(name = "stomp-producer")]
#[command(about = "Send synthetic messages to a STOMP broker queue (e.g. ActiveMQ classic)")]
#[command(version)]
pub struct Cli {
    /// Broker host
    #[arg(long, env = "STOMP_HOST", default_value = "localhost")]
    pub host: String,

    /// Broker STOMP port
    #[arg(long, env = "STOMP_PORT", default_value_t = 61613)]
    pub port: u16,

    /// Broker username (optional)
    #[arg(long, env = "STOMP_USERNAME")]
    pub username: Option<String>,

    /// Broker password (optional)
    #[arg(long, env = "STOMP_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Queue name to send messages to
    #[arg(long, env = "STOMP_QUEUE", required_unless_present = "dry_run")]
    pub queue: Option<String>,

    /// Number of messages to send
    #[arg(long, default_value_t = 10)]
    pub count: u64,

    /// Approximate size of each message in bytes
    #[arg(long, default_value_t = 1024)]
    pub size: usize,

    /// Message send rate in messages per second (0 or less means unlimited)
    #[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
    pub rate: f64,

    /// Message format
    #[arg(long, value_enum, default_value = "json")]
    pub format: FormatChoice,

    /// Seed for message ids and filler, for reproducible payloads
    #[arg(long)]
    pub seed: Option<u64>,

    /// Wait for a broker RECEIPT after every message
    #[arg(long)]
    pub receipts: bool,

    /// Generate messages without connecting to a broker
    #[arg(long)]
    pub dry_run: bool,
}

// Queue label used in logs when no queue was given for a dry run
const DRY_RUN_QUEUE: &str = "dry-run";

/// Message format for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatChoice {
    Json,
    Xml,
}

impl From<FormatChoice> for MessageFormat {
    fn from(choice: FormatChoice) -> Self {
        match choice {
            FormatChoice::Json => MessageFormat::Json,
            FormatChoice::Xml => MessageFormat::Xml,
        }
    }
}

impl Cli {
    pub fn queue_name(&self) -> &str {
        self.queue.as_deref().unwrap_or(DRY_RUN_QUEUE)
    }

    pub fn message_config(&self) -> MessageConfig {
        MessageConfig {
            format: self.format.into(),
            target_size_bytes: self.size,
            count: self.count,
            rate_per_second: self.rate,
        }
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            host: self.host.clone(),
            port: self.port,
            credentials: self.credentials(),
            receipts: self.receipts,
        }
    }

    // Login only happens when both halves are present
    fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            (None, None) => None,
            _ => {
                warn!("Both --username and --password are needed to log in, connecting anonymously");
                None
            }
        }
    }
}
