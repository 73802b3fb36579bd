use std::time::Duration;

use tokio::{
    io::{AsyncWriteExt, BufStream},
    net::TcpStream,
    time::timeout,
};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::BrokerConfig,
    stomp::{Frame, FrameError, read_frame, write_frame},
};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("Broker returned an error: {0}")]
    Rejected(String),
    #[error("Unexpected {0} frame from broker")]
    UnexpectedFrame(String),
    #[error("Not connected to broker")]
    NotConnected,
}

// The capabilities the producer needs from a broker client
#[async_trait::async_trait()]
pub trait BrokerSession: Send {
    async fn connect(&mut self) -> Result<(), SessionError>;

    async fn send(
        &mut self,
        queue_name: &str,
        body: &str,
        content_type: &str,
    ) -> Result<(), SessionError>;

    // Best effort: failures are logged, never returned
    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    // Past tense shown in per-message progress lines
    fn delivery_verb(&self) -> &'static str {
        "Sent"
    }
}

pub fn destination(queue_name: &str) -> String {
    format!("/queue/{queue_name}")
}

pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A STOMP connection to a single broker.
///
/// `Disconnected` until [`BrokerSession::connect`] succeeds, and back to
/// `Disconnected` after [`BrokerSession::disconnect`], whatever the outcome.
/// There is no reconnection.
///
/// A send that was cancelled or hit a transport error may have left half a
/// frame on the socket. The connection is then dropped on disconnect without
/// the DISCONNECT handshake.
pub struct StompSession {
    config: BrokerConfig,
    stream: Option<BufStream<TcpStream>>,
    wire_dirty: bool,
    disconnect_timeout: Duration,
}

impl StompSession {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            stream: None,
            wire_dirty: false,
            disconnect_timeout: DISCONNECT_TIMEOUT,
        }
    }

    pub fn with_disconnect_timeout(mut self, disconnect_timeout: Duration) -> Self {
        self.disconnect_timeout = disconnect_timeout;
        self
    }

    fn connect_frame(&self) -> Frame {
        let mut frame = Frame::new("CONNECT")
            .header("accept-version", "1.0,1.1,1.2")
            .header("host", self.config.host.clone())
            .header("heart-beat", "0,0");

        if let Some(credentials) = &self.config.credentials {
            frame = frame
                .header("login", credentials.username.clone())
                .header("passcode", credentials.password.clone());
        }

        frame
    }

    async fn open(&self) -> Result<BufStream<TcpStream>, SessionError> {
        let tcp = TcpStream::connect((self.config.host.as_str(), self.config.port)).await?;
        tcp.set_nodelay(true)?;
        let mut stream = BufStream::new(tcp);

        write_frame(&mut stream, &self.connect_frame()).await?;
        let reply = read_frame(&mut stream).await?;

        match reply.command.as_str() {
            "CONNECTED" => {
                debug!(
                    version = reply.get("version").unwrap_or("1.0"),
                    server = reply.get("server").unwrap_or("unknown"),
                    "STOMP session established"
                );
                Ok(stream)
            }
            "ERROR" => Err(SessionError::Rejected(error_message(&reply))),
            other => Err(SessionError::UnexpectedFrame(other.to_string())),
        }
    }

    async fn publish(
        &mut self,
        queue_name: &str,
        body: &str,
        content_type: &str,
    ) -> Result<(), SessionError> {
        let receipt = self.config.receipts.then(|| Uuid::new_v4().to_string());
        let stream = self.stream.as_mut().ok_or(SessionError::NotConnected)?;

        let mut frame = Frame::new("SEND")
            .header("destination", destination(queue_name))
            .header("content-type", content_type)
            .header("persistent", "true")
            .header("content-length", body.len().to_string());
        if let Some(id) = &receipt {
            frame = frame.header("receipt", id.clone());
        }

        write_frame(stream, &frame.body(body)).await?;

        if let Some(id) = receipt {
            await_receipt(stream, &id).await?;
        }

        Ok(())
    }

    async fn close(stream: &mut BufStream<TcpStream>) -> Result<(), SessionError> {
        let id = Uuid::new_v4().to_string();
        write_frame(stream, &Frame::new("DISCONNECT").header("receipt", id.clone())).await?;
        await_receipt(stream, &id).await?;
        stream.shutdown().await?;
        Ok(())
    }
}

#[async_trait::async_trait()]
impl BrokerSession for StompSession {
    #[instrument(name = "StompSession::connect", skip_all)]
    async fn connect(&mut self) -> Result<(), SessionError> {
        if self.stream.is_some() {
            debug!("Already connected");
            return Ok(());
        }

        match self.open().await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.wire_dirty = false;
                info!("Connected to broker at {}", self.config.address());
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to connect to broker at {}: {}",
                    self.config.address(),
                    e
                );
                Err(e)
            }
        }
    }

    #[instrument(name = "StompSession::send", skip_all, fields(queue.name = queue_name))]
    async fn send(
        &mut self,
        queue_name: &str,
        body: &str,
        content_type: &str,
    ) -> Result<(), SessionError> {
        // Stays set if this future is dropped before the frame is complete
        self.wire_dirty = true;
        let result = self.publish(queue_name, body, content_type).await;
        match &result {
            Ok(()) | Err(SessionError::Rejected(_) | SessionError::NotConnected) => {
                self.wire_dirty = false;
            }
            Err(_) => {}
        }
        if let Err(e) = &result {
            error!("Failed to send message: {}", e);
        }
        result
    }

    #[instrument(name = "StompSession::disconnect", skip_all)]
    async fn disconnect(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };

        if std::mem::take(&mut self.wire_dirty) {
            warn!("Last send did not complete, dropping the connection without DISCONNECT");
            return;
        }

        match timeout(self.disconnect_timeout, Self::close(&mut stream)).await {
            Ok(Ok(())) => info!("Disconnected from broker"),
            Ok(Err(e)) => warn!("Error during disconnect: {}", e),
            Err(_) => warn!(
                "Broker did not acknowledge DISCONNECT within {:?}, dropping the connection",
                self.disconnect_timeout
            ),
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

pub const PREVIEW_CHARS: usize = 150;

/// Generates without a broker: every send succeeds and only logs the body
/// size, plus a preview of the first body.
#[derive(Debug, Default)]
pub struct DryRunSession {
    generated: u64,
}

impl DryRunSession {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait()]
impl BrokerSession for DryRunSession {
    async fn connect(&mut self) -> Result<(), SessionError> {
        info!("Dry run, not connecting to a broker");
        Ok(())
    }

    #[instrument(name = "DryRunSession::send", skip_all, fields(queue.name = queue_name))]
    async fn send(
        &mut self,
        queue_name: &str,
        body: &str,
        content_type: &str,
    ) -> Result<(), SessionError> {
        if self.generated == 0 {
            info!(content_type, "Preview: {}", preview(body));
        }
        self.generated += 1;
        Ok(())
    }

    async fn disconnect(&mut self) {}

    fn is_connected(&self) -> bool {
        false
    }

    fn delivery_verb(&self) -> &'static str {
        "Generated"
    }
}

/// The first [`PREVIEW_CHARS`] characters of `body`, with `...` appended
/// when it was cut.
pub fn preview(body: &str) -> String {
    match body.char_indices().nth(PREVIEW_CHARS) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_string(),
    }
}

// Reads until the RECEIPT for `id`; frames for other receipts are skipped
async fn await_receipt(
    stream: &mut BufStream<TcpStream>,
    id: &str,
) -> Result<(), SessionError> {
    loop {
        let frame = read_frame(stream).await?;
        match frame.command.as_str() {
            "RECEIPT" if frame.get("receipt-id") == Some(id) => return Ok(()),
            "RECEIPT" => debug!(
                receipt = frame.get("receipt-id").unwrap_or_default(),
                "Ignoring unrelated receipt"
            ),
            "ERROR" => return Err(SessionError::Rejected(error_message(&frame))),
            other => debug!("Ignoring {} frame while waiting for receipt", other),
        }
    }
}

fn error_message(frame: &Frame) -> String {
    let message = frame.get("message").unwrap_or("no message").to_string();
    let details = String::from_utf8_lossy(&frame.body);
    let details = details.trim();
    if details.is_empty() {
        message
    } else {
        format!("{message}: {details}")
    }
}
