//! Minimal STOMP 1.2 frame codec.
//!
//! Only what a producer needs: encoding client frames and reading the
//! handful of server frames (`CONNECTED`, `RECEIPT`, `ERROR`) it waits for.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Connection closed by broker")]
    ConnectionClosed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,
    #[error("Malformed header line: {0:?}")]
    MalformedHeader(String),
    #[error("Invalid escape sequence in header: {0:?}")]
    InvalidEscape(String),
    #[error("Invalid content-length: {0:?}")]
    InvalidContentLength(String),
    #[error("Frame body is not terminated by NUL")]
    MissingNul,
    #[error("Frame exceeds {0} bytes")]
    FrameTooLarge(usize),
}

// Upper bound on a single inbound frame, heart-beats and headers included
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    // Repeated headers: the first occurrence wins
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn encode(&self) -> Vec<u8> {
        let escape = escapes_headers(&self.command);
        let mut out = Vec::with_capacity(64 + self.body.len());

        out.extend_from_slice(self.command.as_bytes());
        out.push(b'\n');
        for (name, value) in &self.headers {
            if escape {
                out.extend_from_slice(escape_header(name).as_bytes());
                out.push(b':');
                out.extend_from_slice(escape_header(value).as_bytes());
            } else {
                out.extend_from_slice(name.as_bytes());
                out.push(b':');
                out.extend_from_slice(value.as_bytes());
            }
            out.push(b'\n');
        }
        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }
}

// CONNECT and CONNECTED predate header escaping
fn escapes_headers(command: &str) -> bool {
    !matches!(command, "CONNECT" | "CONNECTED")
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(raw.to_string())),
        }
    }
    Ok(out)
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.encode()).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    let mut limited = (&mut *reader).take(MAX_FRAME_BYTES as u64);
    match read_bounded_frame(&mut limited).await {
        Err(FrameError::ConnectionClosed) if limited.limit() == 0 => {
            Err(FrameError::FrameTooLarge(MAX_FRAME_BYTES))
        }
        result => result,
    }
}

async fn read_bounded_frame<R>(reader: &mut R) -> Result<Frame, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    // Bare EOLs between frames are heart-beats
    let command = loop {
        let line = read_line(reader).await?;
        if !line.is_empty() {
            break line;
        }
    };

    let escape = escapes_headers(&command);
    let mut frame = Frame::new(command);

    loop {
        let line = read_line(reader).await?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.clone()))?;
        if escape {
            frame
                .headers
                .push((unescape_header(name)?, unescape_header(value)?));
        } else {
            frame.headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = match frame.get("content-length") {
        Some(raw) => Some(
            raw.trim()
                .parse::<usize>()
                .map_err(|_| FrameError::InvalidContentLength(raw.to_string()))?,
        ),
        None => None,
    };
    if content_length.is_some_and(|length| length >= MAX_FRAME_BYTES) {
        return Err(FrameError::FrameTooLarge(MAX_FRAME_BYTES));
    }

    frame.body = match content_length {
        Some(length) => {
            let mut body = vec![0; length];
            reader.read_exact(&mut body).await.map_err(eof_as_closed)?;
            if reader.read_u8().await.map_err(eof_as_closed)? != 0 {
                return Err(FrameError::MissingNul);
            }
            body
        }
        None => {
            let mut body = Vec::new();
            reader.read_until(0, &mut body).await?;
            if body.pop() != Some(0) {
                return Err(FrameError::ConnectionClosed);
            }
            body
        }
    };

    Ok(frame)
}

async fn read_line<R>(reader: &mut R) -> Result<String, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line).await?;
    if line.pop() != Some(b'\n') {
        return Err(FrameError::ConnectionClosed);
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line).map_err(|_| FrameError::InvalidUtf8)
}

fn eof_as_closed(e: std::io::Error) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::ConnectionClosed
    } else {
        FrameError::Io(e)
    }
}
