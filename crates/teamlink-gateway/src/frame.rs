//! STOMP 1.2 frame codec. One websocket text message carries one frame.

use std::fmt;

use bytes::Bytes;
use thiserror::Error;

/// Text sent (and accepted) as a heartbeat.
pub const HEARTBEAT: &str = "\n";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("malformed header line `{0}`")]
    BadHeader(String),
    #[error("invalid escape sequence in header `{0}`")]
    BadEscape(String),
    #[error("missing blank line after headers")]
    MissingBody,
    #[error("missing NUL terminator")]
    Unterminated,
    #[error("content-length {declared} exceeds body of {actual} bytes")]
    BadLength { declared: usize, actual: usize },
    #[error("body is not valid UTF-8")]
    NotUtf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> Result<Self, FrameError> {
        Ok(match s {
            "CONNECT" | "STOMP" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        })
    }

    /// CONNECT and CONNECTED headers are never escaped.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header. Repeated headers keep the first occurrence.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> Result<&str, FrameError> {
        std::str::from_utf8(&self.body).map_err(|_| FrameError::NotUtf8)
    }

    // -- Client frames --

    pub fn connect(host: &str, heart_beat: (u64, u64), token: &str) -> Self {
        Frame::new(Command::Connect)
            .with_header("accept-version", "1.2")
            .with_header("host", host)
            .with_header("heart-beat", format!("{},{}", heart_beat.0, heart_beat.1))
            .with_header("Authorization", format!("Bearer {}", token))
    }

    pub fn send(destination: &str, json: String) -> Self {
        let len = json.len();
        Frame::new(Command::Send)
            .with_header("destination", destination)
            .with_header("content-type", "application/json")
            .with_header("content-length", len.to_string())
            .with_body(json)
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
            .with_header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Frame::new(Command::Unsubscribe).with_header("id", id)
    }

    pub fn disconnect() -> Self {
        Frame::new(Command::Disconnect)
    }

    // -- Codec --

    pub fn encode(&self) -> String {
        let body = String::from_utf8_lossy(&self.body);
        let mut out = String::with_capacity(64 + body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        let escape = self.command.escapes_headers();
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&body);
        out.push('\0');
        out
    }

    pub fn decode(text: &str) -> Result<Self, FrameError> {
        // Heartbeat EOLs may precede a frame.
        let text = text.trim_start_matches(['\r', '\n']);
        if text.is_empty() {
            return Err(FrameError::Empty);
        }

        let (head, rest) = split_head(text).ok_or(FrameError::MissingBody)?;
        let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));
        let command = Command::parse(lines.next().unwrap_or_default())?;
        let unescape = command.escapes_headers();

        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::BadHeader(line.to_string()))?;
            if unescape {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let mut frame = Frame {
            command,
            headers,
            body: Bytes::new(),
        };

        let body = match frame.header("content-length").and_then(|v| v.parse::<usize>().ok()) {
            Some(declared) => {
                if declared > rest.len() {
                    return Err(FrameError::BadLength {
                        declared,
                        actual: rest.len(),
                    });
                }
                &rest.as_bytes()[..declared]
            }
            None => {
                let end = rest.find('\0').ok_or(FrameError::Unterminated)?;
                &rest.as_bytes()[..end]
            }
        };
        frame.body = Bytes::copy_from_slice(body);
        Ok(frame)
    }
}

/// True for a text message that only carries heartbeat EOLs.
pub fn is_heartbeat(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c == '\n' || c == '\r')
}

fn split_head(text: &str) -> Option<(&str, &str)> {
    if let Some(i) = text.find("\n\n") {
        let head = &text[..i];
        return Some((head.strip_suffix('\r').unwrap_or(head), &text[i + 2..]));
    }
    text.find("\r\n\r\n").map(|i| (&text[..i], &text[i + 4..]))
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
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

fn unescape_header(s: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
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
            _ => return Err(FrameError::BadEscape(s.to_string())),
        }
    }
    Ok(out)
}
