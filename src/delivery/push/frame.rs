//! STOMP 1.2 text frames as carried over the push WebSocket.
//!
//! Only the subset a subscribing client needs is modelled. Frames are
//! NUL-terminated, heartbeats are bare EOLs, and one WebSocket message may
//! carry several frames.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is missing its NUL terminator")]
    Unterminated,
    #[error("frame has no command")]
    MissingCommand,
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("malformed header line '{0}'")]
    MalformedHeader(String),
    #[error("invalid escape sequence in '{0}'")]
    InvalidEscape(String),
    #[error("unterminated frame exceeds {0} bytes")]
    TooLarge(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "CONNECT" | "STOMP" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return None,
        })
    }

    // CONNECT and CONNECTED headers are sent verbatim for 1.0 compatibility.
    fn escapes_headers(self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Heartbeat,
    Frame(Frame),
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First occurrence wins, as STOMP requires for repeated headers.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn connect(host: &str, access_token: Option<&str>, heart_beat: (u64, u64)) -> Self {
        let frame = Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", format!("{},{}", heart_beat.0, heart_beat.1));
        match access_token {
            Some(token) => frame.header("Authorization", format!("Bearer {}", token)),
            None => frame,
        }
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    /// `(outgoing, incoming)` milliseconds from the `heart-beat` header;
    /// `(0, 0)` when absent or unreadable.
    pub fn heart_beat(&self) -> (u64, u64) {
        self.get("heart-beat")
            .and_then(|raw| raw.split_once(','))
            .and_then(|(out, inc)| Some((out.trim().parse().ok()?, inc.trim().parse().ok()?)))
            .unwrap_or((0, 0))
    }

    pub fn encode(&self) -> String {
        let escape_headers = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape_headers {
                out.push_str(&escape(name));
                out.push(':');
                out.push_str(&escape(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Splits one WebSocket text message into heartbeats and frames.
pub fn decode(text: &str) -> Vec<Result<Inbound, FrameError>> {
    let (mut items, tail) = split_frames(text);
    if !tail.is_empty() {
        items.push(Err(FrameError::Unterminated));
    }
    items
}

// Upper bound on a frame still waiting for its NUL terminator.
const MAX_PENDING_BYTES: usize = 1 << 20;

/// Carries an unterminated frame over to the next WebSocket message, for
/// brokers that split large frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: String,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: &str) -> Vec<Result<Inbound, FrameError>> {
        self.pending.push_str(text);

        let (mut items, tail) = split_frames(&self.pending);
        let consumed = self.pending.len() - tail.len();
        self.pending.drain(..consumed);

        if self.pending.len() > MAX_PENDING_BYTES {
            items.push(Err(FrameError::TooLarge(self.pending.len())));
            self.pending.clear();
        }
        items
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

// Returns the decoded items and the unterminated remainder.
fn split_frames(text: &str) -> (Vec<Result<Inbound, FrameError>>, &str) {
    let mut items = Vec::new();
    let mut rest = text;

    loop {
        let trimmed = rest.trim_start_matches(['\r', '\n']);
        if trimmed.len() != rest.len() {
            items.push(Ok(Inbound::Heartbeat));
        }

        match trimmed.find('\0') {
            Some(end) => {
                items.push(parse_frame(&trimmed[..end]).map(Inbound::Frame));
                rest = &trimmed[end + 1..];
            }
            None => return (items, trimmed),
        }
    }
}

fn next_line(s: &str) -> (&str, &str) {
    match s.find('\n') {
        Some(idx) => (s[..idx].trim_end_matches('\r'), &s[idx + 1..]),
        None => (s.trim_end_matches('\r'), ""),
    }
}

fn parse_frame(raw: &str) -> Result<Frame, FrameError> {
    let (command_line, mut rest) = next_line(raw);
    if command_line.is_empty() {
        return Err(FrameError::MissingCommand);
    }
    let command = Command::parse(command_line)
        .ok_or_else(|| FrameError::UnknownCommand(command_line.to_string()))?;

    let mut headers = Vec::new();
    let body = loop {
        let (line, remaining) = next_line(rest);
        if line.is_empty() {
            break remaining;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
        if command.escapes_headers() {
            headers.push((unescape(name)?, unescape(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
        rest = remaining;
    };

    let mut frame = Frame {
        command,
        headers,
        body: String::new(),
    };
    frame.body = match frame
        .get("content-length")
        .and_then(|len| len.trim().parse::<usize>().ok())
        .and_then(|len| body.get(..len))
    {
        Some(exact) => exact.to_string(),
        None => body.to_string(),
    };
    Ok(frame)
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(raw: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
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
