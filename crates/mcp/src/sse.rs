//! Incremental Server-Sent-Events decoding.
//!
//! Bytes arrive in arbitrary chunks from `reqwest::Response::bytes_stream()`.
//! [`SseDecoder`] buffers partial lines (including split UTF-8 sequences),
//! accepts `\n` and `\r\n` line endings, skips `:` comments, joins multi-line
//! `data:` fields, and yields one [`SseFrame`] per blank-line terminated block.

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Event name; `message` when the block carried no `event:` field.
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no line break.
    scanned: usize,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every frame it completes.
    ///
    /// Only the newly appended bytes are searched for line breaks; consumed
    /// lines leave the buffer in a single drain.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            let mut line = &self.buffer[start..end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            let line = String::from_utf8_lossy(line).into_owned();
            start = end + 1;
            self.scanned = start;
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        frames
    }

    /// Flush a trailing block when the stream ends without a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        self.scanned = 0;
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            let line = line.trim_end_matches('\r');
            if let Some(frame) = self.process_line(line) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            // An empty name means the default `message` type.
            "event" => self.event = (!value.is_empty()).then(|| value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.event.is_none() && self.data.is_empty() {
            self.id = None;
            return None;
        }
        let frame = SseFrame {
            event: self.event.take().unwrap_or_else(|| "message".to_string()),
            data: self.data.join("\n"),
            id: self.id.take(),
        };
        self.data.clear();
        Some(frame)
    }
}

/// Events the HTTP transports react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Where to POST outbound messages; may be relative to the stream URL.
    Endpoint(String),
    /// One JSON-RPC envelope.
    Message(String),
    /// Heartbeat.
    Ping,
    Unknown { event: String, data: String },
}

impl From<SseFrame> for ServerEvent {
    fn from(frame: SseFrame) -> Self {
        match frame.event.as_str() {
            "endpoint" => ServerEvent::Endpoint(frame.data.trim().to_string()),
            "message" => ServerEvent::Message(frame.data),
            "ping" => ServerEvent::Ping,
            _ => ServerEvent::Unknown {
                event: frame.event,
                data: frame.data,
            },
        }
    }
}

/// Marker some servers put on a POST reply that wraps one SSE frame in a
/// non-SSE content type.
pub const EMBEDDED_MESSAGE_MARKER: &str = "event: message";

/// Compatibility path: pull the JSON payload out of a POST body that carries
/// a single `event: message` frame. Returns `None` when the marker is absent
/// or the frame has no data.
pub fn extract_embedded_message(body: &str) -> Option<String> {
    if !body.contains(EMBEDDED_MESSAGE_MARKER) {
        return None;
    }
    let mut decoder = SseDecoder::new();
    let mut frames = decoder.push(body.as_bytes());
    frames.extend(decoder.finish());
    frames
        .into_iter()
        .find(|f| f.event == "message" && !f.data.trim().is_empty())
        .map(|f| f.data)
}
