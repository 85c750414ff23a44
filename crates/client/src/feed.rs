//! Server-sent event reader for `GET /notifications/stream`.

use std::collections::VecDeque;

use stockledger_auth::Principal;
use stockledger_inventory::Notification;

use crate::ClientError;

/// One dispatched SSE message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    pub event: String,
    pub data: String,
}

/// Incremental SSE decoder; chunks may split lines anywhere.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw text, returning every message completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<SseMessage> {
        self.buffer.push_str(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(msg) = self.dispatch() {
                    out.push(msg);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }
        out
    }

    fn dispatch(&mut self) -> Option<SseMessage> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseMessage {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

/// Live notification stream for one viewer.
pub struct NotificationFeed {
    response: reqwest::Response,
    /// Bytes of a character split across network chunks.
    carry: Vec<u8>,
    parser: SseParser,
    pending: VecDeque<Notification>,
}

impl NotificationFeed {
    pub async fn connect(base_url: &str, viewer: Principal) -> Result<Self, ClientError> {
        let response = reqwest::Client::new()
            .get(format!("{}/notifications/stream", base_url.trim_end_matches('/')))
            .header("x-user-id", viewer.user_id.to_string())
            .header("x-user-role", viewer.role.as_str())
            .header("accept", "text/event-stream")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(ClientError::Api(status, response.text().await.unwrap_or_default()));
        }

        Ok(Self {
            response,
            carry: Vec::new(),
            parser: SseParser::new(),
            pending: VecDeque::new(),
        })
    }

    /// Next notification, or `None` once the server closes the stream.
    ///
    /// Control events (`ready`) and unparseable payloads are skipped.
    pub async fn next(&mut self) -> Result<Option<Notification>, ClientError> {
        loop {
            if let Some(n) = self.pending.pop_front() {
                return Ok(Some(n));
            }
            let Some(chunk) = self.response.chunk().await? else {
                return Ok(None);
            };
            self.carry.extend_from_slice(&chunk);
            let text = take_utf8(&mut self.carry);
            for msg in self.parser.push(&text) {
                if let Some(n) = decode(&msg) {
                    self.pending.push_back(n);
                }
            }
        }
    }
}

/// Decode the complete UTF-8 prefix of `carry`, leaving a trailing partial
/// character in place. Invalid sequences become U+FFFD.
fn take_utf8(carry: &mut Vec<u8>) -> String {
    let mut out = String::new();
    let mut start = 0;
    while start < carry.len() {
        match std::str::from_utf8(&carry[start..]) {
            Ok(valid) => {
                out.push_str(valid);
                start = carry.len();
            }
            Err(err) => {
                let end = start + err.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&carry[start..end]));
                match err.error_len() {
                    Some(len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        start = end + len;
                    }
                    None => {
                        start = end;
                        break;
                    }
                }
            }
        }
    }
    carry.drain(..start);
    out
}

fn decode(msg: &SseMessage) -> Option<Notification> {
    if msg.event != "low_stock" && msg.event != "account" {
        return None;
    }
    match serde_json::from_str(&msg.data) {
        Ok(n) => Some(n),
        Err(err) => {
            tracing::warn!(event = %msg.event, error = %err, "dropping malformed notification");
            None
        }
    }
}
