use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of a domain message.
///
/// The closed set understood by the engine is `image`, `text` and `file`.
/// Anything else decodes to `Other` so inbound traffic with a bad kind is
/// still recorded and observable instead of silently dropped. `Other` is
/// never accepted on the outbound path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    Image,
    Text,
    File,
    Other(String),
}

impl MessageKind {
    /// Returns the canonical wire name of the kind.
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Image => "image",
            MessageKind::Text => "text",
            MessageKind::File => "file",
            MessageKind::Other(s) => s,
        }
    }

    /// Whether the engine accepts this kind for publication.
    pub fn is_publishable(&self) -> bool {
        !matches!(self, MessageKind::Other(_))
    }
}

impl From<String> for MessageKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "image" => MessageKind::Image,
            "text" => MessageKind::Text,
            "file" => MessageKind::File,
            _ => MessageKind::Other(s),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of traffic the engine classifies, records and publishes.
///
/// Binary payloads (images, file contents) travel base64-encoded in `body`;
/// text bodies carry either a chat line or a JSON command/response document.
/// `origin_device_id` is stamped by the engine on everything it publishes so
/// peers can discard their own echoes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: MessageKind,
    pub body: String,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub origin_device_id: Option<String>,
}

impl Envelope {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text,
            body: body.into(),
            file_name: None,
            file_size: None,
            origin_device_id: None,
        }
    }

    pub fn image(body: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Image,
            body: body.into(),
            file_name: None,
            file_size: None,
            origin_device_id: None,
        }
    }

    pub fn file(name: impl Into<String>, body: impl Into<String>, size: u64) -> Self {
        Self {
            kind: MessageKind::File,
            body: body.into(),
            file_name: Some(name.into()),
            file_size: Some(size),
            origin_device_id: None,
        }
    }
}
