use serde::{Deserialize, Serialize};

/// Delivery progress of one in-flight chunked message, as reported by the
/// chunk codec. The engine treats these as untrusted samples: percentages
/// are not assumed monotonic or even sane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkProgress {
    /// Codec-assigned id of the message being reassembled.
    pub message_id: String,
    /// Total number of chunks the message was split into.
    pub chunk_count: u32,
    /// Share of chunks received so far, in percent.
    pub progress_percent: f64,
}

impl ChunkProgress {
    pub fn new(message_id: impl Into<String>, chunk_count: u32, progress_percent: f64) -> Self {
        Self {
            message_id: message_id.into(),
            chunk_count,
            progress_percent,
        }
    }
}
