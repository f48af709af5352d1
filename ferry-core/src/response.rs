use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Envelope;
use crate::storage::EntryMeta;

/// Outcome class of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
    Info,
}

/// Action-specific fields carried alongside `action` and `status`.
///
/// Serialized untagged and flattened into the response object, so the wire
/// form stays the flat JSON document operators already consume.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    #[serde(rename_all = "camelCase")]
    Pong { timestamp: DateTime<Utc> },
    Listing {
        path: String,
        files: Vec<EntryMeta>,
    },
    Entry(EntryMeta),
    #[serde(rename_all = "camelCase")]
    Transfer {
        file_name: String,
        path: String,
        size: u64,
    },
    #[serde(rename_all = "camelCase")]
    Removed { file_name: String, path: String },
    #[serde(rename_all = "camelCase")]
    DirCreated { dir_name: String, path: String },
    #[serde(rename_all = "camelCase")]
    Progress {
        message_id: String,
        received: u32,
        total: u32,
        progress: f64,
        complete: bool,
    },
}

/// Reply to exactly one command, published as a text message.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub action: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub payload: Option<ResponsePayload>,
}

impl Response {
    pub fn success(action: impl Into<String>, payload: ResponsePayload) -> Self {
        Self {
            action: action.into(),
            status: Status::Success,
            message: None,
            payload: Some(payload),
        }
    }

    pub fn error(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            status: Status::Error,
            message: Some(message.into()),
            payload: None,
        }
    }

    pub fn info(action: impl Into<String>, payload: ResponsePayload) -> Self {
        Self {
            action: action.into(),
            status: Status::Info,
            message: None,
            payload: Some(payload),
        }
    }

    /// The reply to `ping`, stamped with the current time.
    pub fn pong() -> Self {
        Self::success(
            "pong",
            ResponsePayload::Pong {
                timestamp: Utc::now(),
            },
        )
    }

    /// Serializes the response into a text envelope ready for publication.
    pub fn to_envelope(&self) -> Result<Envelope, serde_json::Error> {
        Ok(Envelope::text(serde_json::to_string(self)?))
    }
}
