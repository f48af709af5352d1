use serde::{Deserialize, Serialize};

/// A remote-control command decoded from the body of a text message.
///
/// The `action` field selects the variant; required fields are enforced by
/// the parse itself, so a handler never sees a half-formed command. Actions
/// outside the known set decode to `Unknown`, which the dispatcher answers
/// without touching the filesystem. Unrecognized extra fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Command {
    Ping,
    List {
        path: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Upload {
        file_name: String,
        data: String,
        path: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Download {
        file_name: String,
        path: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Delete {
        file_name: String,
        path: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Mkdir {
        dir_name: String,
        path: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Info {
        file_name: String,
        path: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Rename {
        old_name: String,
        new_name: String,
        path: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl Command {
    /// The action name echoed back in responses.
    pub fn action(&self) -> &'static str {
        match self {
            Command::Ping => "ping",
            Command::List { .. } => "list",
            Command::Upload { .. } => "upload",
            Command::Download { .. } => "download",
            Command::Delete { .. } => "delete",
            Command::Mkdir { .. } => "mkdir",
            Command::Info { .. } => "info",
            Command::Rename { .. } => "rename",
            Command::Unknown => "unknown",
        }
    }
}
