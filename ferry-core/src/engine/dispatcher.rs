use std::sync::Arc;

use log::{debug, error, warn};
use tokio::sync::mpsc;

use crate::command::Command;
use crate::engine::handlers::{self, HandlerError};
use crate::message::Envelope;
use crate::response::Response;
use crate::storage::{Storage, StorageError};

/// Parses text bodies as commands and answers each with one response.
///
/// Handlers run on their own tasks so a slow filesystem operation never
/// blocks the next command. Responses are published in completion order.
pub(crate) async fn run<S: Storage>(
    mut texts: mpsc::Receiver<Envelope>,
    outbound: mpsc::Sender<Envelope>,
    storage: Arc<S>,
) {
    while let Some(envelope) = texts.recv().await {
        let storage = Arc::clone(&storage);
        let outbound = outbound.clone();
        tokio::spawn(async move {
            let response = respond(&envelope.body, storage.as_ref(), &outbound).await;
            send_response(&outbound, &response).await;
        });
    }
    debug!("command dispatcher stopped");
}

/// Produces the single response for one text body.
pub(crate) async fn respond<S: Storage>(
    body: &str,
    storage: &S,
    outbound: &mpsc::Sender<Envelope>,
) -> Response {
    let command = match serde_json::from_str::<Command>(body) {
        Ok(command) => command,
        Err(err) => {
            warn!("unparseable command: {err}");
            return Response::error("error", "Failed to process command");
        }
    };

    let action = command.action();
    debug!("dispatching {action} command");
    match handlers::execute(command, storage, outbound).await {
        Ok(response) => response,
        Err(err) => {
            warn!("{action} command failed: {err}");
            Response::error(action, failure_message(action, &err))
        }
    }
}

/// Maps a handler failure to its operator-facing message. Expected domain
/// failures keep their short stable text; everything else is prefixed with
/// the operation name.
fn failure_message(action: &str, err: &HandlerError) -> String {
    match err {
        HandlerError::Storage(StorageError::Io(_)) | HandlerError::Publish => {
            format!("{action}: {err}")
        }
        _ => err.to_string(),
    }
}

async fn send_response(outbound: &mpsc::Sender<Envelope>, response: &Response) {
    match response.to_envelope() {
        Ok(envelope) => {
            if outbound.send(envelope).await.is_err() {
                warn!("response dropped, engine is shutting down");
            }
        }
        Err(err) => error!("failed to serialize response: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use serde_json::Value;

    async fn respond_json(storage: &LocalStorage, body: &str) -> Value {
        let (outbound, _rx) = mpsc::channel(8);
        let response = respond(body, storage, &outbound).await;
        serde_json::to_value(&response).unwrap()
    }

    fn storage() -> (tempfile::TempDir, LocalStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        (dir, storage)
    }

    #[tokio::test]
    async fn test_unknown_action_is_answered_without_io() {
        let (dir, storage) = storage();
        let value = respond_json(&storage, r#"{"action":"self-destruct"}"#).await;
        assert_eq!(value["status"], "error");
        assert_eq!(value["message"], "Unknown command");
        // No handler ran, so the root is untouched.
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_unparseable_body_gets_generic_error() {
        let (_dir, storage) = storage();
        let value = respond_json(&storage, "nonsense").await;
        assert_eq!(value["action"], "error");
        assert_eq!(value["status"], "error");
        assert_eq!(value["message"], "Failed to process command");
    }

    #[tokio::test]
    async fn test_known_action_with_missing_field_gets_generic_error() {
        let (_dir, storage) = storage();
        let value = respond_json(&storage, r#"{"action":"upload","fileName":"a.txt"}"#).await;
        assert_eq!(value["status"], "error");
        assert_eq!(value["message"], "Failed to process command");
    }

    #[tokio::test]
    async fn test_delete_missing_file_message() {
        let (_dir, storage) = storage();
        let value = respond_json(
            &storage,
            r#"{"action":"delete","fileName":"ghost.txt"}"#,
        )
        .await;
        assert_eq!(value["action"], "delete");
        assert_eq!(value["status"], "error");
        assert_eq!(value["message"], "File not found");
    }

    #[tokio::test]
    async fn test_list_empty_root() {
        let (_dir, storage) = storage();
        let value = respond_json(&storage, r#"{"action":"list"}"#).await;
        assert_eq!(value["action"], "list");
        assert_eq!(value["status"], "success");
        assert_eq!(value["path"], "");
        assert_eq!(value["files"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_upload_then_download_round_trip() {
        let (_dir, storage) = storage();
        let upload = respond_json(
            &storage,
            r#"{"action":"upload","fileName":"note.txt","data":"aGVsbG8gd29ybGQ="}"#,
        )
        .await;
        assert_eq!(upload["status"], "success");
        assert_eq!(upload["size"], 11);

        let (outbound, mut published) = mpsc::channel(8);
        let response = respond(
            r#"{"action":"download","fileName":"note.txt"}"#,
            &storage,
            &outbound,
        )
        .await;
        let ack = serde_json::to_value(&response).unwrap();
        assert_eq!(ack["status"], "success");
        assert_eq!(ack["fileName"], "note.txt");

        let file_env = published.recv().await.unwrap();
        assert_eq!(file_env.kind, crate::message::MessageKind::File);
        assert_eq!(file_env.body, "aGVsbG8gd29ybGQ=");
        assert_eq!(file_env.file_size, Some(11));
    }

    #[tokio::test]
    async fn test_rename_conflict_leaves_both_entries() {
        let (_dir, storage) = storage();
        respond_json(
            &storage,
            r#"{"action":"upload","fileName":"a.txt","data":"YQ=="}"#,
        )
        .await;
        respond_json(
            &storage,
            r#"{"action":"upload","fileName":"b.txt","data":"Yg=="}"#,
        )
        .await;

        let value = respond_json(
            &storage,
            r#"{"action":"rename","oldName":"a.txt","newName":"b.txt"}"#,
        )
        .await;
        assert_eq!(value["status"], "error");
        assert_eq!(value["message"], "Destination already exists");

        let listing = respond_json(&storage, r#"{"action":"list"}"#).await;
        let names: Vec<_> = listing["files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn test_mkdir_twice_succeeds() {
        let (_dir, storage) = storage();
        for _ in 0..2 {
            let value = respond_json(&storage, r#"{"action":"mkdir","dirName":"logs"}"#).await;
            assert_eq!(value["status"], "success");
            assert_eq!(value["dirName"], "logs");
        }
    }

    #[tokio::test]
    async fn test_traversal_attempt_is_rejected() {
        let (_dir, storage) = storage();
        let value = respond_json(
            &storage,
            r#"{"action":"download","fileName":"../../etc/passwd"}"#,
        )
        .await;
        assert_eq!(value["status"], "error");
        assert!(value["message"]
            .as_str()
            .unwrap()
            .starts_with("Invalid path"));
    }
}
