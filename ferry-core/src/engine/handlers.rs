use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::command::Command;
use crate::message::Envelope;
use crate::response::{Response, ResponsePayload};
use crate::storage::{Storage, StorageError};

#[derive(Debug, Error)]
pub(crate) enum HandlerError {
    #[error("Unknown command")]
    Unknown,
    #[error("{0}")]
    Invalid(String),
    #[error("publish channel closed")]
    Publish,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Runs one command against storage and builds its success response.
///
/// `outbound` is only touched by `download`, which publishes the file body
/// as its own message before acknowledging.
pub(crate) async fn execute<S: Storage>(
    command: Command,
    storage: &S,
    outbound: &mpsc::Sender<Envelope>,
) -> Result<Response, HandlerError> {
    match command {
        Command::Ping => Ok(Response::pong()),

        Command::List { path } => {
            let path = path.unwrap_or_default();
            let files = storage.list(&path).await?;
            Ok(Response::success(
                "list",
                ResponsePayload::Listing { path, files },
            ))
        }

        Command::Upload {
            file_name,
            data,
            path,
        } => {
            let path = path.unwrap_or_default();
            let bytes = BASE64
                .decode(data.as_bytes())
                .map_err(|_| HandlerError::Invalid("Invalid file data".to_string()))?;
            let size = storage.write(&path, &file_name, &bytes).await?;
            Ok(Response::success(
                "upload",
                ResponsePayload::Transfer {
                    file_name,
                    path,
                    size,
                },
            ))
        }

        Command::Download { file_name, path } => {
            let path = path.unwrap_or_default();
            let bytes = storage.read(&path, &file_name).await?;
            let size = bytes.len() as u64;
            let envelope = Envelope::file(file_name.clone(), BASE64.encode(&bytes), size);
            outbound
                .send(envelope)
                .await
                .map_err(|_| HandlerError::Publish)?;
            Ok(Response::success(
                "download",
                ResponsePayload::Transfer {
                    file_name,
                    path,
                    size,
                },
            ))
        }

        Command::Delete { file_name, path } => {
            let path = path.unwrap_or_default();
            storage.remove(&path, &file_name).await?;
            Ok(Response::success(
                "delete",
                ResponsePayload::Removed { file_name, path },
            ))
        }

        Command::Mkdir { dir_name, path } => {
            let path = path.unwrap_or_default();
            storage.make_dir(&path, &dir_name).await?;
            Ok(Response::success(
                "mkdir",
                ResponsePayload::DirCreated { dir_name, path },
            ))
        }

        Command::Info { file_name, path } => {
            let meta = storage.stat(&path.unwrap_or_default(), &file_name).await?;
            Ok(Response::success("info", ResponsePayload::Entry(meta)))
        }

        Command::Rename {
            old_name,
            new_name,
            path,
        } => {
            let meta = storage
                .rename(&path.unwrap_or_default(), &old_name, &new_name)
                .await?;
            Ok(Response::success("rename", ResponsePayload::Entry(meta)))
        }

        Command::Unknown => Err(HandlerError::Unknown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Status;
    use crate::storage::LocalStorage;

    fn storage() -> (tempfile::TempDir, LocalStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        (dir, storage)
    }

    #[tokio::test]
    async fn test_ping_answers_pong() {
        let (_dir, storage) = storage();
        let (outbound, _rx) = mpsc::channel(4);
        let response = execute(Command::Ping, &storage, &outbound).await.unwrap();
        assert_eq!(response.action, "pong");
        assert_eq!(response.status, Status::Success);
    }

    #[tokio::test]
    async fn test_upload_rejects_bad_base64_before_writing() {
        let (dir, storage) = storage();
        let (outbound, _rx) = mpsc::channel(4);
        let err = execute(
            Command::Upload {
                file_name: "a.txt".to_string(),
                data: "not base64!!".to_string(),
                path: None,
            },
            &storage,
            &outbound,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HandlerError::Invalid(_)));
        assert_eq!(err.to_string(), "Invalid file data");
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_download_publishes_file_before_ack() {
        let (_dir, storage) = storage();
        storage.write("", "pic.png", &[1, 2, 3]).await.unwrap();

        let (outbound, mut published) = mpsc::channel(4);
        let response = execute(
            Command::Download {
                file_name: "pic.png".to_string(),
                path: None,
            },
            &storage,
            &outbound,
        )
        .await
        .unwrap();

        let file_env = published.try_recv().unwrap();
        assert_eq!(file_env.kind, crate::message::MessageKind::File);
        assert_eq!(file_env.file_name.as_deref(), Some("pic.png"));
        assert_eq!(file_env.body, BASE64.encode([1u8, 2, 3]));
        assert_eq!(response.action, "download");
        assert_eq!(response.status, Status::Success);
    }

    #[tokio::test]
    async fn test_download_missing_file_publishes_nothing() {
        let (_dir, storage) = storage();
        let (outbound, mut published) = mpsc::channel(4);
        let err = execute(
            Command::Download {
                file_name: "ghost.bin".to_string(),
                path: None,
            },
            &storage,
            &outbound,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HandlerError::Storage(StorageError::NotFound)));
        assert!(published.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_command_never_touches_storage() {
        let (dir, storage) = storage();
        let (outbound, _rx) = mpsc::channel(4);
        let err = execute(Command::Unknown, &storage, &outbound)
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Unknown));
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }
}
