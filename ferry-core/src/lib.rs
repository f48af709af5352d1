pub mod command;
pub mod engine;
pub mod history;
pub mod message;
pub mod response;
pub mod storage;
pub mod telemetry;

pub use command::Command;
pub use engine::{CodecLink, Engine, EngineConfig, EngineError, EngineEvent, EngineHandle};
pub use history::History;
pub use message::{Envelope, MessageKind};
pub use response::{Response, ResponsePayload, Status};
pub use storage::{EntryMeta, LocalStorage, Storage, StorageError};
pub use telemetry::ChunkProgress;
