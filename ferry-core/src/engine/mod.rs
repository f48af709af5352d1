//! The control engine: a classifier, a command dispatcher and a progress
//! aggregator running as channel-connected tasks.
//!
//! Inbound envelopes arrive from the chunk codec, get recorded and routed by
//! kind; text bodies are parsed as commands and answered with exactly one
//! response each; codec telemetry is throttled into progress responses.
//! Everything the engine wants published flows back out through a single
//! outbound channel to the codec.

mod classifier;
mod dispatcher;
mod handlers;
mod progress;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::history::History;
use crate::message::{Envelope, MessageKind};
use crate::storage::Storage;
use crate::telemetry::ChunkProgress;

/// Tuning for the engine tasks.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Identity stamped on every published message.
    pub device_id: String,
    /// Ring-buffer capacity for each history direction.
    pub history_capacity: usize,
    /// Depth of the internal mpsc queues.
    pub queue_capacity: usize,
    /// Buffer size of the event broadcast channel.
    pub event_capacity: usize,
}

impl EngineConfig {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            history_capacity: History::DEFAULT_CAPACITY,
            queue_capacity: 64,
            event_capacity: 128,
        }
    }
}

/// Channel ends tying the engine to its chunk codec.
pub struct CodecLink {
    /// Fully reassembled envelopes received from peers.
    pub inbound: mpsc::Receiver<Envelope>,
    /// Envelopes the codec should split and publish.
    pub outbound: mpsc::Sender<Envelope>,
    /// Periodic delivery-progress samples for in-flight messages.
    pub telemetry: mpsc::Receiver<Vec<ChunkProgress>>,
}

/// Classification events mirrored to subscribers as they happen.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Received(Envelope),
    ImageReceived(Envelope),
    TextReceived(Envelope),
    FileReceived(Envelope),
    PublishRequested(Envelope),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot publish message kind: {0}")]
    UnsupportedKind(String),
    #[error("engine is shut down")]
    Closed,
}

/// Builder for a running engine.
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Spawns the engine tasks and returns the handle used to drive them.
    pub fn start<S: Storage>(self, storage: Arc<S>, link: CodecLink) -> EngineHandle {
        let EngineConfig {
            device_id,
            history_capacity,
            queue_capacity,
            event_capacity,
        } = self.config;

        let history = Arc::new(RwLock::new(History::new(history_capacity)));
        let (events, _) = broadcast::channel(event_capacity);
        let (request_tx, request_rx) = mpsc::channel(queue_capacity);
        let (text_tx, text_rx) = mpsc::channel(queue_capacity);

        let classifier = classifier::Classifier {
            device_id: device_id.clone(),
            history: Arc::clone(&history),
            events: events.clone(),
            to_dispatcher: text_tx,
            to_codec: link.outbound,
        };

        let tasks = vec![
            tokio::spawn(classifier.run(link.inbound, request_rx)),
            tokio::spawn(dispatcher::run(text_rx, request_tx.clone(), storage)),
            tokio::spawn(progress::run(link.telemetry, request_tx.clone())),
        ];

        EngineHandle {
            device_id,
            outbound: request_tx,
            events,
            history,
            tasks,
        }
    }
}

/// Handle to a running engine.
///
/// Dropping the handle leaves the tasks running (they stop once the codec
/// side closes); `shutdown` tears them down immediately.
pub struct EngineHandle {
    device_id: String,
    outbound: mpsc::Sender<Envelope>,
    events: broadcast::Sender<EngineEvent>,
    history: Arc<RwLock<History>>,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Subscribes to classification events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Queues a message for publication.
    ///
    /// The kind check happens here, before anything is enqueued, so a
    /// rejected message leaves no trace in history or on the wire.
    pub async fn publish(&self, envelope: Envelope) -> Result<(), EngineError> {
        if !envelope.kind.is_publishable() {
            return Err(EngineError::UnsupportedKind(envelope.kind.to_string()));
        }
        self.outbound
            .send(envelope)
            .await
            .map_err(|_| EngineError::Closed)
    }

    pub async fn latest_received(&self) -> Option<Envelope> {
        self.history.read().await.latest_received().cloned()
    }

    pub async fn latest_received_of_kind(&self, kind: &MessageKind) -> Option<Envelope> {
        self.history
            .read()
            .await
            .latest_received_of_kind(kind)
            .cloned()
    }

    /// Shared history, for diagnostics and tests.
    pub fn history(&self) -> Arc<RwLock<History>> {
        Arc::clone(&self.history)
    }

    /// Aborts the engine tasks and waits for them to finish.
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks {
            let _ = task.await;
        }
    }
}
