use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::fs;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use ferry_core::{Engine, EngineConfig, EngineEvent, EngineHandle, LocalStorage};
use ferry_transport::{ChunkCodec, CodecConfig, CodecStats, TcpPubSub};

use crate::config::{Config, TransportConfig};

/// Ties the transport, chunk codec and engine together for one agent.
pub struct Daemon {
    config: Config,
    engine: Option<EngineHandle>,
    codec_task: Option<JoinHandle<CodecStats>>,
    event_task: Option<JoinHandle<()>>,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            engine: None,
            codec_task: None,
            event_task: None,
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        let device_id = resolve_device_id(&self.config.device.id);
        info!("device id: {}", device_id);

        fs::create_dir_all(&self.config.device.storage_root)
            .await
            .with_context(|| {
                format!(
                    "failed to create storage root {}",
                    self.config.device.storage_root
                )
            })?;
        let storage = Arc::new(LocalStorage::new(&self.config.device.storage_root));
        info!("storage root: {}", self.config.device.storage_root);

        let transport = TcpPubSub::connect(
            &self.config.transport.broker_addr,
            &self.config.transport.channel,
        )
        .await
        .with_context(|| {
            format!(
                "failed to connect to broker at {}",
                self.config.transport.broker_addr
            )
        })?;
        info!(
            "connected to broker at {} on channel {}",
            self.config.transport.broker_addr, self.config.transport.channel
        );

        let codec_config = codec_config_for(&device_id, &self.config.transport);
        let (link, codec_task) = ChunkCodec::spawn(transport, codec_config);

        let mut engine_config = EngineConfig::new(device_id);
        engine_config.history_capacity = self.config.device.history_capacity;
        engine_config.queue_capacity = self.config.transport.queue_capacity;
        let engine = Engine::new(engine_config).start(storage, link);

        let event_task = tokio::spawn(log_events(engine.subscribe()));

        self.engine = Some(engine);
        self.codec_task = Some(codec_task);
        self.event_task = Some(event_task);
        Ok(())
    }

    pub async fn stop(&mut self) {
        info!("stopping services");

        if let Some(task) = self.event_task.take() {
            task.abort();
        }
        if let Some(engine) = self.engine.take() {
            engine.shutdown().await;
        }
        // Engine shutdown drops the codec's channel ends, so the codec task
        // finishes on its own and hands back its counters.
        if let Some(task) = self.codec_task.take() {
            match task.await {
                Ok(stats) => info!(
                    "codec finished: {} messages sent, {} reassembled, {} invalid frames",
                    stats.messages_sent, stats.messages_reassembled, stats.invalid_frames
                ),
                Err(err) => error!("codec task failed: {}", err),
            }
        }

        info!("all services stopped");
    }
}

fn resolve_device_id(configured: &str) -> String {
    if configured.is_empty() {
        format!("ferry-{:08x}", fastrand::u32(..))
    } else {
        configured.to_string()
    }
}

/// Translates the `[transport]` config section into codec tuning.
fn codec_config_for(device_id: &str, transport: &TransportConfig) -> CodecConfig {
    let mut config = CodecConfig::new(device_id);
    config.chunk_size = transport.chunk_size;
    // tokio::time::interval panics on a zero period, and the codec's
    // channels need at least one slot.
    config.telemetry_interval = Duration::from_millis(transport.telemetry_interval_ms.max(1));
    config.reassembly_timeout = Duration::from_secs(transport.reassembly_timeout_secs);
    config.queue_capacity = transport.queue_capacity.max(1);
    config
}

/// Mirrors engine activity into the daemon log.
async fn log_events(mut events: broadcast::Receiver<EngineEvent>) {
    loop {
        match events.recv().await {
            Ok(EngineEvent::Received(envelope)) => {
                debug!(
                    "received {} message from {}",
                    envelope.kind,
                    envelope.origin_device_id.as_deref().unwrap_or("<unknown>")
                );
            }
            Ok(EngineEvent::TextReceived(_)) => {}
            Ok(EngineEvent::ImageReceived(envelope)) => {
                info!("image message received ({} bytes)", envelope.body.len());
            }
            Ok(EngineEvent::FileReceived(envelope)) => {
                info!(
                    "file message received: {}",
                    envelope.file_name.as_deref().unwrap_or("<unnamed>")
                );
            }
            Ok(EngineEvent::PublishRequested(envelope)) => {
                debug!("publishing {} message", envelope.kind);
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("event log fell behind, {} events skipped", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
