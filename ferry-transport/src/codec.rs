use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use ferry_core::{ChunkProgress, CodecLink, Envelope};

use crate::PubSub;

/// One slice of a chunked message as it crosses the channel.
///
/// `last_index` travels in every frame so a receiver can size the message
/// from whichever chunk happens to arrive first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkFrame {
    pub message_id: String,
    pub origin: String,
    pub index: u32,
    pub last_index: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("chunk index {index} past last index {last_index}")]
    IndexOutOfRange { index: u32, last_index: u32 },
    #[error("last index {last_index} leaves no room for the chunk count")]
    CountOverflow { last_index: u32 },
    #[error("chunk count changed for message {message_id}: {expected} then {actual}")]
    CountMismatch {
        message_id: String,
        expected: u32,
        actual: u32,
    },
}

/// Tuning for the chunk codec.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Identity stamped on every outgoing frame; frames carrying it back
    /// are dropped as echoes.
    pub device_id: String,
    /// Payload bytes per chunk.
    pub chunk_size: usize,
    /// How often in-flight progress is sampled.
    pub telemetry_interval: Duration,
    /// Partial messages older than this are discarded.
    pub reassembly_timeout: Duration,
    /// Depth of the channels toward the engine.
    pub queue_capacity: usize,
}

impl CodecConfig {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            chunk_size: 32 * 1024,
            telemetry_interval: Duration::from_millis(500),
            reassembly_timeout: Duration::from_secs(60),
            queue_capacity: 64,
        }
    }
}

/// Counters kept while the codec runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodecStats {
    pub messages_sent: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub messages_reassembled: u64,
    pub duplicate_frames: u64,
    pub own_frames_dropped: u64,
    pub invalid_frames: u64,
    pub expired_messages: u64,
}

struct Pending {
    chunks: BTreeMap<u32, Vec<u8>>,
    chunk_count: u32,
    first_seen: Instant,
}

/// Rebuilds message payloads from frames arriving in any order.
///
/// Entries are keyed by `(origin, message_id)` so two peers reusing an id
/// cannot corrupt each other's messages. Exact duplicates are absorbed
/// silently; a frame that contradicts the recorded chunk count is rejected.
struct Reassembler {
    pending: HashMap<(String, String), Pending>,
    timeout: Duration,
    stats: CodecStats,
}

impl Reassembler {
    fn new(timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            timeout,
            stats: CodecStats::default(),
        }
    }

    /// Feeds one frame; returns the full payload once the message completes.
    fn accept(&mut self, frame: ChunkFrame) -> Result<Option<Vec<u8>>, CodecError> {
        let ChunkFrame {
            message_id,
            origin,
            index,
            last_index,
            payload,
        } = frame;

        if index > last_index {
            self.stats.invalid_frames += 1;
            return Err(CodecError::IndexOutOfRange { index, last_index });
        }
        // A last index of u32::MAX has no representable chunk count; the
        // frame is rejected before any entry is opened for it.
        let Some(chunk_count) = last_index.checked_add(1) else {
            self.stats.invalid_frames += 1;
            return Err(CodecError::CountOverflow { last_index });
        };
        let key = (origin, message_id);
        let pending = self.pending.entry(key.clone()).or_insert_with(|| Pending {
            chunks: BTreeMap::new(),
            chunk_count,
            first_seen: Instant::now(),
        });
        if pending.chunk_count != chunk_count {
            self.stats.invalid_frames += 1;
            return Err(CodecError::CountMismatch {
                message_id: key.1,
                expected: pending.chunk_count,
                actual: chunk_count,
            });
        }
        if pending.chunks.insert(index, payload).is_some() {
            self.stats.duplicate_frames += 1;
            return Ok(None);
        }
        if pending.chunks.len() as u32 == chunk_count {
            if let Some(done) = self.pending.remove(&key) {
                self.stats.messages_reassembled += 1;
                let mut assembled = Vec::new();
                for chunk in done.chunks.into_values() {
                    assembled.extend_from_slice(&chunk);
                }
                return Ok(Some(assembled));
            }
        }
        Ok(None)
    }

    /// Progress of every in-flight message.
    fn progress(&self) -> Vec<ChunkProgress> {
        self.pending
            .iter()
            .map(|((_, message_id), pending)| {
                let percent =
                    pending.chunks.len() as f64 / f64::from(pending.chunk_count) * 100.0;
                ChunkProgress::new(message_id.clone(), pending.chunk_count, percent)
            })
            .collect()
    }

    /// Drops partial messages older than the timeout, returning the count.
    fn evict_expired(&mut self) -> usize {
        let before = self.pending.len();
        let timeout = self.timeout;
        self.pending
            .retain(|_, pending| pending.first_seen.elapsed() < timeout);
        let expired = before - self.pending.len();
        self.stats.expired_messages += expired as u64;
        expired
    }

    fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

/// Splits a payload into frames of at most `chunk_size` bytes.
fn split_frames(
    device_id: &str,
    message_id: &str,
    payload: &[u8],
    chunk_size: usize,
) -> Vec<ChunkFrame> {
    let chunk_size = chunk_size.max(1);
    let total = payload.len().div_ceil(chunk_size).max(1);
    let last_index = (total - 1) as u32;
    (0..total)
        .map(|i| {
            let start = i * chunk_size;
            let end = (start + chunk_size).min(payload.len());
            ChunkFrame {
                message_id: message_id.to_string(),
                origin: device_id.to_string(),
                index: i as u32,
                last_index,
                payload: payload[start..end].to_vec(),
            }
        })
        .collect()
}

/// The chunk codec: splits outbound envelopes into frames and rebuilds
/// inbound ones, reporting reassembly progress as telemetry.
pub struct ChunkCodec;

impl ChunkCodec {
    /// Spawns the codec over `transport` and returns the channel ends the
    /// engine consumes, plus the task handle. The handle resolves to the
    /// final [`CodecStats`] once the codec stops.
    pub fn spawn<T: PubSub>(
        transport: T,
        config: CodecConfig,
    ) -> (CodecLink, JoinHandle<CodecStats>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.queue_capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.queue_capacity);
        let (telemetry_tx, telemetry_rx) = mpsc::channel(config.queue_capacity);

        let task = tokio::spawn(run(
            transport,
            config,
            inbound_tx,
            outbound_rx,
            telemetry_tx,
        ));

        (
            CodecLink {
                inbound: inbound_rx,
                outbound: outbound_tx,
                telemetry: telemetry_rx,
            },
            task,
        )
    }
}

async fn run<T: PubSub>(
    mut transport: T,
    config: CodecConfig,
    inbound: mpsc::Sender<Envelope>,
    mut outbound: mpsc::Receiver<Envelope>,
    telemetry: mpsc::Sender<Vec<ChunkProgress>>,
) -> CodecStats {
    let mut reassembler = Reassembler::new(config.reassembly_timeout);
    let mut ticker = tokio::time::interval(config.telemetry_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            received = transport.recv() => match received {
                Ok(Some(bytes)) => {
                    handle_frame(&config, &mut reassembler, &bytes, &inbound, &telemetry).await;
                }
                Ok(None) => {
                    info!("transport closed, codec stopping");
                    break;
                }
                Err(err) => {
                    error!("transport receive failed: {err}");
                    break;
                }
            },
            request = outbound.recv() => match request {
                Some(envelope) => {
                    publish_envelope(&mut transport, &config, &mut reassembler, envelope).await;
                }
                None => {
                    debug!("engine closed its outbound channel, codec stopping");
                    break;
                }
            },
            _ = ticker.tick() => {
                let expired = reassembler.evict_expired();
                if expired > 0 {
                    warn!("discarded {expired} stale partial messages");
                }
                if reassembler.in_flight() > 0 {
                    let _ = telemetry.send(reassembler.progress()).await;
                }
            }
        }
    }
    let stats = reassembler.stats;
    debug!("codec stopped: {stats:?}");
    stats
}

async fn handle_frame(
    config: &CodecConfig,
    reassembler: &mut Reassembler,
    bytes: &[u8],
    inbound: &mpsc::Sender<Envelope>,
    telemetry: &mpsc::Sender<Vec<ChunkProgress>>,
) {
    reassembler.stats.frames_received += 1;
    let frame: ChunkFrame = match bincode::deserialize(bytes) {
        Ok(frame) => frame,
        Err(err) => {
            reassembler.stats.invalid_frames += 1;
            warn!("dropping undecodable frame: {err}");
            return;
        }
    };
    if frame.origin == config.device_id {
        reassembler.stats.own_frames_dropped += 1;
        return;
    }

    let message_id = frame.message_id.clone();
    // accept() rejects a u32::MAX last index, so a saturated count is
    // never read back.
    let chunk_count = frame.last_index.saturating_add(1);
    let assembled = match reassembler.accept(frame) {
        Ok(Some(assembled)) => assembled,
        Ok(None) => return,
        Err(err) => {
            warn!("rejected frame: {err}");
            return;
        }
    };

    // A message that was actually in flight gets a final 100% sample; the
    // periodic tick may never observe the completed state.
    if chunk_count > 1 {
        let sample = vec![ChunkProgress::new(message_id, chunk_count, 100.0)];
        let _ = telemetry.send(sample).await;
    }

    match bincode::deserialize::<Envelope>(&assembled) {
        Ok(envelope) => {
            if inbound.send(envelope).await.is_err() {
                debug!("engine inbound channel closed, message dropped");
            }
        }
        Err(err) => {
            reassembler.stats.invalid_frames += 1;
            warn!("reassembled payload was not a valid envelope: {err}");
        }
    }
}

async fn publish_envelope<T: PubSub>(
    transport: &mut T,
    config: &CodecConfig,
    reassembler: &mut Reassembler,
    envelope: Envelope,
) {
    let bytes = match bincode::serialize(&envelope) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("failed to encode envelope: {err}");
            return;
        }
    };
    let message_id = format!("{:016x}", fastrand::u64(..));
    let frames = split_frames(&config.device_id, &message_id, &bytes, config.chunk_size);
    debug!(
        "publishing message {message_id} ({} bytes, {} chunks)",
        bytes.len(),
        frames.len()
    );
    for frame in frames {
        let encoded = match bincode::serialize(&frame) {
            Ok(encoded) => encoded,
            Err(err) => {
                error!("failed to encode frame: {err}");
                return;
            }
        };
        if let Err(err) = transport.publish(&encoded).await {
            warn!("publish failed for message {message_id}: {err}");
            return;
        }
        reassembler.stats.frames_sent += 1;
    }
    reassembler.stats.messages_sent += 1;
}
