use log::{debug, error, warn};
use tokio::sync::mpsc;

use crate::message::Envelope;
use crate::response::{Response, ResponsePayload};
use crate::telemetry::ChunkProgress;

/// Turns codec telemetry into `upload-progress` responses.
///
/// Reporting every chunk of a large transfer would flood the channel, so a
/// sample passes only when the derived received count is even or the
/// transfer is complete. Bad samples are logged and skipped; telemetry can
/// never fail a transfer.
pub(crate) async fn run(
    mut telemetry: mpsc::Receiver<Vec<ChunkProgress>>,
    outbound: mpsc::Sender<Envelope>,
) {
    while let Some(batch) = telemetry.recv().await {
        for update in batch {
            let Some(response) = sample(&update) else {
                continue;
            };
            match response.to_envelope() {
                Ok(envelope) => {
                    if outbound.send(envelope).await.is_err() {
                        warn!("progress report dropped, engine is shutting down");
                        return;
                    }
                }
                Err(err) => error!("failed to serialize progress report: {err}"),
            }
        }
    }
    debug!("progress aggregator stopped");
}

/// Applies the reporting rule to one telemetry sample.
pub(crate) fn sample(update: &ChunkProgress) -> Option<Response> {
    if update.chunk_count == 0 {
        warn!(
            "telemetry for message {} reports zero chunks",
            update.message_id
        );
        return None;
    }
    let derived = (update.progress_percent / 100.0 * f64::from(update.chunk_count)).round();
    let received = (derived as u32).min(update.chunk_count);
    if received % 2 != 0 && received != update.chunk_count {
        return None;
    }
    Some(Response::info(
        "upload-progress",
        ResponsePayload::Progress {
            message_id: update.message_id.clone(),
            received,
            total: update.chunk_count,
            progress: update.progress_percent,
            complete: update.progress_percent >= 100.0,
        },
    ))
}
