use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::{broadcast, mpsc, RwLock};

use crate::engine::EngineEvent;
use crate::history::History;
use crate::message::{Envelope, MessageKind};

/// Routes traffic by kind and owns the message history.
///
/// Inbound envelopes are recorded and mirrored as events; text bodies go on
/// to the dispatcher. Outbound requests are stamped with the device id,
/// recorded as sent and forwarded to the codec.
pub(crate) struct Classifier {
    pub device_id: String,
    pub history: Arc<RwLock<History>>,
    pub events: broadcast::Sender<EngineEvent>,
    pub to_dispatcher: mpsc::Sender<Envelope>,
    pub to_codec: mpsc::Sender<Envelope>,
}

impl Classifier {
    pub(crate) async fn run(
        self,
        mut inbound: mpsc::Receiver<Envelope>,
        mut requests: mpsc::Receiver<Envelope>,
    ) {
        loop {
            tokio::select! {
                maybe = inbound.recv() => match maybe {
                    Some(envelope) => self.classify_inbound(envelope).await,
                    None => break,
                },
                Some(envelope) = requests.recv() => self.classify_outbound(envelope).await,
            }
        }
        debug!("message classifier stopped");
    }

    async fn classify_inbound(&self, envelope: Envelope) {
        debug!(
            "received {} message ({} bytes)",
            envelope.kind,
            envelope.body.len()
        );
        self.history.write().await.record_received(envelope.clone());
        let _ = self.events.send(EngineEvent::Received(envelope.clone()));

        match envelope.kind {
            MessageKind::Image => {
                let _ = self.events.send(EngineEvent::ImageReceived(envelope));
            }
            MessageKind::Text => {
                let _ = self.events.send(EngineEvent::TextReceived(envelope.clone()));
                if self.to_dispatcher.send(envelope).await.is_err() {
                    warn!("dispatcher unavailable, text message dropped");
                }
            }
            MessageKind::File => {
                let _ = self.events.send(EngineEvent::FileReceived(envelope));
            }
            MessageKind::Other(ref kind) => {
                warn!("no route for message kind: {kind}");
            }
        }
    }

    async fn classify_outbound(&self, mut envelope: Envelope) {
        if !envelope.kind.is_publishable() {
            warn!("refusing to publish message kind: {}", envelope.kind);
            return;
        }
        envelope.origin_device_id = Some(self.device_id.clone());
        self.history.write().await.record_sent(envelope.clone());
        let _ = self.events.send(EngineEvent::PublishRequested(envelope.clone()));
        if self.to_codec.send(envelope).await.is_err() {
            warn!("chunk codec unavailable, outbound message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        inbound: mpsc::Sender<Envelope>,
        requests: mpsc::Sender<Envelope>,
        dispatched: mpsc::Receiver<Envelope>,
        published: mpsc::Receiver<Envelope>,
        history: Arc<RwLock<History>>,
        events: broadcast::Receiver<EngineEvent>,
    }

    fn spawn_classifier() -> Harness {
        let (inbound_tx, inbound_rx) = mpsc::channel(8);
        let (request_tx, request_rx) = mpsc::channel(8);
        let (text_tx, text_rx) = mpsc::channel(8);
        let (codec_tx, codec_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = broadcast::channel(32);
        let history = Arc::new(RwLock::new(History::default()));

        let classifier = Classifier {
            device_id: "dev-test".to_string(),
            history: Arc::clone(&history),
            events: event_tx,
            to_dispatcher: text_tx,
            to_codec: codec_tx,
        };
        tokio::spawn(classifier.run(inbound_rx, request_rx));

        Harness {
            inbound: inbound_tx,
            requests: request_tx,
            dispatched: text_rx,
            published: codec_rx,
            history,
            events: event_rx,
        }
    }

    #[tokio::test]
    async fn test_text_messages_are_recorded_and_dispatched() {
        let mut harness = spawn_classifier();
        harness
            .inbound
            .send(Envelope::text(r#"{"action":"ping"}"#))
            .await
            .unwrap();

        let forwarded = harness.dispatched.recv().await.unwrap();
        assert_eq!(forwarded.body, r#"{"action":"ping"}"#);
        assert_eq!(harness.history.read().await.received_len(), 1);
    }

    #[tokio::test]
    async fn test_file_messages_emit_event_without_dispatch() {
        let mut harness = spawn_classifier();
        harness
            .inbound
            .send(Envelope::file("a.bin", "AA==", 1))
            .await
            .unwrap();

        loop {
            match harness.events.recv().await.unwrap() {
                EngineEvent::FileReceived(env) => {
                    assert_eq!(env.file_name.as_deref(), Some("a.bin"));
                    break;
                }
                _ => {}
            }
        }
        assert!(harness.dispatched.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_kind_is_recorded_but_not_routed() {
        let mut harness = spawn_classifier();
        let mut env = Envelope::text("whatever");
        env.kind = MessageKind::Other("audio".to_string());
        harness.inbound.send(env).await.unwrap();

        loop {
            match harness.events.recv().await.unwrap() {
                EngineEvent::Received(env) => {
                    assert_eq!(env.kind.as_str(), "audio");
                    break;
                }
                _ => {}
            }
        }
        assert_eq!(harness.history.read().await.received_len(), 1);
        assert!(harness.dispatched.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_outbound_is_stamped_and_recorded_as_sent() {
        let mut harness = spawn_classifier();
        harness
            .requests
            .send(Envelope::image("cGl4ZWxz"))
            .await
            .unwrap();

        let published = harness.published.recv().await.unwrap();
        assert_eq!(published.origin_device_id.as_deref(), Some("dev-test"));

        let history = harness.history.read().await;
        assert_eq!(history.sent_len(), 1);
        assert_eq!(history.latest_sent().unwrap().body, "cGl4ZWxz");
        assert_eq!(history.received_len(), 0);
    }
}
