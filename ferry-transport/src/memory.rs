use async_trait::async_trait;
use log::warn;
use tokio::sync::broadcast;

use crate::{PubSub, TransportError};

/// In-process pub/sub hub, mainly for tests and single-process setups.
///
/// Every publication is fanned out to all attached clients, the publisher
/// included, which mirrors how the real channel behaves.
pub struct MemoryHub {
    sender: broadcast::Sender<Vec<u8>>,
}

impl MemoryHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn attach(&self) -> MemoryPubSub {
        MemoryPubSub {
            sender: self.sender.clone(),
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new(256)
    }
}

/// One client attached to a `MemoryHub`.
pub struct MemoryPubSub {
    sender: broadcast::Sender<Vec<u8>>,
    receiver: broadcast::Receiver<Vec<u8>>,
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.sender
            .send(payload.to_vec())
            .map(|_| ())
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Ok(Some(payload)),
                // The hub is as lossy as the real channel: skip and go on.
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("memory hub dropped {missed} frames for a slow client");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_clients_including_sender() {
        let hub = MemoryHub::new(8);
        let mut a = hub.attach();
        let mut b = hub.attach();

        a.publish(b"ping").await.unwrap();
        assert_eq!(a.recv().await.unwrap().unwrap(), b"ping");
        assert_eq!(b.recv().await.unwrap().unwrap(), b"ping");
    }

    #[tokio::test]
    async fn test_slow_client_loses_frames_but_keeps_going() {
        let hub = MemoryHub::new(2);
        let mut a = hub.attach();
        let mut b = hub.attach();

        for i in 0..5u8 {
            a.publish(&[i]).await.unwrap();
        }
        // The two newest frames survive the overrun.
        assert_eq!(b.recv().await.unwrap().unwrap(), [3]);
        assert_eq!(b.recv().await.unwrap().unwrap(), [4]);
    }
}
