use async_trait::async_trait;
use thiserror::Error;

pub mod broker;
pub mod codec;
pub mod framing;
pub mod memory;
pub mod tcp;

pub use broker::Broker;
pub use codec::{ChunkCodec, ChunkFrame, CodecConfig, CodecStats};
pub use memory::{MemoryHub, MemoryPubSub};
pub use tcp::TcpPubSub;

/// Errors from pub/sub transports.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("connection closed")]
    Closed,
    #[error("encoding: {0}")]
    Encoding(#[from] bincode::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A connection to one pub/sub channel.
///
/// `publish` hands an opaque payload to every current subscriber of the
/// channel, including the publisher itself. `recv` yields the next payload,
/// or `None` once the connection is gone. The channel gives no delivery
/// guarantees; payloads may be dropped or duplicated and consumers must
/// cope.
#[async_trait]
pub trait PubSub: Send + 'static {
    async fn publish(&mut self, payload: &[u8]) -> Result<(), TransportError>;
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}
