use async_trait::async_trait;
use log::debug;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::framing::{self, WireFrame};
use crate::{PubSub, TransportError};

/// Framed TCP client bound to one broker channel.
pub struct TcpPubSub {
    channel: String,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl TcpPubSub {
    /// Connects to a broker and subscribes to `channel`.
    pub async fn connect(addr: &str, channel: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, mut writer) = stream.into_split();

        let subscribe = WireFrame::Subscribe {
            channel: channel.to_string(),
        }
        .encode()?;
        framing::write_frame(&mut writer, &subscribe).await?;
        debug!("subscribed to channel {channel} at {addr}");

        Ok(Self {
            channel: channel.to_string(),
            reader,
            writer,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl PubSub for TcpPubSub {
    async fn publish(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let frame = WireFrame::Publish {
            channel: self.channel.clone(),
            payload: payload.to_vec(),
        }
        .encode()?;
        framing::write_frame(&mut self.writer, &frame).await
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            let Some(bytes) = framing::read_frame(&mut self.reader).await? else {
                return Ok(None);
            };
            match WireFrame::decode(&bytes)? {
                WireFrame::Publish { channel, payload } if channel == self.channel => {
                    return Ok(Some(payload));
                }
                WireFrame::Publish { channel, .. } => {
                    debug!("ignoring frame for channel {channel}");
                }
                WireFrame::Subscribe { .. } => {
                    debug!("ignoring subscribe frame from broker");
                }
            }
        }
    }
}
