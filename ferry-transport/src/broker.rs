use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::framing::{self, WireFrame};

type Registry = Arc<Mutex<HashMap<String, Vec<(u64, mpsc::Sender<Vec<u8>>)>>>>;

/// Minimal fan-out broker for `TcpPubSub` clients.
///
/// Every publication on a channel is forwarded to all current subscribers
/// of that channel, including the publisher. Frames for slow clients are
/// dropped rather than buffered without bound.
pub struct Broker {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Broker {
    /// Binds the listener and starts accepting clients.
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("broker listening on {local_addr}");
        let task = tokio::spawn(accept_loop(listener, Registry::default()));
        Ok(Self { local_addr, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs until the process is stopped.
    pub async fn join(self) {
        let _ = self.task.await;
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

async fn accept_loop(listener: TcpListener, registry: Registry) {
    let mut next_id = 0u64;
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                next_id += 1;
                debug!("broker: client {next_id} connected from {peer}");
                tokio::spawn(serve_client(stream, next_id, Arc::clone(&registry)));
            }
            Err(err) => warn!("broker: accept failed: {err}"),
        }
    }
}

async fn serve_client(stream: TcpStream, id: u64, registry: Registry) {
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
    let _writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if framing::write_frame(&mut writer, &frame).await.is_err() {
                break;
            }
        }
    });

    let mut joined: Vec<String> = Vec::new();
    loop {
        let bytes = match framing::read_frame(&mut reader).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => break,
            Err(err) => {
                debug!("broker: client {id} read failed: {err}");
                break;
            }
        };
        match WireFrame::decode(&bytes) {
            Ok(WireFrame::Subscribe { channel }) => {
                debug!("broker: client {id} subscribed to {channel}");
                registry
                    .lock()
                    .await
                    .entry(channel.clone())
                    .or_default()
                    .push((id, tx.clone()));
                joined.push(channel);
            }
            Ok(WireFrame::Publish { channel, payload }) => {
                forward(&registry, channel, payload).await;
            }
            Err(err) => warn!("broker: bad frame from client {id}: {err}"),
        }
    }

    let mut registry = registry.lock().await;
    for channel in joined {
        if let Some(subscribers) = registry.get_mut(&channel) {
            subscribers.retain(|(sub_id, _)| *sub_id != id);
            if subscribers.is_empty() {
                registry.remove(&channel);
            }
        }
    }
    debug!("broker: client {id} disconnected");
}

async fn forward(registry: &Registry, channel: String, payload: Vec<u8>) {
    let frame = WireFrame::Publish {
        channel: channel.clone(),
        payload,
    };
    let encoded = match frame.encode() {
        Ok(encoded) => encoded,
        Err(err) => {
            warn!("broker: failed to encode frame: {err}");
            return;
        }
    };
    let mut registry = registry.lock().await;
    if let Some(subscribers) = registry.get_mut(&channel) {
        subscribers.retain(|(_, tx)| match tx.try_send(encoded.clone()) {
            Ok(()) => true,
            // Queue full: the frame is lost for that client, as the
            // channel contract allows.
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}
