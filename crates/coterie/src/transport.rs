//! Transport abstraction for connection envelopes.
//!
//! A transport moves encoded envelopes between exactly two endpoints.
//! Implementations may use WebSockets, QUIC, or anything else that delivers
//! bytes; ordering and loss are the protocol's problem, not the transport's.

use async_trait::async_trait;

use coterie_proto::Envelope;

use crate::error::{ReplicaError, Result};

/// One endpoint of a two-party channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send an envelope to the peer.
    async fn send(&self, envelope: Envelope) -> Result<()>;

    /// Receive the next envelope. Blocks until one arrives or the channel
    /// closes.
    async fn recv(&self) -> Result<Envelope>;

    /// Receive with a timeout. Returns `None` if nothing arrived in time.
    async fn recv_timeout(&self, timeout: std::time::Duration) -> Result<Option<Envelope>>;
}

/// A simple in-memory transport for testing.
///
/// Envelopes are serialized to bytes and back, like a real socket would.
pub mod memory {
    use super::*;
    use tokio::sync::{mpsc, Mutex};

    /// Create a connected pair of endpoints.
    pub fn pair(capacity: usize) -> (MemoryTransport, MemoryTransport) {
        let (left_tx, right_rx) = mpsc::channel(capacity);
        let (right_tx, left_rx) = mpsc::channel(capacity);
        (
            MemoryTransport {
                sender: left_tx,
                receiver: Mutex::new(left_rx),
            },
            MemoryTransport {
                sender: right_tx,
                receiver: Mutex::new(right_rx),
            },
        )
    }

    /// In-memory transport endpoint.
    pub struct MemoryTransport {
        sender: mpsc::Sender<Vec<u8>>,
        receiver: Mutex<mpsc::Receiver<Vec<u8>>>,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, envelope: Envelope) -> Result<()> {
            let bytes = envelope.to_bytes()?;
            self.sender
                .send(bytes)
                .await
                .map_err(|_| ReplicaError::Transport("peer endpoint dropped".into()))
        }

        async fn recv(&self) -> Result<Envelope> {
            let mut rx = self.receiver.lock().await;
            match rx.recv().await {
                Some(bytes) => Ok(Envelope::from_bytes(&bytes)?),
                None => Err(ReplicaError::Transport("channel closed".into())),
            }
        }

        async fn recv_timeout(&self, timeout: std::time::Duration) -> Result<Option<Envelope>> {
            let mut rx = self.receiver.lock().await;
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(bytes)) => Ok(Some(Envelope::from_bytes(&bytes)?)),
                Ok(None) => Err(ReplicaError::Transport("channel closed".into())),
                Err(_) => Ok(None), // timeout
            }
        }
    }
}
