//! Byte-oriented transport abstraction the protocol client is generic over.

use async_trait::async_trait;

use crate::types::SyncError;

/// A bidirectional, message-framed transport (WebSocket, TCP, or in-process).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, frame: Vec<u8>) -> Result<(), SyncError>;
    async fn recv(&self) -> Result<Option<Vec<u8>>, SyncError>;
    async fn close(&self) -> Result<(), SyncError>;
}

/// In-process transport pair for tests and programmatically attached
/// remotes; connects two ends via bounded channels.
pub struct ChannelTransport {
    tx: tokio::sync::mpsc::Sender<Vec<u8>>,
    rx: tokio::sync::Mutex<tokio::sync::mpsc::Receiver<Vec<u8>>>,
}

impl ChannelTransport {
    /// Builds a connected pair: frames sent on one end are received on the other.
    pub fn pair(buffer: usize) -> (Self, Self) {
        let (tx_a, rx_b) = tokio::sync::mpsc::channel(buffer);
        let (tx_b, rx_a) = tokio::sync::mpsc::channel(buffer);
        (
            Self {
                tx: tx_a,
                rx: tokio::sync::Mutex::new(rx_a),
            },
            Self {
                tx: tx_b,
                rx: tokio::sync::Mutex::new(rx_b),
            },
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, frame: Vec<u8>) -> Result<(), SyncError> {
        self.tx.send(frame).await.map_err(|_| SyncError::Transport {
            remote: "<channel>".to_string(),
            reason: "peer dropped".to_string(),
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, SyncError> {
        Ok(self.rx.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), SyncError> {
        self.rx.lock().await.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn paired_channel_transport_delivers_frames_in_order() {
        let (a, b) = ChannelTransport::pair(8);
        a.send(vec![1, 2, 3]).await.unwrap();
        a.send(vec![4, 5]).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(b.recv().await.unwrap(), Some(vec![4, 5]));
    }

    #[tokio::test]
    async fn closing_yields_none_on_recv() {
        let (a, b) = ChannelTransport::pair(8);
        a.close().await.unwrap();
        drop(a);
        assert_eq!(b.recv().await.unwrap(), None);
    }
}
