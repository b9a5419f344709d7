//! High-level protocol operations layered over a [`Transport`].

use std::sync::Arc;

use super::protocol::ProtocolMessage;
use super::transport::Transport;
use crate::journal::Entry;
use crate::types::SyncError;

/// Frames [`ProtocolMessage`]s over a transport and exposes one method per
/// message kind.
pub struct ProtocolClient<T> {
    transport: Arc<T>,
    remote: String,
}

impl<T: Transport> ProtocolClient<T> {
    pub fn new(transport: Arc<T>, remote: impl Into<String>) -> Self {
        Self {
            transport,
            remote: remote.into(),
        }
    }

    async fn send(&self, message: &ProtocolMessage) -> Result<(), SyncError> {
        self.transport.send(message.encode()?).await
    }

    async fn recv(&self) -> Result<Option<ProtocolMessage>, SyncError> {
        match self.transport.recv().await? {
            Some(bytes) => Ok(Some(ProtocolMessage::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn hello(&self, identity: &str, capabilities: Vec<String>) -> Result<(), SyncError> {
        self.send(&ProtocolMessage::Hello {
            identity: identity.to_string(),
            capabilities,
        })
        .await
    }

    pub async fn request_changes(&self, since_sequence: Option<u128>) -> Result<(), SyncError> {
        self.send(&ProtocolMessage::RequestChanges { since_sequence }).await
    }

    pub async fn write_entries(&self, entries: Vec<Entry>) -> Result<(), SyncError> {
        self.send(&ProtocolMessage::WriteEntries { entries }).await
    }

    pub async fn send_changes(&self, entries: Vec<Entry>, terminal: bool) -> Result<(), SyncError> {
        self.send(&ProtocolMessage::Changes { entries, terminal }).await
    }

    pub async fn ack(&self, up_to_id: u128) -> Result<(), SyncError> {
        self.send(&ProtocolMessage::Ack { up_to_id }).await
    }

    pub async fn ping(&self, nonce: u64) -> Result<(), SyncError> {
        self.send(&ProtocolMessage::Ping { nonce }).await
    }

    pub async fn pong(&self, nonce: u64) -> Result<(), SyncError> {
        self.send(&ProtocolMessage::Pong { nonce }).await
    }

    /// Reads the next frame, failing with a typed protocol error if the
    /// connection closes while a reply is expected.
    pub async fn recv_expect(&self) -> Result<ProtocolMessage, SyncError> {
        self.recv().await?.ok_or_else(|| SyncError::Transport {
            remote: self.remote.clone(),
            reason: "connection closed while awaiting a frame".to_string(),
        })
    }
}
