//! Remote protocol: wire framing, transport abstraction, and a client that
//! speaks the protocol over any [`Transport`].

pub mod client;
pub mod protocol;
pub mod transport;

pub use client::ProtocolClient;
pub use protocol::ProtocolMessage;
pub use transport::{ChannelTransport, Transport};

use crate::types::RemoteId;

/// Identifies a remote before or after the `Hello` handshake assigns it a
/// server-issued [`RemoteId`]: a URL for WebSocket remotes, or the id itself
/// (hex-encoded) for programmatically attached ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemoteKey {
    RemoteId(RemoteId),
    Url(String),
}

impl std::fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteKey::RemoteId(id) => write!(f, "{}", id.0.simple()),
            RemoteKey::Url(url) => write!(f, "{url}"),
        }
    }
}
