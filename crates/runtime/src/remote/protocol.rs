//! Wire framing for the remote sync protocol, encoded as MessagePack.

use serde::{Deserialize, Serialize};

use crate::journal::Entry;
use crate::types::SyncError;

/// One frame of the remote sync protocol.
///
/// Invariants enforced by callers, not this type: the server never sends an
/// entry id less than or equal to a previously sent one for the same
/// client; a `WriteEntries` batch is rejected atomically on schema
/// mismatch; `Ack(up_to_id)` licenses the server to compact entries with id
/// `<= up_to_id` for that client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProtocolMessage {
    Hello {
        identity: String,
        capabilities: Vec<String>,
    },
    RequestChanges {
        since_sequence: Option<u128>,
    },
    WriteEntries {
        entries: Vec<Entry>,
    },
    Changes {
        entries: Vec<Entry>,
        terminal: bool,
    },
    Ack {
        up_to_id: u128,
    },
    Ping {
        nonce: u64,
    },
    Pong {
        nonce: u64,
    },
}

impl ProtocolMessage {
    pub fn encode(&self) -> Result<Vec<u8>, SyncError> {
        rmp_serde::to_vec(self).map_err(|e| SyncError::Protocol {
            remote: "<local>".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SyncError> {
        rmp_serde::from_slice(bytes).map_err(|e| SyncError::Protocol {
            remote: "<local>".to_string(),
            reason: e.to_string(),
        })
    }
}
