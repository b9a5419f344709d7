//! The connector fiber: one push/pull exchange with a single remote.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::journal::Journal;
use crate::kv::KeyValueStore;
use crate::remote::{ProtocolClient, ProtocolMessage, Transport};
use crate::sync::status::StatusBoard;
use crate::types::SyncError;

/// Opens a transport to a single remote; implementations own reconnection
/// parameters (URL, sub-protocols) but not the retry policy.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Transport>, SyncError>;
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One full exchange: handshake, push uncommitted entries, pull and apply
/// remote changes, then mark the remote connected. On any failure the
/// status board records the error and disconnection; the caller (the sync
/// service, via `syncNow` or the periodic scheduler) decides whether and
/// when to retry.
pub async fn run_once<S: KeyValueStore>(
    key: &str,
    identity: &str,
    connector: &dyn Connector,
    journal: &Journal<S>,
    status: &StatusBoard,
    disable_ping: bool,
) -> Result<(), SyncError> {
    match run_once_inner(key, identity, connector, journal, disable_ping).await {
        Ok(()) => {
            status.mark_connected(key, now_millis());
            Ok(())
        }
        Err(e) => {
            status.mark_disconnected(key, Some(e.to_string()));
            Err(e)
        }
    }
}

async fn run_once_inner<S: KeyValueStore>(
    key: &str,
    identity: &str,
    connector: &dyn Connector,
    journal: &Journal<S>,
    disable_ping: bool,
) -> Result<(), SyncError> {
    let transport = connector.connect().await?;
    let client = ProtocolClient::new(transport, key.to_string());
    client.hello(identity, Vec::new()).await?;

    if !disable_ping {
        let nonce = now_millis();
        client.ping(nonce).await?;
        match client.recv_expect().await? {
            ProtocolMessage::Pong { nonce: echoed } if echoed == nonce => {}
            other => {
                return Err(SyncError::Protocol {
                    remote: key.to_string(),
                    reason: format!("expected Pong echoing nonce {nonce}, got {other:?}"),
                })
            }
        }
    }

    let uncommitted = journal.uncommitted_for(key).await;
    if !uncommitted.is_empty() {
        let up_to = uncommitted.last().map(|e| e.id);
        client.write_entries(uncommitted).await?;
        if let Some(up_to) = up_to {
            journal
                .acknowledge(key, up_to)
                .await
                .map_err(SyncError::Journal)?;
        }
    }

    client.request_changes(None).await?;
    match client.recv_expect().await? {
        ProtocolMessage::Changes { entries, .. } => {
            if !entries.is_empty() {
                journal
                    .write_from_remote(key, entries)
                    .await
                    .map_err(SyncError::Journal)?;
            }
            Ok(())
        }
        other => Err(SyncError::Protocol {
            remote: key.to_string(),
            reason: format!("expected Changes, got {other:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::entry::{Entry, EntryId};
    use crate::journal::{LastWriteWins, ConflictPolicy};
    use crate::kv::MemoryKvStore;
    use crate::remote::ChannelTransport;
    use bytes::Bytes;

    struct FixedConnector(std::sync::Mutex<Option<Arc<dyn Transport>>>);

    #[async_trait]
    impl Connector for FixedConnector {
        async fn connect(&self) -> Result<Arc<dyn Transport>, SyncError> {
            self.0
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| SyncError::Transport {
                    remote: "fixed".to_string(),
                    reason: "already connected once".to_string(),
                })
        }
    }

    fn policy() -> Arc<dyn ConflictPolicy> {
        Arc::new(LastWriteWins)
    }

    #[tokio::test]
    async fn run_once_pushes_uncommitted_and_applies_a_server_reply() {
        let journal = Journal::open(Arc::new(MemoryKvStore::new()), "chat-history", policy())
            .await
            .unwrap();
        journal
            .append("chat_event", "s:1", Bytes::from_static(b"local"))
            .await
            .unwrap();

        let (client_side, server_side) = ChannelTransport::pair(8);
        let connector = FixedConnector(std::sync::Mutex::new(Some(Arc::new(client_side) as Arc<dyn Transport>)));
        let status = StatusBoard::new();
        status.ensure("remote-a", || {
            crate::sync::status::RemoteStatus::new_url("remote-a".to_string(), "wss://x".to_string())
        });

        let server = ProtocolClient::new(Arc::new(server_side), "client");
        let server_task = tokio::spawn(async move {
            // Hello
            server.recv_expect().await.unwrap();
            // Ping
            let nonce = match server.recv_expect().await.unwrap() {
                ProtocolMessage::Ping { nonce } => nonce,
                other => panic!("expected Ping, got {other:?}"),
            };
            server.pong(nonce).await.unwrap();
            // WriteEntries (the push)
            server.recv_expect().await.unwrap();
            // RequestChanges
            server.recv_expect().await.unwrap();
            server
                .send_changes(
                    vec![Entry {
                        id: EntryId::new(9_999, 0),
                        event: "chat_event".to_string(),
                        primary_key: "s:2".to_string(),
                        payload: Bytes::from_static(b"from-server"),
                    }],
                    true,
                )
                .await
                .unwrap();
        });

        run_once("remote-a", "client-identity", &connector, &journal, &status, false)
            .await
            .unwrap();
        server_task.await.unwrap();

        assert!(journal.all_entries().await.iter().any(|e| e.primary_key == "s:2"));
        assert!(journal.uncommitted_for("remote-a").await.is_empty());
        assert!(status.get("remote-a").unwrap().connected);
    }

    #[tokio::test]
    async fn disable_ping_skips_the_liveness_round_trip() {
        let journal = Journal::open(Arc::new(MemoryKvStore::new()), "chat-history", policy())
            .await
            .unwrap();

        let (client_side, server_side) = ChannelTransport::pair(8);
        let connector = FixedConnector(std::sync::Mutex::new(Some(Arc::new(client_side) as Arc<dyn Transport>)));
        let status = StatusBoard::new();
        status.ensure("remote-a", || {
            crate::sync::status::RemoteStatus::new_url("remote-a".to_string(), "wss://x".to_string())
        });

        let server = ProtocolClient::new(Arc::new(server_side), "client");
        let server_task = tokio::spawn(async move {
            server.recv_expect().await.unwrap(); // Hello, not Ping
            server.recv_expect().await.unwrap(); // RequestChanges (no uncommitted entries to push)
            server.send_changes(vec![], true).await.unwrap();
        });

        run_once("remote-a", "client-identity", &connector, &journal, &status, true)
            .await
            .unwrap();
        server_task.await.unwrap();
    }
}
