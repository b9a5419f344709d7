//! Remote sync: connector fibers, live status, and the periodic scheduler
//! that multiplex the journal across remote replicas.

pub mod connector;
pub mod service;
pub mod status;

pub use connector::Connector;
pub use service::{SyncConfig, SyncService};
pub use status::{RemoteKind, RemoteStatus, StatusBoard};
