//! Configuration for the execution core: supervisor admission, remote sync,
//! and store retention, with a file overlay over secure defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::{ArtifactRetention, ChatRetention};
use crate::supervisor::QueueStrategy;
use crate::types::ConfigError;

/// Query supervisor admission and observability settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSettings {
    pub concurrency_limit: usize,
    pub pending_queue_capacity: usize,
    #[serde(with = "queue_strategy_serde")]
    pub pending_queue_strategy: QueueStrategy,
    pub max_pending_time_ms: Option<u64>,
    pub max_prompt_chars: usize,
    pub metrics_enabled: bool,
    pub tracing_enabled: bool,
    pub emit_events: bool,
    pub event_buffer_capacity: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            concurrency_limit: 4,
            pending_queue_capacity: 0,
            pending_queue_strategy: QueueStrategy::Suspend,
            max_pending_time_ms: None,
            max_prompt_chars: 32_000,
            metrics_enabled: true,
            tracing_enabled: true,
            emit_events: true,
            event_buffer_capacity: 256,
        }
    }
}

impl SupervisorSettings {
    pub fn max_pending_time(&self) -> Option<Duration> {
        self.max_pending_time_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_limit == 0 {
            return Err(ConfigError::Invalid(
                "supervisor.concurrency_limit must be > 0".to_string(),
            ));
        }
        if self.max_prompt_chars == 0 {
            return Err(ConfigError::Invalid(
                "supervisor.max_prompt_chars must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_runtime(&self) -> crate::supervisor::SupervisorConfig {
        crate::supervisor::SupervisorConfig {
            concurrency_limit: self.concurrency_limit,
            pending_queue_capacity: self.pending_queue_capacity,
            pending_queue_strategy: self.pending_queue_strategy,
            max_pending_time: self.max_pending_time(),
            max_prompt_chars: self.max_prompt_chars,
            metrics_enabled: self.metrics_enabled,
            tracing_enabled: self.tracing_enabled,
            emit_events: self.emit_events,
            event_buffer_capacity: self.event_buffer_capacity,
        }
    }
}

mod queue_strategy_serde {
    use super::QueueStrategy;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &QueueStrategy, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(value.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<QueueStrategy, D::Error> {
        let raw = String::deserialize(d)?;
        match raw.as_str() {
            "suspend" => Ok(QueueStrategy::Suspend),
            "dropping" => Ok(QueueStrategy::Dropping),
            "sliding" => Ok(QueueStrategy::Sliding),
            other => Err(serde::de::Error::custom(format!(
                "unknown pending queue strategy: {other}"
            ))),
        }
    }
}

/// Remote sync scheduling and connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncSettings {
    pub url: Option<String>,
    pub sync_interval_ms: Option<u64>,
    pub disable_ping: bool,
    pub protocols: Vec<String>,
}

impl SyncSettings {
    /// `syncInterval <= 0` disables the periodic scheduler.
    pub fn sync_interval(&self) -> Option<Duration> {
        match self.sync_interval_ms {
            Some(0) | None => None,
            Some(ms) => Some(Duration::from_millis(ms)),
        }
    }

    pub fn to_runtime(&self) -> crate::sync::SyncConfig {
        crate::sync::SyncConfig {
            sync_interval: self.sync_interval(),
        }
    }
}

/// Chat history and artifact store retention, and which projections run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    pub chat_max_events: Option<usize>,
    pub chat_max_age_ms: Option<u64>,
    pub artifact_max_artifacts: Option<usize>,
    pub artifact_max_bytes: Option<u64>,
    pub artifact_max_age_ms: Option<u64>,
    pub chat_history_enabled: bool,
    pub artifacts_enabled: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            chat_max_events: None,
            chat_max_age_ms: None,
            artifact_max_artifacts: None,
            artifact_max_bytes: None,
            artifact_max_age_ms: None,
            chat_history_enabled: true,
            artifacts_enabled: true,
        }
    }
}

impl StorageSettings {
    pub fn chat_retention(&self) -> ChatRetention {
        ChatRetention {
            max_events: self.chat_max_events,
            max_age_ms: self.chat_max_age_ms,
        }
    }

    pub fn artifact_retention(&self) -> ArtifactRetention {
        ArtifactRetention {
            max_artifacts: self.artifact_max_artifacts,
            max_artifact_bytes: self.artifact_max_bytes,
            max_age_ms: self.artifact_max_age_ms,
        }
    }
}

/// Top-level configuration for the execution core.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    pub supervisor: SupervisorSettings,
    pub sync: SyncSettings,
    pub storage: StorageSettings,
}

impl RuntimeConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Invalid(format!("failed to read config file: {e}")))?;
        toml::from_str(&content).map_err(|e| ConfigError::Invalid(format!("failed to parse config file: {e}")))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.supervisor.validate()?;
        if let Some(bytes) = self.storage.artifact_max_bytes {
            if bytes == 0 {
                return Err(ConfigError::Invalid(
                    "storage.artifact_max_bytes must be > 0 when set".to_string(),
                ));
            }
        }
        Ok(())
    }
}
