//! File-based metrics exporter.
//!
//! Writes JSON snapshots atomically using `tempfile` + rename to prevent
//! partial reads by monitoring tools.

use super::{FileMetricsConfig, MetricsError, MetricsExporter, MetricsSnapshot};
use async_trait::async_trait;
use std::path::PathBuf;

/// Exports metrics snapshots as JSON files using atomic writes.
pub struct FileExporter {
    path: PathBuf,
    pretty_print: bool,
}

impl FileExporter {
    /// Create a new file exporter, ensuring the parent directory exists.
    pub fn new(config: FileMetricsConfig) -> Result<Self, MetricsError> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MetricsError::ConfigError(format!(
                    "Failed to create metrics directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        Ok(Self {
            path: config.path,
            pretty_print: config.pretty_print,
        })
    }
}

#[async_trait]
impl MetricsExporter for FileExporter {
    async fn export(&self, snapshot: &MetricsSnapshot) -> Result<(), MetricsError> {
        let json = if self.pretty_print {
            serde_json::to_string_pretty(snapshot)?
        } else {
            serde_json::to_string(snapshot)?
        };

        let path = self.path.clone();

        // Perform the atomic write on a blocking thread to avoid blocking the runtime.
        tokio::task::spawn_blocking(move || -> Result<(), MetricsError> {
            use std::io::Write;

            let parent = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
            tmp.write_all(json.as_bytes())?;
            tmp.flush()?;
            tmp.persist(&path).map_err(|e| {
                MetricsError::ExportFailed(format!(
                    "Failed to persist metrics file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            Ok(())
        })
        .await
        .map_err(|e| MetricsError::ExportFailed(format!("Blocking task panicked: {}", e)))??;

        tracing::debug!("Metrics snapshot written to {}", self.path.display());
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), MetricsError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{HistogramSnapshot, SupervisorMetrics, SyncMetrics};

    fn sample_snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: 1700000000,
            supervisor: SupervisorMetrics {
                queries_started: 10,
                queries_completed: 8,
                queries_failed: 1,
                queries_start_failed: 1,
                active_queries: 5,
                pending_queries: 3,
                concurrency_limit: 8,
                query_duration_ms: HistogramSnapshot {
                    bucket_bounds: vec![50, 100, 250, 500, 1_000, 2_000, 5_000, 10_000, 30_000],
                    bucket_counts: vec![0, 0, 2, 4, 6, 7, 8, 8, 8],
                    count: 8,
                    sum_ms: 4200,
                },
            },
            sync: SyncMetrics {
                remotes_total: 3,
                remotes_connected: 2,
                last_sync_errors: 1,
            },
        }
    }

    #[tokio::test]
    async fn test_file_exporter_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let exporter = FileExporter::new(FileMetricsConfig {
            path: path.clone(),
            pretty_print: true,
        })
        .unwrap();

        let snapshot = sample_snapshot();
        exporter.export(&snapshot).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let loaded: MetricsSnapshot = serde_json::from_str(&content).unwrap();
        assert_eq!(loaded.timestamp, 1700000000);
        assert_eq!(loaded.supervisor.active_queries, 5);
    }

    #[tokio::test]
    async fn test_file_exporter_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("metrics.json");

        let exporter = FileExporter::new(FileMetricsConfig {
            path: path.clone(),
            pretty_print: false,
        })
        .unwrap();

        let snapshot = sample_snapshot();
        exporter.export(&snapshot).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_file_exporter_compact_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compact.json");

        let exporter = FileExporter::new(FileMetricsConfig {
            path: path.clone(),
            pretty_print: false,
        })
        .unwrap();

        let snapshot = sample_snapshot();
        exporter.export(&snapshot).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        // Compact JSON contains no newlines.
        assert!(!content.trim().contains('\n'));
    }

    #[tokio::test]
    async fn test_file_exporter_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shutdown.json");

        let exporter = FileExporter::new(FileMetricsConfig {
            path,
            pretty_print: true,
        })
        .unwrap();

        assert!(exporter.shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn test_file_exporter_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overwrite.json");

        let exporter = FileExporter::new(FileMetricsConfig {
            path: path.clone(),
            pretty_print: false,
        })
        .unwrap();

        let mut snapshot = sample_snapshot();
        exporter.export(&snapshot).await.unwrap();

        // Overwrite with different data.
        snapshot.timestamp = 1700000001;
        snapshot.supervisor.active_queries = 42;
        exporter.export(&snapshot).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let loaded: MetricsSnapshot = serde_json::from_str(&content).unwrap();
        assert_eq!(loaded.timestamp, 1700000001);
        assert_eq!(loaded.supervisor.active_queries, 42);
    }
}
