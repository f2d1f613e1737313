//! Output sinks for completed files.
//!
//! A completed file is persisted as its hash tokens, one per line, in
//! segment index order.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;

use crate::protocol::{FileDescriptor, FileName, NodeId, SegmentHash};

/// Errors raised while persisting a completed file.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Destination for completed files.
#[async_trait]
pub trait SegmentSink: Send + Sync {
    /// Persists the hash list of a file `node` just completed.
    ///
    /// # Errors
    ///
    /// - `StorageError::Write` - If the underlying storage rejects the write
    async fn persist(&self, node: NodeId, file: &FileDescriptor) -> Result<(), StorageError>;
}

/// Name of the output for `file` completed by `node`.
pub fn output_name(prefix: &str, node: NodeId, file: &FileName) -> String {
    format!("{prefix}{node}_{file}")
}

/// Renders a hash list in the persisted format.
pub fn render_hash_list(segments: &[SegmentHash]) -> String {
    segments
        .iter()
        .map(|hash| format!("{hash}\n"))
        .collect()
}

/// Writes each completed file to its own file inside a directory.
pub struct DirectorySink {
    dir: PathBuf,
    prefix: String,
}

impl DirectorySink {
    /// Creates a sink writing `<prefix><node>_<file>` entries into `dir`.
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    /// Full path of the output for `file` completed by `node`.
    pub fn path_for(&self, node: NodeId, file: &FileName) -> PathBuf {
        self.dir.join(output_name(&self.prefix, node, file))
    }
}

#[async_trait]
impl SegmentSink for DirectorySink {
    async fn persist(&self, node: NodeId, file: &FileDescriptor) -> Result<(), StorageError> {
        let path = self.path_for(node, file.name());

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StorageError::Write {
                path: self.dir.clone(),
                source,
            })?;
        fs::write(&path, render_hash_list(file.segments()))
            .await
            .map_err(|source| StorageError::Write {
                path: path.clone(),
                source,
            })?;

        tracing::debug!("Persisted {} to {}", file.name(), path.display());
        Ok(())
    }
}

/// A file recorded by [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedFile {
    pub node: NodeId,
    pub name: FileName,
    pub segments: Vec<SegmentHash>,
}

/// Keeps persisted files in memory, for demos and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    files: Mutex<Vec<PersistedFile>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything persisted so far, in persistence order.
    pub async fn persisted(&self) -> Vec<PersistedFile> {
        self.files.lock().await.clone()
    }
}

#[async_trait]
impl SegmentSink for MemorySink {
    async fn persist(&self, node: NodeId, file: &FileDescriptor) -> Result<(), StorageError> {
        self.files.lock().await.push(PersistedFile {
            node,
            name: file.name().clone(),
            segments: file.segments().to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn movie() -> FileDescriptor {
        FileDescriptor::new(
            FileName::new("movie.mp4").unwrap(),
            ["h0", "h1", "h2"]
                .iter()
                .map(|h| SegmentHash::new(*h).unwrap())
                .collect(),
        )
    }

    #[test]
    fn test_output_name() {
        let name = FileName::new("movie.mp4").unwrap();
        assert_eq!(output_name("client", NodeId::new(3), &name), "client3_movie.mp4");
    }

    #[tokio::test]
    async fn test_directory_sink_writes_one_token_per_line() {
        let temp_dir = TempDir::new().unwrap();
        let sink = DirectorySink::new(temp_dir.path().join("out"), "client");

        sink.persist(NodeId::new(3), &movie()).await.unwrap();

        let written = std::fs::read_to_string(temp_dir.path().join("out/client3_movie.mp4")).unwrap();
        assert_eq!(written, "h0\nh1\nh2\n");
    }

    #[tokio::test]
    async fn test_directory_sink_reports_unwritable_target() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let sink = DirectorySink::new(&blocker, "client");

        let result = sink.persist(NodeId::new(1), &movie()).await;
        assert!(matches!(result, Err(StorageError::Write { .. })));
    }

    #[tokio::test]
    async fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.persist(NodeId::new(2), &movie()).await.unwrap();

        let persisted = sink.persisted().await;
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].node, NodeId::new(2));
        assert_eq!(persisted[0].segments, movie().segments());
    }
}
