//! Peer bootstrap manifests.
//!
//! A manifest is a sequence of whitespace-separated tokens:
//!
//! ```text
//! <owned count>
//! <name> <segment count> <hash>...   (once per owned file)
//! <wanted count>
//! <name>...
//! ```

use std::path::{Path, PathBuf};
use std::str::SplitWhitespace;

use tokio::fs;

use crate::config::StorageConfig;
use crate::protocol::{FileDescriptor, FileName, NodeId, SegmentHash};

/// Errors raised while loading a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Manifest not found: {}", path.display())]
    Missing { path: PathBuf },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed manifest: {reason}")]
    Malformed { reason: String },
}

/// Files a peer owns at startup and files it wants to acquire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerManifest {
    pub owned: Vec<FileDescriptor>,
    pub wanted: Vec<FileName>,
}

impl PeerManifest {
    pub fn new(owned: Vec<FileDescriptor>, wanted: Vec<FileName>) -> Self {
        Self { owned, wanted }
    }

    /// Parses manifest text.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Malformed` - If a count is missing or not a number, a
    ///   segment count is zero, a field exceeds its capacity, or tokens
    ///   remain after the wanted list
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let mut tokens = Tokens {
            inner: input.split_whitespace(),
        };

        let owned_count = tokens.count("owned file count")?;
        // Counts come from the file, so nothing is reserved up front.
        let mut owned = Vec::new();
        for _ in 0..owned_count {
            let name = tokens.file_name()?;
            let segment_count = tokens.count("segment count")?;
            if segment_count == 0 {
                return Err(ConfigError::Malformed {
                    reason: format!("{name} declares zero segments"),
                });
            }
            let mut segments = Vec::new();
            for _ in 0..segment_count {
                segments.push(tokens.hash()?);
            }
            owned.push(FileDescriptor::new(name, segments));
        }

        let wanted_count = tokens.count("wanted file count")?;
        let mut wanted = Vec::new();
        for _ in 0..wanted_count {
            wanted.push(tokens.file_name()?);
        }

        if let Some(extra) = tokens.inner.next() {
            return Err(ConfigError::Malformed {
                reason: format!("unexpected trailing token {extra:?}"),
            });
        }

        Ok(Self { owned, wanted })
    }

    /// Reads and parses a manifest file.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Missing` - If the file does not exist
    /// - `ConfigError::Io` - If the file cannot be read
    /// - `ConfigError::Malformed` - If the contents do not parse
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::Missing {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        Self::parse(&contents)
    }

    /// Loads the manifests of peers `1..=peer_count` from the input directory.
    ///
    /// # Errors
    ///
    /// Returns the first error from [`PeerManifest::load`].
    pub async fn load_all(config: &StorageConfig, peer_count: u32) -> Result<Vec<Self>, ConfigError> {
        let mut manifests = Vec::new();
        for id in 1..=peer_count {
            let path = manifest_path(config, NodeId::new(id));
            tracing::debug!("Loading manifest {}", path.display());
            manifests.push(Self::load(&path).await?);
        }
        Ok(manifests)
    }

    /// Renders the manifest in the format [`PeerManifest::parse`] reads.
    pub fn render(&self) -> String {
        let mut out = format!("{}\n", self.owned.len());
        for file in &self.owned {
            out.push_str(&format!("{} {}\n", file.name(), file.segment_count()));
            for hash in file.segments() {
                out.push_str(&format!("{hash}\n"));
            }
        }
        out.push_str(&format!("{}\n", self.wanted.len()));
        for name in &self.wanted {
            out.push_str(&format!("{name}\n"));
        }
        out
    }
}

/// Path of the manifest for `node`: `<input_dir>/<prefix><node>.<extension>`.
pub fn manifest_path(config: &StorageConfig, node: NodeId) -> PathBuf {
    config.input_dir.join(format!(
        "{}{}.{}",
        config.manifest_prefix, node, config.manifest_extension
    ))
}

struct Tokens<'a> {
    inner: SplitWhitespace<'a>,
}

impl<'a> Tokens<'a> {
    fn next(&mut self, what: &str) -> Result<&'a str, ConfigError> {
        self.inner.next().ok_or_else(|| ConfigError::Malformed {
            reason: format!("missing {what}"),
        })
    }

    fn count(&mut self, what: &str) -> Result<u32, ConfigError> {
        let token = self.next(what)?;
        token.parse().map_err(|_| ConfigError::Malformed {
            reason: format!("{what} is not a number: {token:?}"),
        })
    }

    fn file_name(&mut self) -> Result<FileName, ConfigError> {
        let token = self.next("file name")?;
        FileName::new(token).map_err(|error| ConfigError::Malformed {
            reason: error.to_string(),
        })
    }

    fn hash(&mut self) -> Result<SegmentHash, ConfigError> {
        let token = self.next("segment hash")?;
        SegmentHash::new(token).map_err(|error| ConfigError::Malformed {
            reason: error.to_string(),
        })
    }
}
