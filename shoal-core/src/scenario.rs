//! Deterministic swarm scenarios for demos and tests.
//!
//! The same seed always yields the same manifests.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha1::{Digest, Sha1};

use crate::bootstrap::PeerManifest;
use crate::protocol::{FileDescriptor, FileName, HASH_SIZE, SegmentHash, WireError};

/// Builds manifests for a randomly arranged swarm.
///
/// Every file gets exactly one initial seeder. Each other peer wants a file
/// with probability one half, and at least one peer wants every file when
/// there is more than one peer.
#[derive(Debug, Clone)]
pub struct ScenarioBuilder {
    peers: u32,
    files: u32,
    segments: u32,
    seed: u64,
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self {
            peers: 4,
            files: 3,
            segments: 5,
            seed: 42,
        }
    }
}

impl ScenarioBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peers(mut self, peers: u32) -> Self {
        self.peers = peers;
        self
    }

    pub fn files(mut self, files: u32) -> Self {
        self.files = files;
        self
    }

    /// Segments per file, at least one.
    pub fn segments(mut self, segments: u32) -> Self {
        self.segments = segments.max(1);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Generates one manifest per peer, peer 1 first.
    ///
    /// # Errors
    ///
    /// - `WireError::FieldTooLong` - If a generated file name exceeds the wire capacity
    pub fn build(&self) -> Result<Vec<PeerManifest>, WireError> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut manifests = vec![PeerManifest::default(); self.peers as usize];
        if self.peers == 0 {
            return Ok(manifests);
        }

        for index in 0..self.files {
            let file = self.file(index)?;
            let seeder = rng.random_range(0..self.peers) as usize;

            let mut wanted_by_someone = false;
            for (peer, manifest) in manifests.iter_mut().enumerate() {
                if peer != seeder && rng.random_bool(0.5) {
                    manifest.wanted.push(file.name().clone());
                    wanted_by_someone = true;
                }
            }
            if !wanted_by_someone && self.peers > 1 {
                let offset = rng.random_range(1..self.peers) as usize;
                let peer = (seeder + offset) % self.peers as usize;
                manifests[peer].wanted.push(file.name().clone());
            }

            manifests[seeder].owned.push(file);
        }

        tracing::debug!(
            "Generated scenario: {} peers, {} files, {} segments, seed {}",
            self.peers,
            self.files,
            self.segments,
            self.seed
        );
        Ok(manifests)
    }

    fn file(&self, index: u32) -> Result<FileDescriptor, WireError> {
        let name = FileName::new(format!("file{index:02}.bin"))?;
        let segments = (0..self.segments)
            .map(|segment| segment_hash(&name, segment))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FileDescriptor::new(name, segments))
    }
}

/// Hash token of a generated segment: hex SHA-1 of `name:index`, cut to the
/// wire capacity.
pub fn segment_hash(name: &FileName, index: u32) -> Result<SegmentHash, WireError> {
    let digest = Sha1::digest(format!("{name}:{index}").as_bytes());
    let mut token = hex::encode(digest);
    token.truncate(HASH_SIZE);
    SegmentHash::new(token)
}
