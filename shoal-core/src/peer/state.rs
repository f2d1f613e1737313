//! Per-peer state shared by the download and upload agents.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::AvailabilityPolicy;
use crate::protocol::{FileDescriptor, FileName, SegmentHash, SegmentIndex};

/// State shared between a peer's two agents.
///
/// The download agent is the only writer. The upload agent takes read locks
/// to answer availability queries. Neither holds a guard across a network
/// operation.
pub type SharedPeerState = Arc<RwLock<PeerState>>;

/// Acquisition stage of one wanted file. Stages only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum FileStage {
    Unstarted,
    SizeKnown,
    SwarmJoined,
    HashListKnown,
    Acquiring,
    Complete,
    Seeding,
}

/// Progress of one wanted file.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadProgress {
    stage: FileStage,
    hash_list: Vec<SegmentHash>,
    owned: Vec<bool>,
}

impl DownloadProgress {
    /// Starts tracking a file whose segment count is known.
    pub fn new(segment_count: u32) -> Self {
        Self {
            stage: FileStage::SizeKnown,
            hash_list: Vec::new(),
            owned: vec![false; segment_count as usize],
        }
    }

    pub fn stage(&self) -> FileStage {
        self.stage
    }

    /// Moves to `stage` if it lies ahead of the current one.
    pub fn advance(&mut self, stage: FileStage) {
        if stage > self.stage {
            self.stage = stage;
        }
    }

    pub fn segment_count(&self) -> u32 {
        self.owned.len() as u32
    }

    /// Stores the authoritative hash list learned from the tracker.
    pub fn learn_hash_list(&mut self, hash_list: Vec<SegmentHash>) {
        self.hash_list = hash_list;
        self.advance(FileStage::HashListKnown);
    }

    pub fn hash_list(&self) -> &[SegmentHash] {
        &self.hash_list
    }

    /// Ownership bitmap, one entry per segment.
    pub fn bitmap(&self) -> &[bool] {
        &self.owned
    }

    /// Marks a segment owned. Bits never go back to false.
    pub fn mark_owned(&mut self, index: SegmentIndex) {
        if let Some(bit) = self.owned.get_mut(index.as_usize()) {
            *bit = true;
        }
        if self.is_complete() {
            self.advance(FileStage::Complete);
        }
    }

    pub fn has_segment(&self, index: SegmentIndex) -> bool {
        self.owned.get(index.as_usize()).copied().unwrap_or(false)
    }

    /// Lowest-indexed segment not yet owned.
    pub fn next_missing(&self) -> Option<SegmentIndex> {
        self.owned
            .iter()
            .position(|owned| !owned)
            .map(|index| SegmentIndex::new(index as u32))
    }

    pub fn owned_count(&self) -> usize {
        self.owned.iter().filter(|&&owned| owned).count()
    }

    pub fn is_complete(&self) -> bool {
        self.owned.iter().all(|&owned| owned)
    }
}

/// Everything a peer knows about its files.
#[derive(Debug)]
pub struct PeerState {
    owned: Vec<FileDescriptor>,
    downloads: HashMap<FileName, DownloadProgress>,
}

impl PeerState {
    /// Creates state seeded with the files declared at startup.
    pub fn new(owned: Vec<FileDescriptor>) -> Self {
        Self {
            owned,
            downloads: HashMap::new(),
        }
    }

    /// Wraps the state for sharing between agents.
    pub fn shared(self) -> SharedPeerState {
        Arc::new(RwLock::new(self))
    }

    /// Names of the files this peer can serve in full, in the order they were
    /// acquired.
    pub fn owned_names(&self) -> Vec<FileName> {
        self.owned.iter().map(|file| file.name().clone()).collect()
    }

    /// Decides the answer to an availability query.
    pub fn can_serve(
        &self,
        name: &FileName,
        segment: SegmentIndex,
        policy: AvailabilityPolicy,
    ) -> bool {
        let complete = self
            .owned
            .iter()
            .any(|file| file.name() == name && file.contains_segment(segment));
        if complete {
            return true;
        }

        match policy {
            AvailabilityPolicy::CompleteFilesOnly => false,
            AvailabilityPolicy::PartialSegments => self
                .downloads
                .get(name)
                .is_some_and(|progress| progress.has_segment(segment)),
        }
    }

    /// Starts tracking a wanted file.
    pub fn begin_download(&mut self, name: FileName, segment_count: u32) {
        self.downloads
            .insert(name, DownloadProgress::new(segment_count));
    }

    /// Where `name` stands for this peer. Files declared at startup are
    /// already seeding; files never looked up are unstarted.
    pub fn stage(&self, name: &FileName) -> FileStage {
        if let Some(progress) = self.downloads.get(name) {
            return progress.stage();
        }
        if self.owned.iter().any(|file| file.name() == name) {
            FileStage::Seeding
        } else {
            FileStage::Unstarted
        }
    }

    pub fn progress(&self, name: &FileName) -> Option<&DownloadProgress> {
        self.downloads.get(name)
    }

    pub fn progress_mut(&mut self, name: &FileName) -> Option<&mut DownloadProgress> {
        self.downloads.get_mut(name)
    }

    /// Adds a completed file to the owned set. The set never shrinks.
    pub fn publish(&mut self, file: FileDescriptor) {
        if let Some(progress) = self.downloads.get_mut(file.name()) {
            progress.advance(FileStage::Seeding);
        }
        if !self.owned.iter().any(|owned| owned.name() == file.name()) {
            self.owned.push(file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(value: &str) -> FileName {
        FileName::new(value).unwrap()
    }

    fn descriptor(file: &str, segments: usize) -> FileDescriptor {
        FileDescriptor::new(
            name(file),
            (0..segments)
                .map(|i| SegmentHash::new(format!("h{i}")).unwrap())
                .collect(),
        )
    }

    #[test]
    fn test_progress_walks_segments_in_index_order() {
        let mut progress = DownloadProgress::new(3);
        assert_eq!(progress.next_missing(), Some(SegmentIndex::new(0)));

        progress.mark_owned(SegmentIndex::new(0));
        assert_eq!(progress.bitmap(), &[true, false, false]);
        assert_eq!(progress.next_missing(), Some(SegmentIndex::new(1)));

        progress.mark_owned(SegmentIndex::new(1));
        progress.mark_owned(SegmentIndex::new(2));
        assert!(progress.is_complete());
        assert_eq!(progress.next_missing(), None);
        assert_eq!(progress.stage(), FileStage::Complete);
    }

    #[test]
    fn test_stage_never_regresses() {
        let mut progress = DownloadProgress::new(1);
        progress.advance(FileStage::Acquiring);
        progress.learn_hash_list(vec![SegmentHash::new("h").unwrap()]);

        assert_eq!(progress.stage(), FileStage::Acquiring);
    }

    #[test]
    fn test_out_of_range_segment_is_ignored() {
        let mut progress = DownloadProgress::new(2);
        progress.mark_owned(SegmentIndex::new(5));

        assert_eq!(progress.owned_count(), 0);
        assert!(!progress.has_segment(SegmentIndex::new(5)));
    }

    #[test]
    fn test_can_serve_complete_files_only() {
        let state = PeerState::new(vec![descriptor("movie.mp4", 3)]);
        let policy = AvailabilityPolicy::CompleteFilesOnly;

        assert!(state.can_serve(&name("movie.mp4"), SegmentIndex::new(0), policy));
        assert!(state.can_serve(&name("movie.mp4"), SegmentIndex::new(2), policy));
        assert!(!state.can_serve(&name("movie.mp4"), SegmentIndex::new(3), policy));
        assert!(!state.can_serve(&name("other"), SegmentIndex::new(0), policy));
    }

    #[test]
    fn test_partial_policy_answers_from_bitmap() {
        let mut state = PeerState::new(vec![]);
        state.begin_download(name("movie.mp4"), 3);
        if let Some(progress) = state.progress_mut(&name("movie.mp4")) {
            progress.mark_owned(SegmentIndex::new(0));
        }

        let first = SegmentIndex::new(0);
        let second = SegmentIndex::new(1);
        assert!(!state.can_serve(&name("movie.mp4"), first, AvailabilityPolicy::CompleteFilesOnly));
        assert!(state.can_serve(&name("movie.mp4"), first, AvailabilityPolicy::PartialSegments));
        assert!(!state.can_serve(&name("movie.mp4"), second, AvailabilityPolicy::PartialSegments));
    }

    #[test]
    fn test_stage_of_declared_and_unknown_files() {
        let mut state = PeerState::new(vec![descriptor("seeded", 2)]);
        state.begin_download(name("wanted"), 2);

        assert_eq!(state.stage(&name("seeded")), FileStage::Seeding);
        assert_eq!(state.stage(&name("wanted")), FileStage::SizeKnown);
        assert_eq!(state.stage(&name("ghost")), FileStage::Unstarted);
    }

    #[test]
    fn test_publish_extends_owned_set_once() {
        let mut state = PeerState::new(vec![descriptor("a", 1)]);
        state.begin_download(name("b"), 2);

        state.publish(descriptor("b", 2));
        state.publish(descriptor("b", 2));

        assert_eq!(state.owned_names(), vec![name("a"), name("b")]);
        assert_eq!(
            state.progress(&name("b")).map(DownloadProgress::stage),
            Some(FileStage::Seeding)
        );
    }
}
