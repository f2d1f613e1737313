//! File catalog and swarm membership held by the tracker.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::protocol::{FileDescriptor, FileName, NodeId};

/// Membership record of one peer in one file's swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SwarmEntry {
    pub peer: NodeId,
    /// True once the peer holds at least one segment of the file
    pub has_fragments: bool,
}

/// Authoritative file catalog and per-file swarm lists.
///
/// Owned by the tracker control loop and never shared, so it needs no lock.
/// Swarm lists keep insertion order and a peer appears at most once per file.
#[derive(Debug, Default)]
pub struct TrackerRegistry {
    catalog: HashMap<FileName, FileDescriptor>,
    swarms: HashMap<FileName, Vec<SwarmEntry>>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `owner` as an initial seeder of `file`.
    ///
    /// The first declaration of a name becomes the catalog entry; later
    /// declarations of the same name only add the owner to the swarm.
    /// Returns true if the file was newly catalogued.
    pub fn declare(&mut self, owner: NodeId, file: FileDescriptor) -> bool {
        let name = file.name().clone();
        let inserted = !self.catalog.contains_key(&name);
        if inserted {
            self.catalog.insert(name.clone(), file);
        }
        self.join(&name, owner);
        inserted
    }

    pub fn file(&self, name: &FileName) -> Option<&FileDescriptor> {
        self.catalog.get(name)
    }

    /// Segment count of a catalogued file, 0 when the name is unknown.
    pub fn segment_count(&self, name: &FileName) -> u32 {
        self.file(name).map_or(0, FileDescriptor::segment_count)
    }

    /// Inserts `peer` into the swarm of `name`, or marks its existing entry
    /// as holding fragments. Returns the swarm after the update.
    pub fn join(&mut self, name: &FileName, peer: NodeId) -> &[SwarmEntry] {
        let entries = self.swarms.entry(name.clone()).or_default();
        match entries.iter().position(|entry| entry.peer == peer) {
            Some(index) => entries[index].has_fragments = true,
            None => entries.push(SwarmEntry {
                peer,
                has_fragments: true,
            }),
        }
        entries
    }

    /// Current swarm of `name`, empty when nobody joined.
    pub fn swarm(&self, name: &FileName) -> &[SwarmEntry] {
        self.swarms.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Peer identifiers of the swarm of `name`, in insertion order.
    pub fn members(&self, name: &FileName) -> Vec<NodeId> {
        self.swarm(name).iter().map(|entry| entry.peer).collect()
    }

    pub fn file_count(&self) -> usize {
        self.catalog.len()
    }

    /// Sorted view of every swarm, for reporting.
    pub fn snapshot(&self) -> BTreeMap<FileName, Vec<NodeId>> {
        self.swarms
            .keys()
            .map(|name| (name.clone(), self.members(name)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::protocol::SegmentHash;

    fn name(value: &str) -> FileName {
        FileName::new(value).unwrap()
    }

    fn descriptor(file: &str, hashes: &[&str]) -> FileDescriptor {
        FileDescriptor::new(
            name(file),
            hashes.iter().map(|h| SegmentHash::new(*h).unwrap()).collect(),
        )
    }

    #[test]
    fn test_declare_catalogs_first_descriptor_only() {
        let mut registry = TrackerRegistry::new();

        assert!(registry.declare(NodeId::new(1), descriptor("a.bin", &["h0", "h1"])));
        assert!(!registry.declare(NodeId::new(2), descriptor("a.bin", &["x"])));

        assert_eq!(registry.file_count(), 1);
        assert_eq!(registry.segment_count(&name("a.bin")), 2);
        assert_eq!(
            registry.members(&name("a.bin")),
            vec![NodeId::new(1), NodeId::new(2)]
        );
    }

    #[test]
    fn test_unknown_file_has_zero_segments_and_empty_swarm() {
        let registry = TrackerRegistry::new();

        assert_eq!(registry.segment_count(&name("missing")), 0);
        assert!(registry.swarm(&name("missing")).is_empty());
        assert!(registry.file(&name("missing")).is_none());
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut registry = TrackerRegistry::new();
        registry.declare(NodeId::new(2), descriptor("movie.mp4", &["h0", "h1", "h2"]));

        registry.join(&name("movie.mp4"), NodeId::new(3));
        let swarm = registry.join(&name("movie.mp4"), NodeId::new(3));

        assert_eq!(swarm.len(), 2);
        assert_eq!(swarm[1].peer, NodeId::new(3));
        assert!(swarm[1].has_fragments);
    }

    proptest! {
        #[test]
        fn prop_swarms_only_grow_and_never_repeat(
            joins in prop::collection::vec((0usize..3, 1u32..6), 1..60)
        ) {
            let files = [name("a"), name("b"), name("c")];
            let mut registry = TrackerRegistry::new();
            let mut previous: HashMap<FileName, Vec<NodeId>> = HashMap::new();

            for (file, peer) in joins {
                let file = &files[file];
                registry.join(file, NodeId::new(peer));
                let members = registry.members(file);

                let before = previous.get(file).cloned().unwrap_or_default();
                prop_assert!(members.starts_with(&before));
                prop_assert_eq!(
                    members.iter().filter(|m| **m == NodeId::new(peer)).count(),
                    1
                );
                previous.insert(file.clone(), members);
            }
        }
    }
}
