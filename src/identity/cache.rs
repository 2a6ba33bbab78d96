use serde::Serialize;
use std::collections::HashMap;

/// Identity the ledger is keyed by for one track.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResolvedIdentity {
    pub plate: String,
    pub brand: Option<String>,
    pub color: Option<String>,
    /// True when `plate` was synthesized because nothing readable came back.
    pub placeholder: bool,
}

/// Memoization table: track id -> resolved identity.
///
/// Entries are written once per track id and only removed by [`clear`],
/// which the pipeline calls from `reset()`.
///
/// [`clear`]: IdentityCache::clear
#[derive(Debug, Default)]
pub struct IdentityCache {
    entries: HashMap<u64, ResolvedIdentity>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, track_id: u64) -> Option<&ResolvedIdentity> {
        self.entries.get(&track_id)
    }

    pub fn contains(&self, track_id: u64) -> bool {
        self.entries.contains_key(&track_id)
    }

    /// Stores the first identity for a track. Later inserts for the same id
    /// are ignored and return false.
    pub fn insert(&mut self, track_id: u64, identity: ResolvedIdentity) -> bool {
        if self.entries.contains_key(&track_id) {
            return false;
        }
        self.entries.insert(track_id, identity);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
