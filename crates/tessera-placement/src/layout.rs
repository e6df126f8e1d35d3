//! Object layout produced by placement

use serde::{Deserialize, Serialize};
use tessera_common::{Error, Rank, Result, TargetId};

/// Placement of a single shard
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutShard {
    /// Shard index within the object
    pub shard: u32,
    /// Target holding the shard
    pub target: TargetId,
    /// Rank of the node hosting the target
    pub rank: Rank,
    /// Index of the target within its node
    pub target_index: u32,
    /// Index of the failure domain the target belongs to
    pub domain: usize,
    /// The shard was moved to a spare because its original target is out
    pub remapped: bool,
}

/// Ordered shard placements of one object, or of one redundancy group of it
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLayout {
    /// Shard placements ordered by shard index
    pub shards: Vec<LayoutShard>,
}

impl ObjectLayout {
    /// Allocate an empty layout able to hold `shard_count` shards
    pub fn with_capacity(shard_count: usize) -> Result<Self> {
        let mut shards = Vec::new();
        shards.try_reserve_exact(shard_count).map_err(|e| {
            Error::out_of_memory(format!("layout of {shard_count} shards: {e}"))
        })?;
        Ok(Self { shards })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Placement of `shard`, if the layout covers it
    #[must_use]
    pub fn shard(&self, shard: u32) -> Option<&LayoutShard> {
        self.shards.iter().find(|s| s.shard == shard)
    }

    /// Targets of the layout in shard order
    pub fn targets(&self) -> impl Iterator<Item = TargetId> + '_ {
        self.shards.iter().map(|s| s.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_capacity() {
        let layout = ObjectLayout::with_capacity(6).unwrap();
        assert!(layout.is_empty());
        assert!(layout.shards.capacity() >= 6);
    }

    #[test]
    fn test_with_capacity_overflow() {
        let err = ObjectLayout::with_capacity(usize::MAX).unwrap_err();
        assert!(matches!(err, Error::OutOfMemory(_)));
    }
}
