//! Rebuild scan
//!
//! Walks a set of objects against the placement map and keeps the shards a
//! rank has to rebuild locally in a given rebuild round.

use tessera_common::{ObjectId, ObjectMetadata, Rank, Result, ShardMetadata, TargetId};
use tessera_placement::PlacementMap;
use tracing::debug;

/// One shard to rebuild on the scanning rank
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RebuildWork {
    pub object: ObjectId,
    pub shard: u32,
    /// Local spare target receiving the shard
    pub target: TargetId,
}

/// Collect the shards of `objects` that round `version` relocates onto
/// targets of `rank`. Each group is searched until no failed shard is
/// left in it.
pub fn scan_objects<'a>(
    map: &PlacementMap,
    version: u32,
    rank: Rank,
    objects: impl IntoIterator<Item = &'a ObjectMetadata>,
) -> Result<Vec<RebuildWork>> {
    let mut work = Vec::new();
    for md in objects {
        md.class.validate()?;
        let group_size = md.class.group_size();
        for group in 0..md.class.group_count {
            let end = (group + 1) * group_size;
            let mut next = group * group_size;
            while next < end {
                let from = ShardMetadata::new(md.id, next);
                let Some(found) = map.find_rebuild_target(md, Some(&from), version)? else {
                    break;
                };
                if found.rank == rank {
                    work.push(RebuildWork {
                        object: md.id,
                        shard: found.shard,
                        target: found.target,
                    });
                }
                next = found.shard + 1;
            }
        }
    }
    debug!(pool = %map.pool_id(), version, rank = %rank, shards = work.len(), "rebuild scan done");
    Ok(work)
}
