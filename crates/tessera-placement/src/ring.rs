//! Ring placement
//!
//! Targets are grouped by failure domain and interleaved round-robin into a
//! ring, so consecutive ring positions fall into different domains. An
//! object hashes to a ring position; each redundancy group takes the next
//! eligible targets walking forward from its start position, preferring a
//! domain the group does not use yet.
//!
//! The base layout ignores target health. Shards whose base target is not
//! `UpIn` are then moved to spares found by walking forward from the failed
//! position, so a failure only ever moves the failed target's shards.
//!
//! ```text
//! rack0: t0 t1 t2 t3     ring: t0 t4 t1 t5 t2 t6 t3 t7
//! rack1: t4 t5 t6 t7
//! ```

use crate::algorithm::{PlacementAlgorithm, PlacementAttr, RebuildTarget, ReinstateTarget};
use crate::layout::{LayoutShard, ObjectLayout};
use crate::topology::{PoolMap, TargetInfo, TargetStatus};
use std::fmt::Write as _;
use tessera_common::{
    Error, FailureDomain, ObjectMetadata, PoolId, Rank, Result, ShardMetadata, TargetId,
};
use tracing::debug;

/// One ring position
#[derive(Clone, Copy, Debug)]
struct Slot {
    target: TargetId,
    rank: Rank,
    index: u32,
    domain: usize,
    status: TargetStatus,
    fail_version: u32,
}

impl Slot {
    fn new(target: &TargetInfo, domain: usize) -> Self {
        Self {
            target: target.id,
            rank: target.rank,
            index: target.index,
            domain,
            status: target.status,
            fail_version: target.fail_version,
        }
    }
}

/// Base and effective ring positions of every shard of an object
struct Placement {
    base: Vec<usize>,
    current: Vec<usize>,
}

/// Ring placement map built from one pool map version
pub struct RingMap {
    pool_id: PoolId,
    version: u32,
    domain: FailureDomain,
    domain_count: usize,
    rings: Vec<Vec<Slot>>,
}

impl RingMap {
    /// Registry constructor
    pub fn create(pool_map: &PoolMap, attr: &PlacementAttr) -> Result<Box<dyn PlacementAlgorithm>> {
        Ok(Box::new(Self::new(pool_map, attr)?))
    }

    /// Build the rings for `pool_map`
    pub fn new(pool_map: &PoolMap, attr: &PlacementAttr) -> Result<Self> {
        if attr.ring_count == 0 {
            return Err(Error::invalid_argument("ring count must be at least 1"));
        }

        let domains: Vec<Vec<&TargetInfo>> = pool_map
            .targets_by_domain(attr.domain)
            .into_iter()
            .filter(|targets| !targets.is_empty())
            .collect();
        if domains.is_empty() {
            return Err(Error::InsufficientTargets {
                available: 0,
                required: 1,
            });
        }

        let rings = (0..attr.ring_count)
            .map(|ring| Self::build_ring(&domains, ring))
            .collect();

        debug!(
            pool = %pool_map.pool_id(),
            version = pool_map.version(),
            domain = %attr.domain,
            domains = domains.len(),
            rings = attr.ring_count,
            "built ring placement map"
        );

        Ok(Self {
            pool_id: pool_map.pool_id(),
            version: pool_map.version(),
            domain: attr.domain,
            domain_count: domains.len(),
            rings,
        })
    }

    /// Interleave domains into one ring. Ring 0 keeps topology order; other
    /// rings order domains by a hash seeded with the ring number.
    fn build_ring(domains: &[Vec<&TargetInfo>], ring: u32) -> Vec<Slot> {
        let mut order: Vec<usize> = (0..domains.len()).collect();
        if ring > 0 {
            order.sort_by_key(|&d| {
                let head = domains[d][0].id.get();
                (xxhash_rust::xxh64::xxh64(&head.to_le_bytes(), u64::from(ring)), d)
            });
        }

        let depth = domains.iter().map(Vec::len).max().unwrap_or(0);
        let mut slots = Vec::with_capacity(domains.iter().map(Vec::len).sum());
        for round in 0..depth {
            for &d in &order {
                if let Some(target) = domains[d].get(round) {
                    slots.push(Slot::new(target, d));
                }
            }
        }
        slots
    }

    /// Snapshot version this map was built from
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Number of failure domains on the ring
    #[must_use]
    pub const fn domain_count(&self) -> usize {
        self.domain_count
    }

    fn hash_object(md: &ObjectMetadata) -> u64 {
        xxhash_rust::xxh64::xxh64(md.id.as_bytes(), 0)
    }

    fn ring_for(&self, hash: u64) -> &[Slot] {
        let ring = (hash % self.rings.len() as u64) as usize;
        &self.rings[ring]
    }

    /// Ring positions walking forward from `start`, wrapping once
    fn walk(len: usize, start: usize) -> impl Iterator<Item = usize> {
        (0..len).map(move |step| (start + step) % len)
    }

    /// Check object/shard metadata and return the shard range to report
    fn shard_range(md: &ObjectMetadata, shard: Option<&ShardMetadata>) -> Result<std::ops::Range<u32>> {
        md.class.validate()?;
        let Some(shard) = shard else {
            return Ok(0..md.class.shard_count());
        };
        if shard.object_id != md.id {
            return Err(Error::invalid_argument(format!(
                "shard of object {} placed with metadata of {}",
                shard.object_id, md.id
            )));
        }
        if shard.shard >= md.class.shard_count() {
            return Err(Error::invalid_argument(format!(
                "shard {} out of range for {} shards",
                shard.shard,
                md.class.shard_count()
            )));
        }
        let head = md.class.group_head(shard.shard);
        Ok(head..head + md.class.group_size())
    }

    /// Shards a find operation looks at: from `shard` to the end of its
    /// group, or the whole object
    fn search_range(md: &ObjectMetadata, shard: Option<&ShardMetadata>) -> Result<std::ops::Range<u32>> {
        let range = Self::shard_range(md, shard)?;
        Ok(shard.map_or(range.start, |s| s.shard)..range.end)
    }

    /// Per-slot flags, failing instead of aborting on huge rings
    fn slot_flags(len: usize) -> Result<Vec<bool>> {
        let mut flags = Vec::new();
        flags
            .try_reserve_exact(len)
            .map_err(|e| Error::out_of_memory(format!("placement scratch of {len} slots: {e}")))?;
        flags.resize(len, false);
        Ok(flags)
    }

    fn compute(ring: &[Slot], md: &ObjectMetadata) -> Result<Placement> {
        let len = ring.len();
        let group_size = md.class.group_size() as usize;
        let shard_count = md.class.shard_count() as usize;
        if group_size > len || shard_count > len {
            return Err(Error::InsufficientTargets {
                available: len,
                required: shard_count.max(group_size),
            });
        }

        let start = (Self::hash_object(md) % len as u64) as usize;
        let mut used = Self::slot_flags(len)?;
        let mut base = Vec::with_capacity(shard_count);

        for group_start in (0..shard_count).step_by(group_size).map(|head| (start + head) % len) {
            let mut members: Vec<usize> = Vec::with_capacity(group_size);
            for _ in 0..group_size {
                let fresh_domain =
                    |pos: usize| !members.iter().any(|&m| ring[m].domain == ring[pos].domain);
                let pos = Self::walk(len, group_start)
                    .find(|&p| !used[p] && fresh_domain(p))
                    .or_else(|| Self::walk(len, group_start).find(|&p| !members.contains(&p) && fresh_domain(p)))
                    .or_else(|| Self::walk(len, group_start).find(|&p| !used[p]))
                    .or_else(|| Self::walk(len, group_start).find(|&p| !members.contains(&p)))
                    .ok_or(Error::InsufficientTargets {
                        available: len,
                        required: group_size,
                    })?;
                used[pos] = true;
                members.push(pos);
            }
            base.extend(members);
        }

        // Spares are handed out in failure order, so a shard rebuilt in an
        // earlier version keeps its spare when more targets fail later.
        let mut failed: Vec<usize> = (0..shard_count)
            .filter(|&s| !ring[base[s]].status.is_healthy())
            .collect();
        failed.sort_by_key(|&s| (ring[base[s]].fail_version, s));

        let mut current = base.clone();
        for shard in failed {
            let group = shard / group_size * group_size..(shard / group_size + 1) * group_size;
            let others: Vec<usize> = group.filter(|&s| s != shard).map(|s| current[s]).collect();
            let in_group = |p: usize| others.contains(&p);
            let fresh_domain = |p: usize| !others.iter().any(|&m| ring[m].domain == ring[p].domain);
            let healthy = |p: usize| ring[p].status.is_healthy();
            let from = (base[shard] + 1) % len;

            let spare = Self::walk(len, from)
                .find(|&p| healthy(p) && !used[p] && fresh_domain(p))
                .or_else(|| Self::walk(len, from).find(|&p| healthy(p) && !in_group(p) && fresh_domain(p)))
                .or_else(|| Self::walk(len, from).find(|&p| healthy(p) && !used[p]))
                .or_else(|| Self::walk(len, from).find(|&p| healthy(p) && !in_group(p)))
                .ok_or_else(|| Error::InsufficientTargets {
                    available: ring.iter().filter(|s| s.status.is_healthy()).count(),
                    required: group_size,
                })?;
            used[spare] = true;
            current[shard] = spare;
        }

        Ok(Placement { base, current })
    }
}

impl PlacementAlgorithm for RingMap {
    fn name(&self) -> &'static str {
        "ring"
    }

    fn destroy(&self) {
        debug!(pool = %self.pool_id, version = self.version, "destroy ring placement map");
    }

    fn print(&self) -> Option<String> {
        let mut out = format!(
            "ring map pool {} version {} domain {} ({} domains)\n",
            self.pool_id, self.version, self.domain, self.domain_count
        );
        for (i, ring) in self.rings.iter().enumerate() {
            let _ = write!(out, "ring[{i}]:");
            for slot in ring {
                let _ = write!(out, " {}@{}/{}", slot.target, slot.rank, slot.domain);
            }
            out.push('\n');
        }
        Some(out)
    }

    fn place(&self, md: &ObjectMetadata, shard: Option<&ShardMetadata>) -> Result<ObjectLayout> {
        let range = Self::shard_range(md, shard)?;
        let ring = self.ring_for(Self::hash_object(md));
        let placement = Self::compute(ring, md)?;

        let mut layout = ObjectLayout::with_capacity(range.len())?;
        for shard in range {
            let pos = placement.current[shard as usize];
            let slot = &ring[pos];
            layout.shards.push(LayoutShard {
                shard,
                target: slot.target,
                rank: slot.rank,
                target_index: slot.index,
                domain: slot.domain,
                remapped: pos != placement.base[shard as usize],
            });
        }
        Ok(layout)
    }

    fn find_rebuild_target(
        &self,
        md: &ObjectMetadata,
        shard: Option<&ShardMetadata>,
        rebuild_version: u32,
    ) -> Result<Option<RebuildTarget>> {
        if rebuild_version > self.version {
            return Err(Error::StaleMap {
                cached: self.version,
                requested: rebuild_version,
            });
        }

        let range = Self::search_range(md, shard)?;
        let ring = self.ring_for(Self::hash_object(md));
        let placement = Self::compute(ring, md)?;

        Ok(range
            .into_iter()
            .find(|&s| {
                let failed = &ring[placement.base[s as usize]];
                failed.status == TargetStatus::Down && failed.fail_version <= rebuild_version
            })
            .map(|s| {
                let spare = &ring[placement.current[s as usize]];
                RebuildTarget {
                    shard: s,
                    target: spare.target,
                    rank: spare.rank,
                }
            }))
    }

    fn find_reinstate_target(
        &self,
        md: &ObjectMetadata,
        shard: Option<&ShardMetadata>,
        candidates: &[TargetId],
    ) -> Result<Option<ReinstateTarget>> {
        let range = Self::search_range(md, shard)?;
        let ring = self.ring_for(Self::hash_object(md));
        let placement = Self::compute(ring, md)?;

        Ok(range
            .into_iter()
            .map(|s| (s, &ring[placement.base[s as usize]]))
            .find(|(_, slot)| slot.status == TargetStatus::Up && candidates.contains(&slot.target))
            .map(|(s, slot)| ReinstateTarget {
                shard: s,
                target: slot.target,
                rank: slot.rank,
            }))
    }
}
