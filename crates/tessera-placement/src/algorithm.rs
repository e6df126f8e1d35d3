//! Placement algorithm interface and registry
//!
//! Every algorithm implements [`PlacementAlgorithm`]. The registry is a
//! fixed table of constructors keyed by algorithm tag and terminated by an
//! `unknown` sentinel; adding an algorithm means adding a row here, callers
//! only ever go through the trait.

use crate::layout::ObjectLayout;
use crate::ring::RingMap;
use crate::topology::PoolMap;
use std::fmt;
use tessera_common::config::PLACEMENT_TYPE_RING;
use tessera_common::{
    Error, FailureDomain, ObjectMetadata, PlacementConfig, Rank, Result, ShardMetadata, TargetId,
};

/// Tag of the registry sentinel
pub const PLACEMENT_TYPE_UNKNOWN: u32 = 0;

/// Attributes an algorithm is instantiated with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlacementAttr {
    /// Algorithm tag
    pub kind: u32,
    /// Failure domain shards of one group are spread across
    pub domain: FailureDomain,
    /// Number of rings (ring algorithm only)
    pub ring_count: u32,
}

impl PlacementAttr {
    /// Ring placement across racks with a single ring
    #[must_use]
    pub const fn ring() -> Self {
        Self {
            kind: PLACEMENT_TYPE_RING,
            domain: FailureDomain::Rack,
            ring_count: 1,
        }
    }
}

impl Default for PlacementAttr {
    fn default() -> Self {
        Self::ring()
    }
}

impl From<&PlacementConfig> for PlacementAttr {
    fn from(config: &PlacementConfig) -> Self {
        Self {
            kind: config.algorithm,
            domain: config.domain,
            ring_count: config.ring_count,
        }
    }
}

/// A shard that has to be rebuilt on a spare target
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RebuildTarget {
    /// Shard index within the object
    pub shard: u32,
    /// Spare target receiving the shard
    pub target: TargetId,
    /// Rank hosting the spare target
    pub rank: Rank,
}

/// A shard that has to be copied back to a reintegrating target
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReinstateTarget {
    /// Shard index within the object
    pub shard: u32,
    /// Reintegrating target receiving the shard
    pub target: TargetId,
    /// Rank hosting the target
    pub rank: Rank,
}

/// Operations of one placement algorithm bound to one pool map version
pub trait PlacementAlgorithm: Send + Sync {
    /// Registry name of the algorithm
    fn name(&self) -> &'static str;

    /// Release algorithm resources; called once the last reference is gone
    fn destroy(&self) {}

    /// Debug rendering of the algorithm state, `None` if not supported
    fn print(&self) -> Option<String> {
        None
    }

    /// Compute the layout of an object, or only of the redundancy group
    /// `shard` belongs to when it is given
    fn place(&self, md: &ObjectMetadata, shard: Option<&ShardMetadata>) -> Result<ObjectLayout>;

    /// Find a shard of the object that rebuild round `rebuild_version` has
    /// to relocate. With `shard` given, only that shard and the later ones
    /// of its group are considered, so callers can resume after a hit.
    fn find_rebuild_target(
        &self,
        _md: &ObjectMetadata,
        _shard: Option<&ShardMetadata>,
        _rebuild_version: u32,
    ) -> Result<Option<RebuildTarget>> {
        Err(Error::unsupported(format!("{}: find_rebuild_target", self.name())))
    }

    /// Find a shard of the object that belongs on one of the reintegrating
    /// `candidates`, searching like [`Self::find_rebuild_target`]
    fn find_reinstate_target(
        &self,
        _md: &ObjectMetadata,
        _shard: Option<&ShardMetadata>,
        _candidates: &[TargetId],
    ) -> Result<Option<ReinstateTarget>> {
        Err(Error::unsupported(format!("{}: find_reinstate_target", self.name())))
    }
}

/// Constructor of a placement algorithm
pub type CreateFn = fn(&PoolMap, &PlacementAttr) -> Result<Box<dyn PlacementAlgorithm>>;

/// Registry row
pub struct PlacementAlgorithmEntry {
    /// Algorithm tag
    pub kind: u32,
    /// Algorithm name
    pub name: &'static str,
    /// Constructor, absent only for the sentinel
    pub create: Option<CreateFn>,
}

impl fmt::Debug for PlacementAlgorithmEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlacementAlgorithmEntry")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("create", &self.create.is_some())
            .finish()
    }
}

static PLACEMENT_ALGORITHMS: &[PlacementAlgorithmEntry] = &[
    PlacementAlgorithmEntry {
        kind: PLACEMENT_TYPE_RING,
        name: "ring",
        create: Some(RingMap::create),
    },
    PlacementAlgorithmEntry {
        kind: PLACEMENT_TYPE_UNKNOWN,
        name: "unknown",
        create: None,
    },
];

/// Look up the registry row of algorithm `kind`
pub fn resolve(kind: u32) -> Result<&'static PlacementAlgorithmEntry> {
    PLACEMENT_ALGORITHMS
        .iter()
        .take_while(|entry| entry.kind != PLACEMENT_TYPE_UNKNOWN)
        .find(|entry| entry.kind == kind)
        .ok_or_else(|| Error::not_found(format!("placement algorithm type {kind}")))
}
