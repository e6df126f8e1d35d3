//! Tessera Placement - deterministic object placement
//!
//! This crate computes which targets of a pool hold the shards of an
//! object. Placement is a pure function of the pool map version, the object
//! ID and its redundancy class, so independent nodes agree on layouts
//! without talking to each other.
//!
//! # Components
//!
//! - [`PoolMap`]: versioned pool topology (domains, nodes, targets)
//! - [`PlacementAlgorithm`]: the algorithm interface, resolved by tag
//!   through a static registry; [`RingMap`] is the ring implementation
//! - [`PlacementMap`]: an algorithm bound to one pool map version, shared
//!   through counted [`PlacementMapRef`] handles
//! - [`PlacementMapCache`]: one live map per pool, replaced on newer
//!   versions and evicted with the last pool connection
//!
//! # Example
//! ```ignore
//! use tessera_placement::PlacementMapCache;
//!
//! let cache = PlacementMapCache::default();
//! cache.update(pool_id, &pool_map, true)?;
//! let map = cache.find(pool_id)?;
//! let layout = map.place(&object_md, None)?;
//! ```

pub mod algorithm;
pub mod cache;
pub mod layout;
pub mod map;
pub mod ring;
pub mod topology;

pub use algorithm::{
    resolve, PlacementAlgorithm, PlacementAlgorithmEntry, PlacementAttr, RebuildTarget,
    ReinstateTarget, PLACEMENT_TYPE_UNKNOWN,
};
pub use cache::PlacementMapCache;
pub use layout::{LayoutShard, ObjectLayout};
pub use map::{PlacementMap, PlacementMapRef};
pub use ring::RingMap;
pub use topology::{DomainInfo, NodeInfo, PoolMap, TargetInfo, TargetStatus};
