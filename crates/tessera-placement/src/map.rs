//! Placement map: one algorithm instance bound to one pool map version
//!
//! A map is shared through [`PlacementMapRef`] handles. Every handle owns one
//! counted reference; cloning a handle takes another, dropping it releases
//! it. The algorithm's destructor runs when the last reference goes away,
//! which can only happen after the cache has evicted the map, since the
//! cache holds a handle of its own.

use crate::algorithm::{self, PlacementAlgorithm, PlacementAttr, RebuildTarget, ReinstateTarget};
use crate::layout::ObjectLayout;
use crate::topology::PoolMap;
use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tessera_common::{Error, ObjectMetadata, PoolId, Result, ShardMetadata, TargetId};
use tracing::debug;

#[derive(Debug)]
struct MapRefs {
    refcount: u32,
    connects: u32,
}

/// Placement map of one pool at one pool map version
pub struct PlacementMap {
    pool_id: PoolId,
    kind: u32,
    name: &'static str,
    version: u32,
    algorithm: Box<dyn PlacementAlgorithm>,
    refs: Mutex<MapRefs>,
}

impl PlacementMap {
    /// Build a map from `pool_map`. The returned handle is the caller's
    /// reference; the connection count starts at zero.
    pub fn create(pool_map: &PoolMap, attr: &PlacementAttr) -> Result<PlacementMapRef> {
        let entry = algorithm::resolve(attr.kind).map_err(|_| {
            debug!(kind = attr.kind, "unknown placement map type");
            Error::invalid_argument(format!("unknown placement map type {}", attr.kind))
        })?;
        let create = entry.create.ok_or_else(|| {
            Error::invalid_argument(format!("placement map type {} has no constructor", attr.kind))
        })?;

        debug!(pool = %pool_map.pool_id(), version = pool_map.version(), "create a {} placement map", entry.name);
        let algorithm = create(pool_map, attr)?;

        Ok(PlacementMapRef {
            map: Arc::new(Self {
                pool_id: pool_map.pool_id(),
                kind: attr.kind,
                name: entry.name,
                version: pool_map.version(),
                algorithm,
                refs: Mutex::new(MapRefs {
                    refcount: 1,
                    connects: 0,
                }),
            }),
        })
    }

    #[must_use]
    pub const fn pool_id(&self) -> PoolId {
        self.pool_id
    }

    /// Algorithm tag
    #[must_use]
    pub const fn kind(&self) -> u32 {
        self.kind
    }

    /// Algorithm name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Pool map version the map was built from; never changes
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Number of outstanding references
    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.refs.lock().refcount
    }

    /// Number of pool connections using this map
    #[must_use]
    pub fn connects(&self) -> u32 {
        self.refs.lock().connects
    }

    fn addref(&self) {
        self.refs.lock().refcount += 1;
    }

    /// Drop one reference, returning whether it was the last one
    fn decref(&self) -> bool {
        let mut refs = self.refs.lock();
        assert!(refs.refcount > 0, "placement map refcount underflow");
        refs.refcount -= 1;
        refs.refcount == 0
    }

    fn destroy(&self) {
        assert_eq!(self.refcount(), 0, "destroying a referenced placement map");
        debug!(pool = %self.pool_id, version = self.version, "destroy {} placement map", self.name);
        self.algorithm.destroy();
    }

    pub(crate) fn connect(&self) {
        self.refs.lock().connects += 1;
    }

    pub(crate) fn set_connects(&self, connects: u32) {
        self.refs.lock().connects = connects;
    }

    /// Drop one connection, returning how many remain
    pub(crate) fn disconnect(&self) -> u32 {
        let mut refs = self.refs.lock();
        assert!(refs.connects > 0, "placement map connection underflow");
        refs.connects -= 1;
        refs.connects
    }

    /// Log the algorithm's debug rendering; `None` if it has none
    pub fn print(&self) -> Option<String> {
        let out = self.algorithm.print();
        if let Some(text) = &out {
            debug!("{text}");
        }
        out
    }

    /// Compute the layout of an object, or of the redundancy group of
    /// `shard` when given
    pub fn place(&self, md: &ObjectMetadata, shard: Option<&ShardMetadata>) -> Result<ObjectLayout> {
        self.algorithm.place(md, shard)
    }

    /// Find a shard the rebuild round `rebuild_version` has to relocate,
    /// starting at `shard` when given. Returns `Unsupported` if the
    /// algorithm cannot answer.
    pub fn find_rebuild_target(
        &self,
        md: &ObjectMetadata,
        shard: Option<&ShardMetadata>,
        rebuild_version: u32,
    ) -> Result<Option<RebuildTarget>> {
        self.algorithm.find_rebuild_target(md, shard, rebuild_version)
    }

    /// Find a shard that belongs on one of the reintegrating `candidates`.
    /// Returns `Unsupported` if the algorithm cannot answer.
    pub fn find_reinstate_target(
        &self,
        md: &ObjectMetadata,
        shard: Option<&ShardMetadata>,
        candidates: &[TargetId],
    ) -> Result<Option<ReinstateTarget>> {
        self.algorithm.find_reinstate_target(md, shard, candidates)
    }
}

impl fmt::Debug for PlacementMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlacementMap")
            .field("pool_id", &self.pool_id)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("refs", &*self.refs.lock())
            .finish()
    }
}

/// Counted reference to a [`PlacementMap`]
pub struct PlacementMapRef {
    map: Arc<PlacementMap>,
}

impl PlacementMapRef {
    /// Whether both handles reference the same map instance
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.map, &other.map)
    }

    #[cfg(test)]
    pub(crate) fn downgrade(&self) -> std::sync::Weak<PlacementMap> {
        Arc::downgrade(&self.map)
    }
}

impl Clone for PlacementMapRef {
    fn clone(&self) -> Self {
        self.map.addref();
        Self {
            map: Arc::clone(&self.map),
        }
    }
}

impl Drop for PlacementMapRef {
    fn drop(&mut self) {
        if self.map.decref() {
            self.map.destroy();
        }
    }
}

impl Deref for PlacementMapRef {
    type Target = PlacementMap;

    fn deref(&self) -> &PlacementMap {
        &self.map
    }
}

impl fmt::Debug for PlacementMapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.map.fmt(f)
    }
}
