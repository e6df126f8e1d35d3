//! Placement map cache
//!
//! Holds at most one live placement map per pool. Maps are replaced when a
//! newer pool map version arrives and evicted when the last pool connection
//! goes away. The cache owns one reference to every map it holds; callers
//! get their own reference from [`PlacementMapCache::find`].

use crate::algorithm::PlacementAttr;
use crate::map::{PlacementMap, PlacementMapRef};
use crate::topology::PoolMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use tessera_common::{Error, PlacementConfig, PoolId, Result};
use tracing::debug;

/// Pool ID → placement map table
pub struct PlacementMapCache {
    attr: PlacementAttr,
    table: RwLock<HashMap<PoolId, PlacementMapRef>>,
}

impl PlacementMapCache {
    /// Create an empty cache building maps with the configured algorithm
    #[must_use]
    pub fn new(config: &PlacementConfig) -> Self {
        Self {
            attr: PlacementAttr::from(config),
            table: RwLock::new(HashMap::new()),
        }
    }

    /// Install a placement map built from `pool_map` unless the cached one
    /// is at least as new. `connect` counts a new pool connection either way.
    pub fn update(&self, pool_id: PoolId, pool_map: &PoolMap, connect: bool) -> Result<()> {
        if pool_map.pool_id() != pool_id {
            return Err(Error::invalid_argument(format!(
                "pool map of {} offered for pool {pool_id}",
                pool_map.pool_id()
            )));
        }

        let mut table = self.table.write();
        let map = match table.get(&pool_id) {
            Some(cached) if cached.version() >= pool_map.version() => {
                debug!(
                    pool = %pool_id,
                    cached = cached.version(),
                    offered = pool_map.version(),
                    "placement map is up to date"
                );
                if connect {
                    cached.connect();
                }
                return Ok(());
            }
            Some(cached) => {
                let map = PlacementMap::create(pool_map, &self.attr)?;
                map.set_connects(cached.connects());
                debug!(
                    pool = %pool_id,
                    old = cached.version(),
                    new = map.version(),
                    "replace placement map"
                );
                map
            }
            None => {
                let map = PlacementMap::create(pool_map, &self.attr)?;
                debug!(pool = %pool_id, version = map.version(), "cache placement map");
                map
            }
        };

        if connect {
            map.connect();
        }
        // The creation reference becomes the cache's reference; a replaced
        // map loses the cache's reference here.
        table.insert(pool_id, map);
        Ok(())
    }

    /// Drop one pool connection, evicting the map with the last one
    pub fn disconnect(&self, pool_id: PoolId) {
        let mut table = self.table.write();
        let Some(map) = table.get(&pool_id) else {
            return;
        };
        if map.disconnect() == 0 {
            debug!(pool = %pool_id, version = map.version(), "evict placement map");
            table.remove(&pool_id);
        }
    }

    /// Look up the map of a pool, taking a reference for the caller
    pub fn find(&self, pool_id: PoolId) -> Result<PlacementMapRef> {
        self.table
            .read()
            .get(&pool_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("placement map of pool {pool_id}")))
    }

    /// Take another reference to `map`
    #[must_use]
    pub fn addref(&self, map: &PlacementMapRef) -> PlacementMapRef {
        map.clone()
    }

    /// Release a reference; an evicted map is destroyed with its last one
    pub fn decref(&self, map: PlacementMapRef) {
        drop(map);
    }

    /// Number of cached pools
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }
}

impl Default for PlacementMapCache {
    fn default() -> Self {
        Self::new(&PlacementConfig::default())
    }
}
