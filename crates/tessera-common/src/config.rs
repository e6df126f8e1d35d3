//! Configuration types for Tessera
//!
//! This module defines configuration structures used across components.

use crate::types::{FailureDomain, IvShortcut, IvSyncMode};
use serde::{Deserialize, Serialize};

/// Tag of the ring placement algorithm
pub const PLACEMENT_TYPE_RING: u32 = 1;

/// Root configuration for Tessera
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Placement map configuration
    #[serde(default)]
    pub placement: PlacementConfig,
    /// Rebuild status aggregation configuration
    #[serde(default)]
    pub rebuild: RebuildConfig,
}

/// Attributes used whenever a placement map is built for a pool
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// Algorithm tag resolved through the placement registry
    pub algorithm: u32,
    /// Failure domain the ring spreads shards across
    pub domain: FailureDomain,
    /// Number of rings an object can hash onto
    pub ring_count: u32,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            algorithm: PLACEMENT_TYPE_RING,
            domain: FailureDomain::Rack,
            ring_count: 1,
        }
    }
}

/// Delivery options for the rebuild incremental value
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildConfig {
    /// Routing of leaf-to-master updates
    pub update_shortcut: IvShortcut,
    /// Synchronization of leaf-to-master updates
    pub update_sync: IvSyncMode,
    /// Synchronization of master-to-leaf broadcasts
    pub broadcast_sync: IvSyncMode,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            update_shortcut: IvShortcut::ToRoot,
            update_sync: IvSyncMode::None,
            broadcast_sync: IvSyncMode::Eager,
        }
    }
}
