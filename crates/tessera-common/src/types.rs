//! Core type definitions for Tessera
//!
//! This module defines the identifiers and object metadata consumed by the
//! placement engine, plus the small enums shared with the rebuild layer.

use crate::error::{Error, Result};
use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a pool
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into)]
pub struct PoolId(Uuid);

impl PoolId {
    /// Generate a new random pool ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The all-zero pool ID, used by freshly allocated entries
    #[must_use]
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Create from existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Check whether this is the nil ID
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Get as bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolId({})", self.0)
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an object (128 bits)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Generate a new random object ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Create from the high and low 64-bit halves
    #[must_use]
    pub const fn from_parts(hi: u64, lo: u64) -> Self {
        Self(Uuid::from_u64_pair(hi, lo))
    }

    /// Get as bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rank of a server process within the cluster group
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    Display, From, Into,
)]
#[display("{_0}")]
pub struct Rank(u32);

impl Rank {
    #[must_use]
    pub const fn new(rank: u32) -> Self {
        Self(rank)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// Pool-wide identifier of a storage target
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    Display, From, Into,
)]
#[display("{_0}")]
pub struct TargetId(u32);

impl TargetId {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// Failure domain levels for placement
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FailureDomain {
    /// Individual target failure
    Target = 0,
    /// Server/node failure
    Node = 1,
    /// Rack/power domain failure
    #[default]
    Rack = 2,
}

impl fmt::Display for FailureDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Target => write!(f, "target"),
            Self::Node => write!(f, "node"),
            Self::Rack => write!(f, "rack"),
        }
    }
}

/// Data protection scheme of an object class
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resilience {
    /// No redundancy; every shard is its own group
    None,
    /// Full copies
    Replication {
        /// Number of copies per group
        replicas: u8,
    },
    /// Erasure coding
    ErasureCode {
        /// Number of data shards (k)
        data_shards: u8,
        /// Number of parity shards (m)
        parity_shards: u8,
    },
}

/// Object class: redundancy scheme and stripe width
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectClass {
    /// Protection scheme
    pub resilience: Resilience,
    /// Number of redundancy groups the object is striped over
    pub group_count: u32,
}

impl ObjectClass {
    /// Unprotected class striped over `stripes` shards
    #[must_use]
    pub const fn unprotected(stripes: u32) -> Self {
        Self {
            resilience: Resilience::None,
            group_count: stripes,
        }
    }

    /// Replicated class with `groups` groups of `replicas` copies
    #[must_use]
    pub const fn replicated(replicas: u8, groups: u32) -> Self {
        Self {
            resilience: Resilience::Replication { replicas },
            group_count: groups,
        }
    }

    /// Erasure-coded class with `groups` groups of `k + m` shards
    #[must_use]
    pub const fn erasure(data_shards: u8, parity_shards: u8, groups: u32) -> Self {
        Self {
            resilience: Resilience::ErasureCode {
                data_shards,
                parity_shards,
            },
            group_count: groups,
        }
    }

    /// Number of shards in one redundancy group
    #[must_use]
    pub fn group_size(&self) -> u32 {
        match self.resilience {
            Resilience::None => 1,
            Resilience::Replication { replicas } => u32::from(replicas),
            Resilience::ErasureCode {
                data_shards,
                parity_shards,
            } => u32::from(data_shards) + u32::from(parity_shards),
        }
    }

    /// Total number of shards of the object
    #[must_use]
    pub fn shard_count(&self) -> u32 {
        self.group_size().saturating_mul(self.group_count)
    }

    /// Reject classes that cannot describe a layout
    pub fn validate(&self) -> Result<()> {
        if self.group_count == 0 {
            return Err(Error::invalid_argument("object class has no groups"));
        }
        if self.group_size().checked_mul(self.group_count).is_none() {
            return Err(Error::invalid_argument(format!(
                "{} groups of {} shards overflow the shard index",
                self.group_count,
                self.group_size()
            )));
        }
        match self.resilience {
            Resilience::Replication { replicas: 0 } => {
                Err(Error::invalid_argument("replicated class with zero replicas"))
            }
            Resilience::ErasureCode { data_shards: 0, .. } => {
                Err(Error::invalid_argument("erasure class with zero data shards"))
            }
            _ => Ok(()),
        }
    }

    /// Index of the first shard of the group `shard` belongs to
    #[must_use]
    pub fn group_head(&self, shard: u32) -> u32 {
        match self.resilience {
            Resilience::None => shard,
            _ => shard - shard % self.group_size(),
        }
    }

    /// Index of the redundancy group `shard` belongs to
    #[must_use]
    pub fn group_index(&self, shard: u32) -> u32 {
        match self.resilience {
            Resilience::None => shard,
            _ => shard / self.group_size(),
        }
    }
}

/// Object metadata consumed by placement
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Object identifier
    pub id: ObjectId,
    /// Redundancy class
    pub class: ObjectClass,
}

impl ObjectMetadata {
    #[must_use]
    pub const fn new(id: ObjectId, class: ObjectClass) -> Self {
        Self { id, class }
    }
}

/// Metadata of one shard of an object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardMetadata {
    /// Object the shard belongs to
    pub object_id: ObjectId,
    /// Shard index within the object
    pub shard: u32,
}

impl ShardMetadata {
    #[must_use]
    pub const fn new(object_id: ObjectId, shard: u32) -> Self {
        Self { object_id, shard }
    }
}

/// How far an IV update travels before it is merged
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IvShortcut {
    /// Hop parent by parent, merging at every internal node
    None,
    /// Send straight to the root
    #[default]
    ToRoot,
}

/// When an IV value is propagated to the other nodes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IvSyncMode {
    /// No synchronization after the update
    #[default]
    None,
    /// Push to all nodes before the update completes
    Eager,
    /// Push to all nodes in the background
    Lazy,
}
