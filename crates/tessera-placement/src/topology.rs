//! Pool map: versioned topology snapshot of a pool
//!
//! Domains (racks) contain nodes, nodes contain targets. The version grows
//! on every structural or status change; placement maps bind to one version
//! and never observe later mutations.

use serde::{Deserialize, Serialize};
use tessera_common::{Error, FailureDomain, PoolId, Rank, Result, TargetId};

/// Target status as recorded in the pool map
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetStatus {
    /// Serving and part of the layout
    #[default]
    UpIn,
    /// Back online, being reintegrated
    Up,
    /// Failed, shards are being rebuilt elsewhere
    Down,
    /// Failed and rebuilt, no longer part of the pool
    DownOut,
}

impl TargetStatus {
    /// Whether the target may hold shards
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::UpIn)
    }

    /// Whether the target has been excluded by a failure
    #[must_use]
    pub const fn is_excluded(self) -> bool {
        matches!(self, Self::Down | Self::DownOut)
    }
}

/// A storage target
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TargetInfo {
    /// Pool-wide target identifier
    pub id: TargetId,
    /// Rank of the node hosting the target
    pub rank: Rank,
    /// Index of the target within its node
    pub index: u32,
    /// Current status
    pub status: TargetStatus,
    /// Pool map version at which the target last failed (0 if never)
    pub fail_version: u32,
}

/// A storage node
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Rank of the server process
    pub rank: Rank,
    /// Human-readable name
    pub name: String,
    /// Targets on this node
    pub targets: Vec<TargetInfo>,
}

/// A top-level fault domain (rack)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DomainInfo {
    /// Domain name
    pub name: String,
    /// Nodes in this domain, in join order
    pub nodes: Vec<NodeInfo>,
}

/// Versioned topology of one pool
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolMap {
    pool_id: PoolId,
    version: u32,
    domains: Vec<DomainInfo>,
    next_target: u32,
}

impl PoolMap {
    /// Create an empty pool map at version 0
    #[must_use]
    pub fn new(pool_id: PoolId) -> Self {
        Self {
            pool_id,
            version: 0,
            domains: Vec::new(),
            next_target: 0,
        }
    }

    #[must_use]
    pub const fn pool_id(&self) -> PoolId {
        self.pool_id
    }

    /// Version of this snapshot
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Domains in topology order
    #[must_use]
    pub fn domains(&self) -> &[DomainInfo] {
        &self.domains
    }

    /// Add a node with `target_count` targets to `domain`, creating the
    /// domain if needed. Target IDs are assigned sequentially.
    pub fn add_node(&mut self, domain: &str, rank: Rank, name: &str, target_count: u32) -> Result<()> {
        if self.nodes().any(|n| n.rank == rank) {
            return Err(Error::invalid_argument(format!("rank {rank} already in pool map")));
        }

        let targets = (0..target_count)
            .map(|index| TargetInfo {
                id: TargetId::new(self.next_target + index),
                rank,
                index,
                status: TargetStatus::UpIn,
                fail_version: 0,
            })
            .collect();
        self.next_target += target_count;

        let node = NodeInfo {
            rank,
            name: name.to_string(),
            targets,
        };
        match self.domains.iter_mut().find(|d| d.name == domain) {
            Some(existing) => existing.nodes.push(node),
            None => self.domains.push(DomainInfo {
                name: domain.to_string(),
                nodes: vec![node],
            }),
        }
        self.version += 1;
        Ok(())
    }

    /// All nodes in topology order
    pub fn nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.domains.iter().flat_map(|d| d.nodes.iter())
    }

    /// All targets in topology order
    pub fn targets(&self) -> impl Iterator<Item = &TargetInfo> {
        self.nodes().flat_map(|n| n.targets.iter())
    }

    /// Look up a target by ID
    #[must_use]
    pub fn target(&self, id: TargetId) -> Option<&TargetInfo> {
        self.targets().find(|t| t.id == id)
    }

    #[must_use]
    pub fn target_count(&self) -> usize {
        self.targets().count()
    }

    #[must_use]
    pub fn healthy_target_count(&self) -> usize {
        self.targets().filter(|t| t.status.is_healthy()).count()
    }

    /// Group targets by failure domain, both levels in topology order
    #[must_use]
    pub fn targets_by_domain(&self, level: FailureDomain) -> Vec<Vec<&TargetInfo>> {
        match level {
            FailureDomain::Rack => self
                .domains
                .iter()
                .map(|d| d.nodes.iter().flat_map(|n| n.targets.iter()).collect())
                .collect(),
            FailureDomain::Node => self.nodes().map(|n| n.targets.iter().collect()).collect(),
            FailureDomain::Target => self.targets().map(|t| vec![t]).collect(),
        }
    }

    /// Mark a target as failed
    pub fn exclude_target(&mut self, id: TargetId) -> Result<()> {
        let version = self.version + 1;
        let target = self.target_mut(id)?;
        if target.status.is_excluded() {
            return Ok(());
        }
        target.status = TargetStatus::Down;
        target.fail_version = version;
        self.version = version;
        Ok(())
    }

    /// Mark every target of a node as failed in a single version step
    pub fn exclude_node(&mut self, rank: Rank) -> Result<()> {
        let version = self.version + 1;
        let node = self
            .domains
            .iter_mut()
            .flat_map(|d| d.nodes.iter_mut())
            .find(|n| n.rank == rank)
            .ok_or_else(|| Error::not_found(format!("rank {rank}")))?;

        let mut changed = false;
        for target in node.targets.iter_mut().filter(|t| !t.status.is_excluded()) {
            target.status = TargetStatus::Down;
            target.fail_version = version;
            changed = true;
        }
        if changed {
            self.version = version;
        }
        Ok(())
    }

    /// Mark a failed target as rebuilt and out of the pool
    pub fn mark_target_out(&mut self, id: TargetId) -> Result<()> {
        self.transition(id, TargetStatus::Down, TargetStatus::DownOut)
    }

    /// Bring a failed target back for reintegration
    pub fn reintegrate_target(&mut self, id: TargetId) -> Result<()> {
        let target = self.target_mut(id)?;
        if !target.status.is_excluded() {
            return Err(Error::invalid_argument(format!("target {id} is not excluded")));
        }
        target.status = TargetStatus::Up;
        self.version += 1;
        Ok(())
    }

    /// Finish reintegration of a target
    pub fn mark_target_in(&mut self, id: TargetId) -> Result<()> {
        self.transition(id, TargetStatus::Up, TargetStatus::UpIn)
    }

    fn transition(&mut self, id: TargetId, from: TargetStatus, to: TargetStatus) -> Result<()> {
        let target = self.target_mut(id)?;
        if target.status != from {
            return Err(Error::invalid_argument(format!(
                "target {id} is {:?}, expected {from:?}",
                target.status
            )));
        }
        target.status = to;
        self.version += 1;
        Ok(())
    }

    fn target_mut(&mut self, id: TargetId) -> Result<&mut TargetInfo> {
        self.domains
            .iter_mut()
            .flat_map(|d| d.nodes.iter_mut())
            .flat_map(|n| n.targets.iter_mut())
            .find(|t| t.id == id)
            .ok_or_else(|| Error::not_found(format!("target {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_rack_map() -> PoolMap {
        let mut map = PoolMap::new(PoolId::new());
        map.add_node("rack0", Rank::new(0), "node0", 2).unwrap();
        map.add_node("rack1", Rank::new(1), "node1", 2).unwrap();
        map.add_node("rack0", Rank::new(2), "node2", 2).unwrap();
        map
    }

    #[test]
    fn test_add_node_bumps_version() {
        let map = two_rack_map();
        assert_eq!(map.version(), 3);
        assert_eq!(map.domains().len(), 2);
        assert_eq!(map.target_count(), 6);
        assert_eq!(map.target(TargetId::new(5)).unwrap().rank, Rank::new(2));
    }

    #[test]
    fn test_duplicate_rank_rejected() {
        let mut map = two_rack_map();
        assert!(map.add_node("rack1", Rank::new(1), "again", 1).is_err());
        assert_eq!(map.version(), 3);
    }

    #[test]
    fn test_targets_by_domain() {
        let map = two_rack_map();
        let racks = map.targets_by_domain(FailureDomain::Rack);
        assert_eq!(racks.len(), 2);
        assert_eq!(racks[0].len(), 4);
        assert_eq!(racks[1].len(), 2);
        assert_eq!(map.targets_by_domain(FailureDomain::Node).len(), 3);
        assert_eq!(map.targets_by_domain(FailureDomain::Target).len(), 6);
    }

    #[test]
    fn test_exclude_and_reintegrate() {
        let mut map = two_rack_map();
        map.exclude_target(TargetId::new(1)).unwrap();
        assert_eq!(map.version(), 4);
        let target = map.target(TargetId::new(1)).unwrap();
        assert_eq!(target.status, TargetStatus::Down);
        assert_eq!(target.fail_version, 4);
        assert_eq!(map.healthy_target_count(), 5);

        // Excluding twice is a no-op
        map.exclude_target(TargetId::new(1)).unwrap();
        assert_eq!(map.version(), 4);

        map.mark_target_out(TargetId::new(1)).unwrap();
        map.reintegrate_target(TargetId::new(1)).unwrap();
        assert_eq!(map.target(TargetId::new(1)).unwrap().status, TargetStatus::Up);
        map.mark_target_in(TargetId::new(1)).unwrap();
        assert_eq!(map.version(), 7);
        assert_eq!(map.healthy_target_count(), 6);
    }

    #[test]
    fn test_exclude_node() {
        let mut map = two_rack_map();
        map.exclude_node(Rank::new(1)).unwrap();
        assert_eq!(map.version(), 4);
        assert_eq!(map.healthy_target_count(), 4);
        assert!(map.exclude_node(Rank::new(9)).unwrap_err().is_not_found());
    }
}
