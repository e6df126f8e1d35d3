//! Rebuild IV client
//!
//! Thin wrappers issuing fetch, update and broadcast on the rebuild IV
//! namespace of a pool. Delivery over the group is behind [`IvTransport`];
//! the routing and synchronization options come from [`RebuildConfig`].

use std::sync::Arc;
use tessera_common::{IvShortcut, IvSyncMode, RebuildConfig, Result};
use tracing::error;

use crate::iv::RebuildIv;

/// Delivery of rebuild IV values over the group tree
pub trait IvTransport: Send + Sync {
    /// Read the value held by the tree root
    fn fetch(&self) -> Result<RebuildIv>;

    /// Send `value` towards the root, invoking the update callback at the
    /// nodes it passes
    fn send_tree_request(&self, value: &RebuildIv, shortcut: IvShortcut, sync: IvSyncMode) -> Result<()>;

    /// Push `value` from the root to every node, invoking the refresh
    /// callback on each
    fn broadcast(&self, value: &RebuildIv, sync: IvSyncMode) -> Result<()>;
}

/// Client of the rebuild IV namespace of one pool
#[derive(Clone)]
pub struct RebuildIvClient {
    transport: Arc<dyn IvTransport>,
    config: RebuildConfig,
}

impl RebuildIvClient {
    pub fn new(transport: Arc<dyn IvTransport>, config: RebuildConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &RebuildConfig {
        &self.config
    }

    pub fn fetch(&self) -> Result<RebuildIv> {
        self.transport.fetch().inspect_err(|e| {
            error!(error = %e, "iv fetch failed");
        })
    }

    /// Report a participant's status to the round master
    pub fn update(&self, value: &RebuildIv) -> Result<()> {
        self.transport
            .send_tree_request(value, self.config.update_shortcut, self.config.update_sync)
            .inspect_err(|e| {
                error!(
                    pool = %value.pool_id,
                    version = value.version,
                    rank = %value.rank,
                    error = %e,
                    "iv update failed"
                );
            })
    }

    /// Push the round status from the master to every participant
    pub fn broadcast(&self, value: &RebuildIv) -> Result<()> {
        self.transport
            .broadcast(value, self.config.broadcast_sync)
            .inspect_err(|e| {
                error!(
                    pool = %value.pool_id,
                    version = value.version,
                    error = %e,
                    "iv broadcast failed"
                );
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iv::{IvEntryOps, RebuildIvOps};
    use crate::tracker::RebuildTrackers;
    use parking_lot::Mutex;
    use rand::seq::SliceRandom;
    use tessera_common::{Error, PoolId, Rank};

    struct Node {
        ops: RebuildIvOps,
        value: Mutex<RebuildIv>,
        parent: Option<usize>,
    }

    /// In-process IV tree rooted at rank 0, node `i` hangs off `(i - 1) / 2`
    struct LocalTree {
        nodes: Vec<Node>,
        sent: Mutex<Vec<(IvShortcut, IvSyncMode)>>,
    }

    impl LocalTree {
        fn new(size: u32) -> Arc<Self> {
            let nodes = (0..size)
                .map(|rank| {
                    let ops = RebuildIvOps::new(Rank::new(rank), Arc::new(RebuildTrackers::new()));
                    let value = Mutex::new(ops.alloc());
                    Node {
                        ops,
                        value,
                        parent: (rank > 0).then(|| (rank as usize - 1) / 2),
                    }
                })
                .collect();
            Arc::new(Self {
                nodes,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn trackers(&self, rank: u32) -> &Arc<RebuildTrackers> {
            self.nodes[rank as usize].ops.trackers()
        }

        fn apply_update(&self, idx: usize, value: &RebuildIv) {
            let node = &self.nodes[idx];
            let mut local = node.value.lock();
            node.ops.update(&mut local, value);
        }
    }

    impl IvTransport for LocalTree {
        fn fetch(&self) -> Result<RebuildIv> {
            let root = &self.nodes[0];
            let mut dst = root.ops.alloc();
            root.ops.fetch(&mut dst, &root.value.lock());
            Ok(dst)
        }

        fn send_tree_request(&self, value: &RebuildIv, shortcut: IvShortcut, sync: IvSyncMode) -> Result<()> {
            self.sent.lock().push((shortcut, sync));
            let origin = value.rank.get() as usize;
            if origin >= self.nodes.len() {
                return Err(Error::not_found(format!("rank {}", value.rank)));
            }
            match shortcut {
                IvShortcut::ToRoot => self.apply_update(0, value),
                IvShortcut::None => {
                    let mut hop = Some(origin);
                    while let Some(idx) = hop {
                        self.apply_update(idx, value);
                        hop = self.nodes[idx].parent;
                    }
                }
            }
            Ok(())
        }

        fn broadcast(&self, value: &RebuildIv, _sync: IvSyncMode) -> Result<()> {
            for node in &self.nodes {
                let mut local = node.value.lock();
                node.ops.refresh(&mut local, value);
            }
            Ok(())
        }
    }

    /// Run a full round: every rank reports progress and completion, the
    /// master broadcasts the aggregate.
    fn run_round(shortcut: IvShortcut, size: u32) {
        let tree = LocalTree::new(size);
        let pool = PoolId::new();
        let master = Rank::new(0);
        let version = 3;
        let config = RebuildConfig {
            update_shortcut: shortcut,
            ..RebuildConfig::default()
        };
        let client = RebuildIvClient::new(tree.clone(), config);

        let rgt = tree.trackers(0).start_global(pool, version, (0..size).map(Rank::new));
        for rank in 0..size {
            tree.trackers(rank).join_target(pool, version, master);
        }

        let mut ranks: Vec<u32> = (0..size).collect();
        ranks.shuffle(&mut rand::thread_rng());
        for &rank in &ranks {
            let rpt = tree.trackers(rank).lookup_target(pool, version).unwrap();
            let mut rpt = rpt.lock();
            rpt.record_progress(u64::from(rank), 2);
            rpt.set_scan_done();
            client.update(&rpt.take_report(Rank::new(rank))).unwrap();
        }
        assert!(rgt.lock().status().scan_done);
        assert!(!rgt.lock().status().done);

        for &rank in &ranks {
            let rpt = tree.trackers(rank).lookup_target(pool, version).unwrap();
            let mut rpt = rpt.lock();
            rpt.set_done();
            client.update(&rpt.take_report(Rank::new(rank))).unwrap();
        }

        let status = *rgt.lock().status();
        assert!(status.done);
        assert_eq!(status.obj_count, u64::from(size * (size - 1) / 2));
        assert_eq!(status.rec_count, u64::from(size) * 2);

        client.broadcast(&rgt.lock().broadcast_value(master)).unwrap();
        for rank in 0..size {
            let rpt = tree.trackers(rank).lookup_target(pool, version).unwrap();
            assert!(rpt.lock().global_done(), "rank {rank}");
            assert!(rpt.lock().global_scan_done(), "rank {rank}");
        }

        let root = client.fetch().unwrap();
        assert_eq!(root.pool_id, pool);
        assert_eq!(root.master_rank, master);
    }

    #[test]
    fn test_round_with_root_shortcut() {
        run_round(IvShortcut::ToRoot, 5);
    }

    #[test]
    fn test_round_hop_by_hop() {
        run_round(IvShortcut::None, 7);
    }

    #[test]
    fn test_update_uses_configured_options() {
        let tree = LocalTree::new(2);
        let client = RebuildIvClient::new(tree.clone(), RebuildConfig::default());
        let iv = RebuildIv {
            rank: Rank::new(1),
            ..RebuildIv::default()
        };
        client.update(&iv).unwrap();
        assert_eq!(
            tree.sent.lock().as_slice(),
            &[(IvShortcut::ToRoot, IvSyncMode::None)]
        );
    }

    #[test]
    fn test_update_failure_is_returned() {
        let tree = LocalTree::new(2);
        let client = RebuildIvClient::new(tree, RebuildConfig::default());
        let iv = RebuildIv {
            rank: Rank::new(9),
            ..RebuildIv::default()
        };
        assert!(client.update(&iv).unwrap_err().is_not_found());
    }
}
