//! Rebuild incremental value
//!
//! Participants of a rebuild round report progress up the IV tree to the
//! round master and the master pushes completion flags back down. The tree
//! framework calls into [`IvEntryOps`] at every node it passes; only the
//! master accumulates reports, every other node just carries identity.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tessera_common::{PoolId, Rank};
use tracing::debug;

use crate::tracker::RebuildTrackers;

/// Value exchanged over the rebuild IV namespace
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildIv {
    pub pool_id: PoolId,
    pub master_rank: Rank,
    /// Rank the report originates from
    pub rank: Rank,
    /// Rebuild round (pool map version being rebuilt)
    pub version: u32,
    pub obj_count: u64,
    pub rec_count: u64,
    /// 0 on success, otherwise a negative error code
    pub status: i32,
    pub scan_done: bool,
    pub done: bool,
    pub global_scan_done: bool,
    pub global_done: bool,
}

/// Callbacks the IV tree invokes on an entry's value
pub trait IvEntryOps: Send + Sync {
    type Value: Clone + Send;

    /// Fresh zeroed value for a new entry
    fn alloc(&self) -> Self::Value;

    /// Copy what a fetch exposes from `src` into `dst`
    fn fetch(&self, dst: &mut Self::Value, src: &Self::Value);

    /// Merge an upward report `src` into the local value `dst`
    fn update(&self, dst: &mut Self::Value, src: &Self::Value);

    /// Apply a downward broadcast `src` to the local value `dst`
    fn refresh(&self, dst: &mut Self::Value, src: &Self::Value);

    /// Release an entry's value
    fn destroy(&self, value: Self::Value) {
        drop(value);
    }
}

/// Entry operations of the rebuild IV on one rank
#[derive(Clone, Debug)]
pub struct RebuildIvOps {
    rank: Rank,
    trackers: Arc<RebuildTrackers>,
}

impl RebuildIvOps {
    #[must_use]
    pub const fn new(rank: Rank, trackers: Arc<RebuildTrackers>) -> Self {
        Self { rank, trackers }
    }

    /// Rank these operations run on
    #[must_use]
    pub const fn rank(&self) -> Rank {
        self.rank
    }

    #[must_use]
    pub fn trackers(&self) -> &Arc<RebuildTrackers> {
        &self.trackers
    }

    /// Merge `incoming` into `state`, returning the new state
    #[must_use]
    pub fn merge(&self, state: RebuildIv, incoming: &RebuildIv) -> RebuildIv {
        let mut state = state;
        self.update(&mut state, incoming);
        state
    }

    /// Apply a broadcast to `state`, returning the new state
    #[must_use]
    pub fn apply_broadcast(&self, state: RebuildIv, incoming: &RebuildIv) -> RebuildIv {
        let mut state = state;
        self.refresh(&mut state, incoming);
        state
    }
}

impl IvEntryOps for RebuildIvOps {
    type Value = RebuildIv;

    fn alloc(&self) -> RebuildIv {
        RebuildIv::default()
    }

    fn fetch(&self, dst: &mut RebuildIv, src: &RebuildIv) {
        dst.pool_id = src.pool_id;
        dst.master_rank = src.master_rank;
    }

    fn update(&self, dst: &mut RebuildIv, src: &RebuildIv) {
        dst.pool_id = src.pool_id;
        dst.master_rank = src.master_rank;

        if self.rank != src.master_rank {
            return;
        }
        let Some(tracker) = self.trackers.lookup_global(src.pool_id, src.version) else {
            debug!(pool = %src.pool_id, version = src.version, "no rebuild global tracker, report dropped");
            return;
        };
        tracker.lock().merge(src);
    }

    fn refresh(&self, dst: &mut RebuildIv, src: &RebuildIv) {
        dst.pool_id = src.pool_id;
        dst.master_rank = src.master_rank;
        dst.global_done = src.global_done;
        dst.global_scan_done = src.global_scan_done;

        if !dst.global_done && !dst.global_scan_done {
            return;
        }
        let Some(tracker) = self.trackers.lookup_target(src.pool_id, src.version) else {
            return;
        };
        let mut tracker = tracker.lock();
        tracker.apply_broadcast(dst.global_scan_done, dst.global_done);
        debug!(
            pool = %src.pool_id,
            version = src.version,
            scan_done = tracker.global_scan_done(),
            done = tracker.global_done(),
            "rebuild status refreshed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;

    const MASTER: Rank = Rank::new(0);

    fn master_ops(participants: u32) -> (RebuildIvOps, PoolId) {
        let trackers = Arc::new(RebuildTrackers::new());
        let pool = PoolId::new();
        trackers.start_global(pool, 1, (0..participants).map(Rank::new));
        (RebuildIvOps::new(MASTER, trackers), pool)
    }

    fn report(pool: PoolId, rank: u32, obj: u64, rec: u64, status: i32) -> RebuildIv {
        RebuildIv {
            pool_id: pool,
            master_rank: MASTER,
            rank: Rank::new(rank),
            version: 1,
            obj_count: obj,
            rec_count: rec,
            status,
            ..RebuildIv::default()
        }
    }

    fn global_status(ops: &RebuildIvOps, pool: PoolId) -> crate::tracker::RebuildStatus {
        *ops.trackers().lookup_global(pool, 1).unwrap().lock().status()
    }

    #[test]
    fn test_alloc_is_zeroed() {
        let (ops, _) = master_ops(1);
        let value = ops.alloc();
        assert_eq!(value, RebuildIv::default());
        assert!(value.pool_id.is_nil());
        ops.destroy(value);
    }

    #[test]
    fn test_fetch_copies_identity_only() {
        let (ops, pool) = master_ops(1);
        let mut dst = ops.alloc();
        let mut src = report(pool, 3, 9, 9, -1003);
        src.global_done = true;
        ops.fetch(&mut dst, &src);
        assert_eq!(dst.pool_id, pool);
        assert_eq!(dst.master_rank, MASTER);
        assert_eq!(dst.obj_count, 0);
        assert!(!dst.global_done);
    }

    #[test]
    fn test_merge_in_any_order() {
        let mut rng = rand::thread_rng();
        for _ in 0..16 {
            let (ops, pool) = master_ops(3);
            let mut reports = vec![
                report(pool, 0, 1, 2, 0),
                report(pool, 1, 3, 1, 0),
                report(pool, 2, 0, 0, 0),
            ];
            reports.shuffle(&mut rng);

            let state = reports.iter().fold(ops.alloc(), |state, iv| ops.merge(state, iv));
            assert_eq!(state.pool_id, pool);
            let status = global_status(&ops, pool);
            assert_eq!((status.obj_count, status.rec_count), (4, 3));
            assert_eq!(status.errno, 0);
        }
    }

    #[test]
    fn test_single_error_survives_any_order() {
        let mut rng = rand::thread_rng();
        for _ in 0..16 {
            let (ops, pool) = master_ops(3);
            let mut reports = vec![
                report(pool, 0, 1, 0, 0),
                report(pool, 1, 1, 0, -1005),
                report(pool, 2, 1, 0, 0),
            ];
            reports.shuffle(&mut rng);
            for iv in &reports {
                let _ = ops.merge(ops.alloc(), iv);
            }
            assert_eq!(global_status(&ops, pool).errno, -1005);
        }
    }

    #[test]
    fn test_first_error_wins() {
        let (ops, pool) = master_ops(3);
        let mut state = ops.alloc();
        for iv in [
            report(pool, 0, 0, 0, 0),
            report(pool, 1, 0, 0, -1002),
            report(pool, 2, 0, 0, -1031),
        ] {
            state = ops.merge(state, &iv);
        }
        assert_eq!(global_status(&ops, pool).errno, -1002);
    }

    #[test]
    fn test_update_off_master_only_carries_identity() {
        let trackers = Arc::new(RebuildTrackers::new());
        let pool = PoolId::new();
        let rgt = trackers.start_global(pool, 1, [Rank::new(0)]);
        let ops = RebuildIvOps::new(Rank::new(2), trackers);

        let state = ops.merge(ops.alloc(), &report(pool, 0, 5, 5, -1003));
        assert_eq!(state.pool_id, pool);
        assert_eq!(state.master_rank, MASTER);
        assert_eq!(state.obj_count, 0);
        assert_eq!(*rgt.lock().status(), Default::default());
    }

    #[test]
    fn test_update_without_tracker_is_dropped() {
        let ops = RebuildIvOps::new(MASTER, Arc::new(RebuildTrackers::new()));
        let pool = PoolId::new();
        let state = ops.merge(ops.alloc(), &report(pool, 1, 5, 5, 0));
        assert_eq!(state.pool_id, pool);
        assert!(ops.trackers().lookup_global(pool, 1).is_none());
    }

    #[test]
    fn test_refresh_sets_target_flags() {
        let trackers = Arc::new(RebuildTrackers::new());
        let pool = PoolId::new();
        let rpt = trackers.join_target(pool, 1, MASTER);
        let ops = RebuildIvOps::new(Rank::new(1), trackers);

        let mut broadcast = report(pool, 0, 0, 0, 0);
        broadcast.global_scan_done = true;
        let state = ops.apply_broadcast(ops.alloc(), &broadcast);
        assert!(state.global_scan_done);
        assert!(!state.global_done);
        assert!(rpt.lock().global_scan_done());
        assert!(!rpt.lock().global_done());

        broadcast.global_done = true;
        let once = ops.apply_broadcast(state, &broadcast);
        let twice = ops.apply_broadcast(once, &broadcast);
        assert_eq!(once, twice);
        assert!(rpt.lock().global_done());

        // A stale broadcast with the flags cleared leaves the tracker alone
        broadcast.global_done = false;
        broadcast.global_scan_done = false;
        let _ = ops.apply_broadcast(twice, &broadcast);
        assert!(rpt.lock().global_done());
        assert!(rpt.lock().global_scan_done());
    }

    #[test]
    fn test_refresh_without_tracker() {
        let ops = RebuildIvOps::new(Rank::new(1), Arc::new(RebuildTrackers::new()));
        let mut broadcast = report(PoolId::new(), 0, 0, 0, 0);
        broadcast.global_done = true;
        let state = ops.apply_broadcast(ops.alloc(), &broadcast);
        assert!(state.global_done);
    }

    #[test]
    fn test_value_serializes() {
        let (_, pool) = master_ops(1);
        let iv = report(pool, 1, 2, 3, -1002);
        let json = serde_json::to_string(&iv).unwrap();
        let back: RebuildIv = serde_json::from_str(&json).unwrap();
        assert_eq!(back, iv);
    }
}
