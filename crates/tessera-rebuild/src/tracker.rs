//! Rebuild pool trackers
//!
//! The master of a rebuild round keeps a [`GlobalPoolTracker`] accumulating
//! what every participant reported. Every participant keeps a
//! [`TargetPoolTracker`] with its own progress and the completion flags the
//! master broadcast. Both live in a [`RebuildTrackers`] registry keyed by
//! `(pool, round version)`.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tessera_common::{Error, PoolId, Rank};
use tracing::{debug, info};

use crate::iv::RebuildIv;

/// Global tracker shared between the registry and in-flight merges
pub type SharedGlobalTracker = Arc<Mutex<GlobalPoolTracker>>;

/// Target tracker shared between the registry and in-flight refreshes
pub type SharedTargetTracker = Arc<Mutex<TargetPoolTracker>>;

/// Aggregated status of one rebuild round
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildStatus {
    /// Objects rebuilt so far
    pub obj_count: u64,
    /// Records rebuilt so far
    pub rec_count: u64,
    /// First non-zero status reported, 0 while everything succeeds
    pub errno: i32,
    /// Every participant finished scanning
    pub scan_done: bool,
    /// Every participant finished rebuilding
    pub done: bool,
}

/// Master-side accumulator of one rebuild round
#[derive(Debug)]
pub struct GlobalPoolTracker {
    pool_id: PoolId,
    version: u32,
    status: RebuildStatus,
    participants: BTreeSet<Rank>,
    scanned: BTreeSet<Rank>,
    finished: BTreeSet<Rank>,
}

impl GlobalPoolTracker {
    /// Create a tracker expecting reports from `participants`
    pub fn new(pool_id: PoolId, version: u32, participants: impl IntoIterator<Item = Rank>) -> Self {
        Self {
            pool_id,
            version,
            status: RebuildStatus::default(),
            participants: participants.into_iter().collect(),
            scanned: BTreeSet::new(),
            finished: BTreeSet::new(),
        }
    }

    #[must_use]
    pub const fn pool_id(&self) -> PoolId {
        self.pool_id
    }

    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    #[must_use]
    pub const fn status(&self) -> &RebuildStatus {
        &self.status
    }

    /// Ranks whose report is still needed for the round to finish
    pub fn pending(&self) -> impl Iterator<Item = Rank> + '_ {
        self.participants.difference(&self.finished).copied()
    }

    /// Fold one participant's report into the round status
    pub fn merge(&mut self, iv: &RebuildIv) {
        self.status.obj_count = self.status.obj_count.saturating_add(iv.obj_count);
        self.status.rec_count = self.status.rec_count.saturating_add(iv.rec_count);

        if self.participants.contains(&iv.rank) {
            if iv.scan_done {
                self.scanned.insert(iv.rank);
            }
            if iv.done {
                self.finished.insert(iv.rank);
            }
        }
        if !self.participants.is_empty() {
            self.status.scan_done = self.participants.is_subset(&self.scanned);
            self.status.done = self.participants.is_subset(&self.finished);
        }

        if self.status.errno == 0 {
            self.status.errno = iv.status;
        }

        debug!(
            pool = %self.pool_id,
            version = self.version,
            obj = self.status.obj_count,
            rec = self.status.rec_count,
            done = self.status.done,
            status = self.status.errno,
            rank = %iv.rank,
            "update rebuild global status"
        );
    }

    /// Value the master pushes down to every participant
    #[must_use]
    pub fn broadcast_value(&self, master_rank: Rank) -> RebuildIv {
        RebuildIv {
            pool_id: self.pool_id,
            master_rank,
            rank: master_rank,
            version: self.version,
            obj_count: self.status.obj_count,
            rec_count: self.status.rec_count,
            status: self.status.errno,
            global_scan_done: self.status.scan_done,
            global_done: self.status.done,
            ..RebuildIv::default()
        }
    }
}

/// Participant-side record of one rebuild round
#[derive(Debug)]
pub struct TargetPoolTracker {
    pool_id: PoolId,
    version: u32,
    master_rank: Rank,
    obj_count: u64,
    rec_count: u64,
    reported_obj: u64,
    reported_rec: u64,
    status: i32,
    scan_done: bool,
    done: bool,
    global_scan_done: bool,
    global_done: bool,
}

impl TargetPoolTracker {
    #[must_use]
    pub const fn new(pool_id: PoolId, version: u32, master_rank: Rank) -> Self {
        Self {
            pool_id,
            version,
            master_rank,
            obj_count: 0,
            rec_count: 0,
            reported_obj: 0,
            reported_rec: 0,
            status: 0,
            scan_done: false,
            done: false,
            global_scan_done: false,
            global_done: false,
        }
    }

    #[must_use]
    pub const fn pool_id(&self) -> PoolId {
        self.pool_id
    }

    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    #[must_use]
    pub const fn master_rank(&self) -> Rank {
        self.master_rank
    }

    /// Objects and records rebuilt locally
    #[must_use]
    pub const fn progress(&self) -> (u64, u64) {
        (self.obj_count, self.rec_count)
    }

    #[must_use]
    pub const fn global_scan_done(&self) -> bool {
        self.global_scan_done
    }

    #[must_use]
    pub const fn global_done(&self) -> bool {
        self.global_done
    }

    /// Account locally rebuilt objects and records
    pub fn record_progress(&mut self, objects: u64, records: u64) {
        self.obj_count = self.obj_count.saturating_add(objects);
        self.rec_count = self.rec_count.saturating_add(records);
    }

    /// Keep the first local failure
    pub fn record_error(&mut self, code: i32) {
        if self.status == 0 {
            self.status = code;
        }
    }

    /// Keep the first local failure, as its status code
    pub fn record_failure(&mut self, err: &Error) {
        self.record_error(err.code());
    }

    pub fn set_scan_done(&mut self) {
        self.scan_done = true;
    }

    pub fn set_done(&mut self) {
        self.done = true;
    }

    /// Build the upward report. Counters carry only what was not reported
    /// before, so the master can add every report it receives.
    pub fn take_report(&mut self, rank: Rank) -> RebuildIv {
        let iv = RebuildIv {
            pool_id: self.pool_id,
            master_rank: self.master_rank,
            rank,
            version: self.version,
            obj_count: self.obj_count - self.reported_obj,
            rec_count: self.rec_count - self.reported_rec,
            status: self.status,
            scan_done: self.scan_done,
            done: self.done,
            ..RebuildIv::default()
        };
        self.reported_obj = self.obj_count;
        self.reported_rec = self.rec_count;
        iv
    }

    /// Record the completion flags the master broadcast. Flags only ever
    /// go from unset to set.
    pub fn apply_broadcast(&mut self, global_scan_done: bool, global_done: bool) {
        self.global_scan_done |= global_scan_done;
        self.global_done |= global_done;
    }
}

/// Registry of the trackers of every round this process takes part in
#[derive(Debug, Default)]
pub struct RebuildTrackers {
    global: RwLock<HashMap<(PoolId, u32), SharedGlobalTracker>>,
    target: RwLock<HashMap<(PoolId, u32), SharedTargetTracker>>,
}

impl RebuildTrackers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a round as its master. An existing tracker for the
    /// same round is returned unchanged.
    pub fn start_global(
        &self,
        pool_id: PoolId,
        version: u32,
        participants: impl IntoIterator<Item = Rank>,
    ) -> SharedGlobalTracker {
        let mut global = self.global.write();
        Arc::clone(global.entry((pool_id, version)).or_insert_with(|| {
            info!(pool = %pool_id, version, "start rebuild global tracker");
            Arc::new(Mutex::new(GlobalPoolTracker::new(pool_id, version, participants)))
        }))
    }

    #[must_use]
    pub fn lookup_global(&self, pool_id: PoolId, version: u32) -> Option<SharedGlobalTracker> {
        self.global.read().get(&(pool_id, version)).cloned()
    }

    /// Retire a round's global tracker. Merges already holding it finish
    /// against the detached tracker.
    pub fn retire_global(&self, pool_id: PoolId, version: u32) -> Option<SharedGlobalTracker> {
        let retired = self.global.write().remove(&(pool_id, version));
        if retired.is_some() {
            info!(pool = %pool_id, version, "retire rebuild global tracker");
        }
        retired
    }

    /// Join a round as a participant. An existing tracker for the same
    /// round is returned unchanged.
    pub fn join_target(&self, pool_id: PoolId, version: u32, master_rank: Rank) -> SharedTargetTracker {
        let mut target = self.target.write();
        Arc::clone(target.entry((pool_id, version)).or_insert_with(|| {
            info!(pool = %pool_id, version, master = %master_rank, "join rebuild round");
            Arc::new(Mutex::new(TargetPoolTracker::new(pool_id, version, master_rank)))
        }))
    }

    #[must_use]
    pub fn lookup_target(&self, pool_id: PoolId, version: u32) -> Option<SharedTargetTracker> {
        self.target.read().get(&(pool_id, version)).cloned()
    }

    /// Leave a round
    pub fn retire_target(&self, pool_id: PoolId, version: u32) -> Option<SharedTargetTracker> {
        let retired = self.target.write().remove(&(pool_id, version));
        if retired.is_some() {
            info!(pool = %pool_id, version, "retire rebuild target tracker");
        }
        retired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(rank: u32, obj: u64, rec: u64) -> RebuildIv {
        RebuildIv {
            rank: Rank::new(rank),
            obj_count: obj,
            rec_count: rec,
            ..RebuildIv::default()
        }
    }

    #[test]
    fn test_global_merge_accumulates() {
        let mut rgt = GlobalPoolTracker::new(PoolId::new(), 3, (0..3).map(Rank::new));
        rgt.merge(&report(0, 1, 2));
        rgt.merge(&report(1, 3, 1));
        rgt.merge(&report(2, 0, 0));
        assert_eq!(rgt.status().obj_count, 4);
        assert_eq!(rgt.status().rec_count, 3);
        assert_eq!(rgt.status().errno, 0);
        assert!(!rgt.status().done);
    }

    #[test]
    fn test_global_counters_saturate() {
        let mut rgt = GlobalPoolTracker::new(PoolId::new(), 1, [Rank::new(0)]);
        rgt.merge(&report(0, u64::MAX - 1, 5));
        rgt.merge(&report(0, 7, u64::MAX));
        assert_eq!(rgt.status().obj_count, u64::MAX);
        assert_eq!(rgt.status().rec_count, u64::MAX);

        let mut rpt = TargetPoolTracker::new(PoolId::new(), 1, Rank::new(0));
        rpt.record_progress(u64::MAX, 1);
        rpt.record_progress(1, 1);
        assert_eq!(rpt.progress(), (u64::MAX, 2));
    }

    #[test]
    fn test_global_done_needs_every_participant() {
        let mut rgt = GlobalPoolTracker::new(PoolId::new(), 3, [Rank::new(0), Rank::new(1)]);
        let mut iv = report(0, 0, 0);
        iv.scan_done = true;
        iv.done = true;
        rgt.merge(&iv);
        assert!(!rgt.status().scan_done);
        assert_eq!(rgt.pending().collect::<Vec<_>>(), vec![Rank::new(1)]);

        // Reports from ranks outside the round do not count
        let mut stranger = report(7, 0, 0);
        stranger.done = true;
        stranger.scan_done = true;
        rgt.merge(&stranger);
        assert!(!rgt.status().done);

        let mut iv = report(1, 0, 0);
        iv.scan_done = true;
        rgt.merge(&iv);
        assert!(rgt.status().scan_done);
        assert!(!rgt.status().done);

        iv.done = true;
        rgt.merge(&iv);
        assert!(rgt.status().done);
        assert_eq!(rgt.pending().count(), 0);

        let value = rgt.broadcast_value(Rank::new(0));
        assert!(value.global_done);
        assert!(value.global_scan_done);
        assert_eq!(value.version, 3);
    }

    #[test]
    fn test_global_first_error_wins() {
        let mut rgt = GlobalPoolTracker::new(PoolId::new(), 1, [Rank::new(0)]);
        let mut iv = report(0, 0, 0);
        rgt.merge(&iv);
        iv.status = -1005;
        rgt.merge(&iv);
        iv.status = -1003;
        rgt.merge(&iv);
        assert_eq!(rgt.status().errno, -1005);
    }

    #[test]
    fn test_target_report_carries_deltas() {
        let pool = PoolId::new();
        let mut rpt = TargetPoolTracker::new(pool, 2, Rank::new(0));
        rpt.record_progress(3, 10);
        let first = rpt.take_report(Rank::new(4));
        assert_eq!((first.obj_count, first.rec_count), (3, 10));
        assert_eq!(first.rank, Rank::new(4));
        assert_eq!(first.master_rank, Rank::new(0));

        rpt.record_progress(1, 1);
        rpt.record_failure(&Error::out_of_memory("rebuild buffer"));
        rpt.record_error(-1003);
        rpt.set_scan_done();
        let second = rpt.take_report(Rank::new(4));
        assert_eq!((second.obj_count, second.rec_count), (1, 1));
        assert_eq!(second.status, -1002);
        assert!(second.scan_done);
        assert!(!second.done);
        assert_eq!(rpt.progress(), (4, 11));
    }

    #[test]
    fn test_target_broadcast_is_monotonic() {
        let mut rpt = TargetPoolTracker::new(PoolId::new(), 2, Rank::new(0));
        rpt.apply_broadcast(true, false);
        rpt.apply_broadcast(false, false);
        assert!(rpt.global_scan_done());
        assert!(!rpt.global_done());
        rpt.apply_broadcast(true, true);
        assert!(rpt.global_done());
    }

    #[test]
    fn test_registry_lifecycle() {
        let trackers = RebuildTrackers::new();
        let pool = PoolId::new();
        assert!(trackers.lookup_global(pool, 1).is_none());

        let rgt = trackers.start_global(pool, 1, [Rank::new(0)]);
        let again = trackers.start_global(pool, 1, [Rank::new(5)]);
        assert!(Arc::ptr_eq(&rgt, &again));
        assert!(trackers.lookup_global(pool, 2).is_none());

        let rpt = trackers.join_target(pool, 1, Rank::new(0));
        assert!(Arc::ptr_eq(&rpt, &trackers.lookup_target(pool, 1).unwrap()));

        assert!(trackers.retire_global(pool, 1).is_some());
        assert!(trackers.retire_global(pool, 1).is_none());
        assert!(trackers.lookup_global(pool, 1).is_none());
        assert!(trackers.retire_target(pool, 1).is_some());
        assert!(trackers.lookup_target(pool, 1).is_none());
    }
}
