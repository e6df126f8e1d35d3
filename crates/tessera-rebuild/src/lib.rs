//! Tessera Rebuild - rebuild status aggregation
//!
//! Participants of a rebuild round report progress through an incremental
//! value (IV) that the group tree carries to the round master. The master
//! accumulates the reports in a global tracker and broadcasts the
//! completion flags back to every participant.
//!
//! # Components
//!
//! - [`RebuildIv`]: the value carried over the tree
//! - [`RebuildIvOps`]: alloc/fetch/update/refresh/destroy callbacks
//! - [`RebuildTrackers`]: global and per-target trackers of a round
//! - [`RebuildIvClient`]: fetch, update and broadcast over an [`IvTransport`]
//! - [`scan_objects`]: the shards a rank has to rebuild in a round

pub mod client;
pub mod iv;
pub mod scan;
pub mod tracker;

pub use client::{IvTransport, RebuildIvClient};
pub use iv::{IvEntryOps, RebuildIv, RebuildIvOps};
pub use scan::{scan_objects, RebuildWork};
pub use tracker::{
    GlobalPoolTracker, RebuildStatus, RebuildTrackers, SharedGlobalTracker, SharedTargetTracker,
    TargetPoolTracker,
};
