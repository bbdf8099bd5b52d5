//! In-core lease database: an arena of leases and pools addressed by
//! generational handles (replacing the refcounted-pointer cycles the
//! original design used), the `by_ip`/`by_uid`/`by_hw` hash indexes, the
//! expiry-ordered per-pool lease list, and the append-only journal backing
//! crash recovery.
//!
//! `supersede_lease` ([`db::LeaseDb::supersede_lease`]) is the single
//! mutation path every other operation (allocation, renewal, release,
//! decline) goes through.

pub mod arena;
pub mod db;
pub mod error;
pub mod failover;
pub mod index;
pub mod journal;
pub mod lease;
pub mod pool;

pub use db::{ConflictPolicy, LeaseDb, LeaseUpdate};
pub use error::{Error, Result};
pub use journal::Journal;
pub use lease::{BindingState, Lease, LeaseFlags, LeaseHandle};
pub use pool::{FailoverPeerId, GroupId, Pool, PoolHandle, SharedNetworkId};
