//! `LeaseDb`: the in-core database tying together the lease/pool arenas,
//! the by_ip/by_uid/by_hw indexes, and the journal.
//!
//! `supersede_lease` is the sole mutator of a `Lease` (section 4.1): every
//! other operation -- allocation, renewal, release, decline -- is expressed
//! in terms of it so the conflict check, reindexing, and expiry-list
//! reordering happen exactly once.

use std::net::Ipv4Addr;
use std::time::SystemTime;

use expr::Statement;
use tracing::{debug, warn};

use crate::arena::Slab;
use crate::error::{Error, Result};
use crate::index::Indexes;
use crate::journal::Journal;
use crate::lease::{BindingState, Lease, LeaseFlags, LeaseHandle};
use crate::pool::{GroupId, Pool, PoolHandle, SharedNetworkId};

/// The proposed new state for `supersede_lease`. Every field mirrors one
/// `Lease` carries; `None` means "leave as-is" only for fields that aren't
/// meaningfully "absent" in the protocol (ip, pool never change).
#[derive(Debug, Clone)]
pub struct LeaseUpdate {
    pub starts: SystemTime,
    pub ends: SystemTime,
    pub cltt: SystemTime,
    pub tstp: Option<SystemTime>,
    pub hw_addr: Vec<u8>,
    pub uid: Vec<u8>,
    pub billing_class: Option<String>,
    pub binding_state: BindingState,
    pub flags: LeaseFlags,
    pub on_expiry: Vec<Statement>,
    pub on_commit: Vec<Statement>,
    pub on_release: Vec<Statement>,
    pub agent_options: Option<Vec<u8>>,
}

/// Governs the mixed-identifier half of the conflict check in
/// `supersede_lease` step 1 -- see the open question in the design notes
/// about whether two BOOTP clients sharing a hw-addr may displace each
/// other. `true` (the default) keeps the historical rule: absence of uid on
/// both sides only conflicts when hw-addrs differ, i.e. matching hw is
/// always sufficient for a BOOTP takeover.
#[derive(Debug, Clone, Copy)]
pub struct ConflictPolicy {
    pub bootp_takeover_by_hw_only: bool,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        ConflictPolicy {
            bootp_takeover_by_hw_only: true,
        }
    }
}

pub struct LeaseDb {
    leases: Slab<Lease>,
    pools: Slab<Pool>,
    indexes: Indexes,
    journal: Option<Journal>,
    pub conflict_policy: ConflictPolicy,
}

impl LeaseDb {
    pub fn new() -> Self {
        LeaseDb {
            leases: Slab::new(),
            pools: Slab::new(),
            indexes: Indexes::new(),
            journal: None,
            conflict_policy: ConflictPolicy::default(),
        }
    }

    pub fn with_journal(journal: Journal) -> Self {
        let mut db = Self::new();
        db.journal = Some(journal);
        db
    }

    pub fn alloc_pool(&mut self, group: GroupId, shared_network: SharedNetworkId) -> PoolHandle {
        self.pools.alloc(Pool::new(group, shared_network))
    }

    /// Materialize every address in `lo..=hi` as a FREE lease appended to
    /// `pool`'s (initially empty, so already expiry-sorted) list.
    pub fn populate_range(&mut self, pool: PoolHandle, lo: Ipv4Addr, hi: Ipv4Addr) {
        let (lo, hi) = (u32::from(lo), u32::from(hi));
        for raw in lo..=hi {
            let ip = Ipv4Addr::from(raw);
            let handle = self.leases.alloc(Lease::new(ip, pool));
            self.indexes.insert_ip(ip, handle);
            self.append_to_pool_list(pool, handle);
            if let Some(p) = self.pools.get_mut(pool) {
                p.lease_count += 1;
                p.free_leases += 1;
            }
        }
    }

    pub fn lease(&self, handle: LeaseHandle) -> Option<&Lease> {
        self.leases.get(handle)
    }

    pub fn pool(&self, handle: PoolHandle) -> Option<&Pool> {
        self.pools.get(handle)
    }

    /// Mutable access for the parser to attach `permit`/`prohibit` lists and
    /// a failover peer while building the pool from config.
    pub fn pool_mut(&mut self, handle: PoolHandle) -> Option<&mut Pool> {
        self.pools.get_mut(handle)
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn lease_count(&self) -> usize {
        self.leases.len()
    }

    pub fn by_ip(&self, ip: Ipv4Addr) -> Option<LeaseHandle> {
        self.indexes.by_ip.get(&ip).copied()
    }

    pub fn by_uid(&self, uid: &[u8]) -> Vec<LeaseHandle> {
        self.indexes.lookup_uid(&self.leases, uid)
    }

    pub fn by_hw(&self, hw: &[u8]) -> Vec<LeaseHandle> {
        self.indexes.lookup_hw(&self.leases, hw)
    }

    /// Full scan over every live lease, regardless of pool or index. There
    /// is no index for agent-relay information, so LEASEQUERY's by-remote-id
    /// and by-relay-id forms have no cheaper way to find their answer.
    pub fn iter_leases(&self) -> impl Iterator<Item = (LeaseHandle, &Lease)> {
        self.leases.iter()
    }

    /// The pool's expiry list head -- the cheapest "oldest free lease" the
    /// allocator can hand out.
    pub fn pool_head(&self, pool: PoolHandle) -> Option<LeaseHandle> {
        self.pools.get(pool).and_then(|p| p.head())
    }

    /// The sole mutator of a lease's persisted fields. See module docs and
    /// section 4.1 for the eight-step contract this implements.
    pub fn supersede_lease(
        &mut self,
        comp: LeaseHandle,
        lt: &LeaseUpdate,
        commit: bool,
        now: SystemTime,
        mut on_unbill: impl FnMut(&str),
    ) -> Result<()> {
        let (pool, old_ip, old_uid, old_hw, old_billing, old_flags, unexpired) = {
            let lease = self.leases.get(comp).ok_or(Error::NoSuchLease)?;
            (
                lease.pool,
                lease.ip,
                lease.uid.clone(),
                lease.hw_addr.clone(),
                lease.billing_class.clone(),
                lease.flags,
                !lease.is_expired(now),
            )
        };

        // step 1: conflict check
        if unexpired {
            let both_have_uid = !old_uid.is_empty() && !lt.uid.is_empty();
            let neither_has_uid = old_uid.is_empty() && lt.uid.is_empty();
            let conflict = if both_have_uid {
                old_uid != lt.uid
            } else if neither_has_uid {
                // BOOTP takeover case: the open-question policy flag governs
                // whether matching hw is sufficient, which is the only mode
                // currently implemented (see ConflictPolicy docs).
                let _ = self.conflict_policy.bootp_takeover_by_hw_only;
                old_hw != lt.hw_addr
            } else {
                false
            };
            if conflict {
                warn!(ip = %old_ip, "lease conflict, refusing to supersede");
                return Err(Error::LeaseConflict { ip: old_ip });
            }
        }

        // step 2: unindex if keys are changing
        if old_uid != lt.uid {
            self.indexes.remove_uid(&mut self.leases, &old_uid, comp);
        }
        if old_hw != lt.hw_addr {
            self.indexes.remove_hw(&mut self.leases, &old_hw, comp);
        }

        // step 3: n/a -- uid is an owned Vec<u8> in this port, no manual
        // heap-buffer release needed.

        // step 4: unbill
        if old_billing != lt.billing_class {
            if let Some(class) = &old_billing {
                on_unbill(class);
            }
        }

        // step 5: copy fields, preserving EPHEMERAL flags from the old record
        {
            let lease = self.leases.get_mut(comp).ok_or(Error::NoSuchLease)?;
            lease.starts = lt.starts;
            lease.ends = lt.ends;
            lease.cltt = lt.cltt;
            lease.tstp = lt.tstp;
            lease.hw_addr = lt.hw_addr.clone();
            lease.uid = lt.uid.clone();
            lease.billing_class = lt.billing_class.clone();
            lease.binding_state = lt.binding_state;
            lease.flags = old_flags.merge_preserving_ephemeral(lt.flags);
            lease.on_expiry = lt.on_expiry.clone();
            lease.on_commit = lt.on_commit.clone();
            lease.on_release = lt.on_release.clone();
            lease.agent_options = lt.agent_options.clone();
        }

        // step 6: reindex
        if old_uid != lt.uid {
            self.indexes
                .insert_uid(&mut self.leases, lt.uid.clone(), comp);
        }
        if old_hw != lt.hw_addr {
            self.indexes
                .insert_hw(&mut self.leases, lt.hw_addr.clone(), comp);
        }

        // step 7: reorder within the pool's expiry list
        self.reorder(pool, comp);

        // step 8: persist
        if commit {
            if let Some(journal) = &mut self.journal {
                let lease = self.leases.get(comp).ok_or(Error::NoSuchLease)?;
                journal.write_lease(lease)?;
                journal.commit_leases()?;
            }
        }

        debug!(ip = %old_ip, ?commit, "superseded lease");
        Ok(())
    }

    /// *Release*: `ends := now`, clear billing, run `on_release` against the
    /// packet that triggered it (the caller evaluates those statements and
    /// passes the resulting side effects in as part of a normal
    /// `supersede_lease` call with `binding_state = Released`).
    pub fn release_lease(&mut self, comp: LeaseHandle, now: SystemTime) -> Result<()> {
        let lease = self.leases.get(comp).ok_or(Error::NoSuchLease)?;
        let update = LeaseUpdate {
            starts: lease.starts,
            ends: now,
            cltt: lease.cltt,
            tstp: None,
            hw_addr: lease.hw_addr.clone(),
            uid: lease.uid.clone(),
            billing_class: None,
            binding_state: BindingState::Released,
            flags: lease.flags,
            on_expiry: lease.on_expiry.clone(),
            on_commit: lease.on_commit.clone(),
            on_release: lease.on_release.clone(),
            agent_options: lease.agent_options.clone(),
        };
        self.supersede_lease(comp, &update, true, now, |_| {})
    }

    /// *Abandon*: mark ABANDONED, zero hw/uid, `ends := now`. The allocator
    /// skips abandoned leases until an operator or affirmative probe clears
    /// the flag.
    pub fn abandon_lease(&mut self, comp: LeaseHandle, now: SystemTime) -> Result<()> {
        let lease = self.leases.get(comp).ok_or(Error::NoSuchLease)?;
        let mut flags = lease.flags;
        flags.set(LeaseFlags::ABANDONED, true);
        let update = LeaseUpdate {
            starts: lease.starts,
            ends: now,
            cltt: lease.cltt,
            tstp: None,
            hw_addr: Vec::new(),
            uid: Vec::new(),
            billing_class: None,
            binding_state: BindingState::Abandoned,
            flags,
            on_expiry: lease.on_expiry.clone(),
            on_commit: lease.on_commit.clone(),
            on_release: lease.on_release.clone(),
            agent_options: None,
        };
        self.supersede_lease(comp, &update, true, now, |_| {})
    }

    /// *Dissociate*: same as abandon but without the ABANDONED flag -- evict
    /// the binding without penalizing the address for future allocation.
    pub fn dissociate_lease(&mut self, comp: LeaseHandle, now: SystemTime) -> Result<()> {
        let lease = self.leases.get(comp).ok_or(Error::NoSuchLease)?;
        let update = LeaseUpdate {
            starts: lease.starts,
            ends: now,
            cltt: lease.cltt,
            tstp: None,
            hw_addr: Vec::new(),
            uid: Vec::new(),
            billing_class: None,
            binding_state: BindingState::Free,
            flags: lease.flags,
            on_expiry: lease.on_expiry.clone(),
            on_commit: lease.on_commit.clone(),
            on_release: lease.on_release.clone(),
            agent_options: None,
        };
        self.supersede_lease(comp, &update, true, now, |_| {})
    }

    fn append_to_pool_list(&mut self, pool: PoolHandle, handle: LeaseHandle) {
        let tail = self.pools.get(pool).and_then(|p| p.tail());
        if let Some(tail) = tail {
            if let Some(t) = self.leases.get_mut(tail) {
                t.next = Some(handle);
            }
        } else if let Some(p) = self.pools.get_mut(pool) {
            p.set_head(Some(handle));
        }
        if let Some(lease) = self.leases.get_mut(handle) {
            lease.prev = tail;
            lease.next = None;
        }
        if let Some(p) = self.pools.get_mut(pool) {
            p.set_tail(Some(handle));
        }
    }

    fn unlink_from_pool_list(&mut self, pool: PoolHandle, handle: LeaseHandle) {
        let (prev, next) = self
            .leases
            .get(handle)
            .map(|l| (l.prev, l.next))
            .unwrap_or((None, None));
        match prev {
            Some(p) => {
                if let Some(l) = self.leases.get_mut(p) {
                    l.next = next;
                }
            }
            None => {
                if let Some(p) = self.pools.get_mut(pool) {
                    p.set_head(next);
                }
            }
        }
        match next {
            Some(n) => {
                if let Some(l) = self.leases.get_mut(n) {
                    l.prev = prev;
                }
            }
            None => {
                if let Some(p) = self.pools.get_mut(pool) {
                    p.set_tail(prev);
                }
            }
        }
    }

    fn insert_after(&mut self, pool: PoolHandle, anchor: LeaseHandle, handle: LeaseHandle) {
        let anchor_next = self.leases.get(anchor).and_then(|l| l.next);
        if let Some(l) = self.leases.get_mut(handle) {
            l.prev = Some(anchor);
            l.next = anchor_next;
        }
        if let Some(l) = self.leases.get_mut(anchor) {
            l.next = Some(handle);
        }
        match anchor_next {
            Some(n) => {
                if let Some(l) = self.leases.get_mut(n) {
                    l.prev = Some(handle);
                }
            }
            None => {
                if let Some(p) = self.pools.get_mut(pool) {
                    p.set_tail(Some(handle));
                }
            }
        }
    }

    fn insert_before(&mut self, pool: PoolHandle, anchor: LeaseHandle, handle: LeaseHandle) {
        let anchor_prev = self.leases.get(anchor).and_then(|l| l.prev);
        if let Some(l) = self.leases.get_mut(handle) {
            l.next = Some(anchor);
            l.prev = anchor_prev;
        }
        if let Some(l) = self.leases.get_mut(anchor) {
            l.prev = Some(handle);
        }
        match anchor_prev {
            Some(p) => {
                if let Some(l) = self.leases.get_mut(p) {
                    l.next = Some(handle);
                }
            }
            None => {
                if let Some(p) = self.pools.get_mut(pool) {
                    p.set_head(Some(handle));
                }
            }
        }
    }

    /// Insertion-sort `handle` into `pool`'s expiry-ascending list, using
    /// the pool's cached `insertion_point` as a starting hint: walk forward
    /// while the new `ends` exceeds the neighbor, else walk backward.
    fn reorder(&mut self, pool: PoolHandle, handle: LeaseHandle) {
        self.unlink_from_pool_list(pool, handle);

        let new_ends = match self.leases.get(handle) {
            Some(l) => l.ends,
            None => return,
        };

        let hint = self
            .pools
            .get(pool)
            .and_then(|p| p.insertion_point)
            .filter(|&h| h != handle && self.leases.get(h).is_some());

        let anchor = hint.or_else(|| self.pools.get(pool).and_then(|p| p.head()));

        match anchor {
            None => {
                // empty list
                if let Some(p) = self.pools.get_mut(pool) {
                    p.set_head(Some(handle));
                    p.set_tail(Some(handle));
                }
                if let Some(l) = self.leases.get_mut(handle) {
                    l.prev = None;
                    l.next = None;
                }
            }
            Some(mut cur) => {
                let cur_ends = self.leases.get(cur).map(|l| l.ends).unwrap_or(new_ends);
                if new_ends >= cur_ends {
                    // walk forward until we find a neighbor whose ends is >= new_ends
                    loop {
                        let next = self.leases.get(cur).and_then(|l| l.next);
                        match next {
                            Some(n) if self.leases.get(n).map(|l| l.ends <= new_ends).unwrap_or(false) => {
                                cur = n;
                            }
                            _ => break,
                        }
                    }
                    self.insert_after(pool, cur, handle);
                } else {
                    // walk backward until we find a neighbor whose ends is <= new_ends
                    loop {
                        let prev = self.leases.get(cur).and_then(|l| l.prev);
                        match prev {
                            Some(p) if self.leases.get(p).map(|l| l.ends > new_ends).unwrap_or(false) => {
                                cur = p;
                            }
                            _ => break,
                        }
                    }
                    self.insert_before(pool, cur, handle);
                }
            }
        }

        if let Some(p) = self.pools.get_mut(pool) {
            p.insertion_point = Some(handle);
        }
    }

    /// Walk a pool's expiry list front-to-back, asserting ascending order
    /// -- used by tests and by the invariant checker, not the hot path.
    pub fn pool_list_is_sorted(&self, pool: PoolHandle) -> bool {
        let mut cur = self.pools.get(pool).and_then(|p| p.head());
        let mut last = None;
        while let Some(h) = cur {
            let ends = match self.leases.get(h) {
                Some(l) => l.ends,
                None => return false,
            };
            if let Some(last_ends) = last {
                if ends < last_ends {
                    return false;
                }
            }
            last = Some(ends);
            cur = self.leases.get(h).and_then(|l| l.next);
        }
        true
    }
}

impl Default for LeaseDb {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn epoch_plus(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn update_at(ends: SystemTime, hw: &[u8], uid: &[u8]) -> LeaseUpdate {
        LeaseUpdate {
            starts: ends,
            ends,
            cltt: ends,
            tstp: None,
            hw_addr: hw.to_vec(),
            uid: uid.to_vec(),
            billing_class: None,
            binding_state: BindingState::Active,
            flags: LeaseFlags::default(),
            on_expiry: vec![],
            on_commit: vec![],
            on_release: vec![],
            agent_options: None,
        }
    }

    #[test]
    fn supersede_preserves_sorted_order() {
        let mut db = LeaseDb::new();
        let pool = db.alloc_pool(GroupId(0), SharedNetworkId(0));
        db.populate_range(
            pool,
            Ipv4Addr::new(192, 0, 2, 10),
            Ipv4Addr::new(192, 0, 2, 15),
        );

        let leases: Vec<_> = (10..=15)
            .map(|n| db.by_ip(Ipv4Addr::new(192, 0, 2, n)).unwrap())
            .collect();

        // give them increasing expiries out of allocation order
        for (i, &h) in leases.iter().enumerate() {
            let update = update_at(epoch_plus(100 - i as u64), b"\x01", b"");
            db.supersede_lease(h, &update, false, epoch_plus(0), |_| {})
                .unwrap();
        }
        assert!(db.pool_list_is_sorted(pool));
    }

    #[test]
    fn conflicting_uid_refuses_supersede() {
        let mut db = LeaseDb::new();
        let pool = db.alloc_pool(GroupId(0), SharedNetworkId(0));
        db.populate_range(
            pool,
            Ipv4Addr::new(192, 0, 2, 10),
            Ipv4Addr::new(192, 0, 2, 10),
        );
        let h = db.by_ip(Ipv4Addr::new(192, 0, 2, 10)).unwrap();

        let first = update_at(epoch_plus(1000), b"\xaa", b"client-a");
        db.supersede_lease(h, &first, false, epoch_plus(0), |_| {})
            .unwrap();

        let second = update_at(epoch_plus(2000), b"\xbb", b"client-b");
        let err = db
            .supersede_lease(h, &second, false, epoch_plus(1), |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::LeaseConflict { .. }));
    }

    #[test]
    fn bootp_takeover_allowed_when_hw_matches_and_uid_absent() {
        let mut db = LeaseDb::new();
        let pool = db.alloc_pool(GroupId(0), SharedNetworkId(0));
        db.populate_range(
            pool,
            Ipv4Addr::new(192, 0, 2, 10),
            Ipv4Addr::new(192, 0, 2, 10),
        );
        let h = db.by_ip(Ipv4Addr::new(192, 0, 2, 10)).unwrap();

        let first = update_at(epoch_plus(1000), b"\xaa", b"");
        db.supersede_lease(h, &first, false, epoch_plus(0), |_| {})
            .unwrap();

        let second = update_at(epoch_plus(2000), b"\xaa", b"");
        db.supersede_lease(h, &second, false, epoch_plus(1), |_| {})
            .unwrap();
    }

    #[test]
    fn release_sets_ends_to_now() {
        let mut db = LeaseDb::new();
        let pool = db.alloc_pool(GroupId(0), SharedNetworkId(0));
        db.populate_range(
            pool,
            Ipv4Addr::new(192, 0, 2, 10),
            Ipv4Addr::new(192, 0, 2, 10),
        );
        let h = db.by_ip(Ipv4Addr::new(192, 0, 2, 10)).unwrap();
        let leased = update_at(epoch_plus(1000), b"\xaa", b"client-a");
        db.supersede_lease(h, &leased, false, epoch_plus(0), |_| {})
            .unwrap();

        db.release_lease(h, epoch_plus(5)).unwrap();
        assert_eq!(db.lease(h).unwrap().ends, epoch_plus(5));
        assert_eq!(db.lease(h).unwrap().binding_state, BindingState::Released);
    }

    #[test]
    fn abandon_zeroes_identifiers_and_sets_flag() {
        let mut db = LeaseDb::new();
        let pool = db.alloc_pool(GroupId(0), SharedNetworkId(0));
        db.populate_range(
            pool,
            Ipv4Addr::new(192, 0, 2, 10),
            Ipv4Addr::new(192, 0, 2, 10),
        );
        let h = db.by_ip(Ipv4Addr::new(192, 0, 2, 10)).unwrap();
        let leased = update_at(epoch_plus(1000), b"\xaa", b"client-a");
        db.supersede_lease(h, &leased, false, epoch_plus(0), |_| {})
            .unwrap();

        db.abandon_lease(h, epoch_plus(5)).unwrap();
        let lease = db.lease(h).unwrap();
        assert!(lease.is_abandoned());
        assert!(lease.hw_addr.is_empty());
        assert!(lease.uid.is_empty());
    }
}
