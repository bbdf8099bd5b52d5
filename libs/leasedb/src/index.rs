//! The `by_ip` / `by_uid` / `by_hw` hash indexes over the lease arena.
//!
//! `by_ip` is a straight unique map. `by_uid`/`by_hw` are headed chains:
//! each bucket holds the handle of the first lease with that key, and the
//! rest of the chain is threaded through `Lease::n_uid`/`Lease::n_hw`. A
//! lease appears at most once in each chain (the data-model invariant from
//! section 4.1 of the design).

use std::collections::HashMap;
use std::net::Ipv4Addr;

use crate::arena::Slab;
use crate::lease::{Lease, LeaseHandle};

#[derive(Debug, Default)]
pub struct Indexes {
    pub by_ip: HashMap<Ipv4Addr, LeaseHandle>,
    by_uid: HashMap<Vec<u8>, LeaseHandle>,
    by_hw: HashMap<Vec<u8>, LeaseHandle>,
}

impl Indexes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup_uid(&self, leases: &Slab<Lease>, uid: &[u8]) -> Vec<LeaseHandle> {
        let mut out = Vec::new();
        let mut cur = self.by_uid.get(uid).copied();
        while let Some(h) = cur {
            out.push(h);
            cur = leases.get(h).and_then(|l| l.n_uid);
        }
        out
    }

    pub fn lookup_hw(&self, leases: &Slab<Lease>, hw: &[u8]) -> Vec<LeaseHandle> {
        let mut out = Vec::new();
        let mut cur = self.by_hw.get(hw).copied();
        while let Some(h) = cur {
            out.push(h);
            cur = leases.get(h).and_then(|l| l.n_hw);
        }
        out
    }

    pub fn insert_ip(&mut self, ip: Ipv4Addr, handle: LeaseHandle) {
        self.by_ip.insert(ip, handle);
    }

    pub fn remove_ip(&mut self, ip: Ipv4Addr) {
        self.by_ip.remove(&ip);
    }

    /// Thread `handle` onto the head of `uid`'s chain.
    pub fn insert_uid(&mut self, leases: &mut Slab<Lease>, uid: Vec<u8>, handle: LeaseHandle) {
        if uid.is_empty() {
            return;
        }
        let old_head = self.by_uid.insert(uid, handle);
        if let Some(lease) = leases.get_mut(handle) {
            lease.n_uid = old_head;
        }
    }

    /// Unlink `handle` from whichever uid chain it's in.
    pub fn remove_uid(&mut self, leases: &mut Slab<Lease>, uid: &[u8], handle: LeaseHandle) {
        if uid.is_empty() {
            return;
        }
        let next = leases.get(handle).and_then(|l| l.n_uid);
        match self.by_uid.get(uid).copied() {
            Some(head) if head == handle => {
                match next {
                    Some(n) => {
                        self.by_uid.insert(uid.to_vec(), n);
                    }
                    None => {
                        self.by_uid.remove(uid);
                    }
                }
            }
            Some(head) => {
                let mut cur = head;
                loop {
                    let cur_next = leases.get(cur).and_then(|l| l.n_uid);
                    match cur_next {
                        Some(n) if n == handle => {
                            if let Some(lease) = leases.get_mut(cur) {
                                lease.n_uid = next;
                            }
                            break;
                        }
                        Some(n) => cur = n,
                        None => break,
                    }
                }
            }
            None => {}
        }
        if let Some(lease) = leases.get_mut(handle) {
            lease.n_uid = None;
        }
    }

    pub fn insert_hw(&mut self, leases: &mut Slab<Lease>, hw: Vec<u8>, handle: LeaseHandle) {
        if hw.is_empty() {
            return;
        }
        let old_head = self.by_hw.insert(hw, handle);
        if let Some(lease) = leases.get_mut(handle) {
            lease.n_hw = old_head;
        }
    }

    pub fn remove_hw(&mut self, leases: &mut Slab<Lease>, hw: &[u8], handle: LeaseHandle) {
        if hw.is_empty() {
            return;
        }
        let next = leases.get(handle).and_then(|l| l.n_hw);
        match self.by_hw.get(hw).copied() {
            Some(head) if head == handle => match next {
                Some(n) => {
                    self.by_hw.insert(hw.to_vec(), n);
                }
                None => {
                    self.by_hw.remove(hw);
                }
            },
            Some(head) => {
                let mut cur = head;
                loop {
                    let cur_next = leases.get(cur).and_then(|l| l.n_hw);
                    match cur_next {
                        Some(n) if n == handle => {
                            if let Some(lease) = leases.get_mut(cur) {
                                lease.n_hw = next;
                            }
                            break;
                        }
                        Some(n) => cur = n,
                        None => break,
                    }
                }
            }
            None => {}
        }
        if let Some(lease) = leases.get_mut(handle) {
            lease.n_hw = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{GroupId, Pool, SharedNetworkId};
    use std::net::Ipv4Addr;

    #[test]
    fn uid_chain_single_occurrence_invariant() {
        let mut leases: Slab<Lease> = Slab::new();
        let mut pools: Slab<Pool> = Slab::new();
        let pool = pools.alloc(Pool::new(GroupId(0), SharedNetworkId(0)));
        let mut idx = Indexes::new();

        let a = leases.alloc(Lease::new(Ipv4Addr::new(10, 0, 0, 1), pool));
        let b = leases.alloc(Lease::new(Ipv4Addr::new(10, 0, 0, 2), pool));
        idx.insert_uid(&mut leases, b"client-1".to_vec(), a);
        idx.insert_uid(&mut leases, b"client-1".to_vec(), b);

        let chain = idx.lookup_uid(&leases, b"client-1");
        assert_eq!(chain, vec![b, a]);

        idx.remove_uid(&mut leases, b"client-1", a);
        let chain = idx.lookup_uid(&leases, b"client-1");
        assert_eq!(chain, vec![b]);
    }
}
