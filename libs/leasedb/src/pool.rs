//! `Pool`: a contiguous range of addresses sharing permit/prohibit policy,
//! with its leases kept in an expiry-ascending doubly linked list so the
//! allocator can hand out the list head (the oldest-to-free lease) cheaply.

use expr::Expr;

use crate::lease::LeaseHandle;

/// Opaque id into the confparse crate's `Group` slab. `leasedb` doesn't own
/// group declarations (the group tree is a configuration-parser concern);
/// it just needs somewhere to stash which group a pool belongs to so
/// higher layers can look up timers/policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub u32);

/// Opaque id into the confparse crate's `SharedNetwork` slab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SharedNetworkId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FailoverPeerId(pub u32);

#[derive(Debug)]
pub struct Pool {
    pub group: GroupId,
    pub shared_network: SharedNetworkId,
    pub failover_peer: Option<FailoverPeerId>,
    pub permit_list: Vec<Expr>,
    pub prohibit_list: Vec<Expr>,
    head: Option<LeaseHandle>,
    tail: Option<LeaseHandle>,
    /// cached cursor near the last modification, used as the starting
    /// point for the insertion-sort walk in `reorder`.
    pub insertion_point: Option<LeaseHandle>,
    pub lease_count: usize,
    pub free_leases: usize,
}

impl Pool {
    pub fn new(group: GroupId, shared_network: SharedNetworkId) -> Self {
        Pool {
            group,
            shared_network,
            failover_peer: None,
            permit_list: Vec::new(),
            prohibit_list: Vec::new(),
            head: None,
            tail: None,
            insertion_point: None,
            lease_count: 0,
            free_leases: 0,
        }
    }

    pub fn head(&self) -> Option<LeaseHandle> {
        self.head
    }

    pub fn tail(&self) -> Option<LeaseHandle> {
        self.tail
    }

    pub(crate) fn set_head(&mut self, h: Option<LeaseHandle>) {
        self.head = h;
    }

    pub(crate) fn set_tail(&mut self, h: Option<LeaseHandle>) {
        self.tail = h;
    }
}
