//! The Group tree: `Group`/`HostDecl`/`Class`/`SharedNetwork`/`Subnet`,
//! each owned by its own arena slab and addressed by a generational
//! handle, mirroring the lease/pool arena in `leasedb`.

use std::net::Ipv4Addr;

use leasedb::arena::{Handle, Slab};
use leasedb::{FailoverPeerId, GroupId, LeaseHandle, PoolHandle, SharedNetworkId};

pub type GroupHandle = Handle<Group>;
pub type HostHandle = Handle<HostDecl>;
pub type ClassHandle = Handle<Class>;
pub type SharedNetworkHandle = Handle<SharedNetwork>;
pub type SubnetHandle = Handle<Subnet>;

/// Declared policy toward BOOTP clients for a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootpPolicy {
    Accept,
    Deny,
    Prefer,
}

/// A scope in the parent chain: root -> shared-network -> subnet -> pool ->
/// host -> class. A child group may override any setting by re-declaring
/// it; lookups walk the parent chain until one answers.
#[derive(Debug, Clone)]
pub struct Group {
    pub parent: Option<GroupHandle>,
    pub statements: Vec<expr::Statement>,
    pub default_lease_time: Option<u32>,
    pub max_lease_time: Option<u32>,
    pub bootp_policy: Option<BootpPolicy>,
    pub authoritative: Option<bool>,
    pub ping_check: Option<bool>,
    pub ping_timeout: Option<u32>,
}

impl Group {
    pub fn root() -> Self {
        Group {
            parent: None,
            statements: Vec::new(),
            default_lease_time: None,
            max_lease_time: None,
            bootp_policy: None,
            authoritative: None,
            ping_check: None,
            ping_timeout: None,
        }
    }

    pub fn child_of(parent: GroupHandle) -> Self {
        Group {
            parent: Some(parent),
            ..Group::root()
        }
    }
}

/// Resolve a per-scope setting by walking the parent chain, stopping at the
/// first group that has declared it.
pub fn resolve_default_lease_time(groups: &Slab<Group>, start: GroupHandle) -> Option<u32> {
    let mut cur = Some(start);
    while let Some(h) = cur {
        let g = groups.get(h)?;
        if let Some(v) = g.default_lease_time {
            return Some(v);
        }
        cur = g.parent;
    }
    None
}

pub fn resolve_max_lease_time(groups: &Slab<Group>, start: GroupHandle) -> Option<u32> {
    let mut cur = Some(start);
    while let Some(h) = cur {
        let g = groups.get(h)?;
        if let Some(v) = g.max_lease_time {
            return Some(v);
        }
        cur = g.parent;
    }
    None
}

pub fn resolve_bootp_policy(groups: &Slab<Group>, start: GroupHandle) -> Option<BootpPolicy> {
    let mut cur = Some(start);
    while let Some(h) = cur {
        let g = groups.get(h)?;
        if let Some(v) = g.bootp_policy {
            return Some(v);
        }
        cur = g.parent;
    }
    None
}

pub fn resolve_authoritative(groups: &Slab<Group>, start: GroupHandle) -> bool {
    let mut cur = Some(start);
    while let Some(h) = cur {
        let Some(g) = groups.get(h) else { return false };
        if let Some(v) = g.authoritative {
            return v;
        }
        cur = g.parent;
    }
    false
}

/// Whether to ICMP-probe a candidate address before offering it. Defaults
/// to on when unset anywhere in the chain.
pub fn resolve_ping_check(groups: &Slab<Group>, start: GroupHandle) -> bool {
    let mut cur = Some(start);
    while let Some(h) = cur {
        let Some(g) = groups.get(h) else { return true };
        if let Some(v) = g.ping_check {
            return v;
        }
        cur = g.parent;
    }
    true
}

pub fn resolve_ping_timeout(groups: &Slab<Group>, start: GroupHandle) -> Option<u32> {
    let mut cur = Some(start);
    while let Some(h) = cur {
        let g = groups.get(h)?;
        if let Some(v) = g.ping_timeout {
            return Some(v);
        }
        cur = g.parent;
    }
    None
}

/// Run every group's statements from root down to `start`, so a child's
/// `supersede option` can see and override whatever its parent already set.
pub fn execute_chain(groups: &Slab<Group>, start: GroupHandle, ctx: &mut expr::EvalCtx<'_>) -> Result<(), expr::EvalError> {
    let mut chain = Vec::new();
    let mut cur = Some(start);
    while let Some(h) = cur {
        let Some(g) = groups.get(h) else { break };
        chain.push(h);
        cur = g.parent;
    }
    for h in chain.into_iter().rev() {
        if let Some(g) = groups.get(h) {
            for stmt in &g.statements {
                stmt.execute(ctx)?;
                if ctx.should_break || ctx.should_return || ctx.ignore_packet {
                    return Ok(());
                }
            }
        }
    }
    Ok(())
}

/// Collect every hostname a `gethostbyname()` call anywhere in the group
/// chain (`start` up through its ancestors) references, so a caller can
/// resolve them all before [`execute_chain`] runs.
pub fn collect_chain_hostnames(groups: &Slab<Group>, start: GroupHandle) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = Some(start);
    while let Some(h) = cur {
        let Some(g) = groups.get(h) else { break };
        for stmt in &g.statements {
            stmt.collect_hostnames(&mut out);
        }
        cur = g.parent;
    }
    out.sort();
    out.dedup();
    out
}

/// Clone a group's own settings onto a fresh child of `new_parent` -- used
/// when a subnet inherits from its shared-network.
pub fn clone_group(groups: &mut Slab<Group>, source: GroupHandle, new_parent: GroupHandle) -> GroupHandle {
    let cloned = groups
        .get(source)
        .cloned()
        .map(|mut g| {
            g.parent = Some(new_parent);
            g
        })
        .unwrap_or_else(|| Group::child_of(new_parent));
    groups.alloc(cloned)
}

/// A host declaration's lifecycle flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostFlags(u8);

impl HostFlags {
    pub const DYNAMIC: u8 = 1 << 0;
    pub const DELETED: u8 = 1 << 1;
    pub const STATIC: u8 = 1 << 2;

    pub fn new(bits: u8) -> Self {
        HostFlags(bits)
    }

    pub fn contains(&self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn set(&mut self, bit: u8, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}

#[derive(Debug, Clone)]
pub struct HostDecl {
    pub name: String,
    pub interface: Option<Vec<u8>>,
    pub client_identifier: Option<Vec<u8>>,
    /// an expression producing 0..N fixed IPs for this host.
    pub fixed_addr: Option<expr::Expr>,
    pub group: GroupHandle,
    pub flags: HostFlags,
    pub n_hw: Option<HostHandle>,
    pub n_uid: Option<HostHandle>,
    pub n_name: Option<HostHandle>,
}

impl HostDecl {
    /// A deleted host retains its `STATIC` flag as a tombstone so a later
    /// re-read of the config doesn't resurrect it.
    pub fn is_tombstone(&self) -> bool {
        self.flags.contains(HostFlags::DELETED) && self.flags.contains(HostFlags::STATIC)
    }
}

#[derive(Debug, Clone)]
pub struct Class {
    pub name: String,
    pub match_expr: Option<expr::Expr>,
    pub spawn_with: Option<expr::Expr>,
    pub lease_limit: Option<u32>,
    pub billed_leases: Vec<LeaseHandle>,
    pub group: GroupHandle,
    pub subclasses: std::collections::HashMap<Vec<u8>, ClassHandle>,
}

impl Class {
    /// Refuses further billing once `lease_limit` active billings exist.
    pub fn at_limit(&self) -> bool {
        match self.lease_limit {
            Some(limit) => self.billed_leases.len() as u32 >= limit,
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SharedNetwork {
    pub name: String,
    pub subnets: Vec<SubnetHandle>,
    pub pools: Vec<PoolHandle>,
    pub group: GroupHandle,
    pub interface: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Subnet {
    pub net: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub shared_network: SharedNetworkHandle,
    pub group: GroupHandle,
}

impl Subnet {
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & u32::from(self.netmask) == u32::from(self.net)
    }

    fn prefix_len(&self) -> u32 {
        u32::from(self.netmask).count_ones()
    }
}

/// Insert `new` into `order` so narrower masks (longer prefixes) precede
/// wider ones that contain them -- a wider-mask match never shadows a
/// narrower one during a containment lookup that scans front to back.
pub fn insert_subnet_sorted(subnets: &Slab<Subnet>, order: &mut Vec<SubnetHandle>, new: SubnetHandle) {
    let new_prefix = subnets.get(new).map(Subnet::prefix_len).unwrap_or(0);
    let pos = order
        .iter()
        .position(|h| subnets.get(*h).map(Subnet::prefix_len).unwrap_or(0) < new_prefix)
        .unwrap_or(order.len());
    order.insert(pos, new);
}

/// References to `GroupId`/`SharedNetworkId` are owned by `leasedb::Pool`
/// as opaque ids; this registry maps those ids back to this crate's arena
/// handles for resolution during evaluation/billing.
#[derive(Default)]
pub struct GroupTree {
    pub groups: Slab<Group>,
    pub hosts: Slab<HostDecl>,
    pub classes: Slab<Class>,
    pub shared_networks: Slab<SharedNetwork>,
    pub subnets: Slab<Subnet>,
    pub group_ids: std::collections::HashMap<GroupId, GroupHandle>,
    pub shared_network_ids: std::collections::HashMap<SharedNetworkId, SharedNetworkHandle>,
    pub failover_peers: std::collections::HashMap<FailoverPeerId, String>,
    next_group_id: u32,
    next_shared_network_id: u32,
}

impl GroupTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// The subnet containing `addr`, preferring the narrowest (longest
    /// prefix) match when subnets nest -- mirrors `insert_subnet_sorted`'s
    /// ordering without requiring a maintained global index.
    pub fn find_subnet(&self, addr: Ipv4Addr) -> Option<SubnetHandle> {
        self.subnets
            .iter()
            .filter(|(_, s)| s.contains(addr))
            .max_by_key(|(_, s)| u32::from(s.netmask).count_ones())
            .map(|(h, _)| h)
    }

    pub fn alloc_group(&mut self, group: Group) -> (GroupId, GroupHandle) {
        let handle = self.groups.alloc(group);
        let id = GroupId(self.next_group_id);
        self.next_group_id += 1;
        self.group_ids.insert(id, handle);
        (id, handle)
    }

    pub fn alloc_shared_network(&mut self, net: SharedNetwork) -> (SharedNetworkId, SharedNetworkHandle) {
        let handle = self.shared_networks.alloc(net);
        let id = SharedNetworkId(self.next_shared_network_id);
        self.next_shared_network_id += 1;
        self.shared_network_ids.insert(id, handle);
        (id, handle)
    }

    /// The `GroupId` a group was given by `alloc_group`, minting one on
    /// first request for groups allocated directly through `self.groups`
    /// (host/class bodies that don't need a `GroupId` until a pool inside
    /// them needs to attribute back to a policy group).
    pub fn group_id_for(&mut self, handle: GroupHandle) -> GroupId {
        if let Some((id, _)) = self.group_ids.iter().find(|(_, h)| **h == handle) {
            return *id;
        }
        let id = GroupId(self.next_group_id);
        self.next_group_id += 1;
        self.group_ids.insert(id, handle);
        id
    }
}
