#![warn(
    missing_debug_implementations,
    // missing_docs, // we shall remove thee, someday!
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]
#![allow(clippy::cognitive_complexity)]

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, SecondsFormat, Utc};
use confparse::{
    GroupHandle, GroupTree, SubnetHandle, collect_chain_hostnames, determine_lease, execute_chain,
    resolve_authoritative, resolve_default_lease_time, resolve_max_lease_time, resolve_ping_check,
    resolve_ping_timeout,
};
use dhcpd_core::{
    dhcproto::v4::{DhcpOption, Message, MessageType, OptionCode},
    prelude::*,
};
use dhcpd_core::tracing::warn;
use discovery::DnsServiceDiscovery;
use expr::universe::DhcpUniverse;
use expr::{Data, EvalCtx, OptionState, Universe, UniverseRegistry, to_v4_options};
use icmp_ping::{Icmpv4, Listener};
use leasedb::{BindingState, LeaseDb, LeaseFlags, LeaseUpdate, PoolHandle};
use parking_lot::{Mutex, RwLock};
use register_derive::Register;

use message_type::MsgType;
use static_addr::StaticAddr;

/// Default `ping-timeout` when a scope doesn't declare one, matching ISC
/// dhcpd's own default.
const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(1);
/// Global cap on pings in flight at once, independent of any one request --
/// protects against a forged-echo-reply flood churning the server. ISC
/// dhcpd bounds this the same way, via a fixed counter rather than a config
/// directive.
const MAX_OUTSTANDING_PINGS: usize = 10;

#[derive(Register)]
#[register(msg(Message))]
#[register(plugin(StaticAddr))]
pub struct Leases {
    tree: Arc<RwLock<GroupTree>>,
    universes: Arc<UniverseRegistry>,
    db: Arc<Mutex<LeaseDb>>,
    pinger: Option<Arc<Listener<Icmpv4>>>,
    outstanding_pings: Arc<AtomicUsize>,
    resolver: Option<Arc<DnsServiceDiscovery>>,
}

impl fmt::Debug for Leases {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Leases").finish()
    }
}

impl Leases {
    pub fn new(tree: Arc<RwLock<GroupTree>>, universes: Arc<UniverseRegistry>, db: Arc<Mutex<LeaseDb>>) -> Self {
        let pinger = match Listener::<Icmpv4>::new() {
            Ok(listener) => Some(Arc::new(listener)),
            Err(err) => {
                warn!(?err, "could not open icmp echo socket, ping-check disabled");
                None
            }
        };
        let resolver = match DnsServiceDiscovery::new() {
            Ok(resolver) => Some(Arc::new(resolver)),
            Err(err) => {
                warn!(?err, "could not build dns resolver, gethostbyname() will be undefined");
                None
            }
        };
        Self {
            tree,
            universes,
            db,
            pinger,
            outstanding_pings: Arc::new(AtomicUsize::new(0)),
            resolver,
        }
    }

    /// Probe `ip` with a single ICMP echo, per the `discover` ping-check.
    /// Returns `true` if a reply arrived (address is in use by someone
    /// else), `false` if it timed out, ping-check is disabled for this
    /// scope, or the global in-flight cap is already saturated.
    async fn ping_address(&self, ip: Ipv4Addr, timeout: Duration) -> bool {
        let Some(pinger) = &self.pinger else { return false };
        if self.outstanding_pings.fetch_add(1, Ordering::SeqCst) >= MAX_OUTSTANDING_PINGS {
            self.outstanding_pings.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        let mut p = pinger.pinger(IpAddr::V4(ip));
        p.timeout(timeout);
        let got_reply = p.ping(0).await.is_ok();
        self.outstanding_pings.fetch_sub(1, Ordering::SeqCst);
        got_reply
    }

    /// The pools belonging to `subnet`'s own group, out of the (possibly
    /// wider) set attached to its shared network -- see `Pool::group`.
    fn subnet_pools(&self, subnet: SubnetHandle) -> Option<(GroupHandle, Vec<PoolHandle>)> {
        let tree = self.tree.read();
        let sub = tree.subnets.get(subnet)?;
        let net = tree.shared_networks.get(sub.shared_network)?;
        let (&group_id, _) = tree.group_ids.iter().find(|(_, h)| **h == sub.group)?;
        let db = self.db.lock();
        let pools = net
            .pools
            .iter()
            .copied()
            .filter(|p| db.pool(*p).map(|pool| pool.group == group_id).unwrap_or(false))
            .collect();
        Some((sub.group, pools))
    }

    fn lease_bounds(&self, group: GroupHandle) -> (u32, u32) {
        let tree = self.tree.read();
        (
            resolve_default_lease_time(&tree.groups, group).unwrap_or(43_200),
            resolve_max_lease_time(&tree.groups, group).unwrap_or(86_400),
        )
    }

    /// Run `group`'s statement chain against the inbound packet, producing
    /// the wire options a `supersede`/`default`/`append` option statement
    /// wrote into `out_options`. Any `gethostbyname()` calls reachable from
    /// the chain are resolved up front, since the expression evaluator
    /// itself never blocks on I/O.
    async fn scope_options(&self, group: GroupHandle, req: &Message, chaddr: &[u8]) -> dhcproto::v4::DhcpOptions {
        let opts_bytes = req.opts().to_vec().unwrap_or_default();
        let in_options = DhcpUniverse.dereference(&Data::new(opts_bytes)).unwrap_or_else(|_| OptionState::new());
        let cfg_options = OptionState::new();
        let mut eval = EvalCtx::new(Some(req), &[], in_options, &cfg_options, &self.universes, Data::new(chaddr.to_vec()));

        let hostnames = {
            let tree = self.tree.read();
            collect_chain_hostnames(&tree.groups, group)
        };
        if let Some(resolver) = &self.resolver {
            for name in hostnames {
                match resolver.resolve_hostname(&name).await {
                    Ok(bytes) => {
                        eval.resolved_hosts.insert(name, Data::new(bytes));
                    }
                    Err(err) => warn!(%name, ?err, "gethostbyname() lookup failed"),
                }
            }
        }

        let tree = self.tree.read();
        let _ = execute_chain(&tree.groups, group, &mut eval);
        to_v4_options(&eval.out_options)
    }
}

#[async_trait]
impl Plugin<Message> for Leases {
    #[instrument(level = "debug", skip_all)]
    async fn handle(&self, ctx: &mut MsgContext<Message>) -> Result<Action> {
        let req = ctx.msg();
        let msg_type = req.opts().msg_type().context("no message type found")?;
        let chaddr = req.chaddr().to_vec();
        let client_id = client_identifier(req);

        let subnet_addr = ctx.subnet()?;
        let subnet = self.tree.read().find_subnet(subnet_addr);

        // if yiaddr is already set, an earlier plugin (e.g. static-addr) has
        // already given the message an address.
        let resp_has_yiaddr = matches!(ctx.resp_msg(), Some(msg) if !msg.yiaddr().is_unspecified());
        if msg_type == MessageType::Discover && resp_has_yiaddr {
            return Ok(Action::Continue);
        }

        match (msg_type, subnet) {
            (MessageType::Discover, Some(subnet)) => self.discover(ctx, &chaddr, &client_id, subnet).await,
            (MessageType::Request, Some(subnet)) => self.request(ctx, &chaddr, &client_id, subnet).await,
            (MessageType::Inform, Some(subnet)) => self.inform(ctx, &chaddr, subnet).await,
            (MessageType::Release, _) => self.release(ctx, &chaddr, &client_id).await,
            (MessageType::Decline, _) => self.decline(ctx, &chaddr).await,
            _ => {
                debug!(?subnet_addr, giaddr = ?req.giaddr(), "message type or subnet did not match");
                // NoResponse means no other plugin gets to try to send a message
                Ok(Action::NoResponse)
            }
        }
    }
}

impl Leases {
    async fn discover(
        &self,
        ctx: &mut MsgContext<Message>,
        chaddr: &[u8],
        client_id: &[u8],
        subnet: SubnetHandle,
    ) -> Result<Action> {
        let now = SystemTime::now();
        // give 60 seconds between discover & request for the client to come back
        let offer_ends = now + Duration::from_secs(60);

        let Some((group, pools)) = self.subnet_pools(subnet) else {
            debug!("subnet has no pools configured");
            return Ok(Action::NoResponse);
        };
        if pools.is_empty() {
            debug!("subnet has no pools configured");
            return Ok(Action::NoResponse);
        }

        let requested = match ctx.msg().opts().get(OptionCode::RequestedIpAddress) {
            Some(DhcpOption::RequestedIpAddress(ip)) => Some(*ip),
            _ => None,
        };

        let (ping_check, ping_timeout) = {
            let tree = self.tree.read();
            (
                resolve_ping_check(&tree.groups, group),
                resolve_ping_timeout(&tree.groups, group)
                    .map(|secs| Duration::from_secs(secs as u64))
                    .unwrap_or(DEFAULT_PING_TIMEOUT),
            )
        };

        let mut candidates: Vec<Ipv4Addr> = Vec::new();
        candidates.extend(requested);
        {
            let db = self.db.lock();
            candidates.extend(pools.iter().filter_map(|&pool| {
                let head = db.pool_head(pool)?;
                Some(db.lease(head)?.ip)
            }));
        }

        let mut ip = None;
        for candidate in candidates {
            let held = {
                let mut db = self.db.lock();
                attempt_lease(&mut db, candidate, &pools, chaddr, client_id, now, offer_ends, Some(now), false)
            };
            if !held {
                continue;
            }
            if ping_check && self.ping_address(candidate, ping_timeout).await {
                warn!(?candidate, "ping-check got a reply, marking address abandoned");
                let mut db = self.db.lock();
                if let Some(h) = db.by_ip(candidate) {
                    let _ = db.abandon_lease(h, now);
                }
                continue;
            }
            ip = Some(candidate);
            break;
        }

        let Some(ip) = ip else {
            debug!("leases plugin did not assign ip");
            return Ok(Action::NoResponse);
        };

        let (default, max) = self.lease_bounds(group);
        let (lease, t1, t2) = determine_lease(default, max, ctx.requested_lease_time());
        debug!(?ip, ?client_id, "got IP for client-- sending offer");
        ctx.resp_msg_mut()
            .context("response message must be set before leases is run")?
            .set_yiaddr(ip);
        let opts = self.scope_options(group, ctx.msg(), chaddr).await;
        ctx.populate_opts_lease(&opts, lease, t1, t2);
        ctx.set_local(ExpiresAt(offer_ends));
        Ok(Action::Continue)
    }

    async fn request(
        &self,
        ctx: &mut MsgContext<Message>,
        chaddr: &[u8],
        client_id: &[u8],
        subnet: SubnetHandle,
    ) -> Result<Action> {
        let authoritative = {
            let tree = self.tree.read();
            tree.subnets
                .get(subnet)
                .map(|s| resolve_authoritative(&tree.groups, s.group))
                .unwrap_or(false)
        };

        // requested ip comes from opts or ciaddr
        let ip = match ctx.requested_ip() {
            Some(ip) => ip,
            None if authoritative => {
                debug!("no requested IP and we are authoritative, so NAK");
                ctx.update_resp_msg(MessageType::Nak).context("failed to set msg type")?;
                return Ok(Action::Respond);
            }
            None => {
                debug!("couldn't get requested IP, no response");
                return Ok(Action::NoResponse);
            }
        };

        let Some((group, pools)) = self.subnet_pools(subnet) else {
            // not one of our subnets, leave the message for someone else
            return Ok(Action::Continue);
        };

        let now = SystemTime::now();
        let (default, max) = self.lease_bounds(group);
        let (lease, t1, t2) = determine_lease(default, max, ctx.requested_lease_time());
        let expires_at = now + lease;

        let granted = {
            let mut db = self.db.lock();
            attempt_lease(&mut db, ip, &pools, chaddr, client_id, now, expires_at, None, true)
        };

        if !granted {
            if authoritative {
                debug!(?ip, "can't give out lease, NAK");
                ctx.update_resp_msg(MessageType::Nak).context("failed to set msg type")?;
                return Ok(Action::Respond);
            }
            debug!(?ip, "can't give out lease & not authoritative");
            ctx.resp_msg_take();
            return Ok(Action::Continue);
        }

        debug!(
            ?ip,
            ?client_id,
            expires_at = %DateTime::<Utc>::from(expires_at).to_rfc3339_opts(SecondsFormat::Secs, true),
            "leased requested ip"
        );
        ctx.resp_msg_mut()
            .context("response message must be set before leases is run")?
            .set_yiaddr(ip);
        let opts = self.scope_options(group, ctx.msg(), chaddr).await;
        ctx.populate_opts_lease(&opts, lease, t1, t2);
        ctx.set_local(ExpiresAt(expires_at));
        Ok(Action::Continue)
    }

    /// INFORM clients already have an address; populate requested options
    /// without touching the lease database or lease-time options.
    async fn inform(&self, ctx: &mut MsgContext<Message>, chaddr: &[u8], subnet: SubnetHandle) -> Result<Action> {
        let Some((group, _)) = self.subnet_pools(subnet) else {
            return Ok(Action::Continue);
        };
        let opts = self.scope_options(group, ctx.msg(), chaddr).await;
        ctx.populate_opts(&opts);
        Ok(Action::Continue)
    }

    async fn release(&self, ctx: &mut MsgContext<Message>, chaddr: &[u8], client_id: &[u8]) -> Result<Action> {
        let ip = ctx.msg().ciaddr();
        let now = SystemTime::now();
        let mut db = self.db.lock();
        let owned = db
            .by_ip(ip)
            .and_then(|h| db.lease(h).map(|l| (h, l.uid.clone(), l.hw_addr.clone())))
            .filter(|(_, uid, hw)| (!client_id.is_empty() && uid == client_id) || (!chaddr.is_empty() && hw == chaddr));

        match owned {
            Some((handle, ..)) => {
                let _ = db.release_lease(handle, now);
                debug!(?ip, "released ip");
            }
            None => debug!(?ip, ?client_id, "ip not found in lease database, or client mismatch"),
        }
        // release has no response
        Ok(Action::NoResponse)
    }

    async fn decline(&self, ctx: &mut MsgContext<Message>, chaddr: &[u8]) -> Result<Action> {
        let Some(DhcpOption::RequestedIpAddress(ip)) = ctx.msg().opts().get(OptionCode::RequestedIpAddress) else {
            error!("decline has no option 50 (requested IP)");
            return Ok(Action::NoResponse);
        };
        let ip = *ip;
        let now = SystemTime::now();
        let mut db = self.db.lock();
        if let Some(handle) = db.by_ip(ip) {
            let _ = db.abandon_lease(handle, now);
        }
        debug!(?ip, ?chaddr, "added declined IP with probation set");
        Ok(Action::Continue)
    }
}

fn client_identifier(req: &Message) -> Vec<u8> {
    match req.opts().get(OptionCode::ClientIdentifier) {
        Some(DhcpOption::ClientIdentifier(id)) => id.clone(),
        _ => req.chaddr().to_vec(),
    }
}

/// Try to hand `ip` to `(chaddr, client_id)`: refuses if the address isn't
/// in one of `pools`, is currently abandoned, or is unexpired and bound to
/// someone else. On success, records the new binding via `supersede_lease`.
#[allow(clippy::too_many_arguments)]
fn attempt_lease(
    db: &mut LeaseDb,
    ip: Ipv4Addr,
    pools: &[PoolHandle],
    chaddr: &[u8],
    client_id: &[u8],
    now: SystemTime,
    ends: SystemTime,
    tstp: Option<SystemTime>,
    commit: bool,
) -> bool {
    let Some(handle) = db.by_ip(ip) else { return false };
    let Some(lease) = db.lease(handle) else { return false };
    if !pools.contains(&lease.pool) || lease.is_abandoned() {
        return false;
    }
    let ours = (!client_id.is_empty() && lease.uid == client_id) || (!chaddr.is_empty() && lease.hw_addr == chaddr);
    if !lease.is_expired(now) && !ours {
        return false;
    }

    let update = LeaseUpdate {
        starts: now,
        ends,
        cltt: now,
        tstp,
        hw_addr: chaddr.to_vec(),
        uid: client_id.to_vec(),
        billing_class: None,
        binding_state: BindingState::Active,
        flags: LeaseFlags::default(),
        on_expiry: Vec::new(),
        on_commit: Vec::new(),
        on_release: Vec::new(),
        agent_options: None,
    };
    db.supersede_lease(handle, &update, commit, now, |_| {}).is_ok()
}

/// When the lease will expire at
#[derive(Debug, Copy, Clone, PartialEq, Eq, Ord, PartialOrd, Hash)]
pub struct ExpiresAt(pub SystemTime);
