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
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::SystemTime;

use confparse::lease_timing::{rebind, renew};
use dhcpd_core::{
    dhcproto::{
        Decodable, Decoder,
        v4::{
            relay::{RelayAgentInformation, RelayCode, RelayInfo},
            DhcpOption, Message, MessageType, OptionCode,
        },
    },
    prelude::*,
};
use leasedb::{Lease, LeaseDb, LeaseHandle};
use parking_lot::Mutex;
use register_derive::Register;

use message_type::MsgType;

/// Up to this many additional IPs sharing the queried identifier ride
/// along on an ACTIVE reply in option 92.
const MAX_ASSOCIATED_IPS: usize = 40;

#[derive(Register)]
#[register(msg(Message))]
#[register(plugin(MsgType))]
pub struct LeaseQuery {
    db: Arc<Mutex<LeaseDb>>,
}

impl fmt::Debug for LeaseQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseQuery").finish()
    }
}

impl LeaseQuery {
    pub fn new(db: Arc<Mutex<LeaseDb>>) -> Self {
        Self { db }
    }
}

/// Which of RFC 4388's query forms the request carried, in the priority
/// order the RFC's §3.1 lays out: an IP-address query wins over a
/// client-identifier query, which wins over a hardware-address query.
enum Query {
    Ip(Ipv4Addr),
    ClientId(Vec<u8>),
    Mac(Vec<u8>),
    RemoteId(Vec<u8>),
    RelayId(Vec<u8>),
}

fn relay_info(req: &Message) -> Option<RelayAgentInformation> {
    match req.opts().get(OptionCode::RelayAgentInformation) {
        Some(DhcpOption::RelayAgentInformation(info)) => Some(info.clone()),
        _ => None,
    }
}

fn parse_query(req: &Message) -> Option<Query> {
    if !req.ciaddr().is_unspecified() {
        return Some(Query::Ip(req.ciaddr()));
    }
    if let Some(DhcpOption::ClientIdentifier(id)) = req.opts().get(OptionCode::ClientIdentifier) {
        return Some(Query::ClientId(id.clone()));
    }
    if req.chaddr().iter().any(|&b| b != 0) {
        return Some(Query::Mac(req.chaddr().to_vec()));
    }
    if let Some(info) = relay_info(req) {
        if let Some(RelayInfo::AgentRemoteId(id)) = info.get(RelayCode::AgentRemoteId) {
            return Some(Query::RemoteId(id.clone()));
        }
        if let Some(RelayInfo::AgentCircuitId(id)) = info.get(RelayCode::AgentCircuitId) {
            return Some(Query::RelayId(id.clone()));
        }
    }
    None
}

/// Decodes `agent_options` (the raw option-82 bytes a lease was billed
/// under) and checks whether its relay info carries `id` under `code`.
fn agent_options_match(agent_options: &Option<Vec<u8>>, code: RelayCode, id: &[u8]) -> bool {
    let Some(bytes) = agent_options else { return false };
    let Ok(info) = RelayAgentInformation::decode(&mut Decoder::new(bytes)) else {
        return false;
    };
    matches!(
        info.get(code),
        Some(RelayInfo::AgentRemoteId(v)) | Some(RelayInfo::AgentCircuitId(v)) if v.as_slice() == id
    )
}

enum Status {
    Unassigned,
    Active,
}

fn status_of(lease: &Lease, now: SystemTime) -> Status {
    if lease.binding_state == leasedb::BindingState::Active && !lease.is_expired(now) {
        Status::Active
    } else {
        Status::Unassigned
    }
}

#[async_trait]
impl Plugin<Message> for LeaseQuery {
    #[instrument(level = "debug", skip_all)]
    async fn handle(&self, ctx: &mut MsgContext<Message>) -> Result<Action> {
        let req = ctx.msg();
        if req.opts().msg_type() != Some(MessageType::LeaseQuery) {
            return Ok(Action::Continue);
        }

        let Some(query) = parse_query(req) else {
            debug!("LEASEQUERY had no usable query key, dropping");
            return Ok(Action::NoResponse);
        };

        let now = SystemTime::now();
        let db = self.db.lock();
        let (matches, unknown): (Vec<LeaseHandle>, bool) = match &query {
            Query::Ip(ip) => match db.by_ip(*ip) {
                Some(h) => (vec![h], false),
                None => (Vec::new(), true),
            },
            Query::ClientId(id) => {
                let m = db.by_uid(id);
                let unknown = m.is_empty();
                (m, unknown)
            }
            Query::Mac(mac) => {
                let m = db.by_hw(mac);
                let unknown = m.is_empty();
                (m, unknown)
            }
            Query::RemoteId(id) => {
                let m: Vec<_> = db
                    .iter_leases()
                    .filter(|(_, l)| agent_options_match(&l.agent_options, RelayCode::AgentRemoteId, id))
                    .map(|(h, _)| h)
                    .collect();
                let unknown = m.is_empty();
                (m, unknown)
            }
            Query::RelayId(id) => {
                let m: Vec<_> = db
                    .iter_leases()
                    .filter(|(_, l)| agent_options_match(&l.agent_options, RelayCode::AgentCircuitId, id))
                    .map(|(h, _)| h)
                    .collect();
                let unknown = m.is_empty();
                (m, unknown)
            }
        };

        if unknown {
            debug!("LEASEQUERY found no matching lease");
            ctx.update_resp_msg(MessageType::LeaseUnknown).context("failed to set msg type")?;
            return Ok(Action::Respond);
        }

        // prefer an active binding among the matches; fall back to the
        // first (most recently touched, per `by_uid`/`by_hw` chain order)
        let primary = matches
            .iter()
            .copied()
            .find(|h| db.lease(*h).map(|l| matches!(status_of(l, now), Status::Active)).unwrap_or(false))
            .or_else(|| matches.first().copied())
            .context("LEASEQUERY match list was non-empty but yielded no lease")?;
        let lease = db.lease(primary).context("queried lease vanished mid-handle")?;

        let status = status_of(lease, now);
        let msg_type = match status {
            Status::Active => MessageType::LeaseActive,
            Status::Unassigned => MessageType::LeaseUnassigned,
        };
        ctx.update_resp_msg(msg_type).context("failed to set msg type")?;

        let ip = lease.ip;
        let hw = lease.hw_addr.clone();
        let associated: Vec<Ipv4Addr> = matches
            .iter()
            .filter(|h| **h != primary)
            .filter_map(|h| db.lease(*h).map(|l| l.ip))
            .take(MAX_ASSOCIATED_IPS)
            .collect();
        let cltt_secs = now.duration_since(lease.cltt).unwrap_or_default().as_secs();
        let remaining = lease.ends.duration_since(now).unwrap_or_default();
        drop(db);

        let resp = ctx.resp_msg_mut().context("response message must be set before leasequery is run")?;
        resp.set_ciaddr(ip);
        if !hw.is_empty() {
            resp.set_chaddr(&hw);
        }
        if matches!(status, Status::Active) {
            resp.opts_mut().insert(DhcpOption::AddressLeaseTime(remaining.as_secs() as u32));
            resp.opts_mut().insert(DhcpOption::Renewal(renew(remaining).as_secs() as u32));
            resp.opts_mut().insert(DhcpOption::Rebinding(rebind(remaining).as_secs() as u32));
            resp.opts_mut().insert(DhcpOption::ClientLastTransactionTime(cltt_secs as u32));
            if !associated.is_empty() {
                resp.opts_mut().insert(DhcpOption::AssociatedIp(associated));
            }
        }

        debug!(?ip, ?msg_type, "answered LEASEQUERY");
        Ok(Action::Respond)
    }
}

#[cfg(test)]
mod tests {
    use dhcpd_core::dhcproto::v4;
    use leasedb::LeaseDb;
    use message_type::util::blank_ctx;
    use tracing_test::traced_test;

    use super::*;

    fn fixture_with_lease() -> (Arc<Mutex<LeaseDb>>, Ipv4Addr) {
        let mut db = LeaseDb::new();
        let pool = db.alloc_pool(leasedb::GroupId(0), leasedb::SharedNetworkId(0));
        let ip = Ipv4Addr::new(192, 168, 0, 10);
        db.populate_range(pool, ip, ip);
        let handle = db.by_ip(ip).unwrap();
        let now = SystemTime::now();
        let update = leasedb::LeaseUpdate {
            starts: now,
            ends: now + std::time::Duration::from_secs(3600),
            cltt: now,
            tstp: None,
            hw_addr: vec![0x52, 0x54, 0x00, 0x12, 0x34, 0x56],
            uid: vec![1, 2, 3],
            billing_class: None,
            binding_state: leasedb::BindingState::Active,
            flags: leasedb::LeaseFlags::default(),
            on_expiry: Vec::new(),
            on_commit: Vec::new(),
            on_release: Vec::new(),
            agent_options: None,
        };
        db.supersede_lease(handle, &update, true, now, |_| {}).unwrap();
        (Arc::new(Mutex::new(db)), ip)
    }

    #[tokio::test]
    #[traced_test]
    async fn query_by_ip_returns_active() -> Result<()> {
        let (db, ip) = fixture_with_lease();
        let plugin = LeaseQuery::new(db);
        let mut ctx = blank_ctx("192.168.0.1:67".parse()?, "192.168.0.1".parse()?, "192.168.0.1".parse()?, v4::MessageType::LeaseQuery)?;
        ctx.msg_mut().set_ciaddr(ip);

        let action = plugin.handle(&mut ctx).await?;
        assert!(matches!(action, Action::Respond));
        let resp = ctx.resp_msg().unwrap();
        assert_eq!(resp.opts().msg_type(), Some(v4::MessageType::LeaseActive));
        assert_eq!(resp.ciaddr(), ip);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn query_for_unmanaged_ip_is_unknown() -> Result<()> {
        let (db, _ip) = fixture_with_lease();
        let plugin = LeaseQuery::new(db);
        let mut ctx = blank_ctx("192.168.0.1:67".parse()?, "192.168.0.1".parse()?, "192.168.0.1".parse()?, v4::MessageType::LeaseQuery)?;
        ctx.msg_mut().set_ciaddr(Ipv4Addr::new(10, 0, 0, 1));

        let action = plugin.handle(&mut ctx).await?;
        assert!(matches!(action, Action::Respond));
        let resp = ctx.resp_msg().unwrap();
        assert_eq!(resp.opts().msg_type(), Some(v4::MessageType::LeaseUnknown));
        Ok(())
    }
}
