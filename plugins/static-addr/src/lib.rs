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

use std::net::Ipv4Addr;
use std::sync::Arc;

use confparse::{GroupTree, resolve_default_lease_time, resolve_max_lease_time};
use dhcpd_core::{
    dhcproto::v4::{Message, MessageType},
    prelude::*,
};
use expr::Expr;
use parking_lot::RwLock;
use register_derive::Register;

use message_type::MsgType;

#[derive(Debug, Register)]
#[register(msg(Message))]
#[register(plugin(MsgType))]
pub struct StaticAddr {
    tree: Arc<RwLock<GroupTree>>,
}

impl StaticAddr {
    pub fn new(tree: Arc<RwLock<GroupTree>>) -> Result<Self> {
        Ok(Self { tree })
    }

    /// Looks for a `host` declaration matching `chaddr`'s hardware address
    /// or `client_identifier`'s bytes, and returns its first fixed address
    /// along with the lease-time bounds its group chain resolves to.
    fn find_reservation(&self, chaddr: &[u8], client_identifier: Option<&[u8]>) -> Option<(Ipv4Addr, u32, u32)> {
        let tree = self.tree.read();
        for (_, host) in tree.hosts.iter() {
            if host.is_tombstone() {
                continue;
            }
            let hw_match = !chaddr.is_empty() && host.interface.as_deref() == Some(chaddr);
            let id_match = match (&host.client_identifier, client_identifier) {
                (Some(hid), Some(cid)) => hid.as_slice() == cid,
                _ => false,
            };
            if !hw_match && !id_match {
                continue;
            }
            let Some(expr) = &host.fixed_addr else {
                continue;
            };
            let Some(ip) = first_const_ipv4(expr) else {
                continue;
            };
            let default = resolve_default_lease_time(&tree.groups, host.group).unwrap_or(43200);
            let max = resolve_max_lease_time(&tree.groups, host.group).unwrap_or(86400);
            return Some((ip, default, max));
        }
        None
    }
}

/// `fixed-address` is almost always a literal dotted-quad (or a
/// comma-separated list of them, folded into `Concat` by the parser); this
/// walks that constant shape without needing a full evaluation context.
fn first_const_ipv4(expr: &Expr) -> Option<Ipv4Addr> {
    match expr {
        Expr::ConstData(d) if d.bytes.len() == 4 => {
            Some(Ipv4Addr::new(d.bytes[0], d.bytes[1], d.bytes[2], d.bytes[3]))
        }
        Expr::Concat(lhs, rhs) => first_const_ipv4(lhs).or_else(|| first_const_ipv4(rhs)),
        _ => None,
    }
}

#[async_trait]
impl Plugin<Message> for StaticAddr {
    #[instrument(level = "debug", skip_all)]
    async fn handle(&self, ctx: &mut MsgContext<Message>) -> Result<Action> {
        let req = ctx.msg();
        let chaddr = req.chaddr().to_vec();
        let client_id = req
            .opts()
            .get(dhcpd_core::dhcproto::v4::OptionCode::ClientIdentifier)
            .and_then(|opt| match opt {
                dhcpd_core::dhcproto::v4::DhcpOption::ClientIdentifier(id) => Some(id.clone()),
                _ => None,
            });

        let Some((static_ip, default, max)) = self.find_reservation(&chaddr, client_id.as_deref()) else {
            return Ok(Action::Continue);
        };

        match req.opts().msg_type().context("no message type found")? {
            MessageType::Discover => self.discover(ctx, &chaddr, static_ip, default, max)?,
            MessageType::Request => self.request(ctx, &chaddr, static_ip, default, max)?,
            // we have a reservation, but we didn't get a DISCOVER or REQUEST
            // drop the message
            _ => return Ok(Action::NoResponse),
        };
        Ok(Action::Continue)
    }
}

impl StaticAddr {
    #[inline]
    fn discover(
        &self,
        ctx: &mut MsgContext<Message>,
        chaddr: &[u8],
        static_ip: Ipv4Addr,
        default: u32,
        max: u32,
    ) -> Result<Action> {
        let (lease, t1, t2) = confparse::determine_lease(default, max, ctx.requested_lease_time());
        debug!(?static_ip, ?chaddr, "use static requested ip");
        ctx.resp_msg_mut()
            .context("response message must be set before leases is run")?
            .set_yiaddr(static_ip);
        ctx.populate_opts_lease(&dhcpd_core::dhcproto::v4::DhcpOptions::new(), lease, t1, t2);
        Ok(Action::Continue)
    }

    #[inline]
    fn request(
        &self,
        ctx: &mut MsgContext<Message>,
        chaddr: &[u8],
        static_ip: Ipv4Addr,
        default: u32,
        max: u32,
    ) -> Result<Action> {
        // requested ip comes from opts or ciaddr
        let ip = if let Some(ip) = ctx.requested_ip() {
            ip
        } else {
            ctx.update_resp_msg(MessageType::Nak)
                .context("failed to set msg type")?;
            return Ok(Action::Respond);
        };

        if ip != static_ip {
            debug!(
                ?chaddr,
                ?ip,
                ?static_ip,
                "configured static ip does not match"
            );
            ctx.update_resp_msg(MessageType::Nak)
                .context("failed to set msg type")?;
            return Ok(Action::Respond);
        }

        let (lease, t1, t2) = confparse::determine_lease(default, max, ctx.requested_lease_time());
        ctx.resp_msg_mut()
            .context("response message must be set before static plugin is run")?
            .set_yiaddr(ip);
        ctx.populate_opts_lease(&dhcpd_core::dhcproto::v4::DhcpOptions::new(), lease, t1, t2);
        trace!(?ip, "populating response with static ip");

        Ok(Action::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confparse::{Group, GroupTree, HostDecl, HostFlags};
    use expr::Data;

    fn host_tree(mac: &[u8], ip: [u8; 4]) -> Arc<RwLock<GroupTree>> {
        let mut tree = GroupTree::new();
        let (_, root) = tree.alloc_group(Group::root());
        let group = tree.groups.alloc(Group::child_of(root));
        tree.hosts.alloc(HostDecl {
            name: "printer".into(),
            interface: Some(mac.to_vec()),
            client_identifier: None,
            fixed_addr: Some(Expr::ConstData(Data::new(ip.to_vec()))),
            group,
            flags: HostFlags::new(HostFlags::STATIC),
            n_hw: None,
            n_uid: None,
            n_name: None,
        });
        Arc::new(RwLock::new(tree))
    }

    #[test]
    fn finds_reservation_by_hardware_address() {
        let mac = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];
        let tree = host_tree(&mac, [10, 0, 0, 9]);
        let plugin = StaticAddr::new(tree).unwrap();
        let (ip, ..) = plugin.find_reservation(&mac, None).unwrap();
        assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 9));
    }

    #[test]
    fn no_reservation_for_unknown_mac() {
        let mac = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];
        let tree = host_tree(&mac, [10, 0, 0, 9]);
        let plugin = StaticAddr::new(tree).unwrap();
        assert!(
            plugin
                .find_reservation(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff], None)
                .is_none()
        );
    }
}
