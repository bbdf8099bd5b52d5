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

use std::fmt::Debug;
use std::sync::Arc;

use confparse::{BootpPolicy, GroupTree, resolve_authoritative, resolve_bootp_policy};
use dhcpd_core::{
    dhcproto::v4::{DhcpOption, Message, MessageType, Opcode, OptionCode},
    prelude::*,
};
use expr::universe::DhcpUniverse;
use expr::{Data, EvalCtx, OptionState, Universe, UniverseRegistry};
use parking_lot::RwLock;
use register_derive::Register;

/// classes that should cause a packet to be silently dropped once matched.
const DROP_CLASS: &str = "drop";

#[derive(Register)]
#[register(msg(Message))]
#[register(plugin())]
pub struct MsgType {
    tree: Arc<RwLock<GroupTree>>,
    universes: Arc<UniverseRegistry>,
    interfaces: Vec<NetworkInterface>,
}

impl Debug for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsgType").finish()
    }
}

impl MsgType {
    pub fn new(tree: Arc<RwLock<GroupTree>>, universes: Arc<UniverseRegistry>) -> Result<Self> {
        let interfaces = confparse::iface::v4_find_interfaces(None)?;
        Ok(Self {
            tree,
            universes,
            interfaces,
        })
    }
}

#[async_trait]
impl Plugin<Message> for MsgType {
    #[instrument(level = "debug", skip_all)]
    async fn handle(&self, ctx: &mut MsgContext<Message>) -> Result<Action> {
        // set the interface, using data discovered from the OS at startup
        // MsgType plugin must run first because future plugins use this data
        let meta = ctx.meta();
        let interface = confparse::iface::find_network(&self.interfaces, meta.ifindex)
            .context("interface message was received on does not exist?")?;
        ctx.set_interface(interface);

        let req = ctx.msg();
        let msg_type = req.opts().msg_type();

        let subnet_addr = ctx.subnet()?;
        debug!(
            opcode = ?req.opcode(),
            msg_type = ?msg_type,
            src_addr = %ctx.src_addr(),
            subnet = ?subnet_addr,
            req = %ctx.msg(),
        );

        let chaddr = req.chaddr().to_vec();
        let client_id = req.opts().get(OptionCode::ClientIdentifier).and_then(|opt| match opt {
            DhcpOption::ClientIdentifier(id) => Some(id.clone()),
            _ => None,
        });

        let subnet = self.tree.read().find_subnet(subnet_addr);
        let group = subnet.and_then(|h| self.tree.read().subnets.get(h).map(|s| s.group));

        // server identifier: the scope's configured interface address, same
        // address this request arrived on -- the server speaks for whatever
        // interface the client reached it through.
        let server_id = interface.ip();

        let network = subnet.and_then(|h| {
            let tree = self.tree.read();
            let shared = tree.subnets.get(h)?.shared_network;
            tree.shared_networks.get(shared).cloned()
        });

        let mut resp = util::new_msg(req, server_id, None, None);

        // if there is a server identifier it must match ours
        if matches!(req.opts().get(OptionCode::ServerIdentifier), Some(DhcpOption::ServerIdentifier(id)) if *id != server_id && !id.is_unspecified())
        {
            debug!(?server_id, "server identifier in msg doesn't match");
            return Ok(Action::NoResponse);
        }
        if req.opcode() == Opcode::BootReply {
            debug!("BootReply not supported");
            return Ok(Action::NoResponse);
        }
        resp.opts_mut().insert(DhcpOption::ServerIdentifier(server_id));

        let matched = util::client_classes(&self.tree, &self.universes, req, &chaddr, client_id.as_deref())?;

        let authoritative = group.map(|g| resolve_authoritative(&self.tree.read().groups, g)).unwrap_or(false);
        let bootp_enabled = group
            .and_then(|g| resolve_bootp_policy(&self.tree.read().groups, g))
            .map(|p| matches!(p, BootpPolicy::Accept | BootpPolicy::Prefer))
            .unwrap_or(false);

        let rapid_commit = ctx.msg().opts().get(OptionCode::RapidCommit).is_some();

        match msg_type {
            Some(MessageType::Discover) if rapid_commit => {
                resp.opts_mut().insert(DhcpOption::MessageType(MessageType::Ack));
            }
            Some(MessageType::Discover) => {
                resp.opts_mut().insert(DhcpOption::MessageType(MessageType::Offer));
            }
            Some(MessageType::Request) => {
                if req.giaddr().is_unspecified() {
                    resp.set_flags(req.flags().set_broadcast());
                }
                resp.opts_mut().insert(DhcpOption::MessageType(MessageType::Ack));
            }
            Some(MessageType::Release) => {
                resp.opts_mut().insert(DhcpOption::MessageType(MessageType::Ack));
            }
            // got INFORM & we are authoritative, give a response -- the
            // option set itself is filled in by later plugins once
            // `ctx.set_resp_msg` has been called.
            Some(MessageType::Inform) if authoritative => {
                resp.opts_mut().insert(DhcpOption::MessageType(MessageType::Ack));
            }
            Some(MessageType::Decline) => {
                if let Some(DhcpOption::RequestedIpAddress(ip)) = req.opts().get(OptionCode::RequestedIpAddress) {
                    debug!(declined_ip = ?ip, "got DECLINE");
                    return Ok(Action::Continue);
                } else {
                    error!("got DECLINE with no option 50 (requested IP)");
                    return Ok(Action::NoResponse);
                }
            }
            None if req.opcode() == Opcode::BootRequest && bootp_enabled => {
                ctx.set_resp_msg(resp);
                return Ok(Action::Continue);
            }
            // message type itself (LEASEACTIVE/LEASEUNASSIGNED/LEASEUNKNOWN)
            // is decided by the leasequery plugin once it has looked up the
            // queried lease -- just hand it an addressed skeleton to fill in.
            Some(MessageType::LeaseQuery) => {
                ctx.set_resp_msg(resp);
                return Ok(Action::Continue);
            }
            _ => {
                debug!("unsupported message type");
                return Ok(Action::NoResponse);
            }
        }

        if let Some(classes) = matched {
            if classes.iter().any(|class| class == DROP_CLASS) {
                debug!("DROP class matched");
                return Ok(Action::NoResponse);
            }
            ctx.set_local(MatchedClasses(classes));
        }
        ctx.set_resp_msg(resp);
        Ok(Action::Continue)
    }
}

pub mod util {
    use dhcpd_core::dhcproto::v4;

    use super::*;

    pub fn new_msg(req: &Message, siaddr: Ipv4Addr, sname: Option<&str>, fname: Option<&str>) -> Message {
        let mut msg = Message::new_with_id(
            req.xid(),
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            siaddr,
            req.giaddr(),
            req.chaddr(),
        );
        msg.set_opcode(Opcode::BootReply)
            .set_htype(req.htype())
            .set_flags(req.flags())
            .set_hops(req.hops());
        if let Some(sname) = sname {
            msg.set_sname_str(sname);
        }
        if let Some(fname) = fname {
            msg.set_fname_str(fname);
        }
        msg
    }

    /// Walks every declared class, evaluating its `match` expression (and
    /// `spawn with` expression for parameterized classes) against the
    /// packet. Mirrors `leasedb`'s billing model: a class at its lease
    /// limit is excluded from the matched set.
    pub fn client_classes(
        tree: &RwLock<GroupTree>,
        universes: &UniverseRegistry,
        req: &Message,
        chaddr: &[u8],
        client_id: Option<&[u8]>,
    ) -> Result<Option<Vec<String>>> {
        let opts_bytes = req.opts().to_vec().unwrap_or_default();
        let in_options = DhcpUniverse
            .dereference(&Data::new(opts_bytes))
            .unwrap_or_else(|_| OptionState::new());
        let cfg_options = OptionState::new();
        let mut eval = EvalCtx::new(
            Some(req),
            &[],
            in_options,
            &cfg_options,
            universes,
            Data::new(chaddr.to_vec()),
        );

        let mut tree = tree.write();
        eval.known = tree.hosts.iter().any(|(_, h)| {
            !h.is_tombstone()
                && (h.interface.as_deref() == Some(chaddr)
                    || matches!((&h.client_identifier, client_id), (Some(hid), Some(cid)) if hid.as_slice() == cid))
        });

        let handles: Vec<_> = tree.classes.iter().map(|(h, _)| h).collect();
        let mut matched = Vec::new();
        for handle in handles {
            let Some(class) = tree.classes.get(handle) else { continue };
            let Some(match_expr) = class.match_expr.clone() else { continue };
            let spawn_with = class.spawn_with.clone();
            let name = class.name.clone();

            let is_match = eval.eval_bool(&match_expr).map(|b| b.value).unwrap_or(false);
            if !is_match {
                continue;
            }

            if let Some(spawn_expr) = spawn_with {
                let Ok(Some(value)) = spawn_expr.evaluate(&mut eval) else {
                    continue;
                };
                let Some(key) = value.into_data() else { continue };
                let existing = tree
                    .classes
                    .get(handle)
                    .and_then(|c| c.subclasses.get(&key.bytes).copied());
                let sub_handle = match existing {
                    Some(h) => h,
                    None => {
                        let parent_group = tree.classes.get(handle).context("class vanished mid-eval")?.group;
                        let sub = confparse::Class {
                            name: format!("{name}:{key}"),
                            match_expr: None,
                            spawn_with: None,
                            lease_limit: None,
                            billed_leases: Vec::new(),
                            group: parent_group,
                            subclasses: Default::default(),
                        };
                        let sub_handle = tree.classes.alloc(sub);
                        if let Some(parent) = tree.classes.get_mut(handle) {
                            parent.subclasses.insert(key.bytes.clone(), sub_handle);
                        }
                        sub_handle
                    }
                };
                if let Some(sub) = tree.classes.get(sub_handle) {
                    if !sub.at_limit() {
                        matched.push(sub.name.clone());
                    }
                }
                continue;
            }

            if !class.at_limit() {
                matched.push(name);
            }
        }
        debug!(matched_classes = ?matched, "matched classes");
        Ok(if matched.is_empty() { None } else { Some(matched) })
    }

    use std::net::{Ipv4Addr, SocketAddr};

    use anyhow::Result;
    use dhcpd_core::dhcproto::Encodable;
    use dhcpd_core::server::msg::SerialMsg;
    use unix_udp_sock::RecvMeta;

    /// for testing
    pub fn blank_ctx(
        recv_addr: SocketAddr,
        siaddr: Ipv4Addr,
        giaddr: Ipv4Addr,
        msg_type: v4::MessageType,
    ) -> Result<MsgContext<v4::Message>> {
        let uns = Ipv4Addr::UNSPECIFIED;
        let mut msg = v4::Message::new(uns, uns, siaddr, giaddr, &[1, 2, 3, 4, 5, 6]);
        msg.opts_mut().insert(v4::DhcpOption::MessageType(msg_type));
        msg.opts_mut().insert(v4::DhcpOption::SubnetSelection(giaddr));
        msg.opts_mut().insert(v4::DhcpOption::ParameterRequestList(vec![
            v4::OptionCode::SubnetMask,
            v4::OptionCode::Router,
            v4::OptionCode::DomainNameServer,
            v4::OptionCode::DomainName,
        ]));
        let buf = msg.to_vec().unwrap();
        let meta = RecvMeta {
            addr: recv_addr,
            len: buf.len(),
            ifindex: 1,
            dst_ip: Some(recv_addr.ip()),
            ..RecvMeta::default()
        };
        let resp = crate::util::new_msg(&msg, siaddr, None, None);
        let mut ctx: MsgContext<v4::Message> =
            MsgContext::new(SerialMsg::new(buf.into(), recv_addr), meta, Arc::new(State::new(10)))?;
        ctx.set_resp_msg(resp);
        Ok(ctx)
    }
}

/// a list of matching client classes for this message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedClasses(pub Vec<String>);

#[cfg(test)]
mod tests {
    use dhcpd_core::dhcproto::v4;
    use tracing_test::traced_test;

    use super::*;

    fn empty_tree() -> Arc<RwLock<GroupTree>> {
        let mut tree = GroupTree::new();
        tree.alloc_group(confparse::Group::root());
        Arc::new(RwLock::new(tree))
    }

    #[tokio::test]
    #[traced_test]
    async fn test_request() -> Result<()> {
        let plugin = MsgType::new(empty_tree(), Arc::new(UniverseRegistry::new()))?;
        let mut ctx = util::blank_ctx(
            "192.168.0.1:67".parse()?,
            "192.168.0.1".parse()?,
            "192.168.0.1".parse()?,
            v4::MessageType::Request,
        )?;
        let result = plugin.handle(&mut ctx).await;
        // no interface bound to ifindex 1 in the test environment --
        // exercised for the "no matching interface" drop path.
        assert!(result.is_ok());
        Ok(())
    }
}
