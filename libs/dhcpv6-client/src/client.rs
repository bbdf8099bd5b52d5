//! The DHCPv6 client state machine: `Init -> Selecting -> Requesting ->
//! Bound -> {Renewing, Rebinding}`. The only place in the original source
//! that would naturally use a coroutine is this retransmission loop; here
//! it's a state enum plus a [`RetransmitTimer`] rather than stack-switching.

use std::net::Ipv6Addr;
use std::time::Duration;

use dhcproto::v6;
use rand::Rng;
use tracing::debug;

use crate::retransmit::{RetransmitParams, RetransmitTimer};

/// RFC 3315 §5.5 SOLICIT timing: unbounded retransmission (`mrc`/`mrd` both
/// zero) until an ADVERTISE is accepted.
pub const SOL_TIMEOUT: Duration = Duration::from_secs(1);
pub const SOL_MAX_RT: Duration = Duration::from_secs(3600);
/// RFC 3315 §5.5 REQUEST timing.
pub const REQ_TIMEOUT: Duration = Duration::from_secs(1);
pub const REQ_MAX_RT: Duration = Duration::from_secs(30);
pub const REQ_MAX_RC: u32 = 10;
/// RFC 3315 §5.5 RENEW timing; `mrd` is the caller-supplied time remaining
/// until T2.
pub const REN_TIMEOUT: Duration = Duration::from_secs(10);
pub const REN_MAX_RT: Duration = Duration::from_secs(600);
/// RFC 3315 §5.5 REBIND timing; `mrd` is the caller-supplied time remaining
/// until the lease's valid lifetime expires.
pub const REB_TIMEOUT: Duration = Duration::from_secs(10);
pub const REB_MAX_RT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Init,
    Selecting,
    Requesting,
    Bound,
    Renewing,
    Rebinding,
}

/// What the dispatcher should do after a retransmission timer fires.
#[derive(Debug)]
pub enum RetransmitOutcome {
    /// Retransmit `message` and wait `wait` before firing again.
    Again { message: v6::Message, wait: Duration },
    /// The schedule is exhausted. `restart_at_init` is set for `Selecting`
    /// and `Requesting`: RFC 3315 §17.1.3 requires the client to return to
    /// `Init` and restart the whole exchange rather than give up silently,
    /// which is the behavior the original `do_select6` fails to implement
    /// (it sets `client->MRC` but never acts on reaching it mid-SELECT).
    /// `Renewing`/`Rebinding` exhaustion is a defined phase transition the
    /// caller drives instead (`start_rebind`, then lease expiry), so
    /// `restart_at_init` is `false` there.
    Exhausted { restart_at_init: bool },
}

fn fresh_xid() -> [u8; 3] {
    let v: u32 = rand::thread_rng().gen();
    [(v >> 16) as u8, (v >> 8) as u8, v as u8]
}

/// Drives one client's SOLICIT/REQUEST/RENEW/REBIND exchanges. Holds just
/// enough state to rebuild the in-flight message on each retransmit and to
/// decide the next phase once a reply (or timeout) arrives.
pub struct Client {
    state: ClientState,
    duid: Vec<u8>,
    iaid: u32,
    xid: [u8; 3],
    timer: RetransmitTimer,
    server_id: Option<Vec<u8>>,
    address: Option<Ipv6Addr>,
}

impl Client {
    pub fn new(duid: Vec<u8>, iaid: u32) -> Self {
        Client {
            state: ClientState::Init,
            duid,
            iaid,
            xid: [0; 3],
            timer: RetransmitTimer::start(RetransmitParams {
                irt: Duration::ZERO,
                mrc: 1,
                mrt: Duration::ZERO,
                mrd: Duration::ZERO,
            }),
            server_id: None,
            address: None,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn bound_address(&self) -> Option<Ipv6Addr> {
        self.address
    }

    /// `Init -> Selecting`: broadcasts a SOLICIT with no server preference.
    pub fn start_solicit(&mut self) -> (v6::Message, Duration) {
        self.state = ClientState::Selecting;
        self.xid = fresh_xid();
        debug!(xid = ?self.xid, "soliciting");
        self.timer = RetransmitTimer::start(RetransmitParams {
            irt: SOL_TIMEOUT,
            mrc: 0,
            mrt: SOL_MAX_RT,
            mrd: Duration::ZERO,
        });
        let msg = self.build_solicit();
        (msg, self.timer.current())
    }

    /// `Selecting -> Requesting`: a usable ADVERTISE arrived; request the
    /// offered address from the advertising server.
    pub fn select_advertise(&mut self, server_id: Vec<u8>, offered: Ipv6Addr) -> (v6::Message, Duration) {
        debug!(%offered, "accepted advertise, requesting");
        self.state = ClientState::Requesting;
        self.server_id = Some(server_id);
        self.address = Some(offered);
        self.timer = RetransmitTimer::start(RetransmitParams {
            irt: REQ_TIMEOUT,
            mrc: REQ_MAX_RC,
            mrt: REQ_MAX_RT,
            mrd: Duration::ZERO,
        });
        let msg = self.build_request();
        (msg, self.timer.current())
    }

    /// `Requesting -> Bound`: the server ACKed the REQUEST with a REPLY.
    pub fn request_reply(&mut self) -> ClientState {
        self.state = ClientState::Bound;
        debug!(address = ?self.address, "bound");
        self.state
    }

    /// `Bound -> Renewing`, unicast to the bound server. `mrd` is the time
    /// remaining until T2 (rebind deadline).
    pub fn start_renew(&mut self, mrd: Duration) -> (v6::Message, Duration) {
        debug!(?mrd, "renewing");
        self.state = ClientState::Renewing;
        self.xid = fresh_xid();
        self.timer = RetransmitTimer::start(RetransmitParams {
            irt: REN_TIMEOUT,
            mrc: 0,
            mrt: REN_MAX_RT,
            mrd,
        });
        let msg = self.build_renew();
        (msg, self.timer.current())
    }

    /// `Renewing -> Rebinding` (T2 passed with no renewal reply), broadcast.
    /// `mrd` is the time remaining until the lease's valid lifetime expires.
    pub fn start_rebind(&mut self, mrd: Duration) -> (v6::Message, Duration) {
        debug!(?mrd, "rebinding");
        self.state = ClientState::Rebinding;
        self.xid = fresh_xid();
        self.server_id = None;
        self.timer = RetransmitTimer::start(RetransmitParams {
            irt: REB_TIMEOUT,
            mrc: 0,
            mrt: REB_MAX_RT,
            mrd,
        });
        let msg = self.build_rebind();
        (msg, self.timer.current())
    }

    /// `Renewing`/`Rebinding` -> `Bound` on a matching REPLY.
    pub fn renew_or_rebind_reply(&mut self) -> ClientState {
        self.state = ClientState::Bound;
        self.state
    }

    /// Advances the in-flight retransmission schedule, rebuilding the
    /// message for the current state with the same transaction id.
    pub fn on_retransmit_timeout(&mut self) -> RetransmitOutcome {
        match self.timer.record_transmission() {
            Some(wait) => RetransmitOutcome::Again {
                message: self.rebuild_current(),
                wait,
            },
            None => {
                let restart_at_init = matches!(self.state, ClientState::Selecting | ClientState::Requesting);
                debug!(state = ?self.state, restart_at_init, "retransmission schedule exhausted");
                RetransmitOutcome::Exhausted { restart_at_init }
            }
        }
    }

    fn rebuild_current(&self) -> v6::Message {
        match self.state {
            ClientState::Selecting => self.build_solicit(),
            ClientState::Requesting => self.build_request(),
            ClientState::Renewing => self.build_renew(),
            ClientState::Rebinding => self.build_rebind(),
            ClientState::Init | ClientState::Bound => self.build_solicit(),
        }
    }

    fn build_solicit(&self) -> v6::Message {
        let mut msg = v6::Message::new_with_id(v6::MessageType::Solicit, self.xid);
        msg.opts_mut().insert(v6::DhcpOption::ClientId(self.duid.clone()));
        msg.opts_mut().insert(v6::DhcpOption::IANA(v6::IANA {
            id: self.iaid,
            t1: 0,
            t2: 0,
            opts: v6::DhcpOptions::new(),
        }));
        msg
    }

    fn build_request(&self) -> v6::Message {
        let mut msg = v6::Message::new_with_id(v6::MessageType::Request, self.xid);
        self.insert_client_and_server_id(&mut msg);
        msg.opts_mut().insert(v6::DhcpOption::IANA(self.ia_na_with_address()));
        msg
    }

    fn build_renew(&self) -> v6::Message {
        let mut msg = v6::Message::new_with_id(v6::MessageType::Renew, self.xid);
        self.insert_client_and_server_id(&mut msg);
        msg.opts_mut().insert(v6::DhcpOption::IANA(self.ia_na_with_address()));
        msg
    }

    fn build_rebind(&self) -> v6::Message {
        let mut msg = v6::Message::new_with_id(v6::MessageType::Rebind, self.xid);
        msg.opts_mut().insert(v6::DhcpOption::ClientId(self.duid.clone()));
        msg.opts_mut().insert(v6::DhcpOption::IANA(self.ia_na_with_address()));
        msg
    }

    fn insert_client_and_server_id(&self, msg: &mut v6::Message) {
        msg.opts_mut().insert(v6::DhcpOption::ClientId(self.duid.clone()));
        if let Some(server_id) = &self.server_id {
            msg.opts_mut().insert(v6::DhcpOption::ServerId(server_id.clone()));
        }
    }

    fn ia_na_with_address(&self) -> v6::IANA {
        let mut iana = v6::IANA {
            id: self.iaid,
            t1: 0,
            t2: 0,
            opts: v6::DhcpOptions::new(),
        };
        if let Some(addr) = self.address {
            iana.opts.insert(v6::DhcpOption::IAAddr(v6::IAAddr {
                addr,
                preferred_life: 0,
                valid_life: 0,
                opts: v6::DhcpOptions::new(),
            }));
        }
        iana
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Client {
        Client::new(crate::duid::duid_ll(&[0x52, 0x54, 0x00, 0x12, 0x34, 0x56]), 1)
    }

    #[test]
    fn solicit_broadcasts_with_no_server_id() {
        let mut c = client();
        let (msg, wait) = c.start_solicit();
        assert_eq!(msg.msg_type(), v6::MessageType::Solicit);
        assert!(msg.opts().get(v6::OptionCode::ServerId).is_none());
        assert!(wait > Duration::ZERO);
        assert_eq!(c.state(), ClientState::Selecting);
    }

    #[test]
    fn exhausting_selecting_requests_restart_at_init() {
        let mut c = client();
        c.start_solicit();
        // SOL has mrc=0 (unlimited) and mrt=3600s with no mrd, so it never
        // exhausts on its own; simulate exhaustion directly via a tight
        // schedule to exercise the restart flag.
        c.timer = RetransmitTimer::start(RetransmitParams {
            irt: Duration::from_millis(1),
            mrc: 1,
            mrt: Duration::ZERO,
            mrd: Duration::ZERO,
        });
        match c.on_retransmit_timeout() {
            RetransmitOutcome::Exhausted { restart_at_init } => assert!(restart_at_init),
            RetransmitOutcome::Again { .. } => panic!("expected exhaustion"),
        }
    }

    #[test]
    fn full_happy_path_reaches_bound() {
        let mut c = client();
        c.start_solicit();
        let offered: Ipv6Addr = "2001:db8::10".parse().unwrap();
        let (req, _) = c.select_advertise(vec![1, 2, 3], offered);
        assert_eq!(req.msg_type(), v6::MessageType::Request);
        assert_eq!(c.request_reply(), ClientState::Bound);
        assert_eq!(c.bound_address(), Some(offered));
    }

    #[test]
    fn rebind_drops_the_bound_server_id() {
        let mut c = client();
        c.start_solicit();
        let offered: Ipv6Addr = "2001:db8::10".parse().unwrap();
        c.select_advertise(vec![9, 9, 9], offered);
        c.request_reply();
        c.start_renew(Duration::from_secs(30));
        let (rebind_msg, _) = c.start_rebind(Duration::from_secs(60));
        assert_eq!(rebind_msg.msg_type(), v6::MessageType::Rebind);
        assert!(rebind_msg.opts().get(v6::OptionCode::ServerId).is_none());
    }
}
