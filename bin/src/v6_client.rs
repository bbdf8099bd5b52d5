//! Drives a single [`dhcpv6_client::Client`] over a UDP socket: the
//! SOLICIT/ADVERTISE/REQUEST/REPLY exchange, then scheduled RENEW/REBIND.
//! This is the dispatcher the state machine in `dhcpv6-client` itself
//! describes but does not own.

use std::net::{Ipv6Addr, SocketAddr};
use std::time::Duration;

use dhcpd_core::config::cli::ALL_DHCP_RELAY_AGENTS_AND_SERVERS;
use dhcpd_core::dhcproto::{
    Decodable, Encodable,
    v6::{self, OptionCode},
};
use dhcpd_core::tokio::{self, net::UdpSocket};
use dhcpd_core::tracing::{debug, info, warn};
use dhcpv6_client::{Client, ClientState, RetransmitOutcome, duid_ll};
use tokio_util::sync::CancellationToken;

/// Fallback renewal delay used when a REPLY's IA_NA carries no usable T1.
const DEFAULT_T1: Duration = Duration::from_secs(1800);
const DEFAULT_T2: Duration = Duration::from_secs(2880);

pub async fn run(bind_addr: SocketAddr, mac: Vec<u8>, shutdown: CancellationToken) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(bind_addr).await?;
    let dest: SocketAddr = SocketAddr::new(ALL_DHCP_RELAY_AGENTS_AND_SERVERS.into(), v6::SERVER_PORT);

    let mut client = Client::new(duid_ll(&mac), 1);
    let (msg, mut wait) = client.start_solicit();
    send(&socket, &msg, dest).await?;

    let mut buf = vec![0u8; 1500];
    let mut t1 = DEFAULT_T1;
    let mut t2 = DEFAULT_T2;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("dhcpv6 client task stopping");
                return Ok(());
            }
            _ = tokio::time::sleep(wait) => {
                wait = on_timeout(&mut client, &socket, dest, t1, t2).await?;
            }
            recv = socket.recv_from(&mut buf) => {
                let (n, from) = recv?;
                match v6::Message::from_bytes(&buf[..n]) {
                    Ok(reply) => {
                        if let Some(next) = on_reply(&mut client, &socket, dest, &reply, &mut t1, &mut t2).await? {
                            wait = next;
                        }
                    }
                    Err(err) => warn!(?err, ?from, "dropping unparseable dhcpv6 reply"),
                }
            }
        }
    }
}

async fn send(socket: &UdpSocket, msg: &v6::Message, dest: SocketAddr) -> anyhow::Result<()> {
    let bytes = msg.to_vec()?;
    socket.send_to(&bytes, dest).await?;
    Ok(())
}

async fn on_timeout(
    client: &mut Client,
    socket: &UdpSocket,
    dest: SocketAddr,
    t1: Duration,
    t2: Duration,
) -> anyhow::Result<Duration> {
    match client.on_retransmit_timeout() {
        RetransmitOutcome::Again { message, wait } => {
            send(socket, &message, dest).await?;
            Ok(wait)
        }
        RetransmitOutcome::Exhausted { restart_at_init: true } => {
            let (msg, wait) = client.start_solicit();
            send(socket, &msg, dest).await?;
            Ok(wait)
        }
        RetransmitOutcome::Exhausted { restart_at_init: false } => match client.state() {
            ClientState::Renewing => {
                let (msg, wait) = client.start_rebind(t2);
                send(socket, &msg, dest).await?;
                Ok(wait)
            }
            _ => {
                info!("lease lifetime exhausted with no reply, restarting from solicit");
                let (msg, wait) = client.start_solicit();
                send(socket, &msg, dest).await?;
                Ok(wait)
            }
        },
    }
}

/// Returns the next wait duration if the reply advanced the state machine
/// and something new needs scheduling.
async fn on_reply(
    client: &mut Client,
    socket: &UdpSocket,
    dest: SocketAddr,
    reply: &v6::Message,
    t1: &mut Duration,
    t2: &mut Duration,
) -> anyhow::Result<Option<Duration>> {
    match (client.state(), reply.msg_type()) {
        (ClientState::Selecting, v6::MessageType::Advertise) => {
            let (Some(server_id), Some(addr)) = (server_id_of(reply), offered_address_of(reply)) else {
                debug!("advertise missing server-id or address, ignoring");
                return Ok(None);
            };
            let (msg, wait) = client.select_advertise(server_id, addr);
            send(socket, &msg, dest).await?;
            Ok(Some(wait))
        }
        (ClientState::Requesting, v6::MessageType::Reply) => {
            (*t1, *t2) = ia_timers_of(reply).unwrap_or((DEFAULT_T1, DEFAULT_T2));
            client.request_reply();
            info!(address = ?client.bound_address(), ?t1, ?t2, "dhcpv6 lease bound");
            Ok(Some(*t1))
        }
        (ClientState::Renewing | ClientState::Rebinding, v6::MessageType::Reply) => {
            (*t1, *t2) = ia_timers_of(reply).unwrap_or((*t1, *t2));
            client.renew_or_rebind_reply();
            debug!(?t1, ?t2, "dhcpv6 lease renewed");
            Ok(Some(*t1))
        }
        _ => Ok(None),
    }
}

fn server_id_of(msg: &v6::Message) -> Option<Vec<u8>> {
    match msg.opts().get(OptionCode::ServerId) {
        Some(v6::DhcpOption::ServerId(id)) => Some(id.clone()),
        _ => None,
    }
}

fn ia_na_of(msg: &v6::Message) -> Option<&v6::IANA> {
    match msg.opts().get(OptionCode::IANA) {
        Some(v6::DhcpOption::IANA(iana)) => Some(iana),
        _ => None,
    }
}

fn offered_address_of(msg: &v6::Message) -> Option<Ipv6Addr> {
    let iana = ia_na_of(msg)?;
    match iana.opts.get(OptionCode::IAAddr) {
        Some(v6::DhcpOption::IAAddr(addr)) => Some(addr.addr),
        _ => None,
    }
}

fn ia_timers_of(msg: &v6::Message) -> Option<(Duration, Duration)> {
    let iana = ia_na_of(msg)?;
    if iana.t1 == 0 || iana.t2 == 0 {
        return None;
    }
    Some((Duration::from_secs(iana.t1 as u64), Duration::from_secs(iana.t2 as u64)))
}
