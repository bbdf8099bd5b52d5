//! The AF_UNIX control socket: a newline-framed shell over the running
//! config tree, used to inspect and edit host reservations at runtime
//! without a config reload. Protocol:
//!
//! ```text
//! ls                  list the names at the current location
//! cd <name>            descend into <name>
//! cd ..                go back up one level
//! print <field>        print one field of the current object
//! set <field>=<value>  set one field of the current object
//! rm <name>            remove a child of the current location
//! exit                 close the connection
//! ```
//!
//! Responses are line oriented: every line but the last is prefixed with
//! `-` (continuation), the last line carries no prefix.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use confparse::{GroupTree, HostDecl, HostFlags};
use dhcpd_core::tokio::{
    self,
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{UnixListener, UnixStream},
};
use dhcpd_core::tracing::{debug, error, info, warn};
use expr::{Data, Expr};
use leasedb::LeaseDb;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// Shared state the control socket edits. A thin wrapper so call sites
/// don't have to juggle two `Arc`s separately.
#[derive(Clone)]
pub struct Shared {
    pub tree: Arc<RwLock<GroupTree>>,
    pub db: Arc<Mutex<LeaseDb>>,
}

/// Where the connection's cursor currently sits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum Location {
    #[default]
    Root,
    Hosts,
    Host(String),
    Leases,
    Lease(Ipv4Addr),
}

pub async fn run(path: PathBuf, shared: Shared, shutdown: CancellationToken) -> anyhow::Result<()> {
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let listener = UnixListener::bind(&path)?;
    info!(path = %path.display(), "control socket listening");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("control socket task stopping");
                break;
            }
            accepted = listener.accept() => {
                let (stream, _addr) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(?err, "control socket accept failed");
                        continue;
                    }
                };
                let shared = shared.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_conn(stream, shared).await {
                        debug!(?err, "control socket connection ended with an error");
                    }
                });
            }
        }
    }
    remove_socket(&path);
    Ok(())
}

fn remove_socket(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(?err, "failed to remove control socket on shutdown");
        }
    }
}

async fn handle_conn(stream: UnixStream, shared: Shared) -> anyhow::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut loc = Location::Root;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" {
            write_response(&mut write_half, &["goodbye".to_string()]).await?;
            break;
        }
        let response = dispatch(line, &mut loc, &shared);
        write_response(&mut write_half, &response).await?;
    }
    Ok(())
}

async fn write_response(w: &mut (impl AsyncWriteExt + Unpin), lines: &[String]) -> anyhow::Result<()> {
    if lines.is_empty() {
        w.write_all(b"\n").await?;
        return Ok(());
    }
    let (last, rest) = lines.split_last().expect("checked non-empty above");
    for line in rest {
        w.write_all(format!("-{line}\n").as_bytes()).await?;
    }
    w.write_all(format!("{last}\n").as_bytes()).await?;
    w.flush().await?;
    Ok(())
}

fn dispatch(line: &str, loc: &mut Location, shared: &Shared) -> Vec<String> {
    let mut parts = line.splitn(2, ' ');
    let cmd = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default().trim();

    match cmd {
        "ls" => cmd_ls(loc, shared),
        "cd" => cmd_cd(rest, loc, shared),
        "print" => cmd_print(rest, loc, shared),
        "set" => cmd_set(rest, loc, shared),
        "rm" => cmd_rm(rest, loc, shared),
        _ => vec![format!("error: unrecognized command {cmd:?}")],
    }
}

fn cmd_ls(loc: &Location, shared: &Shared) -> Vec<String> {
    match loc {
        Location::Root => vec!["hosts".to_string(), "leases".to_string()],
        Location::Hosts => {
            let tree = shared.tree.read();
            let names: Vec<_> = tree
                .hosts
                .iter()
                .map(|(_, h)| h)
                .filter(|h| !h.is_tombstone())
                .map(|h| h.name.clone())
                .collect();
            if names.is_empty() { vec!["(empty)".to_string()] } else { names }
        }
        Location::Leases => {
            let db = shared.db.lock();
            let ips: Vec<_> = db.iter_leases().map(|(_, l)| l.ip.to_string()).collect();
            if ips.is_empty() { vec!["(empty)".to_string()] } else { ips }
        }
        Location::Host(name) => match find_host(shared, name) {
            Some(h) => host_fields(&h),
            None => vec!["error: host vanished".to_string()],
        },
        Location::Lease(ip) => {
            let db = shared.db.lock();
            match db.by_ip(*ip).and_then(|h| db.lease(h)) {
                Some(l) => vec![
                    format!("ip={}", l.ip),
                    format!("binding-state={:?}", l.binding_state),
                ],
                None => vec!["error: lease vanished".to_string()],
            }
        }
    }
}

fn cmd_cd(name: &str, loc: &mut Location, shared: &Shared) -> Vec<String> {
    if name == ".." {
        *loc = match loc {
            Location::Root => Location::Root,
            Location::Hosts | Location::Leases => Location::Root,
            Location::Host(_) => Location::Hosts,
            Location::Lease(_) => Location::Leases,
        };
        return vec!["ok".to_string()];
    }
    let next = match loc {
        Location::Root if name == "hosts" => Some(Location::Hosts),
        Location::Root if name == "leases" => Some(Location::Leases),
        Location::Hosts => {
            if find_host(shared, name).is_some() {
                Some(Location::Host(name.to_string()))
            } else {
                None
            }
        }
        Location::Leases => name.parse::<Ipv4Addr>().ok().filter(|ip| shared.db.lock().by_ip(*ip).is_some()).map(Location::Lease),
        _ => None,
    };
    match next {
        Some(loc_new) => {
            *loc = loc_new;
            vec!["ok".to_string()]
        }
        None => vec![format!("error: no such name {name:?} here")],
    }
}

fn cmd_print(field: &str, loc: &Location, shared: &Shared) -> Vec<String> {
    match loc {
        Location::Host(name) => match find_host(shared, name) {
            Some(h) => {
                let needle = format!("{field}=");
                host_fields(&h)
                    .into_iter()
                    .find(|l| l.starts_with(needle.as_str()))
                    .map(|l| vec![l])
                    .unwrap_or_else(|| vec![format!("error: no such field {field:?}")])
            }
            None => vec!["error: host vanished".to_string()],
        },
        Location::Lease(ip) => {
            let db = shared.db.lock();
            match db.by_ip(*ip).and_then(|h| db.lease(h)) {
                Some(l) if field == "binding-state" => vec![format!("binding-state={:?}", l.binding_state)],
                Some(_) if field == "ip" => vec![format!("ip={ip}")],
                Some(_) => vec![format!("error: no such field {field:?}")],
                None => vec!["error: lease vanished".to_string()],
            }
        }
        _ => vec!["error: print requires a host or lease location".to_string()],
    }
}

fn cmd_set(arg: &str, loc: &Location, shared: &Shared) -> Vec<String> {
    let Location::Host(name) = loc else {
        return vec!["error: set is only valid on a host".to_string()];
    };
    let Some((field, value)) = arg.split_once('=') else {
        return vec!["error: expected <field>=<value>".to_string()];
    };
    let mut tree = shared.tree.write();
    let Some((_, h)) = tree.hosts.iter_mut().find(|(_, h)| h.name == *name) else {
        return vec!["error: host vanished".to_string()];
    };
    match field {
        "fixed-address" => match value.trim().parse::<Ipv4Addr>() {
            Ok(ip) => {
                h.fixed_addr = Some(Expr::ConstData(Data::new(ip.octets().to_vec())));
                vec!["ok".to_string()]
            }
            Err(err) => vec![format!("error: invalid ip: {err}")],
        },
        "hardware-address" => match parse_mac(value.trim()) {
            Some(mac) => {
                h.interface = Some(mac);
                vec!["ok".to_string()]
            }
            None => vec!["error: invalid hardware address".to_string()],
        },
        _ => vec![format!("error: unknown field {field:?}")],
    }
}

fn cmd_rm(name: &str, loc: &Location, shared: &Shared) -> Vec<String> {
    if !matches!(loc, Location::Hosts) {
        return vec!["error: rm is only valid while browsing hosts".to_string()];
    }
    let mut tree = shared.tree.write();
    match tree.hosts.iter_mut().find(|(_, h)| h.name == name) {
        Some((_, h)) => {
            h.flags.set(HostFlags::DELETED, true);
            h.flags.set(HostFlags::STATIC, true);
            vec!["ok".to_string()]
        }
        None => vec![format!("error: no such host {name:?}")],
    }
}

fn find_host(shared: &Shared, name: &str) -> Option<HostDecl> {
    shared.tree.read().hosts.iter().map(|(_, h)| h).find(|h| h.name == name && !h.is_tombstone()).cloned()
}

fn host_fields(h: &HostDecl) -> Vec<String> {
    vec![
        format!("name={}", h.name),
        format!(
            "hardware-address={}",
            h.interface.as_ref().map(|v| format_mac(v)).unwrap_or_else(|| "-".to_string())
        ),
        format!(
            "fixed-address={}",
            fixed_addr_display(h.fixed_addr.as_ref())
        ),
    ]
}

fn fixed_addr_display(expr: Option<&Expr>) -> String {
    match expr {
        Some(Expr::ConstData(d)) if d.bytes.len() == 4 => {
            Ipv4Addr::new(d.bytes[0], d.bytes[1], d.bytes[2], d.bytes[3]).to_string()
        }
        Some(_) => "<expression>".to_string(),
        None => "-".to_string(),
    }
}

fn format_mac(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(":")
}

fn parse_mac(s: &str) -> Option<Vec<u8>> {
    let parts = s.split(':').map(|p| u8::from_str_radix(p, 16).ok()).collect::<Option<Vec<_>>>()?;
    if parts.is_empty() { None } else { Some(parts) }
}
