//! Interface discovery: map a received packet's `ifindex` back to the
//! `Ipv4Network` bound to that interface, so the receiving scope can be
//! derived even for a non-relayed (L2-local) packet.

use anyhow::{Context, Result, bail};
use pnet::datalink::{self, NetworkInterface};
use pnet::ipnetwork::{IpNetwork, Ipv4Network};

/// interfaces matching the names supplied that are up and carry an IPv4
/// address, or (if no names given) every up interface that does.
pub fn v4_find_interfaces(names: Option<Vec<String>>) -> Result<Vec<NetworkInterface>> {
    let found = datalink::interfaces()
        .into_iter()
        .filter(|e| e.is_up() && !e.ips.is_empty() && e.ips.iter().any(|i| i.is_ipv4()))
        .collect::<Vec<_>>();
    found_or_named(found, names)
}

fn found_or_named(found: Vec<NetworkInterface>, names: Option<Vec<String>>) -> Result<Vec<NetworkInterface>> {
    Ok(match names {
        Some(names) => names
            .iter()
            .map(|name| match found.iter().find(|i| &i.name == name) {
                Some(i) => Ok(i.clone()),
                None => bail!("unable to find interface {name}"),
            })
            .collect::<Result<Vec<_>, _>>()?,
        None => found,
    })
}

/// the first up, non-loopback interface with an IPv4 address -- used when
/// no interface list was configured at all.
pub fn backup_ipv4_interface(name: Option<&str>) -> Result<Ipv4Network> {
    let interface = datalink::interfaces().into_iter().find(|e| {
        e.is_up() && !e.is_loopback() && !e.ips.is_empty() && name.map(|n| n == e.name).unwrap_or(true)
    });
    let ips = interface.as_ref().map(|int| &int.ips).context("no interface found")?;
    ips.iter()
        .find_map(|net| match net {
            IpNetwork::V4(net) => Some(*net),
            _ => None,
        })
        .with_context(|| format!("no IPv4 address on interface {interface:?}"))
}

pub fn find_interface(interfaces: &[NetworkInterface], ifindex: u32) -> Option<&NetworkInterface> {
    interfaces.iter().find(|e| e.index == ifindex)
}

pub fn find_network(interfaces: &[NetworkInterface], ifindex: u32) -> Option<Ipv4Network> {
    find_interface(interfaces, ifindex).and_then(|int| {
        int.ips.iter().find_map(|ip| match ip {
            IpNetwork::V4(ip) => Some(*ip),
            _ => None,
        })
    })
}
