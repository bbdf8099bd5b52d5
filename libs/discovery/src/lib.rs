//! # discovery
//!
//! DNS lookups used by the config-expression layer's `gethostbyname()`.
#![warn(
    missing_debug_implementations,
    missing_docs,
    missing_copy_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![allow(clippy::cognitive_complexity)]
#![deny(rustdoc::broken_intra_doc_links)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]
use std::collections::HashMap;

use anyhow::{Context, Result};
use hickory_resolver::config::ResolverOpts;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::{Resolver, TokioResolver};
use parking_lot::Mutex;

/// DNS resolver behind `gethostbyname()`: looks up every A record for a
/// hostname and caches the result. The config language has no way to
/// express a TTL, so a resolved name is assumed stable for the process's
/// lifetime.
#[derive(Debug)]
pub struct DnsServiceDiscovery {
    resolver: TokioResolver,
    cache: Mutex<HashMap<String, Vec<u8>>>,
}

impl DnsServiceDiscovery {
    /// Create a new resolver.
    pub fn new() -> Result<Self> {
        Ok(Self {
            resolver: Resolver::builder(TokioConnectionProvider::default())
                .context("failed to create tokio resolver")?
                .with_options(ResolverOpts::default())
                .build(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// do a DNS lookup, returning a URL with the "http" schema
    /// ex.
    ///     lookup_http("foobar.internal", 67) -> "http://1.2.3.4:67"
    pub async fn lookup_http(&self, addr: impl AsRef<str>, port: u16) -> Result<String> {
        self.lookup("http", addr, port).await
    }

    /// do a DNS lookup, returning a URL
    /// ex.
    ///     lookup("http", "foobar.internal", 67) -> "http://1.2.3.4:67"
    pub async fn lookup(&self, schema: impl AsRef<str>, addr: impl AsRef<str>, port: u16) -> Result<String> {
        let bytes = self.resolve_hostname(addr.as_ref()).await?;
        let first = bytes.chunks_exact(4).next().context("failed to lookup addr")?;
        Ok(format!("{}://{}.{}.{}.{}:{}", schema.as_ref(), first[0], first[1], first[2], first[3], port))
    }

    /// Resolve `hostname` to the raw big-endian bytes of every A record
    /// (4 bytes per address, in the order the resolver returns them) -- the
    /// representation `gethostbyname()` hands to the expression layer, which
    /// clamps it with `make_limit()` when a scope doesn't want every record.
    /// Cached after the first successful lookup.
    pub async fn resolve_hostname(&self, hostname: &str) -> Result<Vec<u8>> {
        if let Some(cached) = self.cache.lock().get(hostname) {
            return Ok(cached.clone());
        }
        let lookup = self
            .resolver
            .ipv4_lookup(hostname)
            .await
            .with_context(|| format!("failed to resolve {hostname}"))?;
        let mut bytes = Vec::new();
        for addr in lookup.iter() {
            bytes.extend_from_slice(&addr.octets());
        }
        self.cache.lock().insert(hostname.to_string(), bytes.clone());
        Ok(bytes)
    }
}
