//! Evaluation context threaded through [`crate::Expr::evaluate`] and
//! [`crate::Statement::execute`].
//!
//! Everything that would require blocking I/O mid-evaluation -- DNS lookups
//! for `gethostbyname()`, ns-update RCODEs -- is resolved *before* the
//! expression tree runs and handed to the context as plain data, so the
//! single-threaded evaluation path (scope lookups, option table mutation)
//! never blocks. The caller is responsible for scheduling the lookup (via
//! the timer queue) and re-entering evaluation once it resolves.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use dhcproto::v4::Message;

use crate::universe::{OptionState, UniverseRegistry};
use crate::value::{BoolEval, Data};
use crate::{Expr, EvalError};

/// Per-evaluation scratch scope: `set` statements write here, `Expr`
/// variable references (by name, through the config parser) read from here.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    vars: HashMap<String, Data>,
}

impl Scope {
    pub fn new() -> Self {
        Scope::default()
    }

    pub fn get(&self, name: &str) -> Option<&Data> {
        self.vars.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Data) {
        self.vars.insert(name.into(), value);
    }
}

/// Everything an [`Expr`]/[`crate::Statement`] needs to evaluate against one
/// in-flight packet.
pub struct EvalCtx<'a> {
    pub packet: Option<&'a Message>,
    raw_packet: &'a [u8],
    pub in_options: OptionState,
    pub out_options: OptionState,
    pub cfg_options: &'a OptionState,
    pub universes: &'a UniverseRegistry,
    pub scope: Scope,
    pub known: bool,
    pub static_lease: bool,
    leased_address: Option<Ipv4Addr>,
    host_decl_name: Option<String>,
    hardware: Data,
    /// Pre-resolved `gethostbyname()` results, keyed by the hostname looked
    /// up; populated by the caller before evaluation resumes.
    pub resolved_hosts: HashMap<String, Data>,
    /// Pre-resolved ns-update RCODEs, keyed by the update's config-assigned
    /// key name.
    pub ns_update_results: HashMap<String, u8>,
    /// Classes added by `add class` statements during this evaluation pass.
    pub added_classes: Vec<String>,
    pub should_break: bool,
    pub should_return: bool,
    pub ignore_packet: bool,
}

impl<'a> EvalCtx<'a> {
    pub fn new(
        packet: Option<&'a Message>,
        raw_packet: &'a [u8],
        in_options: OptionState,
        cfg_options: &'a OptionState,
        universes: &'a UniverseRegistry,
        hardware: Data,
    ) -> Self {
        EvalCtx {
            packet,
            raw_packet,
            in_options,
            out_options: OptionState::new(),
            cfg_options,
            universes,
            scope: Scope::new(),
            known: false,
            static_lease: false,
            leased_address: None,
            host_decl_name: None,
            hardware,
            resolved_hosts: HashMap::new(),
            ns_update_results: HashMap::new(),
            added_classes: Vec::new(),
            should_break: false,
            should_return: false,
            ignore_packet: false,
        }
    }

    pub fn eval_bool(&mut self, e: &Expr) -> Result<BoolEval, EvalError> {
        match e.evaluate(self)? {
            Some(v) => {
                let b = v.as_bool().ok_or(EvalError::ExpectedBoolean(v))?;
                Ok(BoolEval::defined(b))
            }
            None => Ok(BoolEval::undefined()),
        }
    }

    pub fn option_exists(&self, universe: &str, code: u32) -> bool {
        if universe == "dhcp" || universe.is_empty() {
            self.in_options.contains(code)
        } else {
            false
        }
    }

    pub fn get_option(&self, universe: &str, code: u32) -> Option<Data> {
        if universe == "dhcp" || universe.is_empty() {
            self.in_options.get(code).cloned()
        } else {
            None
        }
    }

    pub fn get_config_option(&self, universe: &str, code: u32) -> Option<Data> {
        if universe == "dhcp" || universe.is_empty() {
            self.cfg_options.get(code).cloned()
        } else {
            None
        }
    }

    pub fn hardware(&self) -> Data {
        self.hardware.clone()
    }

    pub fn raw_packet(&self) -> &[u8] {
        self.raw_packet
    }

    pub fn leased_address(&self) -> Option<Data> {
        self.leased_address.map(|ip| Data::new(ip.octets().to_vec()))
    }

    pub fn set_leased_address(&mut self, ip: Ipv4Addr) {
        self.leased_address = Some(ip);
    }

    pub fn host_decl_name(&self) -> Option<Data> {
        self.host_decl_name.clone().map(Data::text)
    }

    pub fn set_host_decl_name(&mut self, name: impl Into<String>) {
        self.host_decl_name = Some(name.into());
    }

    pub fn resolved_host(&self, name: &str) -> Option<Data> {
        self.resolved_hosts.get(name).cloned()
    }

    pub fn ns_update_rcode(&self, key: &str) -> Option<u8> {
        self.ns_update_results.get(key).copied()
    }

    /// Builds a context with everything it would otherwise borrow leaked to
    /// `'static`, for unit tests that don't want to thread lifetimes through
    /// every expression under test.
    #[cfg(test)]
    pub fn for_test() -> EvalCtx<'static> {
        let universes: &'static UniverseRegistry = Box::leak(Box::new(UniverseRegistry::new()));
        let cfg_options: &'static OptionState = Box::leak(Box::new(OptionState::new()));
        let raw: &'static [u8] = Box::leak(Vec::new().into_boxed_slice());
        EvalCtx::new(None, raw, OptionState::new(), cfg_options, universes, Data::default())
    }
}
