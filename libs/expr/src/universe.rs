//! Option universes: namespaces of numbered options, each with its own
//! get/set/delete/encapsulate/dereference behavior.
//!
//! The built-in `dhcp` universe covers the standard option space (codes
//! 0-255, RFC 2132 and friends, via `dhcproto`); the `server` universe holds
//! private server-only options (e.g. `server.duid`) that never go on the
//! wire. Vendor-encapsulated sub-option spaces register under their own
//! universe name and are reached through `Expr::Option`'s `universe` field.

use std::collections::HashMap;

use crate::value::Data;
use crate::EvalError;

/// A bag of raw option values for one universe, keyed by option code.
///
/// This is the runtime storage backing `Expr::Option`/`Statement::*Option`:
/// one `OptionState` per universe per packet-processing pass (incoming
/// options decoded from the client packet; outgoing options being built for
/// the reply).
#[derive(Debug, Clone, Default)]
pub struct OptionState {
    codes: HashMap<u32, Data>,
}

impl OptionState {
    pub fn new() -> Self {
        OptionState::default()
    }

    pub fn get(&self, code: u32) -> Option<&Data> {
        self.codes.get(&code)
    }

    pub fn set(&mut self, code: u32, value: Data) {
        self.codes.insert(code, value);
    }

    pub fn delete(&mut self, code: u32) {
        self.codes.remove(&code);
    }

    pub fn contains(&self, code: u32) -> bool {
        self.codes.contains_key(&code)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &Data)> {
        self.codes.iter()
    }
}

/// Behavior attached to an option universe.
///
/// `encapsulate` packs a whole universe's options into a single data value
/// (used when a sub-space is carried inside one option of its parent, e.g.
/// vendor-encapsulated options inside option 43). `dereference` is the
/// inverse: split a data value into a fresh `OptionState` for a named
/// sub-universe.
pub trait Universe: std::fmt::Debug {
    fn name(&self) -> &str;

    fn get<'a>(&self, state: &'a OptionState, code: u32) -> Option<&'a Data> {
        state.get(code)
    }

    fn set(&self, state: &mut OptionState, code: u32, value: Data) {
        state.set(code, value);
    }

    fn delete(&self, state: &mut OptionState, code: u32) {
        state.delete(code);
    }

    /// Pack `state`'s options into a single data buffer per this universe's
    /// wire encoding (TLV for `dhcp`-style universes).
    fn encapsulate(&self, state: &OptionState) -> Result<Data, EvalError>;

    /// Split `buf` into a fresh `OptionState` under this universe's decoding
    /// rules.
    fn dereference(&self, buf: &Data) -> Result<OptionState, EvalError>;
}

/// The standard DHCP option space, codes 0-255, TLV-encoded per RFC 2132.
#[derive(Debug, Default)]
pub struct DhcpUniverse;

impl Universe for DhcpUniverse {
    fn name(&self) -> &str {
        "dhcp"
    }

    fn encapsulate(&self, state: &OptionState) -> Result<Data, EvalError> {
        let mut buf = Vec::new();
        for (code, val) in state.iter() {
            let code: u8 = (*code).try_into().map_err(|_| EvalError::OutOfRange)?;
            let len: u8 = val.len().try_into().map_err(|_| EvalError::OutOfRange)?;
            buf.push(code);
            buf.push(len);
            buf.extend_from_slice(&val.bytes);
        }
        Ok(Data::new(buf))
    }

    fn dereference(&self, buf: &Data) -> Result<OptionState, EvalError> {
        let mut state = OptionState::new();
        let bytes = &buf.bytes;
        let mut i = 0;
        while i + 2 <= bytes.len() {
            let code = bytes[i] as u32;
            let len = bytes[i + 1] as usize;
            let start = i + 2;
            let end = start + len;
            if end > bytes.len() {
                break;
            }
            state.set(code, Data::new(bytes[start..end].to_vec()));
            i = end;
        }
        Ok(state)
    }
}

/// Translate a `dhcp`-universe option table (raw per-code byte values, as
/// produced by statement execution's `out_options`) into wire-ready
/// `dhcproto` options for `MsgContext::populate_opts`/`populate_opts_lease`.
/// Every entry round-trips through `UnknownOption` -- the config author's
/// data expression already produced the correctly wire-formatted value
/// bytes for its option code, so no further per-code typing is needed.
pub fn to_v4_options(state: &OptionState) -> dhcproto::v4::DhcpOptions {
    let mut opts = dhcproto::v4::DhcpOptions::new();
    for (code, data) in state.iter() {
        let Ok(code) = u8::try_from(*code) else { continue };
        opts.insert(dhcproto::v4::DhcpOption::Unknown(dhcproto::v4::UnknownOption::new(
            code.into(),
            data.bytes.clone(),
        )));
    }
    opts
}

/// Server-private options: never serialized to the wire, used for
/// server-local bookkeeping (e.g. `server.duid`, `server.next-server`).
#[derive(Debug, Default)]
pub struct ServerUniverse;

impl Universe for ServerUniverse {
    fn name(&self) -> &str {
        "server"
    }

    fn encapsulate(&self, _state: &OptionState) -> Result<Data, EvalError> {
        Ok(Data::default())
    }

    fn dereference(&self, _buf: &Data) -> Result<OptionState, EvalError> {
        Ok(OptionState::new())
    }
}

/// Maps universe names to their [`Universe`] implementation.
///
/// Built with `dhcp` and `server` registered; config parsing registers
/// additional vendor-encapsulated universes as they're declared.
pub struct UniverseRegistry {
    universes: HashMap<String, Box<dyn Universe + Send + Sync>>,
}

impl UniverseRegistry {
    pub fn new() -> Self {
        let mut universes: HashMap<String, Box<dyn Universe + Send + Sync>> = HashMap::new();
        universes.insert("dhcp".to_string(), Box::new(DhcpUniverse));
        universes.insert("server".to_string(), Box::new(ServerUniverse));
        UniverseRegistry { universes }
    }

    pub fn register(&mut self, universe: Box<dyn Universe + Send + Sync>) {
        self.universes.insert(universe.name().to_string(), universe);
    }

    pub fn get(&self, name: &str) -> Option<&(dyn Universe + Send + Sync)> {
        self.universes.get(name).map(|b| b.as_ref())
    }
}

impl Default for UniverseRegistry {
    fn default() -> Self {
        UniverseRegistry::new()
    }
}

impl std::fmt::Debug for UniverseRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniverseRegistry")
            .field("names", &self.universes.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dhcp_universe_round_trips_options() {
        let u = DhcpUniverse;
        let mut state = OptionState::new();
        state.set(12, Data::text("host"));
        let packed = u.encapsulate(&state).unwrap();
        let unpacked = u.dereference(&packed).unwrap();
        assert_eq!(unpacked.get(12).unwrap().bytes, b"host");
    }

    #[test]
    fn registry_has_builtins() {
        let reg = UniverseRegistry::new();
        assert!(reg.get("dhcp").is_some());
        assert!(reg.get("server").is_some());
        assert!(reg.get("nonexistent").is_none());
    }
}
