//! `option foo code N = <type>` registration: once declared, `foo` may
//! appear anywhere an option name is accepted, in any universe.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionType {
    Boolean,
    Integer8,
    Integer16,
    Integer32,
    SignedInteger(u8),
    UnsignedInteger(u8),
    IpAddress,
    Text,
    String,
    ArrayOf(Box<OptionType>),
    Record(Vec<OptionType>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionDef {
    pub universe: String,
    pub code: u32,
    pub ty: OptionType,
}

/// Maps `(universe, name)` to its registered code and type. Built-in DHCP
/// option names (`subnet-mask`, `routers`, ...) are expected to be seeded
/// by the caller from the `dhcp` universe's own table; this registry only
/// tracks user-declared `option ... code N = ...` entries plus whatever
/// seed set the caller provides.
#[derive(Debug, Default)]
pub struct OptionRegistry {
    by_name: HashMap<(String, String), OptionDef>,
}

/// RFC 2132 names for the options the config/lease grammar most commonly
/// references by name. Not exhaustive -- unlisted codes can still be used
/// numerically (`option 77 ...`) or registered explicitly with `option
/// <name> code N = <type>;`.
fn dhcp_builtins() -> Vec<(&'static str, u32, OptionType)> {
    use OptionType::*;
    vec![
        ("subnet-mask", 1, IpAddress),
        ("time-offset", 2, Integer32),
        ("routers", 3, ArrayOf(Box::new(IpAddress))),
        ("domain-name-servers", 6, ArrayOf(Box::new(IpAddress))),
        ("host-name", 12, Text),
        ("domain-name", 15, Text),
        ("broadcast-address", 28, IpAddress),
        ("nis-domain", 40, Text),
        ("nis-servers", 41, ArrayOf(Box::new(IpAddress))),
        ("ntp-servers", 42, ArrayOf(Box::new(IpAddress))),
        ("dhcp-lease-time", 51, Integer32),
        ("dhcp-message-type", 53, Integer8),
        ("dhcp-server-identifier", 54, IpAddress),
        ("dhcp-parameter-request-list", 55, ArrayOf(Box::new(Integer8))),
        ("dhcp-renewal-time", 58, Integer32),
        ("dhcp-rebinding-time", 59, Integer32),
        ("dhcp-class-identifier", 60, String),
        ("dhcp-client-identifier", 61, String),
        ("domain-search", 119, String),
        ("agent.circuit-id", 82, String),
    ]
}

impl OptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-seeded with the `dhcp` universe's RFC 2132 names.
    pub fn with_dhcp_builtins() -> Self {
        let mut reg = Self::new();
        for (name, code, ty) in dhcp_builtins() {
            reg.register("dhcp", name, code, ty);
        }
        reg
    }

    pub fn register(&mut self, universe: &str, name: &str, code: u32, ty: OptionType) {
        self.by_name.insert(
            (universe.to_string(), name.to_string()),
            OptionDef {
                universe: universe.to_string(),
                code,
                ty,
            },
        );
    }

    pub fn lookup(&self, universe: &str, name: &str) -> Option<&OptionDef> {
        self.by_name.get(&(universe.to_string(), name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_and_resolves_array_type() {
        let mut reg = OptionRegistry::new();
        reg.register("dhcp", "my-routes", 150, OptionType::ArrayOf(Box::new(OptionType::IpAddress)));
        let def = reg.lookup("dhcp", "my-routes").unwrap();
        assert_eq!(def.code, 150);
        assert_eq!(def.ty, OptionType::ArrayOf(Box::new(OptionType::IpAddress)));
    }

    #[test]
    fn unknown_option_name_misses() {
        let reg = OptionRegistry::new();
        assert!(reg.lookup("dhcp", "nonexistent").is_none());
    }
}
