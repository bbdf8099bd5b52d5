//! Configuration and lease-file parsing: the lexer, the recursive-descent
//! parser, the expression/option registry bridging parsed text to
//! `expr::Expr`/`expr::Statement`, and the Group tree the parsed
//! declarations populate.
//!
//! `dhcpd.conf` and lease files share this parser end to end -- a lease
//! record's `on commit { ... }` block is parsed by the same
//! `parse_exec_stmt` path used for a subnet's statements.

pub mod group;
pub mod iface;
pub mod lease_timing;
pub mod lexer;
pub mod optreg;
pub mod parser;

pub use group::{
    BootpPolicy, Class, ClassHandle, Group, GroupHandle, GroupTree, HostDecl, HostFlags, HostHandle, SharedNetwork,
    SharedNetworkHandle, Subnet, SubnetHandle, clone_group, collect_chain_hostnames, execute_chain,
    insert_subnet_sorted, resolve_authoritative, resolve_bootp_policy, resolve_default_lease_time,
    resolve_max_lease_time, resolve_ping_check, resolve_ping_timeout,
};
pub use lease_timing::determine_lease;
pub use optreg::{OptionDef, OptionRegistry, OptionType};
pub use parser::{parse_config, ParseError, Parser};
