//! DHCPv6 client retransmission timing (RFC 3315 §14) and the client state
//! machine (`Init -> Selecting -> Requesting -> Bound -> {Renewing,
//! Rebinding}`, RFC 3315 §18). The general timer/dispatcher loop that
//! schedules these waits lives in `dhcpd-core`; this crate supplies the
//! math and the state enum it drives.

pub mod client;
pub mod duid;
pub mod retransmit;

pub use client::{Client, ClientState, RetransmitOutcome};
pub use duid::duid_ll;
pub use retransmit::{RetransmitParams, RetransmitTimer};
