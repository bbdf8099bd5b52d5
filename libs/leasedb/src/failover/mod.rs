//! Failover peer link: wire framing only. Peer consensus (the state
//! machine that decides which side is ACTIVE/RECOVER/COMMUNICATIONS-INTERRUPTED
//! and runs the binding update exchange) is a named non-goal; what's
//! implemented here is the message framing so a future FSM has something
//! to read and write.

pub mod wire;
