//! Lease-time clamping shared by every plugin that hands out a lease:
//! a client's requested lease time is clamped into `[0, max]`, falling
//! back to the scope's default when none was requested.

use std::time::Duration;

/// Clamp `requested` against `max`, or fall back to `default` if the
/// client didn't ask for a specific duration. Returns `(lease, renew,
/// rebind)` -- T1/T2 are halfway and seven-eighths of the way to expiry,
/// matching the RFC 2131 recommended defaults.
pub fn determine_lease(default: u32, max: u32, requested: Option<Duration>) -> (Duration, Duration, Duration) {
    let default = Duration::from_secs(default as u64);
    let max = Duration::from_secs(max as u64);
    let t = match requested {
        Some(req) => req.clamp(Duration::ZERO, max),
        None => default,
    };
    (t, renew(t), rebind(t))
}

pub fn renew(t: Duration) -> Duration {
    t / 2
}

pub fn rebind(t: Duration) -> Duration {
    t * 7 / 8
}
