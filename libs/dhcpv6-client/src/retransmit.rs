//! RFC 3315 §14 retransmission timing.
//!
//! `RT0 = IRT + RAND*IRT`, then `RT = 2*RT_prev + RAND*RT_prev` capped at
//! `MRT + RAND*MRT` once `MRT != 0`. Retransmission stops once `MRC`
//! transmissions have occurred or the next wait would push elapsed time past
//! `MRD`, whichever comes first.

use std::time::Duration;

use rand::Rng;

/// `RAND` is in `(-0.1, 0.1)`, approximated as an integer split of `base`:
/// `split = (base - 1) / 10`, drawn uniformly from `[-split, split]`.
fn jitter_millis(base_millis: u64) -> i64 {
    let split = base_millis.saturating_sub(1) / 10;
    if split == 0 {
        return 0;
    }
    let range = 2 * split + 1;
    rand::thread_rng().gen_range(0..range) as i64 - split as i64
}

fn apply_jitter(base: Duration) -> Duration {
    let millis = base.as_millis() as u64;
    let jittered = millis as i64 + jitter_millis(millis);
    Duration::from_millis(jittered.max(0) as u64)
}

/// The per-message-type constants from RFC 3315 §5.5 (SOL_TIMEOUT/MAX_RT,
/// REQ_TIMEOUT/MAX_RT/MAX_RC, ...). `mrc == 0` means unlimited transmissions;
/// `mrt == 0` means no cap; `mrd == 0` means no overall deadline.
#[derive(Debug, Clone, Copy)]
pub struct RetransmitParams {
    pub irt: Duration,
    pub mrc: u32,
    pub mrt: Duration,
    pub mrd: Duration,
}

/// Drives one message exchange's retransmission schedule: the current `RT`,
/// the transmit count, and elapsed wait time since the first transmission.
#[derive(Debug, Clone, Copy)]
pub struct RetransmitTimer {
    params: RetransmitParams,
    rt: Duration,
    count: u32,
    elapsed: Duration,
}

impl RetransmitTimer {
    /// Computes `RT0` and returns a timer whose first wait is already set;
    /// the caller transmits once immediately and waits `current()` before
    /// calling [`record_transmission`](Self::record_transmission).
    pub fn start(params: RetransmitParams) -> Self {
        let rt0 = apply_jitter(params.irt);
        RetransmitTimer {
            params,
            rt: rt0,
            count: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn current(&self) -> Duration {
        self.rt
    }

    pub fn transmissions(&self) -> u32 {
        self.count
    }

    /// Records the transmission that just occurred at `current()` and
    /// advances the schedule. Returns the next wait, or `None` once `MRC`
    /// has been reached or the next wait would exceed `MRD` -- at which
    /// point the caller must invoke its "done" handler instead of
    /// rescheduling.
    pub fn record_transmission(&mut self) -> Option<Duration> {
        self.count += 1;
        if self.params.mrc != 0 && self.count >= self.params.mrc {
            return None;
        }

        let doubled = self.rt.saturating_add(self.rt);
        let mut next = apply_jitter(doubled);
        if self.params.mrt != Duration::ZERO {
            let cap = apply_jitter(self.params.mrt);
            next = next.min(cap);
        }

        if self.params.mrd != Duration::ZERO && self.elapsed + next > self.params.mrd {
            return None;
        }

        self.elapsed += self.rt;
        self.rt = next;
        Some(self.rt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rt0_exceeds_irt_strictly_or_equals_floor() {
        // RAND can be 0, so RT0 >= IRT always; the invariant worth pinning
        // down is that it never falls below IRT - 10%.
        let params = RetransmitParams {
            irt: Duration::from_secs(1),
            mrc: 0,
            mrt: Duration::from_secs(120),
            mrd: Duration::ZERO,
        };
        for _ in 0..100 {
            let t = RetransmitTimer::start(params);
            assert!(t.current() >= Duration::from_millis(900));
            assert!(t.current() <= Duration::from_millis(1100));
        }
    }

    #[test]
    fn steady_state_rt_stays_within_ten_percent_of_mrt() {
        let params = RetransmitParams {
            irt: Duration::from_secs(1),
            mrc: 0,
            mrt: Duration::from_secs(100),
            mrd: Duration::ZERO,
        };
        let mut t = RetransmitTimer::start(params);
        let mut last = t.current();
        for _ in 0..20 {
            last = t.record_transmission().expect("mrc=0 never exhausts");
        }
        assert!(last <= Duration::from_millis(110_000));
    }

    #[test]
    fn mrc_exhausts_after_exact_count() {
        let params = RetransmitParams {
            irt: Duration::from_millis(100),
            mrc: 3,
            mrt: Duration::ZERO,
            mrd: Duration::ZERO,
        };
        let mut t = RetransmitTimer::start(params);
        assert!(t.record_transmission().is_some()); // tx #1 (RT0) done, scheduling tx #2
        assert!(t.record_transmission().is_some()); // tx #2 done, scheduling tx #3
        assert!(t.record_transmission().is_none()); // tx #3 done, MRC reached
        assert_eq!(t.transmissions(), 3);
    }

    #[test]
    fn mrd_exhausts_once_projected_elapsed_exceeds_deadline() {
        let params = RetransmitParams {
            irt: Duration::from_secs(1),
            mrc: 0,
            mrt: Duration::ZERO,
            mrd: Duration::from_secs(3),
        };
        let mut t = RetransmitTimer::start(params);
        // RT doubles each time with no cap: ~1s, ~2s, ~4s... the third
        // transmission's projected next wait should blow past a 3s MRD.
        let mut outcome = Some(t.current());
        let mut iterations = 0;
        while outcome.is_some() && iterations < 10 {
            outcome = t.record_transmission();
            iterations += 1;
        }
        assert!(outcome.is_none());
    }
}
