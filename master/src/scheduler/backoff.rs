//! Exponential backoff with jitter, base 2s, capped at 5 minutes (§7:
//! "retried with jittered backoff up to a task-level cap").

use std::time::Duration;

const BASE_SECS: u64 = 2;
const CAP_SECS: u64 = 300;

/// `seed` varies the jitter deterministically per call site (e.g. task id
/// bytes) rather than pulling in a full RNG crate for one jitter value; a
/// xorshift pass over the seed gives enough spread to avoid thundering-herd
/// retries.
pub fn backoff_for(attempt: u32, seed: u64) -> Duration {
    let exp = BASE_SECS.saturating_mul(1u64 << attempt.min(20));
    let capped = exp.min(CAP_SECS);
    let mut x = seed ^ 0x9E3779B97F4A7C15;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    let jitter = x % (capped / 2 + 1);
    Duration::from_secs(capped / 2 + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        assert!(backoff_for(0, 1).as_secs() <= 2);
        assert!(backoff_for(10, 1).as_secs() <= CAP_SECS);
        assert!(backoff_for(20, 1).as_secs() <= CAP_SECS);
    }

    #[test]
    fn jitter_varies_by_seed() {
        let a = backoff_for(3, 1);
        let b = backoff_for(3, 2);
        assert_ne!(a, b);
    }
}
