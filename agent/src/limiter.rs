//! Additive-increase/multiplicative-decrease concurrency limiter with an
//! EWMA RTT estimator (§5, §9). `tokio::sync::Semaphore` can't shrink its
//! permit count at runtime, so the limit is tracked separately and permits
//! are handed out by comparing in-flight count against it.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;

pub struct AimdLimiter {
    limit: AtomicU32,
    min: u32,
    max: u32,
    in_flight: AtomicU32,
    notify: Notify,
    rtt_ewma_micros: AtomicU64,
}

pub struct Permit<'a> {
    limiter: &'a AimdLimiter,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.limiter.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.limiter.notify.notify_one();
    }
}

impl AimdLimiter {
    pub fn new(initial: u32, min: u32, max: u32) -> Self {
        Self {
            limit: AtomicU32::new(initial.clamp(min, max)),
            min,
            max,
            in_flight: AtomicU32::new(0),
            notify: Notify::new(),
            rtt_ewma_micros: AtomicU64::new(0),
        }
    }

    pub fn current_limit(&self) -> u32 {
        self.limit.load(Ordering::Acquire)
    }

    /// Waits until admission is available, then holds a slot until the
    /// returned permit is dropped.
    pub async fn acquire(&self) -> Permit<'_> {
        loop {
            let limit = self.limit.load(Ordering::Acquire);
            let current = self.in_flight.load(Ordering::Acquire);
            if current < limit {
                if self
                    .in_flight
                    .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return Permit { limiter: self };
                }
                continue;
            }
            self.notify.notified().await;
        }
    }

    /// Additive increase: ramp the limit up by one step, capped at `max`.
    pub fn on_success(&self, rtt: Duration) {
        self.record_rtt(rtt);
        let mut current = self.limit.load(Ordering::Acquire);
        loop {
            let next = (current + (current / 10).max(1)).min(self.max);
            match self.limit.compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    self.notify.notify_waiters();
                    break;
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Multiplicative decrease: halve the limit, floored at `min`.
    pub fn on_failure(&self) {
        let mut current = self.limit.load(Ordering::Acquire);
        loop {
            let next = (current / 2).max(self.min);
            match self.limit.compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    debug!("limiter backed off to {next} after failure");
                    break;
                }
                Err(observed) => current = observed,
            }
        }
    }

    fn record_rtt(&self, rtt: Duration) {
        let sample = rtt.as_micros() as u64;
        let mut current = self.rtt_ewma_micros.load(Ordering::Acquire);
        loop {
            let next = if current == 0 { sample } else { (current * 7 + sample * 3) / 10 };
            match self.rtt_ewma_micros.compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn rtt_estimate(&self) -> Duration {
        Duration::from_micros(self.rtt_ewma_micros.load(Ordering::Acquire))
    }

    /// `clamp(2 × RTO, 1s, 3s)` per-probe timeout, using the RTT estimate as
    /// the retransmission-timeout proxy. Falls back to 1s before any sample
    /// has been recorded.
    pub fn probe_timeout(&self) -> Duration {
        let rto = self.rtt_estimate();
        if rto.is_zero() {
            return Duration::from_secs(1);
        }
        (rto * 2).clamp(Duration::from_secs(1), Duration::from_secs(3))
    }
}

pub fn shared(initial: u32, min: u32, max: u32) -> Arc<AimdLimiter> {
    Arc::new(AimdLimiter::new(initial, min, max))
}
