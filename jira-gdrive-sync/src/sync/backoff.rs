use std::time::Duration;

use rand::Rng;

/// Wait before retry `attempt` (zero-based): `base * 2^attempt`, capped at
/// `max`. With jitter the wait is drawn uniformly from `0..=step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    /// 1s, 2s, 4s, 8s, 16s.
    pub fn for_uploads(jitter: bool) -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(16), jitter)
    }

    pub fn step(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |step| step.min(self.max))
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        if !self.jitter {
            return self.step(attempt);
        }
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let step = self.step(attempt);
        if !self.jitter {
            return step;
        }
        let ceiling = u64::try_from(step.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rng.gen_range(0..=ceiling))
    }
}
