use std::time::Duration;

use rand::Rng;

use crate::config::MAX_BACKOFF_CAP;

const MIN_BASE: Duration = Duration::from_millis(1);

/// Exponential reconnect delay with multiplicative jitter.
///
/// `delay(n) = min(cap, base * 2^n) * U(0.5, 1.5)`.
///
/// The base is at least one millisecond and the cap at most
/// [`MAX_BACKOFF_CAP`], whatever the caller asks for.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    pub jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        let base = base.clamp(MIN_BASE, MAX_BACKOFF_CAP);
        Self {
            base,
            cap: cap.clamp(base, MAX_BACKOFF_CAP),
            jitter: true,
        }
    }

    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Un-jittered delay for the given retry count.
    pub fn nominal(&self, retry_count: u32) -> Duration {
        let exponent = 2_f64.powi(retry_count.min(32) as i32);
        let secs = (self.base.as_secs_f64() * exponent).min(self.cap.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    pub fn delay(&self, retry_count: u32) -> Duration {
        let nominal = self.nominal(retry_count);
        if !self.jitter {
            return nominal;
        }
        let factor = rand::thread_rng().gen_range(0.5..1.5);
        nominal.mul_f64(factor)
    }
}
