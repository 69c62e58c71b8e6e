use std::time::Duration;

use rand::Rng;

use crate::configs::{NodeOptions, ReconnectConfig};

/// Decides how long to wait before each reconnect attempt.
///
/// `next_delay` returning `None` means the policy is exhausted and the node
/// stays disconnected.
pub trait ReconnectPolicy: Send + Sync {
    fn next_delay(&mut self) -> Option<Duration>;

    /// Called after a successful connect.
    fn reset(&mut self);

    /// Attempts handed out since the last reset.
    fn attempts(&self) -> u32;
}

/// Same delay every time, forever.
pub struct FixedDelay {
    interval: Duration,
    attempt: u32,
}

impl FixedDelay {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            attempt: 0,
        }
    }
}

impl ReconnectPolicy for FixedDelay {
    fn next_delay(&mut self) -> Option<Duration> {
        self.attempt = self.attempt.saturating_add(1);
        Some(self.interval)
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn attempts(&self) -> u32 {
        self.attempt
    }
}

/// Doubles from `base` up to `max`, optionally adding up to 25% jitter.
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    jitter: bool,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter: false,
            attempt: 0,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

impl ReconnectPolicy for ExponentialBackoff {
    fn next_delay(&mut self) -> Option<Duration> {
        self.attempt = self.attempt.saturating_add(1);
        let factor = 2u32.saturating_pow((self.attempt - 1).min(16));
        let delay = self.base.saturating_mul(factor).min(self.max);

        if self.jitter && !delay.is_zero() {
            let extra = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 4);
            return Some((delay + Duration::from_millis(extra)).min(self.max));
        }
        Some(delay)
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn attempts(&self) -> u32 {
        self.attempt
    }
}

/// Caps any policy at `max_attempts` tries between successful connects.
pub struct Bounded<P> {
    inner: P,
    max_attempts: u32,
}

impl<P: ReconnectPolicy> Bounded<P> {
    pub fn new(inner: P, max_attempts: u32) -> Self {
        Self {
            inner,
            max_attempts,
        }
    }
}

impl<P: ReconnectPolicy> ReconnectPolicy for Bounded<P> {
    fn next_delay(&mut self) -> Option<Duration> {
        if self.inner.attempts() >= self.max_attempts {
            return None;
        }
        self.inner.next_delay()
    }

    fn reset(&mut self) {
        self.inner.reset();
    }

    fn attempts(&self) -> u32 {
        self.inner.attempts()
    }
}

/// Builds the policy described by a node's options.
pub fn policy_for(options: &NodeOptions) -> Box<dyn ReconnectPolicy> {
    let base = Duration::from_millis(options.reconnect_interval);
    match &options.reconnect {
        ReconnectConfig::Fixed { max_attempts: None } => Box::new(FixedDelay::new(base)),
        ReconnectConfig::Fixed {
            max_attempts: Some(max),
        } => Box::new(Bounded::new(FixedDelay::new(base), *max)),
        ReconnectConfig::Exponential {
            max_delay,
            max_attempts,
            jitter,
        } => {
            let backoff = ExponentialBackoff::new(base, Duration::from_millis(*max_delay))
                .with_jitter(*jitter);
            match max_attempts {
                Some(max) => Box::new(Bounded::new(backoff, *max)),
                None => Box::new(backoff),
            }
        }
    }
}
