//! Capped exponential backoff.
//!
//! [`Backoff`] is an infinite iterator of delays in seconds. The first value is
//! always `0` so the first attempt after construction (or after [`Backoff::reset`])
//! happens immediately. After that it yields `factor * base^n` for increasing
//! `n` while the value stays below `max_value`; once the curve reaches the cap it
//! keeps yielding `max_value` minus up to 10% random jitter forever.

use std::time::Duration;

/// Fraction of `max_value` that saturated delays may be reduced by.
const JITTER_RATIO: f64 = 0.1;

/// Largest `max_value` accepted by [`check_params`] (one day).
pub const MAX_BACKOFF_SECONDS: f64 = 24.0 * 60.0 * 60.0;

/// Reject parameters that would make the curve meaningless or unbounded.
pub fn check_params(base: f64, factor: f64, max_value: f64) -> Result<(), String> {
    if !(base.is_finite() && base >= 1.0) {
        return Err(format!("backoff base must be a finite number >= 1, got {base}"));
    }
    if !(factor.is_finite() && factor > 0.0) {
        return Err(format!("backoff factor must be positive and finite, got {factor}"));
    }
    if !(max_value > 0.0 && max_value <= MAX_BACKOFF_SECONDS) {
        return Err(format!(
            "backoff max_value must be in (0, {MAX_BACKOFF_SECONDS}], got {max_value}"
        ));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Backoff {
    base: f64,
    factor: f64,
    max_value: f64,
    n: i32,
    started: bool,
    saturated: bool,
}

impl Backoff {
    pub fn new(base: f64, factor: f64, max_value: f64) -> Self {
        Self {
            base,
            factor,
            max_value,
            n: 0,
            started: false,
            saturated: false,
        }
    }

    /// Return to the initial state; the next delay will be `0` again.
    pub fn reset(&mut self) {
        self.n = 0;
        self.started = false;
        self.saturated = false;
    }

    /// Next delay as a [`Duration`], saturating at [`Duration::MAX`].
    pub fn next_delay(&mut self) -> Duration {
        let secs = self.next().unwrap_or(self.max_value);
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
    }

    pub fn max_value(&self) -> f64 {
        self.max_value
    }

    fn jittered_max(&self) -> f64 {
        let jitter: f64 = rand::random();
        self.max_value * (1.0 - JITTER_RATIO) + jitter * self.max_value * JITTER_RATIO
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(2.0, 1.0, 10.0)
    }
}

impl Iterator for Backoff {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        if !self.started {
            self.started = true;
            return Some(0.0);
        }

        if !self.saturated {
            let value = self.factor * self.base.powi(self.n);
            if value < self.max_value {
                self.n += 1;
                return Some(value);
            }
            self.saturated = true;
        }

        Some(self.jittered_max())
    }
}
