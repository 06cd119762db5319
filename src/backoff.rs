//! Exponential backoff with jitter and a cap.
//!
//! Grounded on `grpc_core::BackOff` (`src/core/util/backoff.h` in
//! `examples/original_source/`) for the state machine shape (first call
//! returns `initial`, subsequent calls multiply and clamp, `reset()`
//! rewinds to the first-call behavior) and on
//! `siumai-core/src/retry/policy.rs`'s `add_jitter` for the idiomatic
//! Rust jitter implementation (`rand::Rng::gen_range` over `±jitter *
//! current`).

use std::time::Duration;

use rand::Rng;

/// Static configuration for a [`Backoff`] instance.
#[derive(Debug, Clone, Copy)]
pub struct BackoffOptions {
    pub initial: Duration,
    pub multiplier: f64,
    pub jitter: f64,
    pub max: Duration,
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(1000),
            multiplier: 1.6,
            jitter: 0.2,
            max: Duration::from_secs(120),
        }
    }
}

/// Mutable backoff state. `next_attempt_delay` is not idempotent: each
/// call advances the internal delay, matching `BackOff::NextAttemptDelay`.
#[derive(Debug, Clone)]
pub struct Backoff {
    options: BackoffOptions,
    current: Duration,
    initial_call: bool,
}

impl Backoff {
    pub fn new(options: BackoffOptions) -> Self {
        Self {
            current: options.initial,
            options,
            initial_call: true,
        }
    }

    /// Returns the delay before the next attempt, advancing internal state.
    ///
    /// The first call after construction or after [`Backoff::reset`]
    /// returns `initial` unperturbed by jitter (matching the "reset
    /// restores the first-call behaviour" invariant). Subsequent calls
    /// return `min(current * multiplier, max)` perturbed by `±jitter *
    /// current`.
    pub fn next_attempt_delay(&mut self) -> Duration {
        if self.initial_call {
            self.initial_call = false;
            self.current = self.options.initial;
            return self.current;
        }
        let next_millis = (self.current.as_secs_f64() * self.options.multiplier)
            .min(self.options.max.as_secs_f64());
        self.current = Duration::from_secs_f64(next_millis);
        jittered(self.current, self.options.jitter)
    }

    /// Restores first-call behavior: the next [`Backoff::next_attempt_delay`]
    /// call returns `initial`.
    pub fn reset(&mut self) {
        self.initial_call = true;
        self.current = self.options.initial;
    }
}

fn jittered(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let base = delay.as_secs_f64();
    let spread = base * jitter;
    let perturbed = rand::thread_rng().gen_range((base - spread).max(0.0)..=(base + spread));
    Duration::from_secs_f64(perturbed)
}
