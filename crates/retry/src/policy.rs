//! Retry policies and the delay curve.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackoffStrategy {
    /// base * multiplier^attempt
    #[default]
    Exponential,
    /// base * (attempt + 1)
    Linear,
    /// Same delay every time.
    Fixed,
    /// base * fib(attempt), with fib(0) = fib(1) = 1
    Fibonacci,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero behaves like one.
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
    /// Upper bound applied before jitter.
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    /// Fraction of the delay used as symmetric jitter amplitude.
    pub jitter_range: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
            jitter_range: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Page loads: a few exponential attempts.
    pub fn navigation() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            ..Self::default()
        }
    }

    /// Field interaction: quick linear retries.
    pub fn form_fill() -> Self {
        Self {
            max_attempts: 3,
            strategy: BackoffStrategy::Linear,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            ..Self::default()
        }
    }

    pub fn file_upload() -> Self {
        Self {
            max_attempts: 2,
            strategy: BackoffStrategy::Fixed,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(2),
            ..Self::default()
        }
    }

    /// Remote calls: more attempts, longer ceiling.
    pub fn network() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before retrying after the zero-based `attempt` failed.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let raw = match self.strategy {
            BackoffStrategy::Exponential => {
                base * self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32)
            }
            BackoffStrategy::Linear => base * (f64::from(attempt) + 1.0),
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Fibonacci => base * fibonacci(attempt),
        };

        let mut secs = raw.min(self.max_delay.as_secs_f64());
        if self.jitter && self.jitter_range > 0.0 && secs > 0.0 {
            let amplitude = secs * self.jitter_range;
            secs += rng.gen_range(-amplitude..=amplitude);
        }
        if !secs.is_finite() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(secs)
    }
}

fn fibonacci(n: u32) -> f64 {
    let (mut a, mut b) = (1.0_f64, 1.0_f64);
    for _ in 0..n {
        let next = a + b;
        a = b;
        b = next;
        if a.is_infinite() {
            break;
        }
    }
    a
}
