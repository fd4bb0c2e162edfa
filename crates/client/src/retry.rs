//! # Retry with Exponential Backoff
//!
//! Dipakai SDK untuk mengulang submission saat transport gagal.
//!
//! ## Design
//!
//! - Exponential backoff: `delay = initial_delay_ms * multiplier^(attempt-1)`
//! - Clamped ke `max_delay_ms`
//! - Deterministic jitter: `+ (attempt * 7919 + 104729) % (base/4 + 1)`
//! - Error non-retryable ([`Retryable::is_retryable`] = false) langsung berhenti
//!
//! ## Invariants
//!
//! 1. `1 <= attempts <= max(max_retries, 1)`
//! 2. `delay <= max_delay_ms`
//! 3. Tidak ada retry tanpa sleep kecuali delay 0

use std::future::Future;
use std::time::Duration;

use tracing::warn;

// ════════════════════════════════════════════════════════════════════════════
// TYPES
// ════════════════════════════════════════════════════════════════════════════

/// Klasifikasi error untuk retry.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Jumlah attempt maksimum, termasuk yang pertama. 0 diperlakukan sebagai 1.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 250,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Satu attempt, tanpa retry.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 1,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryResult<T, E> {
    Success { value: T, attempts: u32 },
    /// Attempt habis atau error non-retryable.
    Exhausted { last_error: E, attempts: u32 },
}

impl<T, E> RetryResult<T, E> {
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            RetryResult::Success { attempts, .. } | RetryResult::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryResult::Success { value, .. } => Ok(value),
            RetryResult::Exhausted { last_error, .. } => Err(last_error),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// DELAY
// ════════════════════════════════════════════════════════════════════════════

/// Delay (ms) sebelum retry setelah attempt ke-`attempt` (1-indexed).
#[must_use]
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let base = (config.initial_delay_ms as f64) * config.backoff_multiplier.powi(exponent);

    let max = config.max_delay_ms as f64;
    let clamped = if base.is_nan() || base < 0.0 {
        0.0
    } else if base > max {
        max
    } else {
        base
    };
    let mut delay = (clamped as u64).min(config.max_delay_ms);

    if config.jitter {
        let quarter = delay / 4;
        if quarter > 0 {
            let jitter = (u64::from(attempt).wrapping_mul(7919).wrapping_add(104_729)) % (quarter + 1);
            delay = delay.saturating_add(jitter).min(config.max_delay_ms);
        }
    }

    delay
}

// ════════════════════════════════════════════════════════════════════════════
// RETRY LOOP
// ════════════════════════════════════════════════════════════════════════════

/// Jalankan `operation` sampai sukses, error non-retryable, atau attempt habis.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> RetryResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let max_attempts = config.max_retries.max(1);
    let mut attempts: u32 = 0;

    loop {
        attempts = attempts.saturating_add(1);

        match operation().await {
            Ok(value) => return RetryResult::Success { value, attempts },
            Err(e) => {
                if !e.is_retryable() || attempts >= max_attempts {
                    return RetryResult::Exhausted { last_error: e, attempts };
                }

                let delay_ms = compute_delay(config, attempts);
                warn!(attempt = attempts, max_attempts, delay_ms, error = %e, "retrying request");
                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════
