//! Bounded exponential-backoff polling for asynchronous backend operations.
//!
//! Every provider waits for volumes, snapshots, and operations through
//! [`wait_with_backoff`] or [`wait_with_backoff_with_retries`]. Backends only
//! differ in the check they pass: how a status is read and which status
//! strings are terminal.

mod context;

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::time::sleep;
use tracing::debug;

pub use context::{CallContext, CancelHandle, CancelReason, CancelToken, cancel_pair};

/// Backoff policy between checks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Backoff {
    /// First delay, and the lower bound for jittered delays.
    pub min: Duration,
    /// Largest delay.
    pub max: Duration,
    /// Multiplier applied after each check.
    pub factor: u32,
    /// Draw each delay uniformly from `[min, current]`.
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(100),
            max: Duration::from_secs(10),
            factor: 2,
            jitter: false,
        }
    }
}

impl Backoff {
    /// Creates a policy without jitter.
    #[must_use]
    pub const fn new(min: Duration, max: Duration, factor: u32) -> Self {
        Self {
            min,
            max,
            factor,
            jitter: false,
        }
    }

    /// Enables jitter.
    #[must_use]
    pub const fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// The sequence of delays this policy produces.
    #[must_use]
    pub fn delays(&self) -> Delays {
        Delays {
            policy: *self,
            current: self.min.min(self.max),
        }
    }
}

/// Infinite iterator over backoff delays.
#[derive(Clone, Debug)]
pub struct Delays {
    policy: Backoff,
    current: Duration,
}

impl Iterator for Delays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let base = self.current;
        self.current = base
            .saturating_mul(self.policy.factor.max(1))
            .min(self.policy.max);
        if self.policy.jitter && base > self.policy.min {
            return Some(rand::thread_rng().gen_range(self.policy.min..=base));
        }
        Some(base)
    }
}

/// Why polling ended without the check reporting completion.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PollError<E> {
    /// The context was cancelled or its deadline passed.
    #[error("polling stopped: {0}")]
    Cancelled(CancelReason),
    /// The check returned an error.
    #[error("{0}")]
    Check(E),
}

/// Checks until it reports `true`, returns an error, or `ctx` ends.
///
/// The check runs once immediately unless `ctx` has already ended. Between
/// checks the loop sleeps for the next backoff delay, capped at the time
/// left on `ctx`. Every error from the check is terminal.
///
/// # Errors
///
/// Returns [`PollError::Check`] with the check's error, or
/// [`PollError::Cancelled`] as soon as `ctx` is cancelled or expires.
pub async fn wait_with_backoff<F, Fut, E>(
    ctx: &CallContext,
    backoff: &Backoff,
    check: F,
) -> Result<(), PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    wait_with_backoff_with_retries(ctx, backoff, 0, |_: &E| false, check).await
}

/// Like [`wait_with_backoff`], but errors for which `is_retryable` returns
/// `true` are retried up to `max_retries` times before they surface.
///
/// # Errors
///
/// Returns [`PollError::Check`] for non-retryable errors or once retries are
/// exhausted, and [`PollError::Cancelled`] when `ctx` ends.
pub async fn wait_with_backoff_with_retries<F, Fut, E, R>(
    ctx: &CallContext,
    backoff: &Backoff,
    max_retries: u32,
    is_retryable: R,
    mut check: F,
) -> Result<(), PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    R: Fn(&E) -> bool,
{
    let mut delays = backoff.delays();
    let mut retries = 0_u32;
    loop {
        // `select!` builds the check future before polling any branch.
        ctx.check().map_err(PollError::Cancelled)?;
        let outcome = tokio::select! {
            biased;
            reason = ctx.done() => return Err(PollError::Cancelled(reason)),
            outcome = check() => outcome,
        };
        match outcome {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(err) if retries < max_retries && is_retryable(&err) => {
                retries = retries.saturating_add(1);
                debug!(retries, max_retries, "retrying check after transient error");
            }
            Err(err) => return Err(PollError::Check(err)),
        }

        let delay = ctx.clamp(delays.next().unwrap_or(backoff.max));
        tokio::select! {
            biased;
            reason = ctx.done() => return Err(PollError::Cancelled(reason)),
            () = sleep(delay) => {}
        }
    }
}
