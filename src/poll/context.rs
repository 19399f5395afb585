//! Cancellation and deadline signals carried by every provider call.

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};

/// Why a wait stopped before the awaited condition held.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CancelReason {
    /// The caller cancelled explicitly.
    Cancelled,
    /// The context deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("cancelled"),
            Self::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// Creates a linked cancellation handle and token.
///
/// Dropping the handle without calling [`CancelHandle::cancel`] leaves the
/// token uncancelled forever.
#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

/// Owner side of a cancellation signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancels every token linked to this handle.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observer side of a cancellation signal. Cheap to clone.
#[derive(Clone, Debug)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Returns `true` once the linked handle has cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the linked handle cancels.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

/// Deadline and cancellation for one logical operation.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
}

impl CallContext {
    /// A context that never cancels and has no deadline.
    #[must_use]
    pub const fn background() -> Self {
        Self {
            deadline: None,
            cancel: None,
        }
    }

    /// A context that expires `timeout` from now. A timeout too large to
    /// represent behaves like [`CallContext::background`].
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            cancel: None,
        }
    }

    /// A context that expires at `deadline`.
    #[must_use]
    pub const fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: None,
        }
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Derives a context that expires after `timeout` or at this context's
    /// deadline, whichever comes first, sharing the same cancellation token.
    #[must_use]
    pub fn bounded(&self, timeout: Duration) -> Self {
        let candidate = Instant::now().checked_add(timeout);
        let deadline = match (self.deadline, candidate) {
            (Some(current), Some(bound)) => Some(current.min(bound)),
            (current, bound) => current.or(bound),
        };
        Self {
            deadline,
            cancel: self.cancel.clone(),
        }
    }

    /// The deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` without a deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Caps `delay` at the time left before the deadline.
    #[must_use]
    pub fn clamp(&self, delay: Duration) -> Duration {
        self.remaining()
            .map_or(delay, |remaining| delay.min(remaining))
    }

    /// Reports whether the context has already ended, without waiting.
    ///
    /// # Errors
    ///
    /// Returns the [`CancelReason`] when the context is cancelled or expired.
    pub fn check(&self) -> Result<(), CancelReason> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(CancelReason::Cancelled);
        }
        if self
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
        {
            return Err(CancelReason::DeadlineExceeded);
        }
        Ok(())
    }

    /// Resolves when the context is cancelled or its deadline passes.
    /// Never resolves for [`CallContext::background`].
    pub async fn done(&self) -> CancelReason {
        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            () = cancelled => CancelReason::Cancelled,
            () = expired => CancelReason::DeadlineExceeded,
        }
    }
}
