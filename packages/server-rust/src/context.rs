//! Per-call cancellation and deadlines.
//!
//! Every operation that talks to the backend takes a [`CallContext`]. The
//! context races backend I/O against its cancellation token and deadline,
//! so a caller that gives up gets [`BrokerError::Canceled`] or
//! [`BrokerError::DeadlineExceeded`] instead of waiting on the network.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{BrokerError, BrokerResult};

/// Cancellation token plus optional deadline carried by each call.
///
/// Cloning shares the token: cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().deadline_at(Instant::now() + timeout)
    }

    /// Returns this context with its deadline set to `deadline`.
    #[must_use]
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// A context cancelled together with this one, but also cancellable on its own.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancels this context and every clone and child of it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The underlying cancellation token.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fails if the context has already ended.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Canceled`] or [`BrokerError::DeadlineExceeded`].
    pub fn check(&self) -> BrokerResult<()> {
        if self.cancel.is_cancelled() {
            return Err(BrokerError::Canceled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(BrokerError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Runs a backend call, abandoning it if the context ends first.
    ///
    /// Backend failures map to [`BrokerError::BackendUnavailable`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Canceled`], [`BrokerError::DeadlineExceeded`],
    /// or the backend's error.
    pub async fn run<T, F>(&self, call: F) -> BrokerResult<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        self.check()?;
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(BrokerError::Canceled),
            () = deadline => Err(BrokerError::DeadlineExceeded),
            result = call => result.map_err(BrokerError::BackendUnavailable),
        }
    }
}
