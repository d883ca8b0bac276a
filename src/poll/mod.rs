//! Bounded polling against an eventually consistent control plane.
//!
//! A [`Poller`] re-reads a resource at a fixed cadence until a predicate holds,
//! the wait budget is spent, or the caller cancels. Elapsed time advances by
//! the configured interval on every iteration rather than by wall-clock
//! measurement, so the total blocked time can exceed `max_wait` by less than
//! one interval.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::compute::{ComputeError, Snapshot};
use crate::progress::ProgressSink;

const UNKNOWN_STATUS: &str = "unknown";

/// Interval and maximum wait for a bounded retry loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollSpec {
    interval: Duration,
    max_wait: Duration,
}

impl PollSpec {
    /// Creates a poll specification.
    ///
    /// # Errors
    ///
    /// Returns [`PollSpecError::ZeroInterval`] when `interval` is zero.
    pub const fn new(interval: Duration, max_wait: Duration) -> Result<Self, PollSpecError> {
        if interval.is_zero() {
            return Err(PollSpecError::ZeroInterval);
        }
        Ok(Self { interval, max_wait })
    }

    /// Creates a poll specification from whole seconds.
    ///
    /// # Errors
    ///
    /// Returns [`PollSpecError::ZeroInterval`] when `interval_secs` is zero.
    pub const fn from_secs(interval_secs: u64, max_wait_secs: u64) -> Result<Self, PollSpecError> {
        Self::new(
            Duration::from_secs(interval_secs),
            Duration::from_secs(max_wait_secs),
        )
    }

    /// Builds a compile-time default. `interval_secs` must be non-zero.
    pub(crate) const fn fixed(interval_secs: u64, max_wait_secs: u64) -> Self {
        Self {
            interval: Duration::from_secs(interval_secs),
            max_wait: Duration::from_secs(max_wait_secs),
        }
    }

    /// Delay between two reads.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Accumulated wait after which polling gives up.
    #[must_use]
    pub const fn max_wait(&self) -> Duration {
        self.max_wait
    }
}

/// Errors raised when constructing a [`PollSpec`].
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum PollSpecError {
    /// A zero interval would spin against the control plane.
    #[error("poll interval must be greater than zero")]
    ZeroInterval,
}

/// Reasons a wait ended without the resource becoming ready.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PollError {
    /// The wait budget was spent while the predicate was still false.
    #[error("timed out waiting for {subject} after {elapsed:?} (max {max_wait:?}, last status {last_status})")]
    Timeout {
        /// Description of what was being waited for.
        subject: String,
        /// Accumulated wait when polling stopped.
        elapsed: Duration,
        /// Configured maximum wait.
        max_wait: Duration,
        /// Status reported by the last successful read.
        last_status: String,
        /// Last transient read failure, if the final reads failed.
        last_error: Option<String>,
    },
    /// The caller cancelled the wait.
    #[error("wait for {subject} cancelled after {elapsed:?}")]
    Cancelled {
        /// Description of what was being waited for.
        subject: String,
        /// Accumulated wait when the cancellation was observed.
        elapsed: Duration,
    },
    /// A read failed in a way retrying cannot fix.
    #[error("stopped waiting for {subject}: {source}")]
    Fetch {
        /// Description of what was being waited for.
        subject: String,
        /// Permanent compute failure.
        #[source]
        source: ComputeError,
    },
}

/// Runs bounded waits for a single subject.
///
/// The poller keeps no state between calls; every wait starts from zero.
pub struct Poller<'a> {
    subject: String,
    spec: PollSpec,
    progress: &'a dyn ProgressSink,
    cancel: &'a CancellationToken,
}

#[derive(Debug)]
struct Observation {
    status: String,
    error: Option<String>,
}

impl Default for Observation {
    fn default() -> Self {
        Self {
            status: String::from(UNKNOWN_STATUS),
            error: None,
        }
    }
}

impl<'a> Poller<'a> {
    /// Creates a poller for `subject`, reporting to `progress` and honouring
    /// `cancel`.
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        spec: PollSpec,
        progress: &'a dyn ProgressSink,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            subject: subject.into(),
            spec,
            progress,
            cancel,
        }
    }

    /// Subject description used in progress lines and errors.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Poll specification in force.
    #[must_use]
    pub const fn spec(&self) -> PollSpec {
        self.spec
    }

    /// Forwards a line to the progress sink this poller reports to.
    pub fn report(&self, message: &str) {
        self.progress.report_progress(message);
    }

    /// Fetches until `ready` holds for a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Timeout`] when the budget is spent,
    /// [`PollError::Cancelled`] when the token fires, and [`PollError::Fetch`]
    /// when a read fails permanently.
    pub async fn wait_until<S, F, Fut, R>(&self, fetch: F, ready: R) -> Result<S, PollError>
    where
        S: Snapshot,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<S, ComputeError>>,
        R: Fn(&S) -> bool,
    {
        self.wait_until_from(None, fetch, ready).await
    }

    /// Like [`Poller::wait_until`], but evaluates `initial` first instead of
    /// issuing the opening read when the caller already holds a fresh
    /// snapshot.
    ///
    /// # Errors
    ///
    /// See [`Poller::wait_until`].
    pub async fn wait_until_from<S, F, Fut, R>(
        &self,
        initial: Option<S>,
        mut fetch: F,
        ready: R,
    ) -> Result<S, PollError>
    where
        S: Snapshot,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<S, ComputeError>>,
        R: Fn(&S) -> bool,
    {
        let mut observation = Observation::default();
        let opening = match initial {
            Some(snapshot) => {
                snapshot.status().clone_into(&mut observation.status);
                Some(snapshot)
            }
            None => self.observe(&mut fetch, &mut observation).await?,
        };
        if let Some(snapshot) = opening.filter(|snapshot| ready(snapshot)) {
            return Ok(snapshot);
        }

        tracing::info!(subject = %self.subject, max_wait = ?self.spec.max_wait, "waiting");
        self.progress
            .report_progress(&format!("waiting for {} ...", self.subject));

        let mut elapsed = Duration::ZERO;
        loop {
            if elapsed >= self.spec.max_wait {
                return Err(PollError::Timeout {
                    subject: self.subject.clone(),
                    elapsed,
                    max_wait: self.spec.max_wait,
                    last_status: observation.status,
                    last_error: observation.error,
                });
            }
            if self.cancel.is_cancelled() {
                return Err(self.cancelled(elapsed));
            }

            self.progress.report_progress(&format!(
                "{elapsed}/{max}s elapsed -- sleeping {interval} seconds for {subject} (currently {status})",
                elapsed = elapsed.as_secs(),
                max = self.spec.max_wait.as_secs(),
                interval = self.spec.interval.as_secs(),
                subject = self.subject,
                status = observation.status,
            ));

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(self.cancelled(elapsed)),
                () = sleep(self.spec.interval) => {}
            }
            elapsed = elapsed.saturating_add(self.spec.interval);

            if let Some(snapshot) = self.observe(&mut fetch, &mut observation).await?
                && ready(&snapshot)
            {
                tracing::info!(subject = %self.subject, ?elapsed, "ready");
                return Ok(snapshot);
            }
        }
    }

    async fn observe<S, F, Fut>(
        &self,
        fetch: &mut F,
        observation: &mut Observation,
    ) -> Result<Option<S>, PollError>
    where
        S: Snapshot,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<S, ComputeError>>,
    {
        match fetch().await {
            Ok(snapshot) => {
                snapshot.status().clone_into(&mut observation.status);
                observation.error = None;
                Ok(Some(snapshot))
            }
            Err(source) if source.is_permanent() => Err(PollError::Fetch {
                subject: self.subject.clone(),
                source,
            }),
            Err(err) => {
                tracing::warn!(subject = %self.subject, error = %err, "read failed; retrying at next tick");
                self.progress.report_progress(&format!(
                    "reading {} failed: {err}; retrying",
                    self.subject
                ));
                observation.error = Some(err.to_string());
                Ok(None)
            }
        }
    }

    fn cancelled(&self, elapsed: Duration) -> PollError {
        PollError::Cancelled {
            subject: self.subject.clone(),
            elapsed,
        }
    }
}
