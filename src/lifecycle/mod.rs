//! Readiness policies for servers and images.
//!
//! [`Driver`] ties a [`ComputeClient`] to the poll defaults, the progress sink
//! and a cancellation token, and exposes the image state transitions and the
//! Windows connection flow on top of the shared [`Poller`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

mod connect;
mod error;
mod image;
mod password;

pub use error::LifecycleError;
pub use image::wait_for_active;
pub use password::wait_for_secret;

use crate::compute::ComputeClient;
use crate::poll::{PollSpec, Poller};
use crate::progress::{ProgressSink, TracingProgress};

/// Password wait defaults: every 10 s for up to 15 minutes.
pub const PASSWORD_POLL: PollSpec = PollSpec::fixed(10, 900);
/// Image activation defaults: every 10 s for up to 5 minutes.
pub const IMAGE_POLL: PollSpec = PollSpec::fixed(10, 300);

/// Version recorded in image references.
pub const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runs lifecycle operations against one compute endpoint.
#[derive(Clone)]
pub struct Driver {
    client: Arc<dyn ComputeClient>,
    driver_url: String,
    creator: Option<String>,
    password_poll: PollSpec,
    image_poll: PollSpec,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl Driver {
    /// Creates a driver with default poll specifications, progress routed to
    /// `tracing`, and a token nobody cancels.
    #[must_use]
    pub fn new(client: Arc<dyn ComputeClient>, driver_url: impl Into<String>) -> Self {
        Self {
            client,
            driver_url: driver_url.into(),
            creator: None,
            password_poll: PASSWORD_POLL,
            image_poll: IMAGE_POLL,
            progress: Arc::new(TracingProgress),
            cancel: CancellationToken::new(),
        }
    }

    /// Records `creator` in references of images this driver allocates.
    #[must_use]
    pub fn with_creator(mut self, creator: Option<String>) -> Self {
        self.creator = creator.filter(|name| !name.trim().is_empty());
        self
    }

    /// Overrides the password wait cadence.
    #[must_use]
    pub const fn with_password_poll(mut self, spec: PollSpec) -> Self {
        self.password_poll = spec;
        self
    }

    /// Overrides the image wait cadence.
    #[must_use]
    pub const fn with_image_poll(mut self, spec: PollSpec) -> Self {
        self.image_poll = spec;
        self
    }

    /// Routes progress lines to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Aborts in-flight waits when `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// URL identifying the compute endpoint in references and messages.
    #[must_use]
    pub fn driver_url(&self) -> &str {
        &self.driver_url
    }

    /// Account recorded as image creator.
    #[must_use]
    pub fn creator(&self) -> Option<&str> {
        self.creator.as_deref()
    }

    /// Password wait cadence in force.
    #[must_use]
    pub const fn password_poll(&self) -> PollSpec {
        self.password_poll
    }

    /// Image wait cadence in force.
    #[must_use]
    pub const fn image_poll(&self) -> PollSpec {
        self.image_poll
    }

    fn poller(&self, subject: String, spec: PollSpec) -> Poller<'_> {
        Poller::new(subject, spec, &*self.progress, &self.cancel)
    }

    fn report(&self, message: &str) {
        self.progress.report_progress(message);
    }
}

#[cfg(test)]
mod tests;
