//! Error types for the lifecycle policies.

use std::time::Duration;

use thiserror::Error;

use crate::compute::ComputeError;
use crate::poll::PollError;
use crate::reference::ReferenceError;
use crate::winrm::WinrmError;

/// Errors raised by lifecycle operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LifecycleError {
    /// The administrator password was not issued within the wait budget.
    #[error(
        "admin password for server {server} ({server_id}) never became available after {elapsed:?} (max {max_wait:?}){}",
        last_error_suffix(.last_error)
    )]
    PasswordTimeout {
        /// Machine name.
        server: String,
        /// Provider server identifier.
        server_id: String,
        /// Accumulated wait.
        elapsed: Duration,
        /// Configured maximum wait.
        max_wait: Duration,
        /// Last transient read failure, if any.
        last_error: Option<String>,
    },
    /// The image did not reach `ACTIVE` within the wait budget.
    #[error(
        "image {image_id} on {driver_url} did not become ready within {max_wait:?} (waited {elapsed:?}, last status {last_status}){}",
        last_error_suffix(.last_error)
    )]
    ImageTimeout {
        /// Provider image identifier.
        image_id: String,
        /// Driver URL the image lives behind.
        driver_url: String,
        /// Accumulated wait.
        elapsed: Duration,
        /// Configured maximum wait.
        max_wait: Duration,
        /// Status reported by the last successful read.
        last_status: String,
        /// Last transient read failure, if any.
        last_error: Option<String>,
    },
    /// The caller cancelled a wait.
    #[error("wait for {subject} cancelled after {elapsed:?}")]
    Cancelled {
        /// What was being waited for.
        subject: String,
        /// Accumulated wait when the cancellation was observed.
        elapsed: Duration,
    },
    /// The requested resource does not exist.
    #[error("cannot ready {resource} '{name}': it does not exist")]
    NotFound {
        /// Resource kind.
        resource: String,
        /// Spec name.
        name: String,
    },
    /// Allocation found an existing resource and refused to replace it.
    #[error("image '{name}' already exists as {image_id}; refusing to create it again")]
    Conflict {
        /// Spec name.
        name: String,
        /// Identifier of the existing image.
        image_id: String,
    },
    /// A required reference key is missing from a spec.
    #[error("{spec} '{name}' has no '{key}' in its reference")]
    MissingReference {
        /// Spec kind, `machine` or `image`.
        spec: String,
        /// Spec name.
        name: String,
        /// Missing key.
        key: String,
    },
    /// A reference value had the wrong type.
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    /// Compute service failure.
    #[error(transparent)]
    Compute(#[from] ComputeError),
    /// Connection assembly failure.
    #[error(transparent)]
    Winrm(#[from] WinrmError),
}

impl LifecycleError {
    pub(crate) fn missing_reference(spec: &str, name: &str, key: &str) -> Self {
        Self::MissingReference {
            spec: spec.to_owned(),
            name: name.to_owned(),
            key: key.to_owned(),
        }
    }

    /// Maps the non-timeout poll outcomes shared by every wait.
    pub(crate) fn from_poll(err: PollError, on_timeout: impl FnOnce(PollTimeout) -> Self) -> Self {
        match err {
            PollError::Timeout {
                elapsed,
                max_wait,
                last_status,
                last_error,
                ..
            } => on_timeout(PollTimeout {
                elapsed,
                max_wait,
                last_status,
                last_error,
            }),
            PollError::Cancelled { subject, elapsed } => Self::Cancelled { subject, elapsed },
            PollError::Fetch { source, .. } => Self::Compute(source),
        }
    }
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_deref()
        .map(|err| format!("; last error: {err}"))
        .unwrap_or_default()
}

/// Timeout details handed to the policy that owns the wait.
#[derive(Debug)]
pub(crate) struct PollTimeout {
    pub(crate) elapsed: Duration,
    pub(crate) max_wait: Duration,
    pub(crate) last_status: String,
    pub(crate) last_error: Option<String>,
}
