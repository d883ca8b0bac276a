//! Compute-service abstraction consumed by the readiness policies.
//!
//! The lifecycle code never talks to a cloud API directly. It reads fresh
//! snapshots through [`ComputeClient`], which keeps the policies testable with
//! scripted doubles and lets the OpenStack adapter stay a thin transport.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Identifies a server the caller has already provisioned.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerHandle {
    /// Provider assigned server identifier.
    pub id: String,
    /// Human readable machine name used in progress messages.
    pub name: String,
}

impl ServerHandle {
    /// Creates a handle, trimming surrounding whitespace from both fields.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into().trim().to_owned(),
            name: name.into().trim().to_owned(),
        }
    }
}

/// Identifies a machine image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageHandle {
    /// Provider assigned image identifier.
    pub id: String,
    /// Human readable image name used in progress messages.
    pub name: String,
}

impl ImageHandle {
    /// Creates a handle, trimming surrounding whitespace from both fields.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into().trim().to_owned(),
            name: name.into().trim().to_owned(),
        }
    }
}

/// Point-in-time view of a polled resource.
pub trait Snapshot {
    /// Status token reported by the provider for progress messages.
    fn status(&self) -> &str;
}

/// Point-in-time view of a server and its addresses.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerSnapshot {
    /// Provider server identifier.
    pub id: String,
    /// Server name as reported by the provider.
    pub name: String,
    /// Provider status token (for example `ACTIVE`).
    pub status: String,
    /// Address on the tenant network, if any.
    pub private_ip: Option<String>,
    /// Floating or access address reachable from outside, if any.
    pub public_ip: Option<String>,
}

impl Snapshot for ServerSnapshot {
    fn status(&self) -> &str {
        &self.status
    }
}

/// Point-in-time view of a machine image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageSnapshot {
    /// Provider image identifier.
    pub id: String,
    /// Image name as reported by the provider.
    pub name: String,
    /// Provider status token (`SAVING`, `ACTIVE`, `DELETED`, ...).
    pub status: String,
}

impl Snapshot for ImageSnapshot {
    fn status(&self) -> &str {
        &self.status
    }
}

/// Encrypted administrator password exactly as the control plane returns it.
///
/// The value is base64 text; an empty string means the password has not been
/// issued yet.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EncryptedPassword(String);

impl EncryptedPassword {
    /// Wraps the raw base64 text.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw base64 text.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns `true` when no password has been issued yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

/// Result of a single password read. Absent and empty are equivalent.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PasswordSnapshot(pub Option<EncryptedPassword>);

impl PasswordSnapshot {
    /// Returns the password when it has been issued.
    #[must_use]
    pub fn issued(&self) -> Option<&EncryptedPassword> {
        self.0.as_ref().filter(|password| !password.is_empty())
    }

    /// Consumes the snapshot, returning the issued password if any.
    #[must_use]
    pub fn into_issued(self) -> Option<EncryptedPassword> {
        self.0.filter(|password| !password.is_empty())
    }
}

impl Snapshot for PasswordSnapshot {
    fn status(&self) -> &str {
        if self.issued().is_some() {
            "available"
        } else {
            "pending"
        }
    }
}

/// Options passed along with an image creation request.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ImageOptions {
    /// Free-form description stored in the image metadata.
    pub description: Option<String>,
}

/// Errors surfaced by compute clients.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ComputeError {
    /// The addressed resource does not exist (any more).
    #[error("{resource} {id} not found")]
    NotFound {
        /// Resource kind, for example `image`.
        resource: String,
        /// Identifier that was requested.
        id: String,
    },
    /// The API answered with a non-success status.
    #[error("compute API returned {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },
    /// The request could not be sent or the response could not be read.
    #[error("compute transport error: {message}")]
    Transport {
        /// Transport level failure message.
        message: String,
    },
    /// The response body did not have the expected shape.
    #[error("failed to decode compute response: {message}")]
    Decode {
        /// Parser error message.
        message: String,
    },
}

impl ComputeError {
    /// Returns `true` when retrying cannot help because the resource is gone
    /// or the request itself was rejected.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Http { status, .. } => matches!(*status, 400 | 401 | 403 | 405),
            Self::Transport { .. } | Self::Decode { .. } => false,
        }
    }
}

/// Future returned by compute operations.
pub type ComputeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ComputeError>> + Send + 'a>>;

/// Narrow interface to the cloud compute service.
///
/// Implementations must be safe to share between concurrent waits on
/// different resources.
pub trait ComputeClient: Send + Sync {
    /// Reads a server and its addresses.
    fn get_server<'a>(&'a self, server_id: &'a str) -> ComputeFuture<'a, ServerSnapshot>;

    /// Reads the encrypted administrator password of a server.
    fn get_server_password<'a>(&'a self, server_id: &'a str)
    -> ComputeFuture<'a, PasswordSnapshot>;

    /// Reads an image; a missing image yields [`ComputeError::NotFound`].
    fn get_image<'a>(&'a self, image_id: &'a str) -> ComputeFuture<'a, ImageSnapshot>;

    /// Snapshots a running server into a new image and returns its identifier.
    fn create_image<'a>(
        &'a self,
        server_id: &'a str,
        name: &'a str,
        options: &'a ImageOptions,
    ) -> ComputeFuture<'a, String>;

    /// Requests deletion of an image.
    fn delete_image<'a>(&'a self, image_id: &'a str) -> ComputeFuture<'a, ()>;
}
