//! Core library for the `ruslan` readiness controller.
//!
//! The crate waits for OpenStack resources to become usable: a Windows
//! server's administrator password is polled until issued and decrypted into
//! WinRM connection parameters, and machine images are allocated, awaited
//! until `ACTIVE`, and destroyed. All waits share one bounded [`Poller`].

pub mod compute;
pub mod config;
pub mod lifecycle;
pub mod openstack;
pub mod poll;
pub mod progress;
pub mod reference;
pub mod reference_store;
pub mod test_support;
pub mod winrm;

pub use compute::{
    ComputeClient, ComputeError, EncryptedPassword, ImageHandle, ImageOptions, ImageSnapshot,
    PasswordSnapshot, ServerHandle, ServerSnapshot,
};
pub use config::{ConfigError, OpenStackConfig};
pub use lifecycle::{Driver, LifecycleError, wait_for_active, wait_for_secret};
pub use openstack::NovaClient;
pub use poll::{PollError, PollSpec, Poller};
pub use progress::{ProgressSink, TracingProgress};
pub use reference::{ImageReference, ImageSpec, MachineSpec, ReferenceError, ReferenceMap};
pub use reference_store::{ImageSpecStore, ReferenceStore, ReferenceStoreError};
pub use winrm::{ConnectionParams, PlaintextSecret, PrivateKey, WinrmError};
