//! Test support utilities shared across unit and integration tests.

use std::collections::VecDeque;
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::compute::{
    ComputeClient, ComputeError, ComputeFuture, EncryptedPassword, ImageOptions, ImageSnapshot,
    PasswordSnapshot, ServerSnapshot,
};
use crate::progress::ProgressSink;

/// A single call observed by [`ScriptedCompute`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ComputeCall {
    /// `get_server(id)`.
    GetServer(String),
    /// `get_server_password(id)`.
    GetServerPassword(String),
    /// `get_image(id)`.
    GetImage(String),
    /// `create_image(server_id, name, options)`.
    CreateImage {
        /// Source server.
        server_id: String,
        /// Requested image name.
        name: String,
        /// Description sent along.
        description: Option<String>,
    },
    /// `delete_image(id)`.
    DeleteImage(String),
}

/// FIFO of scripted results; once drained the last result repeats.
struct Responses<T> {
    queue: VecDeque<Result<T, ComputeError>>,
    last: Option<Result<T, ComputeError>>,
}

impl<T> Default for Responses<T> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            last: None,
        }
    }
}

impl<T: Clone> Responses<T> {
    fn push(&mut self, response: Result<T, ComputeError>) {
        self.queue.push_back(response);
    }

    fn next_or(&mut self, fallback: impl FnOnce() -> Result<T, ComputeError>) -> Result<T, ComputeError> {
        if let Some(response) = self.queue.pop_front() {
            self.last = Some(response.clone());
            return response;
        }
        self.last.clone().unwrap_or_else(fallback)
    }
}

#[derive(Default)]
struct ComputeState {
    servers: Responses<ServerSnapshot>,
    passwords: Responses<PasswordSnapshot>,
    images: Responses<ImageSnapshot>,
    created: Responses<String>,
    deleted: Responses<()>,
    calls: Vec<ComputeCall>,
}

/// Scripted [`ComputeClient`] that records every call.
///
/// Each operation replays its own queue in order and then keeps returning
/// the last scripted result. Unscripted image reads answer `NotFound` and
/// unscripted deletions succeed.
#[derive(Clone, Default)]
pub struct ScriptedCompute {
    state: Arc<Mutex<ComputeState>>,
}

fn not_found(resource: &str, id: &str) -> ComputeError {
    ComputeError::NotFound {
        resource: resource.to_owned(),
        id: id.to_owned(),
    }
}

impl ScriptedCompute {
    /// Creates a client with nothing scripted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ComputeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a server read.
    pub fn push_server(&self, response: Result<ServerSnapshot, ComputeError>) {
        self.state().servers.push(response);
    }

    /// Queues a password read.
    pub fn push_password(&self, response: Result<PasswordSnapshot, ComputeError>) {
        self.state().passwords.push(response);
    }

    /// Queues a password read that has not been issued yet.
    pub fn push_password_pending(&self) {
        self.push_password(Ok(PasswordSnapshot(None)));
    }

    /// Queues a password read returning `blob`.
    pub fn push_password_issued(&self, blob: &str) {
        self.push_password(Ok(PasswordSnapshot(Some(EncryptedPassword::new(blob)))));
    }

    /// Queues an image read.
    pub fn push_image(&self, response: Result<ImageSnapshot, ComputeError>) {
        self.state().images.push(response);
    }

    /// Queues an image read reporting `status`.
    pub fn push_image_status(&self, id: &str, name: &str, status: &str) {
        self.push_image(Ok(ImageSnapshot {
            id: id.to_owned(),
            name: name.to_owned(),
            status: status.to_owned(),
        }));
    }

    /// Queues the result of an image creation.
    pub fn push_created(&self, response: Result<String, ComputeError>) {
        self.state().created.push(response);
    }

    /// Queues the result of an image deletion.
    pub fn push_deleted(&self, response: Result<(), ComputeError>) {
        self.state().deleted.push(response);
    }

    /// Returns every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ComputeCall> {
        self.state().calls.clone()
    }

    /// Counts recorded calls matching `predicate`.
    #[must_use]
    pub fn count(&self, predicate: impl Fn(&ComputeCall) -> bool) -> usize {
        self.state().calls.iter().filter(|call| predicate(call)).count()
    }

    fn record<T: Clone>(
        &self,
        call: ComputeCall,
        pick: impl FnOnce(&mut ComputeState) -> Result<T, ComputeError>,
    ) -> Result<T, ComputeError> {
        let mut state = self.state();
        state.calls.push(call);
        pick(&mut state)
    }
}

impl ComputeClient for ScriptedCompute {
    fn get_server<'a>(&'a self, server_id: &'a str) -> ComputeFuture<'a, ServerSnapshot> {
        let result = self.record(ComputeCall::GetServer(server_id.to_owned()), |state| {
            state.servers.next_or(|| Err(not_found("server", server_id)))
        });
        Box::pin(async move { result })
    }

    fn get_server_password<'a>(
        &'a self,
        server_id: &'a str,
    ) -> ComputeFuture<'a, PasswordSnapshot> {
        let result = self.record(
            ComputeCall::GetServerPassword(server_id.to_owned()),
            |state| state.passwords.next_or(|| Ok(PasswordSnapshot(None))),
        );
        Box::pin(async move { result })
    }

    fn get_image<'a>(&'a self, image_id: &'a str) -> ComputeFuture<'a, ImageSnapshot> {
        let result = self.record(ComputeCall::GetImage(image_id.to_owned()), |state| {
            state.images.next_or(|| Err(not_found("image", image_id)))
        });
        Box::pin(async move { result })
    }

    fn create_image<'a>(
        &'a self,
        server_id: &'a str,
        name: &'a str,
        options: &'a ImageOptions,
    ) -> ComputeFuture<'a, String> {
        let call = ComputeCall::CreateImage {
            server_id: server_id.to_owned(),
            name: name.to_owned(),
            description: options.description.clone(),
        };
        let result = self.record(call, |state| {
            state.created.next_or(|| {
                Err(ComputeError::Http {
                    status: 500,
                    message: String::from("no scripted image creation"),
                })
            })
        });
        Box::pin(async move { result })
    }

    fn delete_image<'a>(&'a self, image_id: &'a str) -> ComputeFuture<'a, ()> {
        let result = self.record(ComputeCall::DeleteImage(image_id.to_owned()), |state| {
            state.deleted.next_or(|| Ok(()))
        });
        Box::pin(async move { result })
    }
}

/// Progress sink that keeps every line for later assertions.
#[derive(Clone, Debug, Default)]
pub struct RecordingProgress {
    messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingProgress {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lines recorded so far, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn report_progress(&self, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_owned());
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Holds [`ENV_LOCK`] and restores the touched variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets (`Some`) or clears (`None`) each variable while holding the lock.
    pub async fn apply(changes: &[(&str, Option<&str>)]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let previous = changes
            .iter()
            .map(|(key, value)| {
                let old = env::var_os(key);
                // SAFETY: environment mutation is serialised by `ENV_LOCK`.
                unsafe {
                    match value {
                        Some(value) => env::set_var(key, value),
                        None => env::remove_var(key),
                    }
                }
                ((*key).to_owned(), old)
            })
            .collect();
        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in self.previous.iter().rev() {
            // SAFETY: environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(value) => env::set_var(key, value),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
