//! Administrator password availability.

use crate::compute::{ComputeClient, EncryptedPassword, PasswordSnapshot, ServerHandle};
use crate::poll::Poller;
use crate::reference::{MachineSpec, SERVER_ID_KEY};

use super::{Driver, LifecycleError};

/// Polls until the control plane has issued an encrypted administrator
/// password for `server`.
///
/// An empty password and an absent one both mean "not issued yet". The blob
/// is returned as received; it is not validated here.
///
/// # Errors
///
/// Returns [`LifecycleError::PasswordTimeout`] when the poller's budget is
/// spent, [`LifecycleError::Cancelled`] on cancellation, and
/// [`LifecycleError::Compute`] for permanent read failures.
pub async fn wait_for_secret(
    client: &dyn ComputeClient,
    server: &ServerHandle,
    poller: &Poller<'_>,
) -> Result<EncryptedPassword, LifecycleError> {
    let snapshot = poller
        .wait_until(
            || client.get_server_password(&server.id),
            |snapshot: &PasswordSnapshot| snapshot.issued().is_some(),
        )
        .await
        .map_err(|err| {
            LifecycleError::from_poll(err, |timeout| LifecycleError::PasswordTimeout {
                server: server.name.clone(),
                server_id: server.id.clone(),
                elapsed: timeout.elapsed,
                max_wait: timeout.max_wait,
                last_error: timeout.last_error,
            })
        })?;
    Ok(snapshot.into_issued().unwrap_or_default())
}

impl Driver {
    /// Waits for the administrator password of the machine described by
    /// `machine`, using the driver's password cadence.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::MissingReference`] when the machine has no
    /// `server_id`, and the errors of [`wait_for_secret`] otherwise.
    pub async fn wait_for_admin_password(
        &self,
        machine: &MachineSpec,
    ) -> Result<EncryptedPassword, LifecycleError> {
        let server_id = machine
            .reference
            .server_id()?
            .ok_or_else(|| LifecycleError::missing_reference("machine", &machine.name, SERVER_ID_KEY))?;
        let server = ServerHandle::new(server_id, machine.name.as_str());
        let poller = self.poller(format!("{}'s admin password", server.name), self.password_poll);

        let password = wait_for_secret(self.client.as_ref(), &server, &poller).await?;
        tracing::info!(server = %server.id, "admin password issued");
        self.report(&format!("{}'s admin password is available!", server.name));
        Ok(password)
    }
}
