//! Windows remote management connection flow.

use crate::reference::{
    MachineSpec, SERVER_ID_KEY, USE_PRIVATE_IP_KEY, WINRM_PORT_KEY, WINRM_USERNAME_KEY,
};
use crate::winrm::{
    self, ConnectionParams, DEFAULT_WINRM_PORT, EndpointPreference, PrivateKey, decrypt_password,
};

use super::{Driver, LifecycleError};

impl Driver {
    /// Builds WinRM connection parameters for `machine`.
    ///
    /// Reads the server, picks its address from the `use_private_ip_for_ssh`
    /// preference, applies the `winrm_port` and `winrm.username` overrides,
    /// waits for the administrator password and decrypts it with `key`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::MissingReference`] when the machine has no
    /// `server_id`, [`LifecycleError::Winrm`] when no address is usable or the
    /// password cannot be decrypted, and the password wait errors otherwise.
    pub async fn connect_winrm(
        &self,
        machine: &MachineSpec,
        key: &PrivateKey,
    ) -> Result<ConnectionParams, LifecycleError> {
        let reference = &machine.reference;
        let server_id = reference
            .server_id()?
            .ok_or_else(|| LifecycleError::missing_reference("machine", &machine.name, SERVER_ID_KEY))?;
        let preference = EndpointPreference {
            prefer_private: reference.get_bool(USE_PRIVATE_IP_KEY)?.unwrap_or(false),
        };
        let port = reference.get_port(WINRM_PORT_KEY)?.unwrap_or(DEFAULT_WINRM_PORT);
        let username = reference.get_str(WINRM_USERNAME_KEY)?;

        let mut server = self.client.get_server(server_id).await?;
        machine.name.clone_into(&mut server.name);
        let choice = winrm::select_endpoint(&server, preference)?;

        let encrypted = self.wait_for_admin_password(machine).await?;
        let password = decrypt_password(key, &encrypted)?;
        Ok(ConnectionParams::from_choice(choice, password, port, username))
    }
}
