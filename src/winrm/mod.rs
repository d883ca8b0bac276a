//! WinRM connection assembly for Windows servers.
//!
//! Once a server is running and its administrator password has been issued,
//! this module decides which address to dial and produces the parameters a
//! WinRM transport needs. The security posture is fixed: HTTPS, basic
//! authentication only, no peer verification.

mod credential;

use std::net::IpAddr;

use thiserror::Error;

use crate::compute::ServerSnapshot;

pub use credential::{PlaintextSecret, PrivateKey, decrypt_password};

/// Port of the WinRM HTTPS listener when the reference does not override it.
pub const DEFAULT_WINRM_PORT: u16 = 5986;
/// User name used when the reference does not override it.
pub const DEFAULT_WINRM_USERNAME: &str = "Admin";
/// Path of the WS-Management service on the listener.
pub const WSMAN_PATH: &str = "/wsman";

/// Errors raised while assembling a connection.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WinrmError {
    /// The server exposes neither a private nor a public address.
    #[error("server {server} has no private or public IP address")]
    Unreachable {
        /// Server identifier.
        server: String,
    },
    /// The password could not be decrypted with the supplied key.
    #[error("failed to decrypt administrator password: {message}")]
    Decryption {
        /// Underlying failure.
        message: String,
    },
    /// The private key could not be parsed.
    #[error("invalid private key: {message}")]
    InvalidKey {
        /// Parser failure.
        message: String,
    },
}

/// Caller preference for address selection.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EndpointPreference {
    /// Always dial the private address.
    pub prefer_private: bool,
}

/// Which address family the chosen endpoint came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddressSource {
    /// Tenant network address.
    Private,
    /// Floating or access address.
    Public,
}

/// Address chosen for a connection attempt and why.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EndpointChoice {
    /// Address to dial.
    pub address: String,
    /// Where the address came from.
    pub source: AddressSource,
    /// Set when the choice fell back from the public address.
    pub warning: Option<String>,
}

/// Transport security mode of the session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportMode {
    /// HTTPS.
    Ssl,
}

/// Everything a WinRM transport needs to open a session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectionParams {
    /// `https://<address>:<port>/wsman`.
    pub endpoint: String,
    /// Transport mode; always [`TransportMode::Ssl`].
    pub transport: TransportMode,
    /// User name for basic authentication.
    pub user: String,
    /// Decrypted administrator password.
    pub password: PlaintextSecret,
    /// SSPI negotiation is disabled.
    pub disable_sspi: bool,
    /// Only basic authentication is offered.
    pub basic_auth_only: bool,
    /// The server certificate is not verified.
    pub no_ssl_peer_verification: bool,
    /// No CA bundle is configured.
    pub ca_trust_path: Option<String>,
    /// Address decision that produced the endpoint.
    pub choice: EndpointChoice,
}

fn present(address: Option<&String>) -> Option<&str> {
    address.map(|value| value.trim()).filter(|value| !value.is_empty())
}

/// Picks the address to dial.
///
/// The preferred address is used when present. Otherwise the other address
/// is used, and the fallback carries a warning that is also logged.
///
/// # Errors
///
/// Returns [`WinrmError::Unreachable`] when the server has no usable address.
pub fn select_endpoint(
    server: &ServerSnapshot,
    preference: EndpointPreference,
) -> Result<EndpointChoice, WinrmError> {
    let private = present(server.private_ip.as_ref());
    let public = present(server.public_ip.as_ref());

    let choice = match (preference.prefer_private, private, public) {
        (true, Some(address), _) => EndpointChoice {
            address: address.to_owned(),
            source: AddressSource::Private,
            warning: None,
        },
        (false, _, Some(address)) => EndpointChoice {
            address: address.to_owned(),
            source: AddressSource::Public,
            warning: None,
        },
        (false, Some(address), None) => {
            let warning = format!(
                "Server {} has no public ip address. Using private ip '{address}'. Set driver option 'use_private_ip_for_ssh' => true if this will always be the case ...",
                server.name
            );
            tracing::warn!(server = %server.id, "{warning}");
            EndpointChoice {
                address: address.to_owned(),
                source: AddressSource::Private,
                warning: Some(warning),
            }
        }
        (true, None, Some(address)) => {
            let warning = format!(
                "Server {} has no private ip address. Using public ip '{address}' although 'use_private_ip_for_ssh' is set ...",
                server.name
            );
            tracing::warn!(server = %server.id, "{warning}");
            EndpointChoice {
                address: address.to_owned(),
                source: AddressSource::Public,
                warning: Some(warning),
            }
        }
        _ => {
            return Err(WinrmError::Unreachable {
                server: server.id.clone(),
            });
        }
    };
    tracing::info!(server = %server.id, address = %choice.address, "connecting to server");
    Ok(choice)
}

/// Renders `https://<address>:<port>/wsman`, bracketing IPv6 literals.
#[must_use]
pub fn endpoint_url(address: &str, port: u16) -> String {
    match address.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => format!("https://[{v6}]:{port}{WSMAN_PATH}"),
        _ => format!("https://{address}:{port}{WSMAN_PATH}"),
    }
}

/// Builds the connection parameters for `server`.
///
/// # Errors
///
/// Returns [`WinrmError::Unreachable`] when no address is usable; no partial
/// parameters are produced.
pub fn assemble(
    server: &ServerSnapshot,
    preference: EndpointPreference,
    password: PlaintextSecret,
    port: u16,
    username: Option<&str>,
) -> Result<ConnectionParams, WinrmError> {
    let choice = select_endpoint(server, preference)?;
    Ok(ConnectionParams::from_choice(choice, password, port, username))
}

impl ConnectionParams {
    /// Builds parameters for an address that has already been selected.
    #[must_use]
    pub fn from_choice(
        choice: EndpointChoice,
        password: PlaintextSecret,
        port: u16,
        username: Option<&str>,
    ) -> Self {
        let user = username
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_WINRM_USERNAME)
            .to_owned();
        Self {
            endpoint: endpoint_url(&choice.address, port),
            transport: TransportMode::Ssl,
            user,
            password,
            disable_sspi: true,
            basic_auth_only: true,
            no_ssl_peer_verification: true,
            ca_trust_path: None,
            choice,
        }
    }
}
