//! Administrator password decryption.
//!
//! Nova encrypts the generated Windows password with the public half of the
//! keypair the server was booted with and returns it base64 encoded. The
//! plaintext only exists inside [`PlaintextSecret`], which never prints its
//! contents.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};

use crate::compute::EncryptedPassword;

use super::WinrmError;

/// RSA private key used to decrypt administrator passwords.
#[derive(Clone)]
pub struct PrivateKey(RsaPrivateKey);

impl PrivateKey {
    /// Parses a PEM encoded key in PKCS#1 (`BEGIN RSA PRIVATE KEY`) or PKCS#8
    /// (`BEGIN PRIVATE KEY`) form.
    ///
    /// # Errors
    ///
    /// Returns [`WinrmError::InvalidKey`] when neither form parses.
    pub fn from_pem(pem: &str) -> Result<Self, WinrmError> {
        RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map(Self)
            .map_err(|err| WinrmError::InvalidKey {
                message: err.to_string(),
            })
    }

    /// Wraps an already parsed key.
    #[must_use]
    pub const fn from_rsa(key: RsaPrivateKey) -> Self {
        Self(key)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// Decrypted password, held only while a connection is being assembled.
#[derive(Clone, Eq, PartialEq)]
pub struct PlaintextSecret(String);

impl PlaintextSecret {
    /// Wraps a plaintext value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Exposes the plaintext for handing to a transport.
    #[must_use]
    pub const fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for PlaintextSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PlaintextSecret(<redacted>)")
    }
}

impl fmt::Display for PlaintextSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Decrypts an administrator password with `key`.
///
/// # Errors
///
/// Returns [`WinrmError::Decryption`] when the blob is not base64, the key
/// does not match, or the plaintext is not UTF-8. An empty or undecryptable
/// password is never substituted with a default.
pub fn decrypt_password(
    key: &PrivateKey,
    encrypted: &EncryptedPassword,
) -> Result<PlaintextSecret, WinrmError> {
    let compact: String = encrypted
        .as_str()
        .chars()
        .filter(|ch| !ch.is_ascii_whitespace())
        .collect();
    let ciphertext = STANDARD
        .decode(compact.as_bytes())
        .map_err(|err| WinrmError::Decryption {
            message: format!("password is not valid base64: {err}"),
        })?;
    let plaintext = key
        .0
        .decrypt(Pkcs1v15Encrypt, &ciphertext)
        .map_err(|err| WinrmError::Decryption {
            message: err.to_string(),
        })?;
    String::from_utf8(plaintext)
        .map(PlaintextSecret)
        .map_err(|_| WinrmError::Decryption {
            message: String::from("decrypted password is not valid UTF-8"),
        })
}
