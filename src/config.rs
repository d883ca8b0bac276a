//! Configuration loading via `ortho-config`.

use std::ffi::OsString;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::poll::PollSpec;

/// OpenStack connection settings and wait budgets derived from environment
/// variables and configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "OS",
    discovery(
        app_name = "ruslan",
        env_var = "RUSLAN_CONFIG_PATH",
        config_file_name = "ruslan.toml",
        dotfile_name = ".ruslan.toml",
        project_file_name = "ruslan.toml"
    )
)]
pub struct OpenStackConfig {
    /// Identity endpoint the token was issued by. Recorded in image
    /// references as part of the driver URL.
    pub auth_url: String,
    /// Compute (Nova) endpoint including the version path.
    pub compute_url: String,
    /// Pre-issued Keystone token sent as `X-Auth-Token`.
    pub auth_token: String,
    /// Account name recorded as the creator of allocated images.
    pub username: Option<String>,
    /// Seconds between administrator password reads.
    #[ortho_config(default = 10)]
    pub password_poll_interval_secs: u64,
    /// Seconds to wait for the administrator password before giving up.
    #[ortho_config(default = 900)]
    pub password_wait_timeout_secs: u64,
    /// Seconds between image status reads.
    #[ortho_config(default = 10)]
    pub image_poll_interval_secs: u64,
    /// Seconds to wait for an image to become active before giving up.
    #[ortho_config(default = 300)]
    pub image_wait_timeout_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn hint(&self) -> String {
        format!(
            "set {} or add {} to ruslan.toml",
            self.env_var, self.toml_key
        )
    }
}

impl OpenStackConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: {}",
                metadata.description,
                metadata.hint()
            )));
        }
        Ok(())
    }

    fn poll_spec(
        interval_secs: u64,
        max_wait_secs: u64,
        interval: &FieldMetadata,
    ) -> Result<PollSpec, ConfigError> {
        PollSpec::from_secs(interval_secs, max_wait_secs).map_err(|err| {
            ConfigError::InvalidValue(format!(
                "{} is invalid ({err}): {}",
                interval.description,
                interval.hint()
            ))
        })
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("ruslan")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply the offending value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::InvalidValue`] when a poll interval is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.auth_url,
            &FieldMetadata::new("OpenStack identity URL", "OS_AUTH_URL", "auth_url"),
        )?;
        Self::require_field(
            &self.compute_url,
            &FieldMetadata::new("Nova compute URL", "OS_COMPUTE_URL", "compute_url"),
        )?;
        Self::require_field(
            &self.auth_token,
            &FieldMetadata::new("OpenStack auth token", "OS_AUTH_TOKEN", "auth_token"),
        )?;
        self.password_poll()?;
        self.image_poll()?;
        Ok(())
    }

    /// Poll cadence for administrator password waits.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when the interval is zero.
    pub fn password_poll(&self) -> Result<PollSpec, ConfigError> {
        Self::poll_spec(
            self.password_poll_interval_secs,
            self.password_wait_timeout_secs,
            &FieldMetadata::new(
                "password poll interval",
                "OS_PASSWORD_POLL_INTERVAL_SECS",
                "password_poll_interval_secs",
            ),
        )
    }

    /// Poll cadence for image activation waits.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when the interval is zero.
    pub fn image_poll(&self) -> Result<PollSpec, ConfigError> {
        Self::poll_spec(
            self.image_poll_interval_secs,
            self.image_wait_timeout_secs,
            &FieldMetadata::new(
                "image poll interval",
                "OS_IMAGE_POLL_INTERVAL_SECS",
                "image_poll_interval_secs",
            ),
        )
    }

    /// Driver URL recorded in image references, `fog:OpenStack:<auth_url>`.
    #[must_use]
    pub fn driver_url(&self) -> String {
        format!("fog:OpenStack:{}", self.auth_url.trim())
    }

    /// Account recorded as image creator, if configured.
    #[must_use]
    pub fn creator(&self) -> Option<&str> {
        self.username
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configured value is out of range.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
