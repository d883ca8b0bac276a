//! Command-line interface definitions for the `ruslan` binary.
//!
//! The parser lives here so the build script can render the manual page from
//! the same definitions the binary uses.

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `ruslan` binary.
#[derive(Debug, Parser)]
#[command(
    name = "ruslan",
    version,
    about = "Wait for OpenStack images and Windows admin credentials to become usable",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Directory holding stored image references.
    #[arg(long, global = true, value_name = "DIR", default_value = ".ruslan")]
    pub(crate) store: Utf8PathBuf,
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands of `ruslan`.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Allocate, await, or destroy a machine image.
    #[command(subcommand)]
    Image(ImageCommand),
    /// Wait for a server's administrator password.
    #[command(subcommand)]
    Password(PasswordCommand),
    /// Resolve WinRM connection parameters for a Windows server.
    #[command(name = "winrm")]
    Winrm(WinrmCommand),
}

/// Image lifecycle subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum ImageCommand {
    /// Snapshot a server into a new image and record its reference.
    Create(ImageCreateCommand),
    /// Wait until the recorded image is active.
    Ready(ImageNameArgs),
    /// Delete the recorded image and forget its reference.
    Destroy(ImageNameArgs),
}

/// Arguments for `ruslan image create`.
#[derive(Debug, Args)]
pub(crate) struct ImageCreateCommand {
    /// Name of the image to create.
    #[arg(long, value_name = "NAME")]
    pub(crate) name: String,
    /// Identifier of the server to snapshot.
    #[arg(long, value_name = "ID")]
    pub(crate) server_id: String,
    /// Description stored with the image.
    #[arg(long, value_name = "TEXT")]
    pub(crate) description: Option<String>,
}

/// Arguments naming a stored image.
#[derive(Debug, Args)]
pub(crate) struct ImageNameArgs {
    /// Name of the image.
    #[arg(long, value_name = "NAME")]
    pub(crate) name: String,
}

/// Password subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum PasswordCommand {
    /// Print the encrypted administrator password once it is issued.
    Wait(PasswordWaitCommand),
}

/// Arguments for `ruslan password wait`.
#[derive(Debug, Args)]
pub(crate) struct PasswordWaitCommand {
    /// Identifier of the server.
    #[arg(long, value_name = "ID")]
    pub(crate) server_id: String,
    /// Machine name used in progress messages. Defaults to the server id.
    #[arg(long, value_name = "NAME")]
    pub(crate) name: Option<String>,
}

/// Arguments for `ruslan winrm`.
#[derive(Debug, Args)]
pub(crate) struct WinrmCommand {
    /// Identifier of the server.
    #[arg(long, value_name = "ID")]
    pub(crate) server_id: String,
    /// PEM file holding the RSA key the password was encrypted for.
    #[arg(long, value_name = "PATH")]
    pub(crate) private_key: Utf8PathBuf,
    /// Dial the private address even when a public one exists.
    #[arg(long)]
    pub(crate) prefer_private: bool,
    /// WinRM listener port (defaults to 5986).
    #[arg(long, value_name = "PORT")]
    pub(crate) port: Option<u16>,
    /// User to authenticate as (defaults to Admin).
    #[arg(long, value_name = "USER")]
    pub(crate) username: Option<String>,
    /// Machine name used in progress messages. Defaults to the server id.
    #[arg(long, value_name = "NAME")]
    pub(crate) name: Option<String>,
}
