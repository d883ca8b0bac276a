//! Binary entry point for the `ruslan` CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use clap::Parser;
use thiserror::Error;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use ruslan::reference::{
    SERVER_ID_KEY, USE_PRIVATE_IP_KEY, WINRM_PORT_KEY, WINRM_USERNAME_KEY,
};
use ruslan::{
    ConfigError, ConnectionParams, Driver, ImageOptions, ImageSpecStore, LifecycleError,
    MachineSpec, NovaClient, OpenStackConfig, PrivateKey, ReferenceMap, ReferenceStore,
    ReferenceStoreError, WinrmError,
};

mod cli;

use cli::{Cli, Command, ImageCommand, PasswordCommand, WinrmCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("reference store error: {0}")]
    Store(#[from] ReferenceStoreError),
    #[error("failed to read private key {path}: {message}")]
    PrivateKeyFile { path: String, message: String },
    #[error(transparent)]
    Winrm(#[from] WinrmError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let store = ReferenceStore::new(cli.store);
    let driver = build_driver(cancel_on_interrupt())?;
    match cli.command {
        Command::Image(ImageCommand::Create(args)) => {
            let mut image = store.load_image(&args.name)?;
            let machine = machine_for_server(&args.server_id, None);
            let options = ImageOptions {
                description: args.description,
            };
            let reference = driver
                .allocate_image(&mut image, &machine, &options)
                .await?;
            let path = store.save_image(&image)?;
            writeln!(
                io::stdout(),
                "image {} requested as {} (reference stored in {path})",
                image.name, reference.image_id
            )?;
        }
        Command::Image(ImageCommand::Ready(args)) => {
            let image = store.load_image(&args.name)?;
            let snapshot = driver.ready_image(&image).await?;
            writeln!(io::stdout(), "image {} ({}) is {}", image.name, snapshot.id, snapshot.status)?;
        }
        Command::Image(ImageCommand::Destroy(args)) => {
            let image = store.load_image(&args.name)?;
            driver.destroy_image(&image).await?;
            store.remove_image(&image.name)?;
            writeln!(io::stdout(), "image {} destroyed", image.name)?;
        }
        Command::Password(PasswordCommand::Wait(args)) => {
            let machine = machine_for_server(&args.server_id, args.name.as_deref());
            let password = driver.wait_for_admin_password(&machine).await?;
            writeln!(io::stdout(), "{}", password.as_str())?;
        }
        Command::Winrm(args) => {
            let key = read_private_key(&args.private_key)?;
            let machine = machine_for_winrm(&args);
            let params = driver.connect_winrm(&machine, &key).await?;
            writeln!(io::stdout(), "{}", render_connection(&params))?;
        }
    }
    Ok(())
}

fn build_driver(cancel: CancellationToken) -> Result<Driver, CliError> {
    let config = OpenStackConfig::load_without_cli_args()?;
    config.validate()?;
    let client = Arc::new(NovaClient::from_config(&config));
    Ok(Driver::new(client, config.driver_url())
        .with_creator(config.creator().map(str::to_owned))
        .with_password_poll(config.password_poll()?)
        .with_image_poll(config.image_poll()?)
        .with_cancellation(cancel))
}

/// Returns a token cancelled when the process receives Ctrl+C.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("received Ctrl+C, cancelling wait");
            trigger.cancel();
        }
    });
    cancel
}

fn machine_for_server(server_id: &str, name: Option<&str>) -> MachineSpec {
    let mut reference = ReferenceMap::new();
    reference.insert(SERVER_ID_KEY, server_id);
    MachineSpec::new(name.unwrap_or(server_id), reference)
}

fn machine_for_winrm(args: &WinrmCommand) -> MachineSpec {
    let mut machine = machine_for_server(&args.server_id, args.name.as_deref());
    let reference = &mut machine.reference;
    if args.prefer_private {
        reference.insert(USE_PRIVATE_IP_KEY, true);
    }
    if let Some(port) = args.port {
        reference.insert(WINRM_PORT_KEY, port);
    }
    if let Some(username) = args.username.as_deref() {
        reference.insert(WINRM_USERNAME_KEY, username);
    }
    machine
}

fn read_private_key(path: &Utf8Path) -> Result<PrivateKey, CliError> {
    let file_error = |message: String| CliError::PrivateKeyFile {
        path: path.to_string(),
        message,
    };
    let parent = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| file_error(String::from("path does not name a file")))?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| file_error(err.to_string()))?;
    let pem = dir
        .read_to_string(file_name)
        .map_err(|err| file_error(err.to_string()))?;
    Ok(PrivateKey::from_pem(&pem)?)
}

/// Renders everything except the password.
fn render_connection(params: &ConnectionParams) -> String {
    let mut rendered = format!(
        "endpoint: {}\nuser: {}\ntransport: ssl\nbasic_auth_only: {}\nno_ssl_peer_verification: {}",
        params.endpoint, params.user, params.basic_auth_only, params.no_ssl_peer_verification
    );
    if let Some(warning) = params.choice.warning.as_deref() {
        rendered.push_str("\nwarning: ");
        rendered.push_str(warning);
    }
    rendered
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
