//! Behavioural coverage for resolving WinRM connections to Windows servers.

use std::sync::{Arc, OnceLock};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use ruslan::reference::{SERVER_ID_KEY, USE_PRIVATE_IP_KEY, WINRM_PORT_KEY, WINRM_USERNAME_KEY};
use ruslan::test_support::{ComputeCall, RecordingProgress, ScriptedCompute};
use ruslan::{
    ConnectionParams, Driver, LifecycleError, MachineSpec, PollSpec, PrivateKey, ReferenceMap,
    ServerSnapshot, WinrmError,
};

const DRIVER_URL: &str = "fog:OpenStack:https://keystone.example.test:5000/v3";
const SERVER_ID: &str = "srv-1";
const ADMIN_SECRET: &str = "S3cr3t!pass";

#[derive(Debug, thiserror::Error)]
enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[derive(Clone, Debug)]
enum Outcome {
    Connected(ConnectionParams),
    Failed(LifecycleError),
}

#[derive(Clone)]
struct WinrmContext {
    compute: ScriptedCompute,
    progress: RecordingProgress,
    machine: MachineSpec,
    outcome: Option<Outcome>,
}

impl WinrmContext {
    fn connected(&self) -> Result<&ConnectionParams, StepError> {
        match &self.outcome {
            Some(Outcome::Connected(params)) => Ok(params),
            Some(Outcome::Failed(err)) => Err(StepError::Assertion(format!(
                "expected a connection, got failure: {err}"
            ))),
            None => Err(StepError::Assertion(String::from("missing outcome"))),
        }
    }

    fn failure(&self) -> Result<&LifecycleError, StepError> {
        match &self.outcome {
            Some(Outcome::Failed(err)) => Ok(err),
            other => Err(StepError::Assertion(format!(
                "expected failure outcome, got {other:?}"
            ))),
        }
    }
}

fn keypair() -> &'static RsaPrivateKey {
    static KEYPAIR: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEYPAIR.get_or_init(|| {
        let mut rng = rand::thread_rng();
        RsaPrivateKey::new(&mut rng, 1024).unwrap_or_else(|err| panic!("generate key: {err}"))
    })
}

fn encrypted_secret() -> String {
    let mut rng = rand::thread_rng();
    let ciphertext = RsaPublicKey::from(keypair())
        .encrypt(&mut rng, Pkcs1v15Encrypt, ADMIN_SECRET.as_bytes())
        .unwrap_or_else(|err| panic!("encrypt: {err}"));
    STANDARD.encode(ciphertext)
}

fn server(private_ip: Option<&str>, public_ip: Option<&str>) -> ServerSnapshot {
    ServerSnapshot {
        id: String::from(SERVER_ID),
        name: String::from("provider-name"),
        status: String::from("ACTIVE"),
        private_ip: private_ip.map(str::to_owned),
        public_ip: public_ip.map(str::to_owned),
    }
}

fn with_server(context: &WinrmContext, snapshot: ServerSnapshot) -> WinrmContext {
    let next = context.clone();
    next.compute.push_server(Ok(snapshot));
    next
}

#[fixture]
fn winrm_context() -> WinrmContext {
    let mut reference = ReferenceMap::new();
    reference.insert(SERVER_ID_KEY, SERVER_ID);
    WinrmContext {
        compute: ScriptedCompute::new(),
        progress: RecordingProgress::new(),
        machine: MachineSpec::new("win-builder", reference),
        outcome: None,
    }
}

#[given("a Windows server with public address \"{public}\" and private address \"{private}\"")]
fn server_with_both(winrm_context: &WinrmContext, public: String, private: String) -> WinrmContext {
    with_server(winrm_context, server(Some(&private), Some(&public)))
}

#[given("a Windows server with only private address \"{private}\"")]
fn server_with_private(winrm_context: &WinrmContext, private: String) -> WinrmContext {
    with_server(winrm_context, server(Some(&private), None))
}

#[given("a Windows server without addresses")]
fn server_without_addresses(winrm_context: &WinrmContext) -> WinrmContext {
    with_server(winrm_context, server(None, None))
}

#[given("the machine prefers its private address")]
fn prefers_private(winrm_context: &WinrmContext) -> WinrmContext {
    let mut context = winrm_context.clone();
    context.machine.reference.insert(USE_PRIVATE_IP_KEY, true);
    context
}

#[given("the machine listens for WinRM on port {port} as \"{user}\"")]
fn winrm_overrides(winrm_context: &WinrmContext, port: u16, user: String) -> WinrmContext {
    let mut context = winrm_context.clone();
    context.machine.reference.insert(WINRM_PORT_KEY, port);
    context.machine.reference.insert(WINRM_USERNAME_KEY, user);
    context
}

#[given("the password is issued after {pending} pending reads")]
fn password_issued_after(winrm_context: &WinrmContext, pending: usize) -> WinrmContext {
    let context = winrm_context.clone();
    for _ in 0..pending {
        context.compute.push_password_pending();
    }
    context.compute.push_password_issued(&encrypted_secret());
    context
}

#[given("the password is never issued")]
fn password_never_issued(winrm_context: &WinrmContext) -> WinrmContext {
    let context = winrm_context.clone();
    context.compute.push_password_pending();
    context
}

#[when("I resolve the WinRM connection")]
fn resolve(winrm_context: &WinrmContext) -> WinrmContext {
    let mut context = winrm_context.clone();
    let password_poll =
        PollSpec::from_secs(10, 60).unwrap_or_else(|err| panic!("password poll: {err}"));
    let driver = Driver::new(Arc::new(context.compute.clone()), DRIVER_URL)
        .with_progress(Arc::new(context.progress.clone()))
        .with_password_poll(password_poll);
    let key = PrivateKey::from_rsa(keypair().clone());
    let machine = context.machine.clone();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap_or_else(|err| panic!("build runtime: {err}"));
    let result = runtime.block_on(async { driver.connect_winrm(&machine, &key).await });

    context.outcome = Some(match result {
        Ok(params) => Outcome::Connected(params),
        Err(err) => Outcome::Failed(err),
    });
    context
}

#[then("the connection succeeds")]
fn connection_succeeds(winrm_context: &WinrmContext) -> Result<(), StepError> {
    winrm_context.connected().map(|_| ())
}

#[then("the endpoint is \"{endpoint}\"")]
fn endpoint_is(winrm_context: &WinrmContext, endpoint: String) -> Result<(), StepError> {
    let params = winrm_context.connected()?;
    if params.endpoint == endpoint {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected endpoint {endpoint}, got {}",
            params.endpoint
        )))
    }
}

#[then("the user is \"{user}\"")]
fn user_is(winrm_context: &WinrmContext, user: String) -> Result<(), StepError> {
    let params = winrm_context.connected()?;
    if params.user == user {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected user {user}, got {}",
            params.user
        )))
    }
}

#[then("the password decrypts to the issued secret")]
fn password_decrypts(winrm_context: &WinrmContext) -> Result<(), StepError> {
    let params = winrm_context.connected()?;
    if params.password.expose() != ADMIN_SECRET {
        return Err(StepError::Assertion(String::from(
            "decrypted password does not match",
        )));
    }
    if !params.basic_auth_only || !params.disable_sspi || !params.no_ssl_peer_verification {
        return Err(StepError::Assertion(format!(
            "unexpected session posture: {params:?}"
        )));
    }
    Ok(())
}

#[then("the connection warns \"{text}\"")]
fn connection_warns(winrm_context: &WinrmContext, text: String) -> Result<(), StepError> {
    let params = winrm_context.connected()?;
    match params.choice.warning.as_deref() {
        Some(warning) if warning.contains(&text) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a warning mentioning {text}, got {other:?}"
        ))),
    }
}

#[then("the connection fails with \"{kind}\"")]
fn connection_fails(winrm_context: &WinrmContext, kind: String) -> Result<(), StepError> {
    let err = winrm_context.failure()?;
    let matched = match kind.as_str() {
        "password timeout" => matches!(err, LifecycleError::PasswordTimeout { .. }),
        "unreachable" => matches!(
            err,
            LifecycleError::Winrm(WinrmError::Unreachable { .. })
        ),
        other => return Err(StepError::Assertion(format!("unknown failure kind {other}"))),
    };
    if matched {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {kind}, got {err:?}"
        )))
    }
}

#[then("the failure mentions \"{text}\"")]
fn failure_mentions(winrm_context: &WinrmContext, text: String) -> Result<(), StepError> {
    let message = winrm_context.failure()?.to_string();
    if message.contains(&text) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected failure mentioning {text}, got {message}"
        )))
    }
}

#[then("no password was requested")]
fn no_password_requested(winrm_context: &WinrmContext) -> Result<(), StepError> {
    let reads = winrm_context
        .compute
        .count(|call| matches!(call, ComputeCall::GetServerPassword(_)));
    if reads == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("{reads} password reads")))
    }
}

#[scenario(
    path = "tests/features/winrm_connection.feature",
    name = "Connect over the public address once the password is issued"
)]
fn scenario_connect_public(winrm_context: WinrmContext) {
    let _ = winrm_context;
}

#[scenario(
    path = "tests/features/winrm_connection.feature",
    name = "Fall back to the private address with a warning"
)]
fn scenario_private_fallback(winrm_context: WinrmContext) {
    let _ = winrm_context;
}

#[scenario(
    path = "tests/features/winrm_connection.feature",
    name = "Honour machine overrides for address, port and user"
)]
fn scenario_overrides(winrm_context: WinrmContext) {
    let _ = winrm_context;
}

#[scenario(
    path = "tests/features/winrm_connection.feature",
    name = "A password that is never issued times out"
)]
fn scenario_password_timeout(winrm_context: WinrmContext) {
    let _ = winrm_context;
}

#[scenario(
    path = "tests/features/winrm_connection.feature",
    name = "A server without addresses is unreachable"
)]
fn scenario_unreachable(winrm_context: WinrmContext) {
    let _ = winrm_context;
}
