//! Tests for the WinRM connection flow.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use rstest::{fixture, rstest};
use serde_json::json;

use super::{harness, machine};
use crate::compute::{ComputeError, ServerSnapshot};
use crate::lifecycle::LifecycleError;
use crate::test_support::ComputeCall;
use crate::winrm::{AddressSource, PrivateKey, TransportMode, WinrmError};

#[fixture]
#[once]
fn keypair() -> RsaPrivateKey {
    let mut rng = rand::thread_rng();
    RsaPrivateKey::new(&mut rng, 1024).unwrap_or_else(|err| panic!("generate key: {err}"))
}

fn encrypted(key: &RsaPrivateKey, plaintext: &str) -> String {
    let mut rng = rand::thread_rng();
    let ciphertext = RsaPublicKey::from(key)
        .encrypt(&mut rng, Pkcs1v15Encrypt, plaintext.as_bytes())
        .unwrap_or_else(|err| panic!("encrypt: {err}"));
    STANDARD.encode(ciphertext)
}

fn server(private_ip: Option<&str>, public_ip: Option<&str>) -> ServerSnapshot {
    ServerSnapshot {
        id: String::from("srv-1"),
        name: String::from("srv-1-name"),
        status: String::from("ACTIVE"),
        private_ip: private_ip.map(str::to_owned),
        public_ip: public_ip.map(str::to_owned),
    }
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn connects_to_public_address_with_defaults(keypair: &RsaPrivateKey) {
    let h = harness();
    h.compute
        .push_server(Ok(server(Some("10.0.0.5"), Some("203.0.113.9"))));
    h.compute.push_password_pending();
    h.compute
        .push_password_issued(&encrypted(keypair, "P@ssw0rd!"));

    let params = h
        .driver
        .connect_winrm(
            &machine(&[("server_id", json!("srv-1"))]),
            &PrivateKey::from_rsa(keypair.clone()),
        )
        .await
        .unwrap_or_else(|err| panic!("connect: {err}"));

    assert_eq!(params.endpoint, "https://203.0.113.9:5986/wsman");
    assert_eq!(params.transport, TransportMode::Ssl);
    assert_eq!(params.user, "Admin");
    assert_eq!(params.password.expose(), "P@ssw0rd!");
    assert_eq!(params.choice.source, AddressSource::Public);
    assert!(params.basic_auth_only && params.disable_sspi && params.no_ssl_peer_verification);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn reference_overrides_address_port_and_user(keypair: &RsaPrivateKey) {
    let h = harness();
    h.compute
        .push_server(Ok(server(Some("10.0.0.5"), Some("203.0.113.9"))));
    h.compute.push_password_issued(&encrypted(keypair, "pw"));
    let spec = machine(&[
        ("server_id", json!("srv-1")),
        ("use_private_ip_for_ssh", json!(true)),
        ("winrm_port", json!(15986)),
        ("winrm.username", json!("builder")),
    ]);

    let params = h
        .driver
        .connect_winrm(&spec, &PrivateKey::from_rsa(keypair.clone()))
        .await
        .unwrap_or_else(|err| panic!("connect: {err}"));

    assert_eq!(params.endpoint, "https://10.0.0.5:15986/wsman");
    assert_eq!(params.user, "builder");
    assert_eq!(params.choice.source, AddressSource::Private);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn missing_public_address_falls_back_with_warning(keypair: &RsaPrivateKey) {
    let h = harness();
    h.compute.push_server(Ok(server(Some("10.0.0.5"), None)));
    h.compute.push_password_issued(&encrypted(keypair, "pw"));

    let params = h
        .driver
        .connect_winrm(
            &machine(&[("server_id", json!("srv-1"))]),
            &PrivateKey::from_rsa(keypair.clone()),
        )
        .await
        .unwrap_or_else(|err| panic!("connect: {err}"));

    assert_eq!(params.endpoint, "https://10.0.0.5:5986/wsman");
    let warning = params.choice.warning.unwrap_or_default();
    assert!(warning.contains("Server win-builder has no public ip address"), "{warning}");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn preferred_private_address_falls_back_to_public(keypair: &RsaPrivateKey) {
    let h = harness();
    h.compute.push_server(Ok(server(None, Some("203.0.113.9"))));
    h.compute.push_password_issued(&encrypted(keypair, "pw"));
    let spec = machine(&[
        ("server_id", json!("srv-1")),
        ("use_private_ip_for_ssh", json!(true)),
    ]);

    let params = h
        .driver
        .connect_winrm(&spec, &PrivateKey::from_rsa(keypair.clone()))
        .await
        .unwrap_or_else(|err| panic!("connect: {err}"));

    assert_eq!(params.endpoint, "https://203.0.113.9:5986/wsman");
    assert_eq!(params.choice.source, AddressSource::Public);
    let warning = params.choice.warning.unwrap_or_default();
    assert!(warning.contains("Server win-builder has no private ip address"), "{warning}");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn unreachable_server_fails_before_waiting_for_password(keypair: &RsaPrivateKey) {
    let h = harness();
    h.compute.push_server(Ok(server(None, None)));

    let err = h
        .driver
        .connect_winrm(
            &machine(&[("server_id", json!("srv-1"))]),
            &PrivateKey::from_rsa(keypair.clone()),
        )
        .await
        .expect_err("no address");

    assert_eq!(
        err,
        LifecycleError::Winrm(WinrmError::Unreachable {
            server: String::from("srv-1"),
        })
    );
    assert_eq!(
        h.compute.calls(),
        vec![ComputeCall::GetServer(String::from("srv-1"))]
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn undecryptable_password_is_an_error(keypair: &RsaPrivateKey) {
    let h = harness();
    h.compute
        .push_server(Ok(server(Some("10.0.0.5"), Some("203.0.113.9"))));
    h.compute.push_password_issued("bm90IGVuY3J5cHRlZA==");

    let err = h
        .driver
        .connect_winrm(
            &machine(&[("server_id", json!("srv-1"))]),
            &PrivateKey::from_rsa(keypair.clone()),
        )
        .await
        .expect_err("garbage ciphertext");

    assert!(
        matches!(err, LifecycleError::Winrm(WinrmError::Decryption { .. })),
        "got {err:?}"
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn missing_server_is_reported(keypair: &RsaPrivateKey) {
    let h = harness();

    let err = h
        .driver
        .connect_winrm(
            &machine(&[("server_id", json!("srv-1"))]),
            &PrivateKey::from_rsa(keypair.clone()),
        )
        .await
        .expect_err("server missing");

    assert!(matches!(err, LifecycleError::Compute(ComputeError::NotFound { .. })));
}

#[rstest]
#[case(json!("yes"))]
#[case(json!(0))]
#[tokio::test(start_paused = true)]
async fn malformed_reference_values_are_rejected(
    keypair: &RsaPrivateKey,
    #[case] port: serde_json::Value,
) {
    let h = harness();
    let key = PrivateKey::from_rsa(keypair.clone());

    let err = h
        .driver
        .connect_winrm(
            &machine(&[("server_id", json!("srv-1")), ("winrm_port", port)]),
            &key,
        )
        .await
        .expect_err("bad port");

    assert!(matches!(err, LifecycleError::Reference(_)), "got {err:?}");
    assert!(h.compute.calls().is_empty());
}
