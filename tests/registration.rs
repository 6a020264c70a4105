//! End-to-end WebAuthn registration ceremony tests.

mod common;

use std::sync::Arc;

use anyhow::Result;
use identeco::backend::MemoryBackend;
use identeco::identity::{IdentityRepo, MfaCredential};
use identeco::webauthn::{RegistrationFlow, WebauthnConfig};

use common::SoftToken;

const USER: &str = "llama";
const RP_ID: &str = "localhost";
const ORIGIN: &str = "https://localhost";

type TestRepo = Arc<IdentityRepo<Arc<MemoryBackend>>>;

fn new_flow() -> Result<(TestRepo, RegistrationFlow<Arc<MemoryBackend>>)> {
    let backend = Arc::new(MemoryBackend::new());
    let identity = Arc::new(IdentityRepo::new(backend));
    let config = WebauthnConfig::new(RP_ID, ORIGIN, "Identeco")?;
    let flow = RegistrationFlow::new(config, identity.clone())?;
    Ok((identity, flow))
}

#[tokio::test]
async fn begin_finish_roundtrip() -> Result<()> {
    let (identity, flow) = new_flow()?;

    // Begin issues a challenge scoped to the configured relying party and
    // records single-use session data.
    let cc = flow.begin(USER).await?;
    let challenge: Vec<u8> = cc.public_key.challenge.clone().into();
    assert!(!challenge.is_empty());
    assert_eq!(cc.public_key.rp.id, RP_ID);
    assert!(identity.get_latest_webauthn_session_data(USER).await.is_ok());

    // Signing normally involves user interaction with the authenticator.
    let token = SoftToken::new();
    let response = token.sign_credential_creation(ORIGIN, &cc);

    let device = flow.finish(USER, "webauthn1", Some(response)).await?;
    assert_eq!(device.name, "webauthn1");
    match &device.credential {
        MfaCredential::Webauthn(webauthn) => {
            assert_eq!(webauthn.credential_id, token.key_handle);
            assert!(!webauthn.public_key.is_empty());
            assert_eq!(webauthn.attestation_type, "none");
            assert_eq!(webauthn.aaguid, vec![0u8; 16]);
            assert_eq!(webauthn.signature_counter, 0);
        }
        other => panic!("unexpected credential variant: {other:?}"),
    }

    // The challenge was consumed and the device committed.
    assert!(identity
        .get_latest_webauthn_session_data(USER)
        .await
        .unwrap_err()
        .is_not_found());
    let devices = identity.get_mfa_devices(USER, false).await?;
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0], device);
    Ok(())
}

#[tokio::test]
async fn user_handle_is_stable_across_ceremonies() -> Result<()> {
    let (identity, flow) = new_flow()?;

    flow.begin(USER).await?;
    let first = identity.get_webauthn_local_auth(USER).await?;
    flow.begin(USER).await?;
    let second = identity.get_webauthn_local_auth(USER).await?;
    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn begin_requires_user() -> Result<()> {
    let (_, flow) = new_flow()?;

    let err = flow.begin("").await.unwrap_err();
    assert!(err.is_bad_parameter());
    assert!(err.to_string().contains("user required"));
    Ok(())
}

#[tokio::test]
async fn finish_validates_required_parameters() -> Result<()> {
    let (_, flow) = new_flow()?;
    let cc = flow.begin(USER).await?;
    let token = SoftToken::new();
    let ok_response = token.sign_credential_creation(ORIGIN, &cc);

    let err = flow
        .finish("", "webauthn2", Some(ok_response.clone()))
        .await
        .unwrap_err();
    assert!(err.is_bad_parameter());
    assert!(err.to_string().contains("user required"));

    let err = flow.finish(USER, "", Some(ok_response)).await.unwrap_err();
    assert!(err.is_bad_parameter());
    assert!(err.to_string().contains("device name required"));

    let err = flow.finish(USER, "webauthn2", None).await.unwrap_err();
    assert!(err.is_bad_parameter());
    assert!(err.to_string().contains("response required"));
    Ok(())
}

#[tokio::test]
async fn finish_rejects_foreign_origin() -> Result<()> {
    let (_, flow) = new_flow()?;
    let cc = flow.begin(USER).await?;
    let token = SoftToken::new();

    let response = token.sign_credential_creation("https://alpacasarerad.com", &cc);
    let err = flow.finish(USER, "webauthn2", Some(response)).await.unwrap_err();
    assert!(err.is_validation(), "unexpected error: {err}");
    assert!(err.to_string().contains("origin"));
    Ok(())
}

#[tokio::test]
async fn finish_rejects_tampered_rp_id() -> Result<()> {
    let (_, flow) = new_flow()?;
    let mut cc = flow.begin(USER).await?;
    cc.public_key.rp.id = "badrpid.com".to_string();

    let token = SoftToken::new();
    let response = token.sign_credential_creation(ORIGIN, &cc);
    let err = flow.finish(USER, "webauthn2", Some(response)).await.unwrap_err();
    assert!(err.is_validation(), "unexpected error: {err}");
    assert!(err.to_string().contains("authenticator response"));
    Ok(())
}

#[tokio::test]
async fn finish_rejects_tampered_challenge() -> Result<()> {
    let (_, flow) = new_flow()?;
    let mut cc = flow.begin(USER).await?;
    let mut challenge: Vec<u8> = cc.public_key.challenge.clone().into();
    challenge[0] ^= 1;
    cc.public_key.challenge = challenge.into();

    let token = SoftToken::new();
    let response = token.sign_credential_creation(ORIGIN, &cc);
    let err = flow.finish(USER, "webauthn2", Some(response)).await.unwrap_err();
    assert!(err.is_validation(), "unexpected error: {err}");
    assert!(err.to_string().contains("validating challenge"));
    Ok(())
}

#[tokio::test]
async fn finish_without_challenge_fails() -> Result<()> {
    let (_, flow) = new_flow()?;

    // A response signed for a different user's ceremony; no session data
    // exists for this user.
    let cc = flow.begin("alpaca").await?;
    let token = SoftToken::new();
    let response = token.sign_credential_creation(ORIGIN, &cc);

    let err = flow.finish(USER, "webauthn1", Some(response)).await.unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {err}");
    Ok(())
}

#[tokio::test]
async fn finish_enforces_device_uniqueness() -> Result<()> {
    let (_, flow) = new_flow()?;

    let cc = flow.begin(USER).await?;
    let token = SoftToken::new();
    let response = token.sign_credential_creation(ORIGIN, &cc);
    flow.finish(USER, "webauthn1", Some(response)).await?;

    // A different authenticator may not reuse the device name.
    let cc = flow.begin(USER).await?;
    let other = SoftToken::new();
    let response = other.sign_credential_creation(ORIGIN, &cc);
    let err = flow.finish(USER, "webauthn1", Some(response)).await.unwrap_err();
    assert!(err.is_already_exists(), "unexpected error: {err}");

    // The same authenticator may not enroll under a second name.
    let cc = flow.begin(USER).await?;
    let response = token.sign_credential_creation(ORIGIN, &cc);
    let err = flow.finish(USER, "webauthn2", Some(response)).await.unwrap_err();
    assert!(err.is_already_exists(), "unexpected error: {err}");
    Ok(())
}
