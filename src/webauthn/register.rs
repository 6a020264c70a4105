//! WebAuthn device-registration ceremony.
//!
//! Two-phase protocol: `begin` issues a single-use challenge bound to the
//! user's relying-party handle and persists it TTL-bound through the
//! identity repository; `finish` validates the signed authenticator
//! response against the stored challenge, the configured relying party and
//! origin, then commits the new MFA device and consumes the challenge.
//!
//! Security boundaries:
//! - Origin and challenge are checked explicitly before the response is
//!   handed to `webauthn-rs`, so each failing check is reported distinctly.
//! - RP ID binding, attestation structure and signatures are enforced by
//!   `webauthn-rs` against the persisted ceremony state.
//! - A challenge is never validated twice: success deletes it, failure
//!   leaves it to expire with its TTL.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use tracing::debug;
use ulid::Ulid;
use url::Url;
use uuid::Uuid;
use webauthn_rs::prelude::{
    CreationChallengeResponse, CredentialID, RegisterPublicKeyCredential, Webauthn,
    WebauthnBuilder,
};

use crate::backend::Backend;
use crate::errors::{Error, Result};
use crate::identity::{IdentityRepo, MfaCredential, MfaDevice, WebauthnDevice};
use crate::webauthn::models::{SessionData, WebauthnLocalAuth};

/// AAGUID length in bytes; all zero when the authenticator discloses none.
const AAGUID_LEN: usize = 16;

/// Byte offset of the AAGUID within attested credential data:
/// rpIdHash (32) + flags (1) + signCount (4).
const AAGUID_OFFSET: usize = 37;

/// Relying-party configuration for registration ceremonies.
#[derive(Clone, Debug)]
pub struct WebauthnConfig {
    rp_id: String,
    rp_origin: Url,
    rp_name: String,
}

impl WebauthnConfig {
    /// Create a new relying-party configuration.
    ///
    /// # Errors
    /// Returns `BadParameter` when the RP ID is empty or the origin cannot
    /// be parsed.
    pub fn new(rp_id: &str, rp_origin: &str, rp_name: &str) -> Result<Self> {
        if rp_id.trim().is_empty() {
            return Err(Error::bad_parameter("missing relying party id"));
        }
        let rp_origin = Url::parse(rp_origin)
            .map_err(|err| Error::bad_parameter(format!("invalid origin {rp_origin:?}: {err}")))?;
        Ok(Self {
            rp_id: rp_id.to_string(),
            rp_origin,
            rp_name: rp_name.to_string(),
        })
    }

    #[must_use]
    pub fn rp_id(&self) -> &str {
        &self.rp_id
    }

    #[must_use]
    pub fn rp_origin(&self) -> &Url {
        &self.rp_origin
    }

    #[must_use]
    pub fn rp_name(&self) -> &str {
        &self.rp_name
    }
}

/// WebAuthn registration flow over the identity repository.
pub struct RegistrationFlow<B> {
    config: WebauthnConfig,
    webauthn: Webauthn,
    identity: Arc<IdentityRepo<B>>,
}

impl<B: Backend> RegistrationFlow<B> {
    /// Create a registration flow for the configured relying party.
    ///
    /// # Errors
    /// Returns `BadParameter` when the relying-party configuration is
    /// rejected by the protocol library.
    pub fn new(config: WebauthnConfig, identity: Arc<IdentityRepo<B>>) -> Result<Self> {
        let webauthn = WebauthnBuilder::new(&config.rp_id, &config.rp_origin)
            .map_err(|err| {
                Error::bad_parameter(format!("invalid webauthn configuration: {err}"))
            })?
            .rp_name(&config.rp_name)
            .build()
            .map_err(|err| {
                Error::bad_parameter(format!("invalid webauthn configuration: {err}"))
            })?;
        Ok(Self {
            config,
            webauthn,
            identity,
        })
    }

    /// First step of registration: issue a credential-creation challenge.
    ///
    /// Persists single-use session data for the ceremony; no device state
    /// changes until `finish`.
    ///
    /// # Errors
    /// Returns `BadParameter` when the user is empty and repository errors
    /// unchanged.
    pub async fn begin(&self, user: &str) -> Result<CreationChallengeResponse> {
        if user.is_empty() {
            return Err(Error::bad_parameter("user required"));
        }

        let local_auth = self.get_or_create_local_auth(user).await?;

        // Exclude already-registered credentials so an authenticator is not
        // enrolled twice for the same user.
        let devices = self.identity.get_mfa_devices(user, false).await?;
        let exclude: Vec<CredentialID> = devices
            .iter()
            .filter_map(MfaDevice::credential_id)
            .map(|id| CredentialID::from(id.to_vec()))
            .collect();
        let exclude = if exclude.is_empty() { None } else { Some(exclude) };

        let (ccr, registration) = self
            .webauthn
            .start_securitykey_registration(local_auth.user_id, user, user, exclude, None, None)
            .map_err(|err| {
                Error::validation(format!("generating registration challenge: {err}"))
            })?;

        let session_id = Ulid::new().to_string();
        let session = SessionData {
            challenge: ccr.public_key.challenge.clone().into(),
            user_id: local_auth.user_id,
            registration,
        };
        self.identity
            .upsert_webauthn_session_data(user, &session_id, &session)
            .await?;

        debug!(user, %session_id, "issued webauthn registration challenge");
        Ok(ccr)
    }

    /// Final step of registration: validate the signed response and commit
    /// the new device.
    ///
    /// # Errors
    /// Returns `BadParameter` on missing inputs, `NotFound` when no live
    /// challenge exists, `Validation` naming the failing protocol check,
    /// and `AlreadyExists` on a device name or credential id collision.
    pub async fn finish(
        &self,
        user: &str,
        device_name: &str,
        response: Option<RegisterPublicKeyCredential>,
    ) -> Result<MfaDevice> {
        if user.is_empty() {
            return Err(Error::bad_parameter("user required"));
        }
        if device_name.is_empty() {
            return Err(Error::bad_parameter("device name required"));
        }
        let Some(response) = response else {
            return Err(Error::bad_parameter("response required"));
        };

        let (session_id, session) = self.identity.get_latest_webauthn_session_data(user).await?;

        // Explicit origin and challenge checks so a failure names the check
        // that rejected the response.
        let client_data = parse_client_data(response.response.client_data_json.as_ref())?;
        self.check_origin(&client_data.origin)?;
        check_challenge(&client_data.challenge, &session.challenge)?;

        let security_key = self
            .webauthn
            .finish_securitykey_registration(&response, &session.registration)
            .map_err(|err| {
                Error::validation(format!("validating authenticator response: {err}"))
            })?;

        let attestation = parse_attestation(response.response.attestation_object.as_ref())?;
        let device = MfaDevice::new(
            device_name,
            MfaCredential::Webauthn(WebauthnDevice {
                credential_id: security_key.cred_id().to_vec(),
                public_key: serde_json::to_vec(&security_key).map_err(|err| {
                    Error::storage(format!("encoding credential: {err}"))
                })?,
                attestation_type: attestation.fmt,
                aaguid: attestation.aaguid,
                signature_counter: 0,
            }),
        );

        self.identity.upsert_mfa_device(user, &device).await?;
        self.identity
            .delete_webauthn_session_data(user, &session_id)
            .await?;

        debug!(user, device = %device.id, "registered webauthn device");
        Ok(device)
    }

    async fn get_or_create_local_auth(&self, user: &str) -> Result<WebauthnLocalAuth> {
        match self.identity.get_webauthn_local_auth(user).await {
            Ok(local_auth) => Ok(local_auth),
            Err(err) if err.is_not_found() => {
                let local_auth = WebauthnLocalAuth {
                    user_id: Uuid::new_v4(),
                };
                self.identity
                    .upsert_webauthn_local_auth(user, &local_auth)
                    .await?;
                Ok(local_auth)
            }
            Err(err) => Err(err),
        }
    }

    fn check_origin(&self, got: &str) -> Result<()> {
        let origin = Url::parse(got).map_err(|err| {
            Error::validation(format!("invalid origin {got:?}: {err}"))
        })?;
        if origin.origin() != self.config.rp_origin.origin() {
            return Err(Error::validation(format!(
                "invalid origin {:?}, expected {:?}",
                got,
                self.config.rp_origin.as_str()
            )));
        }
        Ok(())
    }
}

/// Client-data fields relevant to the explicit pre-checks.
#[derive(Debug, Deserialize)]
struct CollectedClientData {
    #[serde(rename = "type")]
    ceremony_type: String,
    challenge: String,
    origin: String,
}

fn parse_client_data(raw: &[u8]) -> Result<CollectedClientData> {
    let client_data: CollectedClientData = serde_json::from_slice(raw)
        .map_err(|err| Error::validation(format!("parsing client data: {err}")))?;
    if client_data.ceremony_type != "webauthn.create" {
        return Err(Error::validation(format!(
            "unexpected client data type {:?}",
            client_data.ceremony_type
        )));
    }
    Ok(client_data)
}

fn check_challenge(got: &str, want: &[u8]) -> Result<()> {
    let got = URL_SAFE_NO_PAD
        .decode(got)
        .map_err(|err| Error::validation(format!("validating challenge: {err}")))?;
    if got != want {
        return Err(Error::validation(
            "validating challenge: response does not match the issued challenge",
        ));
    }
    Ok(())
}

struct Attestation {
    fmt: String,
    aaguid: Vec<u8>,
}

/// Pull the attestation format and AAGUID out of the CBOR attestation
/// object. The rest of the structure has already been validated by the
/// protocol library at this point.
fn parse_attestation(raw: &[u8]) -> Result<Attestation> {
    let value: ciborium::Value = ciborium::from_reader(raw)
        .map_err(|err| Error::validation(format!("parsing attestation object: {err}")))?;
    let map = value
        .as_map()
        .ok_or_else(|| Error::validation("malformed attestation object"))?;

    let fmt = map
        .iter()
        .find(|(key, _)| key.as_text() == Some("fmt"))
        .and_then(|(_, value)| value.as_text())
        .unwrap_or("none")
        .to_string();

    let auth_data = map
        .iter()
        .find(|(key, _)| key.as_text() == Some("authData"))
        .and_then(|(_, value)| value.as_bytes())
        .ok_or_else(|| Error::validation("attestation object is missing authenticator data"))?;
    let aaguid = auth_data
        .get(AAGUID_OFFSET..AAGUID_OFFSET + AAGUID_LEN)
        .ok_or_else(|| Error::validation("authenticator data too short"))?
        .to_vec();

    Ok(Attestation { fmt, aaguid })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_rejects_bad_input() {
        assert!(WebauthnConfig::new("", "https://localhost", "Identeco")
            .unwrap_err()
            .is_bad_parameter());
        assert!(WebauthnConfig::new("localhost", "not a url", "Identeco")
            .unwrap_err()
            .is_bad_parameter());

        let config = WebauthnConfig::new("localhost", "https://localhost", "Identeco").unwrap();
        assert_eq!(config.rp_id(), "localhost");
    }

    #[test]
    fn client_data_requires_creation_type() {
        let raw = serde_json::json!({
            "type": "webauthn.get",
            "challenge": "AAAA",
            "origin": "https://localhost",
        });
        let err = parse_client_data(serde_json::to_vec(&raw).unwrap().as_slice()).unwrap_err();
        assert!(err.to_string().contains("client data type"));
    }

    #[test]
    fn challenge_comparison_uses_raw_bytes() {
        let want = vec![1, 2, 3, 4];
        let encoded = URL_SAFE_NO_PAD.encode(&want);
        assert!(check_challenge(&encoded, &want).is_ok());

        let err = check_challenge(&encoded, &[9, 9, 9]).unwrap_err();
        assert!(err.to_string().contains("validating challenge"));
    }
}
