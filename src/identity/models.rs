//! Domain records stored by the identity repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::webauthn::WebauthnLocalAuth;

/// A local user.
///
/// The secret bundle is never part of the serialized primary record; it is
/// fanned out to dedicated keys by the repository and reassembled only when
/// secrets are explicitly requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    /// Account expiry; the stored record inherits it as its TTL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub local_auth: Option<LocalAuthSecrets>,
}

impl User {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expires: None,
            local_auth: None,
        }
    }

    /// Validate the user shape before any write.
    ///
    /// # Errors
    /// Returns `BadParameter` when the name is empty.
    pub fn check(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::bad_parameter("missing user name"));
        }
        Ok(())
    }

    /// Copy of the user with the secret bundle removed.
    #[must_use]
    pub fn without_secrets(&self) -> Self {
        Self {
            local_auth: None,
            ..self.clone()
        }
    }
}

/// Secret credential bundle attached to a user on write and, on request,
/// on read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalAuthSecrets {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub password_hash: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mfa: Vec<MfaDevice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webauthn: Option<WebauthnLocalAuth>,
}

impl LocalAuthSecrets {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.password_hash.is_empty() && self.mfa.is_empty() && self.webauthn.is_none()
    }
}

/// A multi-factor authentication device registered to a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MfaDevice {
    /// Unique within the owning user; doubles as the storage key suffix.
    pub id: String,
    /// Human-chosen label, unique within the owning user.
    pub name: String,
    pub added_at: DateTime<Utc>,
    #[serde(flatten)]
    pub credential: MfaCredential,
}

/// Closed set of credential variants. The tag is checked at every
/// deserialization site; an unrecognized tag surfaces as `BadParameter` so
/// records written by a newer version fail loudly instead of silently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MfaCredential {
    Totp(TotpDevice),
    U2f(U2fDevice),
    Webauthn(WebauthnDevice),
}

/// TOTP authenticator app. The seed is the only secret embedded in a device
/// record and is cleared on secret-free reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotpDevice {
    #[serde(default)]
    pub key: String,
    /// Token rotation period in seconds.
    pub period: u32,
}

/// Legacy U2F hardware token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct U2fDevice {
    pub key_handle: Vec<u8>,
    pub public_key: Vec<u8>,
    pub counter: u32,
}

/// WebAuthn/FIDO2 authenticator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebauthnDevice {
    pub credential_id: Vec<u8>,
    /// COSE credential material as serialized by the protocol library;
    /// opaque to the repository.
    pub public_key: Vec<u8>,
    /// Attestation format conveyed at registration (`none` when the
    /// authenticator disclosed nothing).
    pub attestation_type: String,
    /// Authenticator model identifier; 16 zero bytes when undisclosed.
    pub aaguid: Vec<u8>,
    /// Monotonic clone-detection counter; starts at zero.
    pub signature_counter: u32,
}

impl MfaDevice {
    /// New device with a generated id, stamped now.
    #[must_use]
    pub fn new(name: impl Into<String>, credential: MfaCredential) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            added_at: Utc::now(),
            credential,
        }
    }

    /// Validate shape before a write.
    ///
    /// # Errors
    /// Returns `BadParameter` on empty identity fields or an empty
    /// variant-essential field.
    pub fn check(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::bad_parameter("missing device id"));
        }
        if self.name.is_empty() {
            return Err(Error::bad_parameter("missing device name"));
        }
        match &self.credential {
            MfaCredential::Totp(totp) if totp.key.is_empty() => {
                Err(Error::bad_parameter("missing totp key"))
            }
            MfaCredential::U2f(u2f) if u2f.key_handle.is_empty() || u2f.public_key.is_empty() => {
                Err(Error::bad_parameter("missing u2f key material"))
            }
            MfaCredential::Webauthn(webauthn)
                if webauthn.credential_id.is_empty() || webauthn.public_key.is_empty() =>
            {
                Err(Error::bad_parameter("missing webauthn key material"))
            }
            _ => Ok(()),
        }
    }

    /// Credential id used for cross-device uniqueness checks. TOTP devices
    /// have no comparable credential id.
    #[must_use]
    pub fn credential_id(&self) -> Option<&[u8]> {
        match &self.credential {
            MfaCredential::U2f(u2f) => Some(&u2f.key_handle),
            MfaCredential::Webauthn(webauthn) => Some(&webauthn.credential_id),
            MfaCredential::Totp(_) => None,
        }
    }

    /// Clear embedded secret material in place. U2F and WebAuthn records
    /// carry public material only and pass through unchanged.
    pub fn strip_secrets(&mut self) {
        if let MfaCredential::Totp(totp) = &mut self.credential {
            totp.key.clear();
        }
    }
}

/// Account-recovery code bundle. Codes arrive pre-hashed; the plaintext
/// never reaches storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryCodes {
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub codes: Vec<RecoveryCode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryCode {
    pub hashed_code: Vec<u8>,
    #[serde(default)]
    pub is_used: bool,
}

impl RecoveryCodes {
    /// # Errors
    /// Returns `BadParameter` when any code hash is empty.
    pub fn check(&self) -> Result<()> {
        if self.codes.iter().any(|code| code.hashed_code.is_empty()) {
            return Err(Error::bad_parameter("recovery code cannot be empty"));
        }
        Ok(())
    }

    pub fn strip_secrets(&mut self) {
        self.codes.clear();
    }
}

/// Outcome of a single password login attempt. Append-only audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoginAttempt {
    pub time: DateTime<Utc>,
    pub success: bool,
}

impl LoginAttempt {
    /// # Errors
    /// Returns `BadParameter` when the timestamp is unset.
    pub fn check(&self) -> Result<()> {
        if self.time == DateTime::<Utc>::UNIX_EPOCH {
            return Err(Error::bad_parameter("missing login attempt time"));
        }
        Ok(())
    }
}

/// Outcome of a single account-recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub time: DateTime<Utc>,
    /// Audit-retention bound; the stored entry expires at this instant.
    pub expires: DateTime<Utc>,
    pub success: bool,
}

impl RecoveryAttempt {
    /// # Errors
    /// Returns `BadParameter` when the timestamp is unset.
    pub fn check(&self) -> Result<()> {
        if self.time == DateTime::<Utc>::UNIX_EPOCH {
            return Err(Error::bad_parameter("missing recovery attempt time"));
        }
        Ok(())
    }
}
