//! Protocol state persisted between `begin` and `finish`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use webauthn_rs::prelude::SecurityKeyRegistration;

use crate::errors::{Error, Result};

/// Per-user relying-party state.
///
/// Holds the WebAuthn user handle so the relying party presents a stable
/// user identifier across re-registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebauthnLocalAuth {
    pub user_id: Uuid,
}

impl WebauthnLocalAuth {
    /// # Errors
    /// Returns `BadParameter` when the user handle is unset.
    pub fn check(&self) -> Result<()> {
        if self.user_id.is_nil() {
            return Err(Error::bad_parameter("missing webauthn user id"));
        }
        Ok(())
    }
}

/// Single-use challenge state for an in-flight registration ceremony.
///
/// Stored TTL-bound under `(user, session id)`; consumed by a successful
/// `finish` and otherwise left to expire.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionData {
    /// Raw challenge bytes the authenticator must echo back.
    pub challenge: Vec<u8>,
    /// User handle the challenge was issued for.
    pub user_id: Uuid,
    /// Ceremony state needed to validate the signed response.
    pub registration: SecurityKeyRegistration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_auth_check_requires_user_handle() {
        let nil = WebauthnLocalAuth { user_id: Uuid::nil() };
        assert!(nil.check().unwrap_err().is_bad_parameter());

        let ok = WebauthnLocalAuth { user_id: Uuid::new_v4() };
        assert!(ok.check().is_ok());
    }
}
