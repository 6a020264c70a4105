//! Credential repository over the ordered key-value backend.
//!
//! Translates domain entities to and from JSON records under stable key
//! prefixes, applies domain validation before every write, and withholds
//! secret material on reads unless the caller explicitly asks for it.
//!
//! The backend is the only shared mutable state; no transaction spans more
//! than one key. Cross-key invariants (device-name and credential-id
//! uniqueness, single-use challenges) are enforced by protocol logic, with
//! credential ids additionally claimed through a conditional-create index so
//! concurrent registrations cannot both pass the read-then-write check.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{Backend, Item, SEPARATOR, key, range_end};
use crate::errors::{Error, Result};
use crate::identity::models::{
    LocalAuthSecrets, LoginAttempt, MfaDevice, RecoveryAttempt, RecoveryCodes, User,
};
use crate::webauthn::{SessionData, WebauthnLocalAuth};

const WEB_PREFIX: &str = "web";
const USERS_PREFIX: &str = "users";
const PARAMS_PREFIX: &str = "params";
const PWD_PREFIX: &str = "pwd";
const MFA_DEVICE_PREFIX: &str = "mfa";
const MFA_INDEX_PREFIX: &str = "mfaidx";
const WEBAUTHN_LOCAL_AUTH_PREFIX: &str = "webauthnlocalauth";
const WEBAUTHN_SESSION_DATA_PREFIX: &str = "webauthnsessiondata";
const RECOVERY_CODES_PREFIX: &str = "recoverycodes";
const RECOVERY_ATTEMPTS_PREFIX: &str = "recoveryattempts";
const ATTEMPTS_PREFIX: &str = "attempts";
const USED_TOTP_PREFIX: &str = "used_totp";

/// Validity window of a single-use TOTP token.
const USED_TOTP_TTL: Duration = Duration::from_secs(30);

/// Validity window of an issued WebAuthn challenge.
pub const WEBAUTHN_CHALLENGE_TIMEOUT: Duration = Duration::from_secs(300);

/// Identity and credential storage.
///
/// Holds the injected backend and is otherwise stateless; safe to share
/// across concurrent requests.
pub struct IdentityRepo<B> {
    backend: B,
    challenge_timeout: Duration,
}

impl<B: Backend> IdentityRepo<B> {
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            challenge_timeout: WEBAUTHN_CHALLENGE_TIMEOUT,
        }
    }

    /// Override the challenge validity window. Primarily for tests.
    #[must_use]
    pub fn with_challenge_timeout(mut self, timeout: Duration) -> Self {
        self.challenge_timeout = timeout;
        self
    }

    // ==================== Users ====================

    /// Create a user, failing if one with the same name exists.
    ///
    /// # Errors
    /// Returns `BadParameter` on an invalid user shape and `AlreadyExists`
    /// on a duplicate name.
    pub async fn create_user(&self, user: &User) -> Result<()> {
        user.check()?;
        match self.get_user(&user.name, false).await {
            Ok(_) => {
                return Err(Error::already_exists(format!(
                    "user {:?} already registered",
                    user.name
                )));
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        let item = self.user_params_item(user)?;
        self.backend.create(item).await?;
        if let Some(auth) = &user.local_auth {
            self.upsert_local_auth_secrets(&user.name, auth).await?;
        }
        Ok(())
    }

    /// Update an existing user.
    ///
    /// # Errors
    /// Returns `NotFound` when the user is absent.
    pub async fn update_user(&self, user: &User) -> Result<()> {
        user.check()?;
        self.get_user(&user.name, false).await?;

        let item = self.user_params_item(user)?;
        self.backend.update(item).await?;
        if let Some(auth) = &user.local_auth {
            self.upsert_local_auth_secrets(&user.name, auth).await?;
        }
        Ok(())
    }

    /// Create or overwrite a user.
    ///
    /// # Errors
    /// Returns `BadParameter` on an invalid user shape.
    pub async fn upsert_user(&self, user: &User) -> Result<()> {
        user.check()?;
        let item = self.user_params_item(user)?;
        self.backend.put(item).await?;
        if let Some(auth) = &user.local_auth {
            self.upsert_local_auth_secrets(&user.name, auth).await?;
        }
        Ok(())
    }

    /// Fetch a user by name. Without `with_secrets` the local-auth bundle is
    /// always absent from the result.
    ///
    /// # Errors
    /// Returns `NotFound` when the user is absent or expired.
    pub async fn get_user(&self, name: &str, with_secrets: bool) -> Result<User> {
        if name.is_empty() {
            return Err(Error::bad_parameter("missing user name"));
        }
        if with_secrets {
            return self.get_user_with_secrets(name).await;
        }

        let item = match self.backend.get(&user_key(name, PARAMS_PREFIX)).await {
            Ok(item) => item,
            Err(err) if err.is_not_found() => {
                return Err(Error::not_found(format!("user {name:?} is not found")));
            }
            Err(err) => return Err(err),
        };
        let mut user: User = unmarshal(&item.value, "user")?;
        user.local_auth = None;
        Ok(user)
    }

    async fn get_user_with_secrets(&self, name: &str) -> Result<User> {
        let (start, end) = user_scope(name);
        let items = self.backend.get_range(&start, &end, None).await?;
        let collected: Vec<(String, Item)> = items
            .into_iter()
            .filter_map(|item| {
                let suffix = item_suffix(&item.key, &start)?;
                Some((suffix, item))
            })
            .collect();
        user_from_items(name, &collected)
    }

    /// List all users.
    ///
    /// # Errors
    /// Returns an error if the backend scan fails or a record is malformed.
    pub async fn get_users(&self, with_secrets: bool) -> Result<Vec<User>> {
        let mut start = key(&[WEB_PREFIX, USERS_PREFIX]);
        start.push(SEPARATOR);
        let end = range_end(&start);
        let items = self.backend.get_range(&start, &end, None).await?;

        if !with_secrets {
            let params_suffix = format!("/{PARAMS_PREFIX}");
            let mut out = Vec::new();
            for item in items {
                if !item.key.ends_with(params_suffix.as_bytes()) {
                    continue;
                }
                let mut user: User = unmarshal(&item.value, "user")?;
                user.local_auth = None;
                out.push(user);
            }
            return Ok(out);
        }

        let mut by_user: BTreeMap<String, Vec<(String, Item)>> = BTreeMap::new();
        for item in items {
            let Some((user, suffix)) = split_user_key(&item.key, &start) else {
                continue;
            };
            by_user.entry(user).or_default().push((suffix, item));
        }
        let mut out = Vec::with_capacity(by_user.len());
        for (name, items) in &by_user {
            match user_from_items(name, items) {
                Ok(user) => out.push(user),
                // Orphaned credential records without a primary entry.
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }

    /// Delete a user and every record under its prefix.
    ///
    /// # Errors
    /// Returns `NotFound` when the user is absent.
    pub async fn delete_user(&self, name: &str) -> Result<()> {
        self.get_user(name, false).await?;
        let (start, end) = user_scope(name);
        debug!(user = name, "deleting user");
        self.backend.delete_range(&start, &end).await
    }

    /// Delete every user record.
    ///
    /// # Errors
    /// Returns an error if the backend range delete fails.
    pub async fn delete_all_users(&self) -> Result<()> {
        let mut start = key(&[WEB_PREFIX, USERS_PREFIX]);
        start.push(SEPARATOR);
        let end = range_end(&start);
        self.backend.delete_range(&start, &end).await
    }

    async fn upsert_local_auth_secrets(&self, user: &str, auth: &LocalAuthSecrets) -> Result<()> {
        if !auth.password_hash.is_empty() {
            self.upsert_password_hash(user, &auth.password_hash).await?;
        }
        for device in &auth.mfa {
            self.upsert_mfa_device(user, device).await?;
        }
        if let Some(webauthn) = &auth.webauthn {
            self.upsert_webauthn_local_auth(user, webauthn).await?;
        }
        Ok(())
    }

    fn user_params_item(&self, user: &User) -> Result<Item> {
        let value = marshal(&user.without_secrets(), "user")?;
        let mut item = Item::new(user_key(&user.name, PARAMS_PREFIX), value);
        item.expires = user.expires;
        Ok(item)
    }

    // ==================== Passwords ====================

    /// Store a password hash, creating a stub user first when none exists.
    /// Hash computation happens outside this crate.
    ///
    /// # Errors
    /// Returns `BadParameter` on an empty user name.
    pub async fn upsert_password_hash(&self, user: &str, hash: &[u8]) -> Result<()> {
        if user.is_empty() {
            return Err(Error::bad_parameter("missing user name"));
        }
        match Box::pin(self.create_user(&User::new(user))).await {
            Ok(()) => {}
            Err(err) if err.is_already_exists() => {}
            Err(err) => return Err(err),
        }
        let item = Item::new(user_key(user, PWD_PREFIX), hash.to_vec());
        self.backend.put(item).await
    }

    /// Fetch a user's password hash.
    ///
    /// # Errors
    /// Returns `NotFound` when no hash is stored.
    pub async fn get_password_hash(&self, user: &str) -> Result<Vec<u8>> {
        if user.is_empty() {
            return Err(Error::bad_parameter("missing user name"));
        }
        match self.backend.get(&user_key(user, PWD_PREFIX)).await {
            Ok(item) => Ok(item.value),
            Err(err) if err.is_not_found() => {
                Err(Error::not_found(format!("user {user:?} is not found")))
            }
            Err(err) => Err(err),
        }
    }

    // ==================== Used TOTP tokens ====================

    /// Record a successfully used TOTP token so it cannot be replayed within
    /// its validity window.
    ///
    /// # Errors
    /// Returns `BadParameter` on an empty user name.
    pub async fn upsert_used_totp_token(&self, user: &str, token: &str) -> Result<()> {
        if user.is_empty() {
            return Err(Error::bad_parameter("missing user name"));
        }
        let item = Item::new(user_key(user, USED_TOTP_PREFIX), token.as_bytes().to_vec())
            .with_expiry(Utc::now() + USED_TOTP_TTL);
        self.backend.put(item).await
    }

    /// Last successfully used TOTP token, or `"0"` when none is recorded.
    ///
    /// # Errors
    /// Returns `BadParameter` on an empty user name.
    pub async fn get_used_totp_token(&self, user: &str) -> Result<String> {
        if user.is_empty() {
            return Err(Error::bad_parameter("missing user name"));
        }
        match self.backend.get(&user_key(user, USED_TOTP_PREFIX)).await {
            Ok(item) => Ok(String::from_utf8_lossy(&item.value).into_owned()),
            Err(err) if err.is_not_found() => Ok("0".to_string()),
            Err(err) => Err(err),
        }
    }

    /// Remove the used-token marker.
    ///
    /// # Errors
    /// Returns `NotFound` when no marker is stored.
    pub async fn delete_used_totp_token(&self, user: &str) -> Result<()> {
        if user.is_empty() {
            return Err(Error::bad_parameter("missing user name"));
        }
        self.backend.delete(&user_key(user, USED_TOTP_PREFIX)).await
    }

    // ==================== MFA devices ====================

    /// Create or update an MFA device, enforcing per-user uniqueness of
    /// device names and credential ids.
    ///
    /// # Errors
    /// Returns `AlreadyExists` when another device holds the same name or
    /// credential id, `BadParameter` on an invalid device.
    pub async fn upsert_mfa_device(&self, user: &str, device: &MfaDevice) -> Result<()> {
        if user.is_empty() {
            return Err(Error::bad_parameter("missing parameter user"));
        }
        device.check()?;

        let devices = self.get_mfa_devices(user, false).await?;
        for existing in &devices {
            if existing.name == device.name {
                if existing.id == device.id {
                    // Same name and id: an update of this device.
                    continue;
                }
                return Err(Error::already_exists(format!(
                    "mfa device with name {:?} already exists",
                    device.name
                )));
            }
            let (Some(new_id), Some(old_id)) = (device.credential_id(), existing.credential_id())
            else {
                continue;
            };
            if new_id == old_id {
                return Err(Error::already_exists(format!(
                    "credential id already in use by device {:?}",
                    existing.name
                )));
            }
        }

        let value = marshal(device, "mfa device")?;

        // Claim the credential id through a conditional create so two
        // concurrent registrations cannot both pass the scan above.
        let mut claimed_index = None;
        if let Some(credential_id) = device.credential_id() {
            let index_key = mfa_index_key(user, credential_id);
            let index_item = Item::new(index_key.clone(), device.id.as_bytes().to_vec());
            match self.backend.create(index_item).await {
                Ok(()) => claimed_index = Some(index_key),
                Err(err) if err.is_already_exists() => {
                    let owner = self.backend.get(&index_key).await?;
                    if owner.value != device.id.as_bytes() {
                        return Err(Error::already_exists(
                            "credential id already in use by another device",
                        ));
                    }
                }
                Err(err) => return Err(err),
            }
        }

        let item = Item::new(mfa_device_key(user, &device.id), value);
        if let Err(err) = self.backend.put(item).await {
            if let Some(index_key) = claimed_index {
                if let Err(rollback) = self.backend.delete(&index_key).await {
                    warn!(user, device = %device.id, %rollback,
                        "failed to release credential id claim");
                }
            }
            return Err(err);
        }
        Ok(())
    }

    /// List a user's MFA devices. Without `with_secrets` TOTP seeds are
    /// cleared; U2F and WebAuthn records carry no embedded secrets and pass
    /// through unchanged.
    ///
    /// # Errors
    /// Returns `BadParameter` on an empty user name or an unrecognized
    /// device record.
    pub async fn get_mfa_devices(&self, user: &str, with_secrets: bool) -> Result<Vec<MfaDevice>> {
        if user.is_empty() {
            return Err(Error::bad_parameter("missing parameter user"));
        }
        let (start, end) = user_scope_prefix(user, MFA_DEVICE_PREFIX);
        let items = self.backend.get_range(&start, &end, None).await?;
        let mut devices = Vec::with_capacity(items.len());
        for item in items {
            let mut device: MfaDevice = unmarshal(&item.value, "mfa device")?;
            if !with_secrets {
                device.strip_secrets();
            }
            devices.push(device);
        }
        Ok(devices)
    }

    /// Delete an MFA device and release its credential-id claim.
    ///
    /// # Errors
    /// Returns `NotFound` when the device is absent.
    pub async fn delete_mfa_device(&self, user: &str, id: &str) -> Result<()> {
        if user.is_empty() {
            return Err(Error::bad_parameter("missing parameter user"));
        }
        if id.is_empty() {
            return Err(Error::bad_parameter("missing parameter id"));
        }

        let device_key = mfa_device_key(user, id);
        let item = self.backend.get(&device_key).await?;
        let device: MfaDevice = unmarshal(&item.value, "mfa device")?;

        self.backend.delete(&device_key).await?;
        if let Some(credential_id) = device.credential_id() {
            match self.backend.delete(&mfa_index_key(user, credential_id)).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    // ==================== WebAuthn local auth ====================

    /// Store per-user relying-party state.
    ///
    /// # Errors
    /// Returns `BadParameter` on an empty user or invalid state.
    pub async fn upsert_webauthn_local_auth(
        &self,
        user: &str,
        wla: &WebauthnLocalAuth,
    ) -> Result<()> {
        if user.is_empty() {
            return Err(Error::bad_parameter("missing parameter user"));
        }
        wla.check()?;
        let item = Item::new(
            user_key(user, WEBAUTHN_LOCAL_AUTH_PREFIX),
            marshal(wla, "webauthn local auth")?,
        );
        self.backend.put(item).await
    }

    /// Fetch per-user relying-party state.
    ///
    /// # Errors
    /// Returns `NotFound` when none is stored.
    pub async fn get_webauthn_local_auth(&self, user: &str) -> Result<WebauthnLocalAuth> {
        if user.is_empty() {
            return Err(Error::bad_parameter("missing parameter user"));
        }
        let item = self
            .backend
            .get(&user_key(user, WEBAUTHN_LOCAL_AUTH_PREFIX))
            .await?;
        unmarshal(&item.value, "webauthn local auth")
    }

    // ==================== WebAuthn session data ====================

    /// Store challenge/session state, bounded by the challenge TTL.
    ///
    /// # Errors
    /// Returns `BadParameter` on an empty user or session id.
    pub async fn upsert_webauthn_session_data(
        &self,
        user: &str,
        session_id: &str,
        sd: &SessionData,
    ) -> Result<()> {
        check_session_params(user, session_id)?;
        let item = Item::new(
            session_data_key(user, session_id),
            marshal(sd, "session data")?,
        )
        .with_expiry(Utc::now() + self.challenge_timeout);
        self.backend.put(item).await
    }

    /// Fetch challenge/session state.
    ///
    /// # Errors
    /// Returns `NotFound` when the record is absent or expired.
    pub async fn get_webauthn_session_data(
        &self,
        user: &str,
        session_id: &str,
    ) -> Result<SessionData> {
        check_session_params(user, session_id)?;
        let item = self.backend.get(&session_data_key(user, session_id)).await?;
        unmarshal(&item.value, "session data")
    }

    /// Most recently issued challenge/session state for a user, with its
    /// session id. Session ids are time-ordered, so the last key in range
    /// order is the newest.
    ///
    /// # Errors
    /// Returns `NotFound` when no live session exists.
    pub async fn get_latest_webauthn_session_data(
        &self,
        user: &str,
    ) -> Result<(String, SessionData)> {
        if user.is_empty() {
            return Err(Error::bad_parameter("missing parameter user"));
        }
        let (start, end) = user_scope_prefix(user, WEBAUTHN_SESSION_DATA_PREFIX);
        let items = self.backend.get_range(&start, &end, None).await?;
        let Some(item) = items.last() else {
            return Err(Error::not_found(format!(
                "no webauthn session data found for user {user:?}"
            )));
        };
        let Some(session_id) = item_suffix(&item.key, &start) else {
            return Err(Error::storage("malformed session data key"));
        };
        let sd = unmarshal(&item.value, "session data")?;
        Ok((session_id, sd))
    }

    /// Remove consumed challenge/session state.
    ///
    /// # Errors
    /// Returns `NotFound` when the record is absent.
    pub async fn delete_webauthn_session_data(&self, user: &str, session_id: &str) -> Result<()> {
        check_session_params(user, session_id)?;
        self.backend.delete(&session_data_key(user, session_id)).await
    }

    // ==================== Recovery codes ====================

    /// Store a user's recovery-code bundle. Codes are hashed by the caller.
    ///
    /// # Errors
    /// Returns `BadParameter` on an empty user or empty code hash.
    pub async fn upsert_recovery_codes(&self, user: &str, codes: &RecoveryCodes) -> Result<()> {
        if user.is_empty() {
            return Err(Error::bad_parameter("missing parameter user"));
        }
        codes.check()?;
        let item = Item::new(
            user_key(user, RECOVERY_CODES_PREFIX),
            marshal(codes, "recovery codes")?,
        );
        self.backend.put(item).await
    }

    /// Fetch a user's recovery-code bundle; the hashed codes are withheld
    /// unless secrets are requested.
    ///
    /// # Errors
    /// Returns `NotFound` when none are stored.
    pub async fn get_recovery_codes(&self, user: &str, with_secrets: bool) -> Result<RecoveryCodes> {
        if user.is_empty() {
            return Err(Error::bad_parameter("missing parameter user"));
        }
        let item = self.backend.get(&user_key(user, RECOVERY_CODES_PREFIX)).await?;
        let mut codes: RecoveryCodes = unmarshal(&item.value, "recovery codes")?;
        if !with_secrets {
            codes.strip_secrets();
        }
        Ok(codes)
    }

    // ==================== Recovery attempts ====================

    /// Append a recovery attempt, retained until the attempt's expiry.
    ///
    /// # Errors
    /// Returns `BadParameter` on an empty user or invalid attempt.
    pub async fn create_user_recovery_attempt(
        &self,
        user: &str,
        attempt: &RecoveryAttempt,
    ) -> Result<()> {
        if user.is_empty() {
            return Err(Error::bad_parameter("missing parameter user"));
        }
        attempt.check()?;
        let item = Item::new(
            user_item_key(user, RECOVERY_ATTEMPTS_PREFIX, &Uuid::new_v4().to_string()),
            marshal(attempt, "recovery attempt")?,
        )
        .with_expiry(attempt.expires);
        self.backend.create(item).await
    }

    /// List a user's recovery attempts, oldest first.
    ///
    /// # Errors
    /// Returns `BadParameter` on an empty user name.
    pub async fn get_user_recovery_attempts(&self, user: &str) -> Result<Vec<RecoveryAttempt>> {
        if user.is_empty() {
            return Err(Error::bad_parameter("missing parameter user"));
        }
        let (start, end) = user_scope_prefix(user, RECOVERY_ATTEMPTS_PREFIX);
        let items = self.backend.get_range(&start, &end, None).await?;
        let mut attempts = Vec::with_capacity(items.len());
        for item in items {
            attempts.push(unmarshal::<RecoveryAttempt>(&item.value, "recovery attempt")?);
        }
        attempts.sort_by_key(|attempt| attempt.time);
        Ok(attempts)
    }

    /// Remove all recovery attempts of a user. Called after a successful
    /// recovery.
    ///
    /// # Errors
    /// Returns `BadParameter` on an empty user name.
    pub async fn delete_user_recovery_attempts(&self, user: &str) -> Result<()> {
        if user.is_empty() {
            return Err(Error::bad_parameter("missing parameter user"));
        }
        let (start, end) = user_scope_prefix(user, RECOVERY_ATTEMPTS_PREFIX);
        self.backend.delete_range(&start, &end).await
    }

    // ==================== Login attempts ====================

    /// Append a login attempt, retained for `ttl`.
    ///
    /// # Errors
    /// Returns `BadParameter` on an empty user or invalid attempt.
    pub async fn add_user_login_attempt(
        &self,
        user: &str,
        attempt: &LoginAttempt,
        ttl: Duration,
    ) -> Result<()> {
        if user.is_empty() {
            return Err(Error::bad_parameter("missing username"));
        }
        attempt.check()?;
        let item = Item::new(
            user_item_key(user, ATTEMPTS_PREFIX, &Uuid::new_v4().to_string()),
            marshal(attempt, "login attempt")?,
        )
        .with_expiry(Utc::now() + ttl);
        self.backend.put(item).await
    }

    /// List a user's login attempts, oldest first.
    ///
    /// # Errors
    /// Returns `BadParameter` on an empty user name.
    pub async fn get_user_login_attempts(&self, user: &str) -> Result<Vec<LoginAttempt>> {
        if user.is_empty() {
            return Err(Error::bad_parameter("missing username"));
        }
        let (start, end) = user_scope_prefix(user, ATTEMPTS_PREFIX);
        let items = self.backend.get_range(&start, &end, None).await?;
        let mut attempts = Vec::with_capacity(items.len());
        for item in items {
            attempts.push(unmarshal::<LoginAttempt>(&item.value, "login attempt")?);
        }
        attempts.sort_by_key(|attempt| attempt.time);
        Ok(attempts)
    }

    /// Remove all login attempts of a user. Called after a successful login.
    ///
    /// # Errors
    /// Returns `BadParameter` on an empty user name.
    pub async fn delete_user_login_attempts(&self, user: &str) -> Result<()> {
        if user.is_empty() {
            return Err(Error::bad_parameter("missing username"));
        }
        let (start, end) = user_scope_prefix(user, ATTEMPTS_PREFIX);
        self.backend.delete_range(&start, &end).await
    }
}

// ==================== Key layout ====================

fn user_key(user: &str, suffix: &str) -> Vec<u8> {
    key(&[WEB_PREFIX, USERS_PREFIX, user, suffix])
}

fn user_item_key(user: &str, prefix: &str, id: &str) -> Vec<u8> {
    key(&[WEB_PREFIX, USERS_PREFIX, user, prefix, id])
}

fn mfa_device_key(user: &str, id: &str) -> Vec<u8> {
    user_item_key(user, MFA_DEVICE_PREFIX, id)
}

fn mfa_index_key(user: &str, credential_id: &[u8]) -> Vec<u8> {
    user_item_key(user, MFA_INDEX_PREFIX, &URL_SAFE_NO_PAD.encode(credential_id))
}

fn session_data_key(user: &str, session_id: &str) -> Vec<u8> {
    user_item_key(user, WEBAUTHN_SESSION_DATA_PREFIX, session_id)
}

/// Scan bounds for every record of one user. The trailing separator keeps a
/// user named `foo` from capturing `foobar`'s records.
fn user_scope(user: &str) -> (Vec<u8>, Vec<u8>) {
    let mut start = key(&[WEB_PREFIX, USERS_PREFIX, user]);
    start.push(SEPARATOR);
    let end = range_end(&start);
    (start, end)
}

/// Scan bounds for one record family of one user, e.g. `…/mfa/`. The
/// trailing separator keeps `mfa` from capturing `mfaidx`.
fn user_scope_prefix(user: &str, prefix: &str) -> (Vec<u8>, Vec<u8>) {
    let mut start = key(&[WEB_PREFIX, USERS_PREFIX, user, prefix]);
    start.push(SEPARATOR);
    let end = range_end(&start);
    (start, end)
}

fn item_suffix(item_key: &[u8], start: &[u8]) -> Option<String> {
    let suffix = item_key.strip_prefix(start)?;
    Some(String::from_utf8_lossy(suffix).into_owned())
}

fn split_user_key(item_key: &[u8], root: &[u8]) -> Option<(String, String)> {
    let rest = item_key.strip_prefix(root)?;
    let rest = std::str::from_utf8(rest).ok()?;
    let (user, suffix) = rest.split_once('/')?;
    Some((user.to_string(), suffix.to_string()))
}

fn check_session_params(user: &str, session_id: &str) -> Result<()> {
    if user.is_empty() {
        return Err(Error::bad_parameter("missing parameter user"));
    }
    if session_id.is_empty() {
        return Err(Error::bad_parameter("missing parameter session id"));
    }
    Ok(())
}

// ==================== Record encoding ====================

fn marshal<T: Serialize>(value: &T, what: &str) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|err| Error::storage(format!("encoding {what}: {err}")))
}

fn unmarshal<T: DeserializeOwned>(raw: &[u8], what: &str) -> Result<T> {
    serde_json::from_slice(raw)
        .map_err(|err| Error::bad_parameter(format!("invalid {what} record: {err}")))
}

fn user_from_items(name: &str, items: &[(String, Item)]) -> Result<User> {
    let mfa_prefix = format!("{MFA_DEVICE_PREFIX}/");
    let params = items
        .iter()
        .find(|(suffix, _)| suffix == PARAMS_PREFIX)
        .ok_or_else(|| Error::not_found(format!("user {name:?} is not found")))?;
    let mut user: User = unmarshal(&params.1.value, "user")?;
    if params.1.expires.is_some() {
        user.expires = params.1.expires;
    }

    let mut secrets = LocalAuthSecrets::default();
    for (suffix, item) in items {
        if suffix == PWD_PREFIX {
            secrets.password_hash = item.value.clone();
        } else if suffix.starts_with(&mfa_prefix) {
            secrets.mfa.push(unmarshal(&item.value, "mfa device")?);
        } else if suffix == WEBAUTHN_LOCAL_AUTH_PREFIX {
            secrets.webauthn = Some(unmarshal(&item.value, "webauthn local auth")?);
        }
    }
    if !secrets.is_empty() {
        user.local_auth = Some(secrets);
    }
    Ok(user)
}
