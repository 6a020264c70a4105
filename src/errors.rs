//! Error taxonomy shared by the storage backend, the credential repository
//! and the WebAuthn flows.
//!
//! Callers classify failures programmatically through the variant (or the
//! `is_*` predicates) rather than by matching message text. Messages carry
//! enough context to diagnose a failure without leaking secret material.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid required input. Never retried; the caller must
    /// correct the request.
    #[error("bad parameter: {0}")]
    BadParameter(String),

    /// Referenced entity absent or expired.
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness violation (duplicate user, device name or credential id).
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic-concurrency conflict on a revision-checked write.
    #[error("compare failed: {0}")]
    CompareFailed(String),

    /// WebAuthn protocol validation failure. The message names the failing
    /// check (origin, challenge, authenticator response).
    #[error("{0}")]
    Validation(String),

    /// Underlying store unavailable or a record could not be encoded.
    #[error("storage: {0}")]
    Storage(String),
}

impl Error {
    pub fn bad_parameter(msg: impl Into<String>) -> Self {
        Self::BadParameter(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    pub fn compare_failed(msg: impl Into<String>) -> Self {
        Self::CompareFailed(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    #[must_use]
    pub fn is_bad_parameter(&self) -> bool {
        matches!(self, Self::BadParameter(_))
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    #[must_use]
    pub fn is_compare_failed(&self) -> bool {
        matches!(self, Self::CompareFailed(_))
    }

    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_match_variants() {
        assert!(Error::bad_parameter("x").is_bad_parameter());
        assert!(Error::not_found("x").is_not_found());
        assert!(Error::already_exists("x").is_already_exists());
        assert!(Error::compare_failed("x").is_compare_failed());
        assert!(Error::validation("x").is_validation());
        assert!(!Error::storage("x").is_not_found());
    }

    #[test]
    fn display_keeps_the_failing_check_visible() {
        let err = Error::validation("invalid origin \"https://evil.example.com\"");
        assert!(err.to_string().contains("origin"));

        let err = Error::bad_parameter("user required");
        assert!(err.to_string().contains("user required"));
    }
}
