//! # Identeco (Identity & Credential Core)
//!
//! `identeco` is the identity and multi-factor-credential core of an
//! access-control server. It issues, stores and validates authentication
//! credentials (password hashes, TOTP and legacy U2F devices, WebAuthn/FIDO2
//! authenticators) and runs the WebAuthn device-registration ceremony end to
//! end.
//!
//! ## Storage Model
//!
//! All state lives in an ordered key-value backend behind the
//! [`backend::Backend`] trait, under hierarchical slash-delimited keys
//! (`web/users/<name>/…`). The [`identity::IdentityRepo`] translates domain
//! entities to and from JSON records, validates them before every write and
//! withholds secret material on reads unless explicitly requested. Nothing
//! assumes multi-key atomicity: cross-key invariants are enforced by
//! protocol logic, with credential-id uniqueness additionally backed by a
//! conditional-create index.
//!
//! ## Registration Ceremony
//!
//! [`webauthn::RegistrationFlow`] drives the two-phase protocol:
//! `begin` issues a single-use challenge bound to a stable per-user
//! relying-party handle and persists it with a bounded TTL; `finish`
//! validates the signed authenticator response (origin, challenge, RP ID,
//! attestation) and commits the new MFA device, consuming the challenge.
//!
//! ## Error Taxonomy
//!
//! Every failure is classifiable through [`errors::Error`]: `BadParameter`
//! for invalid input, `NotFound` for absent or expired records,
//! `AlreadyExists` for uniqueness violations, `Validation` for protocol
//! failures (the message names the failing check) and `Storage` for backend
//! faults. The crate performs no internal retries.

pub mod backend;
pub mod errors;
pub mod identity;
pub mod webauthn;

pub use errors::{Error, Result};
