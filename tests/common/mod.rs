//! Software authenticator for exercising registration ceremonies.
//!
//! Produces the response a browser would relay for a `none`-attestation
//! registration: collected client data echoing the challenge and origin,
//! and a CBOR attestation object whose authenticator data carries the RP-ID
//! hash, a fresh credential id and a valid P-256 COSE key. The `none`
//! format has an empty attestation statement, so no signing key is needed.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use webauthn_rs_proto::{CreationChallengeResponse, RegisterPublicKeyCredential};

const FLAG_USER_PRESENT: u8 = 0x01;
const FLAG_ATTESTED_CREDENTIAL_DATA: u8 = 0x40;

// P-256 base point; any valid curve point serves as the credential key for
// an unsigned attestation.
const P256_X: [u8; 32] = [
    0x6b, 0x17, 0xd1, 0xf2, 0xe1, 0x2c, 0x42, 0x47, 0xf8, 0xbc, 0xe6, 0xe5, 0x63, 0xa4, 0x40,
    0xf2, 0x77, 0x03, 0x7d, 0x81, 0x2d, 0xeb, 0x33, 0xa0, 0xf4, 0xa1, 0x39, 0x45, 0xd8, 0x98,
    0xc2, 0x96,
];
const P256_Y: [u8; 32] = [
    0x4f, 0xe3, 0x42, 0xe2, 0xfe, 0x1a, 0x7f, 0x9b, 0x8e, 0xe7, 0xeb, 0x4a, 0x7c, 0x0f, 0x9e,
    0x16, 0x2b, 0xce, 0x33, 0x57, 0x6b, 0x31, 0x5e, 0xce, 0xcb, 0xb6, 0x40, 0x68, 0x37, 0xbf,
    0x51, 0xf5,
];

pub struct SoftToken {
    pub key_handle: Vec<u8>,
}

impl SoftToken {
    pub fn new() -> Self {
        let mut key_handle = Uuid::new_v4().as_bytes().to_vec();
        key_handle.extend_from_slice(Uuid::new_v4().as_bytes());
        Self { key_handle }
    }

    /// Produce the registration response an authenticator at `origin` would
    /// return for the given creation challenge.
    pub fn sign_credential_creation(
        &self,
        origin: &str,
        cc: &CreationChallengeResponse,
    ) -> RegisterPublicKeyCredential {
        let challenge: Vec<u8> = cc.public_key.challenge.clone().into();
        let client_data = serde_json::json!({
            "type": "webauthn.create",
            "challenge": URL_SAFE_NO_PAD.encode(&challenge),
            "origin": origin,
            "crossOrigin": false,
        });
        let client_data_json =
            serde_json::to_vec(&client_data).expect("client data serializes");

        let attestation_object = attestation_object(&cc.public_key.rp.id, &self.key_handle);

        let credential = serde_json::json!({
            "id": URL_SAFE_NO_PAD.encode(&self.key_handle),
            "rawId": URL_SAFE_NO_PAD.encode(&self.key_handle),
            "type": "public-key",
            "response": {
                "attestationObject": URL_SAFE_NO_PAD.encode(&attestation_object),
                "clientDataJSON": URL_SAFE_NO_PAD.encode(&client_data_json),
            },
            "extensions": {},
        });
        serde_json::from_value(credential).expect("well-formed credential response")
    }
}

/// CBOR attestation object: `{fmt: "none", attStmt: {}, authData: …}`.
fn attestation_object(rp_id: &str, key_handle: &[u8]) -> Vec<u8> {
    use ciborium::Value;

    let value = Value::Map(vec![
        (Value::Text("fmt".into()), Value::Text("none".into())),
        (Value::Text("attStmt".into()), Value::Map(Vec::new())),
        (
            Value::Text("authData".into()),
            Value::Bytes(authenticator_data(rp_id, key_handle)),
        ),
    ]);
    let mut out = Vec::new();
    ciborium::into_writer(&value, &mut out).expect("attestation object serializes");
    out
}

/// Authenticator data: RP-ID hash, flags, counter, attested credential data
/// (zero AAGUID, credential id, COSE public key).
fn authenticator_data(rp_id: &str, key_handle: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(Sha256::digest(rp_id.as_bytes()).as_slice());
    out.push(FLAG_USER_PRESENT | FLAG_ATTESTED_CREDENTIAL_DATA);
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&[0u8; 16]);
    let id_len = u16::try_from(key_handle.len()).expect("credential id fits u16");
    out.extend_from_slice(&id_len.to_be_bytes());
    out.extend_from_slice(key_handle);
    out.extend_from_slice(&cose_public_key());
    out
}

/// COSE EC2 key: `{1: 2 (kty EC2), 3: -7 (ES256), -1: 1 (P-256), -2: x, -3: y}`.
fn cose_public_key() -> Vec<u8> {
    use ciborium::Value;

    let value = Value::Map(vec![
        (Value::Integer(1.into()), Value::Integer(2.into())),
        (Value::Integer(3.into()), Value::Integer((-7).into())),
        (Value::Integer((-1).into()), Value::Integer(1.into())),
        (Value::Integer((-2).into()), Value::Bytes(P256_X.to_vec())),
        (Value::Integer((-3).into()), Value::Bytes(P256_Y.to_vec())),
    ]);
    let mut out = Vec::new();
    ciborium::into_writer(&value, &mut out).expect("cose key serializes");
    out
}
