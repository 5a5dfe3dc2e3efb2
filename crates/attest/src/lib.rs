// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Builds the in-toto `tag -> digest` statement and wraps it in a signed
//! DSSE envelope using a caller-supplied ephemeral key (see
//! `tlogistry-issuer`).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature, SigningKey};
use sha2::{Digest, Sha256};
use tlogistry_reference::{
    pre_authentication_encoding, Attestation, Envelope, EnvelopeSignature, Reference,
    IN_TOTO_PAYLOAD_TYPE,
};

#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("failed to serialize attestation: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Builds the attestation for `tag -> digest` and signs its DSSE envelope
/// with `private_key`.
pub fn sign(tag: &Reference, digest: &str, private_key: &SigningKey) -> Result<Envelope, SignError> {
    let attestation = Attestation::new(tag, digest);
    let payload = serde_json::to_vec(&attestation)?;

    let pae = pre_authentication_encoding(IN_TOTO_PAYLOAD_TYPE, &payload);
    let digest = Sha256::digest(&pae);
    let signature: Signature = private_key
        .sign_prehash(&digest)
        .expect("signing a 32-byte SHA-256 digest with P-256 cannot fail");

    Ok(Envelope {
        payload_type: IN_TOTO_PAYLOAD_TYPE.to_string(),
        payload: STANDARD.encode(&payload),
        signatures: vec![EnvelopeSignature {
            sig: STANDARD.encode(signature.to_der().as_bytes()),
        }],
    })
}
