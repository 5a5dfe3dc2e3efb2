// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Issues a fresh per-operation P-256 keypair and exchanges it, together
//! with proof of the deployment's identity, for a short-lived code-signing
//! certificate chained to the issuer's published root.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature, SigningKey};
use p256::pkcs8::EncodePublicKey;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum IssuerError {
    #[error("failed to reach certificate issuer: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("certificate issuer returned status {0}: {1}")]
    Status(reqwest::StatusCode, String),
    #[error("failed to encode ephemeral public key: {0}")]
    Encoding(#[from] spki::Error),
    #[error("issuer response did not contain a certificate chain")]
    EmptyChain,
}

#[derive(Serialize)]
struct PublicKeyRequest {
    algorithm: &'static str,
    content: String,
}

#[derive(Serialize)]
struct SigningCertRequest {
    #[serde(rename = "publicKey")]
    public_key: PublicKeyRequest,
    #[serde(rename = "signedEmailAddress")]
    signed_email_address: String,
}

/// A freshly issued certificate chain paired with the private key it
/// attests to. Callers use the key exactly once, to sign an attestation,
/// then discard both.
pub struct IssuedCertificate {
    pub private_key: SigningKey,
    /// PEM-encoded certificate chain, leaf first, verbatim from the issuer.
    pub chain_pem: String,
}

#[derive(Clone)]
pub struct Issuer {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl Issuer {
    pub fn new(client: Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    /// Generates a new P-256 keypair, proves control of `identity` using
    /// `identity_token` as the bearer credential, and returns the issued
    /// chain. The private key never leaves this call's return value.
    pub async fn issue_certificate(
        &self,
        identity: &str,
        identity_token: &str,
    ) -> Result<IssuedCertificate, IssuerError> {
        let private_key = SigningKey::random(&mut rand_core::OsRng);
        let public_key = private_key.verifying_key();
        let spki_der = public_key.to_public_key_der()?;

        // Binds the ephemeral public key to the identity the token asserts:
        // a stolen token without this key is useless, and this key without
        // the token proves nothing.
        let digest = Sha256::digest(identity.as_bytes());
        let proof: Signature = private_key
            .sign_prehash(&digest)
            .expect("signing a 32-byte SHA-256 digest with P-256 cannot fail");

        let request = SigningCertRequest {
            public_key: PublicKeyRequest {
                algorithm: "ecdsa",
                content: STANDARD.encode(spki_der.as_bytes()),
            },
            signed_email_address: STANDARD.encode(proof.to_der().as_bytes()),
        };

        let response = self
            .client
            .post(format!("{}/api/v1/signingCert", self.base_url))
            .timeout(self.timeout)
            .bearer_auth(identity_token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IssuerError::Status(status, body));
        }

        let chain: Vec<String> = response.json().await?;
        let leaf = chain.first().ok_or(IssuerError::EmptyChain)?;
        debug!(chain_len = chain.len(), "issued ephemeral certificate");
        let _ = leaf;

        Ok(IssuedCertificate {
            private_key,
            chain_pem: chain.join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_CERT_PEM: &str = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----";

    #[tokio::test]
    async fn issue_certificate_sends_proof_and_returns_chain() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/signingCert"))
            .and(header("authorization", "Bearer token-123"))
            .and(body_partial_json(serde_json::json!({
                "publicKey": { "algorithm": "ecdsa" }
            })))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(vec![TEST_CERT_PEM, TEST_CERT_PEM]),
            )
            .mount(&server)
            .await;

        let issuer = Issuer::new(Client::new(), server.uri(), Duration::from_secs(5));
        let issued = issuer
            .issue_certificate("deploy@project.iam.gserviceaccount.com", "token-123")
            .await
            .unwrap();

        assert!(issued.chain_pem.contains("BEGIN CERTIFICATE"));
    }

    #[tokio::test]
    async fn issue_certificate_surfaces_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/signingCert"))
            .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
            .mount(&server)
            .await;

        let issuer = Issuer::new(Client::new(), server.uri(), Duration::from_secs(5));
        let err = issuer
            .issue_certificate("deploy@project.iam.gserviceaccount.com", "token-123")
            .await
            .unwrap_err();
        assert!(matches!(err, IssuerError::Status(_, _)));
    }
}
