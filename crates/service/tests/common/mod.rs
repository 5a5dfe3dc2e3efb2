// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use p256::pkcs8::EncodePrivateKey;
use rcgen::{
    BasicConstraints, Certificate as RcgenCertificate, CertificateParams, DistinguishedName,
    DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SanType,
    PKCS_ECDSA_P256_SHA256,
};
use reqwest::Client;
use tlogistry_attest::sign;
use tlogistry_identity::Identity;
use tlogistry_issuer::Issuer;
use tlogistry_logctl::LogController;
use tlogistry_reference::{RefSpec, Reference};
use tlogistry_tlog::LogClient;
use tlogistry_upstream::UpstreamAuth;
use tlogistry_verify::{TrustRoot, Verifier};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use x509_cert::der::pem::LineEnding;
use x509_cert::der::EncodePem;
use x509_cert::Certificate as X509Certificate;

pub const IDENTITY: &str = "deploy@project.iam.gserviceaccount.com";
pub const AUDIENCE: &str = "tlogistry";

/// A self-signed root and a leaf certificate issued for [`IDENTITY`],
/// both PEM-encoded, as `tlogistry-verify`'s certificate-chain check
/// expects them. The leaf's embedded key is unrelated to whatever key
/// the issuer under test actually generates: the verifier never checks
/// the envelope signature against it, only the chain and the identity.
pub struct CertFixture {
    pub root_pem: String,
    pub leaf_pem: String,
}

pub fn build_cert_fixture(identity: &str) -> CertFixture {
    let mut ca_params = CertificateParams::new(vec![]);
    ca_params.alg = &PKCS_ECDSA_P256_SHA256;
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
    let mut ca_dn = DistinguishedName::new();
    ca_dn.push(DnType::CommonName, "Test Issuer Root");
    ca_params.distinguished_name = ca_dn;
    let ca_cert = RcgenCertificate::from_params(ca_params).unwrap();
    let root_pem = ca_cert.serialize_pem().unwrap();

    let leaf_key = p256::ecdsa::SigningKey::random(&mut rand_core::OsRng);
    let leaf_pkcs8 = leaf_key.to_pkcs8_der().unwrap();
    let leaf_keypair = KeyPair::from_der(leaf_pkcs8.as_bytes()).unwrap();

    let mut leaf_params = CertificateParams::new(vec![]);
    leaf_params.alg = &PKCS_ECDSA_P256_SHA256;
    leaf_params.key_pair = Some(leaf_keypair);
    let mut leaf_dn = DistinguishedName::new();
    leaf_dn.push(DnType::CommonName, "Test Leaf");
    leaf_params.distinguished_name = leaf_dn;
    leaf_params.subject_alt_names = vec![SanType::Rfc822Name(identity.to_string())];
    leaf_params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::CodeSigning];
    let leaf_cert = RcgenCertificate::from_params(leaf_params).unwrap();
    let leaf_der = leaf_cert.serialize_der_with_signer(&ca_cert).unwrap();
    let leaf_pem = X509Certificate::from_der(&leaf_der)
        .unwrap()
        .to_pem(LineEnding::LF)
        .unwrap();

    CertFixture { root_pem, leaf_pem }
}

/// Builds the base64 entry-map JSON body the transparency log returns for
/// both `CreateEntry` and `GetByUUID`, binding `tag` to `digest` under a
/// certificate carrying `identity`.
pub fn entry_map_body(uuid: &str, tag: &Reference, digest: &str, leaf_pem: &str, integrated_time: i64, log_index: i64) -> String {
    let throwaway_key = p256::ecdsa::SigningKey::random(&mut rand_core::OsRng);
    let envelope = sign(tag, digest, &throwaway_key).unwrap();
    let body = serde_json::json!({
        "spec": {
            "content": {
                "envelope": serde_json::to_string(&envelope).unwrap(),
                "publicKey": STANDARD.encode(leaf_pem),
            }
        }
    });
    let body_b64 = STANDARD.encode(serde_json::to_vec(&body).unwrap());
    serde_json::json!({
        uuid: {
            "body": body_b64,
            "integratedTime": integrated_time,
            "logIndex": log_index,
        }
    })
    .to_string()
}

pub fn tag(repo_host: &str, repo: &str, t: &str) -> Reference {
    Reference::new(repo_host, repo, RefSpec::Tag(t.to_string())).unwrap()
}

pub struct Harness {
    pub metadata: MockServer,
    pub fulcio: MockServer,
    pub rekor: MockServer,
    pub upstream: MockServer,
    pub fixture: CertFixture,
}

impl Harness {
    pub async fn build() -> Self {
        let metadata = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/email"))
            .respond_with(ResponseTemplate::new(200).set_body_string(IDENTITY))
            .mount(&metadata)
            .await;
        Mock::given(method("GET"))
            .and(path("/identity"))
            .respond_with(ResponseTemplate::new(200).set_body_string("identity-token"))
            .mount(&metadata)
            .await;

        let fixture = build_cert_fixture(IDENTITY);
        let fulcio = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/signingCert"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(vec![fixture.leaf_pem.clone(), fixture.root_pem.clone()]),
            )
            .mount(&fulcio)
            .await;

        let rekor = MockServer::start().await;
        let upstream = MockServer::start().await;

        Self {
            metadata,
            fulcio,
            rekor,
            upstream,
            fixture,
        }
    }

    pub async fn log_controller(&self) -> Arc<LogController> {
        let client = Client::new();
        let identity = Identity::discover_at(client.clone(), &self.metadata.uri())
            .await
            .unwrap();
        let issuer = Issuer::new(client.clone(), self.fulcio.uri(), Duration::from_secs(5));
        let log = LogClient::new(client.clone(), self.rekor.uri(), Duration::from_secs(5));
        let trust_root = TrustRoot::from_pem(&self.fixture.root_pem, "").unwrap();
        let verifier = Verifier::new(trust_root, IDENTITY.to_string());
        Arc::new(LogController::new(identity, issuer, log, verifier, AUDIENCE))
    }

    pub fn upstream_auth(&self) -> UpstreamAuth {
        UpstreamAuth::new(Client::new())
    }
}
