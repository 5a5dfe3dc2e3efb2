// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Decodes a log entry's body, validates its embedded certificate against
//! the issuer's trust root, confirms the certificate's identity is ours,
//! and extracts the asserted digest.
//!
//! A failed precondition here is never a hard error: the caller treats a
//! rejected entry as "skip, try the next uuid, or fall back to first
//! sighting" (§4.E / §4.F of the design). This module only ever returns
//! `Ok(None)` for a rejection; `Err` is reserved for verifier
//! misconfiguration (an unparsable trust root), which should fail loudly.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use const_oid::db::rfc5280::ID_KP_CODE_SIGNING;
use der::Decode;
use ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::{Signature, VerifyingKey};
use sha2::{Digest, Sha256};
use tlogistry_reference::{Info, Reference, PREDICATE_TYPE};
use tlogistry_tlog::LogEntry;
use tracing::warn;
use x509_cert::der::asn1::BitString;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{ExtendedKeyUsage, SubjectAltName};
use x509_cert::Certificate;

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("failed to parse trust root PEM: {0}")]
    Trust(String),
}

/// The issuer's published root(s) and intermediate(s), loaded once at
/// startup from configuration.
#[derive(Clone)]
pub struct TrustRoot {
    roots: Vec<Certificate>,
    intermediates: Vec<Certificate>,
}

impl TrustRoot {
    pub fn from_pem(roots_pem: &str, intermediates_pem: &str) -> Result<Self, VerifyError> {
        Ok(Self {
            roots: parse_pem_chain(roots_pem)?,
            intermediates: parse_pem_chain(intermediates_pem)?,
        })
    }
}

fn parse_pem_chain(pem_bundle: &str) -> Result<Vec<Certificate>, VerifyError> {
    pem::parse_many(pem_bundle.as_bytes())
        .map_err(|e| VerifyError::Trust(e.to_string()))?
        .iter()
        .map(|block| {
            Certificate::from_der(block.contents()).map_err(|e| VerifyError::Trust(e.to_string()))
        })
        .collect()
}

/// Accepts or rejects a single log entry for `tag`, per the five
/// preconditions in the design (§4.E). Returns the asserted digest and
/// provenance on acceptance, `None` on any failed precondition.
pub struct Verifier {
    trust_root: TrustRoot,
    identity: String,
}

impl Verifier {
    pub fn new(trust_root: TrustRoot, identity: String) -> Self {
        Self {
            trust_root,
            identity,
        }
    }

    pub fn verify(&self, entry: &LogEntry, tag: &Reference) -> Option<(String, Info)> {
        let info = Info {
            uuid: entry.uuid.clone(),
            log_index: entry.log_index,
            integrated_time: entry.integrated_time,
        };

        let leaf = match self.extract_leaf_certificate(entry) {
            Some(cert) => cert,
            None => {
                warn!(uuid = %entry.uuid, "entry body missing a decodable certificate, skipping");
                return None;
            }
        };

        if !self.chain_is_trusted(&leaf) {
            warn!(uuid = %entry.uuid, "entry certificate does not chain to a trusted root, skipping");
            return None;
        }

        if !has_code_signing_eku(&leaf) {
            warn!(uuid = %entry.uuid, "entry certificate lacks CodeSigning key usage, skipping");
            return None;
        }

        match single_email_identity(&leaf) {
            Some(email) if email == self.identity => {}
            Some(other) => {
                warn!(uuid = %entry.uuid, identity = %other, "entry certificate identity mismatch, skipping");
                return None;
            }
            None => {
                warn!(uuid = %entry.uuid, "entry certificate does not carry exactly one email identity, skipping");
                return None;
            }
        }

        let attestation = entry.attestation.as_ref()?;
        let predicate_type = attestation.get("predicateType").and_then(|v| v.as_str());
        let asserted_tag = attestation.get("tag").and_then(|v| v.as_str());
        let digest = attestation.get("digest").and_then(|v| v.as_str());

        let tag_str = tag.to_string();
        match (predicate_type, asserted_tag, digest) {
            (Some(PREDICATE_TYPE), Some(t), Some(d)) if t == tag_str => {
                Some((d.to_string(), info))
            }
            _ => {
                warn!(uuid = %entry.uuid, "entry attestation does not match the requested tag, skipping");
                None
            }
        }
    }

    fn extract_leaf_certificate(&self, entry: &LogEntry) -> Option<Certificate> {
        let decoded = STANDARD.decode(&entry.body).ok()?;
        let body_json: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
        let public_key_pem = body_json.pointer("/spec/content/publicKey")?.as_str()?;
        let pem_bytes = STANDARD
            .decode(public_key_pem)
            .ok()
            .or_else(|| Some(public_key_pem.as_bytes().to_vec()))?;
        let text = String::from_utf8(pem_bytes).ok()?;
        parse_pem_chain(&text).ok()?.into_iter().next()
    }

    /// Walks the leaf up through any intermediates embedded alongside it
    /// and the configured trust intermediates, to one of the configured
    /// roots, verifying each signature. The clock used for each
    /// certificate's validity window is the *leaf's own* `NotBefore` (§9):
    /// a short-lived issuer certificate that has since expired still
    /// verifies signatures it made while it was live.
    fn chain_is_trusted(&self, leaf: &Certificate) -> bool {
        let clock = leaf.tbs_certificate.validity.not_before.to_date_time().unix_duration();

        let mut current = leaf.clone();
        for _ in 0..8 {
            if let Some(root) = self
                .trust_root
                .roots
                .iter()
                .find(|root| certificate_signed_by(&current, root))
            {
                return within_validity(root, clock) && within_validity(&current, clock);
            }

            let issuer = self
                .trust_root
                .intermediates
                .iter()
                .find(|candidate| certificate_signed_by(&current, candidate));

            match issuer {
                Some(issuer) => {
                    if !within_validity(&current, clock) {
                        return false;
                    }
                    current = issuer.clone();
                }
                None => return false,
            }
        }
        false
    }
}

fn within_validity(cert: &Certificate, clock: Duration) -> bool {
    let not_before = cert.tbs_certificate.validity.not_before.to_date_time().unix_duration();
    let not_after = cert.tbs_certificate.validity.not_after.to_date_time().unix_duration();
    not_before <= clock && clock <= not_after
}

/// Verifies that `subject`'s signature was produced by `issuer`'s public
/// key over `subject`'s TBS bytes. Assumes P-256/ECDSA-SHA256 throughout,
/// matching the ephemeral keys this proxy's own issuer hands out.
fn certificate_signed_by(subject: &Certificate, issuer: &Certificate) -> bool {
    let Ok(verifying_key) =
        VerifyingKey::from_sec1_bytes(issuer.tbs_certificate.subject_public_key_info.subject_public_key.raw_bytes())
    else {
        return false;
    };

    let Ok(tbs_der) = der::Encode::to_der(&subject.tbs_certificate) else {
        return false;
    };
    let digest = Sha256::digest(&tbs_der);

    let signature_bytes: &BitString = &subject.signature;
    let Some(raw) = signature_bytes.as_bytes() else {
        return false;
    };
    let Ok(signature) = Signature::from_der(raw) else {
        return false;
    };

    verifying_key.verify_prehash(&digest, &signature).is_ok()
}

fn has_code_signing_eku(cert: &Certificate) -> bool {
    let Some(extensions) = &cert.tbs_certificate.extensions else {
        return false;
    };
    extensions.iter().any(|ext| {
        ext.extn_id == const_oid::db::rfc5280::ID_CE_EXT_KEY_USAGE
            && ExtendedKeyUsage::from_der(ext.extn_value.as_bytes())
                .map(|eku| eku.0.iter().any(|oid| *oid == ID_KP_CODE_SIGNING))
                .unwrap_or(false)
    })
}

/// Returns the single embedded `rfc822Name` (email) SAN, or `None` if
/// there isn't exactly one.
fn single_email_identity(cert: &Certificate) -> Option<String> {
    let extensions = cert.tbs_certificate.extensions.as_ref()?;
    let san_ext = extensions
        .iter()
        .find(|ext| ext.extn_id == const_oid::db::rfc5280::ID_CE_SUBJECT_ALT_NAME)?;
    let san = SubjectAltName::from_der(san_ext.extn_value.as_bytes()).ok()?;

    let mut emails = san.0.iter().filter_map(|name| match name {
        GeneralName::Rfc822Name(email) => Some(email.to_string()),
        _ => None,
    });
    let first = emails.next()?;
    if emails.next().is_some() {
        None
    } else {
        Some(first)
    }
}

// Re-export so `tlogistry-logctl` doesn't need a direct `time` dependency
// just to express a default Rekor/Fulcio timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
