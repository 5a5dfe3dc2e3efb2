// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! The shared data model: a parsed upstream OCI reference, the tag-binding
//! attestation, the DSSE envelope that carries it, and the handful of
//! structures the transparency log hands back to us.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;

lazy_static! {
    static ref REPOSITORY_COMPONENT: Regex =
        Regex::new(r"^[a-z0-9]+((\.|_|__|-+)[a-z0-9]+)*$").unwrap();
    static ref TAG: Regex = Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9._-]{0,127}$").unwrap();
    static ref DIGEST: Regex = Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[a-fA-F0-9]{32,}$").unwrap();
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("repository reference `{0}` is missing a registry host")]
    MissingRegistry(String),
    #[error("repository reference `{0}` is missing a repository path")]
    MissingRepository(String),
    #[error("repository path component `{0}` is not a valid OCI path segment")]
    InvalidRepositoryComponent(String),
    #[error("`{0}` is neither a valid tag nor a valid digest")]
    InvalidRef(String),
}

/// The mutable-or-immutable part of a reference: either a human label or a
/// content digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefSpec {
    Tag(String),
    Digest(String),
}

impl RefSpec {
    pub fn parse(raw: &str) -> Result<Self, ReferenceError> {
        if DIGEST.is_match(raw) {
            Ok(RefSpec::Digest(raw.to_string()))
        } else if TAG.is_match(raw) {
            Ok(RefSpec::Tag(raw.to_string()))
        } else {
            Err(ReferenceError::InvalidRef(raw.to_string()))
        }
    }

    pub fn is_digest(&self) -> bool {
        matches!(self, RefSpec::Digest(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            RefSpec::Tag(t) => t,
            RefSpec::Digest(d) => d,
        }
    }
}

impl fmt::Display for RefSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `<registry>/<repository>[:<tag>|@<digest>]` reference.
///
/// `Display` renders the canonical textual form used as the attestation
/// subject and as the transparency-log index key input:
/// `<registry>/<repository>:<ref>` for both tags and digests (the proxy
/// only ever looks up tag bindings, so the `@digest` form never needs to be
/// produced, but `RefSpec::Digest` is retained so digest-addressed requests
/// share the same parser and type).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub registry: String,
    pub repository: String,
    pub spec: RefSpec,
}

impl Reference {
    pub fn new(registry: &str, repository: &str, spec: RefSpec) -> Result<Self, ReferenceError> {
        if registry.is_empty() {
            return Err(ReferenceError::MissingRegistry(repository.to_string()));
        }
        if repository.is_empty() {
            return Err(ReferenceError::MissingRepository(registry.to_string()));
        }
        for component in repository.split('/') {
            if !REPOSITORY_COMPONENT.is_match(component) {
                return Err(ReferenceError::InvalidRepositoryComponent(
                    component.to_string(),
                ));
            }
        }
        Ok(Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
            spec,
        })
    }

    /// Parses `<repo-path...>` and `<ref>` as extracted from a request path
    /// of the form `/v2/<repo-path>/<manifests|blobs>/<ref>`, paired with
    /// the registry host the request was routed to.
    pub fn from_parts(registry: &str, repository: &str, raw_ref: &str) -> Result<Self, ReferenceError> {
        let spec = RefSpec::parse(raw_ref)?;
        Self::new(registry, repository, spec)
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.spec {
            RefSpec::Tag(t) => Some(t),
            RefSpec::Digest(_) => None,
        }
    }

    pub fn is_tag(&self) -> bool {
        matches!(self.spec, RefSpec::Tag(_))
    }

    /// The `hex(SHA-256(reference.to_string()))` index key used for both
    /// recording and looking up a tag binding. Idempotent by construction
    /// (P7): the same string always hashes to the same key.
    pub fn index_key(&self) -> String {
        hex::encode(Sha256::digest(self.to_string().as_bytes()))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.spec)
    }
}

/// `predicateType` used by every attestation this proxy ever writes.
pub const PREDICATE_TYPE: &str = "tlogistry-fetched";

/// The in-toto-shaped statement binding a tag to the digest it resolved to
/// the first time this proxy observed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    #[serde(rename = "predicateType")]
    pub predicate_type: String,
    pub subject_name: String,
    pub subject_digest_sha256: String,
    pub tag: String,
    pub digest: String,
}

impl Attestation {
    pub fn new(tag: &Reference, digest: &str) -> Self {
        let subject_name = tag.to_string();
        let subject_digest_sha256 = hex::encode(Sha256::digest(subject_name.as_bytes()));
        Self {
            predicate_type: PREDICATE_TYPE.to_string(),
            subject_name: subject_name.clone(),
            subject_digest_sha256,
            tag: subject_name,
            digest: digest.to_string(),
        }
    }
}

pub const IN_TOTO_PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeSignature {
    pub sig: String,
}

/// A DSSE envelope: a payload-typed, signed wrapper around the canonical
/// attestation JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "payloadType")]
    pub payload_type: String,
    pub payload: String,
    pub signatures: Vec<EnvelopeSignature>,
}

/// The DSSE pre-authentication encoding: `"DSSEv1" SP len(type) SP type SP
/// len(payload) SP payload`, computed over the raw (non-base64) bytes.
pub fn pre_authentication_encoding(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + payload_type.len() + 32);
    buf.extend_from_slice(b"DSSEv1");
    buf.push(b' ');
    buf.extend_from_slice(payload_type.len().to_string().as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(payload_type.as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(payload.len().to_string().as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(payload);
    buf
}

/// Provenance returned to the proxy handler to populate `TLog-*` response
/// headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    pub uuid: String,
    pub log_index: i64,
    pub integrated_time: i64,
}

impl Info {
    /// Renders `integrated_time` as RFC 3339, as required for the
    /// `TLog-IntegratedTime` header.
    pub fn integrated_time_rfc3339(&self) -> Result<String, time::error::Format> {
        let dt = time::OffsetDateTime::from_unix_timestamp(self.integrated_time)
            .unwrap_or(time::OffsetDateTime::UNIX_EPOCH);
        dt.format(&time::format_description::well_known::Rfc3339)
    }
}
