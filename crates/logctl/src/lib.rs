// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! The tag-pinning control plane itself: `RecordBinding` writes a
//! first-sighting attestation, `LookupBinding` checks a later sighting
//! against whatever the log already holds.
//!
//! Owns its collaborators for the process lifetime (mirrors the
//! indexer service's `QueryProcessor { graph_node, attestation_signers,
//! tap_manager }` composition-by-struct-field shape); per-call ephemeral
//! keys live only inside `RecordBinding`.

use std::collections::HashMap;

use tlogistry_attest::{self, SignError};
use tlogistry_identity::{Identity, IdentityError};
use tlogistry_issuer::{Issuer, IssuerError};
use tlogistry_reference::{Info, Reference};
use tlogistry_tlog::{LogClient, LogError};
use tlogistry_verify::Verifier;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum LogControllerError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Issuer(#[from] IssuerError),
    #[error(transparent)]
    Sign(#[from] SignError),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error("log holds {count} distinct digests for `{tag}`: {digests:?}")]
    Conflict {
        tag: String,
        count: usize,
        digests: Vec<String>,
    },
}

pub struct LogController {
    identity: Identity,
    issuer: Issuer,
    log: LogClient,
    verifier: Verifier,
    audience: String,
}

impl LogController {
    pub fn new(
        identity: Identity,
        issuer: Issuer,
        log: LogClient,
        verifier: Verifier,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            issuer,
            log,
            verifier,
            audience: audience.into(),
        }
    }

    /// Records that `tag` was observed resolving to `digest`. Callers
    /// (the proxy handler) must treat failure here as best-effort: the
    /// current response is still served, and the tag will be recorded on
    /// a future request.
    pub async fn record_binding(
        &self,
        tag: &Reference,
        digest: &str,
    ) -> Result<Info, LogControllerError> {
        let token = self.identity.identity_token(&self.audience).await?;
        let issued = self
            .issuer
            .issue_certificate(self.identity.identity(), &token)
            .await?;
        let envelope = tlogistry_attest::sign(tag, digest, &issued.private_key)?;
        let entry = self.log.create_entry(&envelope, &issued.chain_pem).await?;

        info!(tag = %tag, digest, uuid = %entry.uuid, "recorded first-sighting binding");
        Ok(Info {
            uuid: entry.uuid,
            log_index: entry.log_index,
            integrated_time: entry.integrated_time,
        })
    }

    /// Looks up whatever the log already holds for `tag`. `Ok(None)`
    /// covers both "never seen" and "every candidate entry failed
    /// verification" — both are treated as first sighting by the caller.
    pub async fn lookup_binding(
        &self,
        tag: &Reference,
    ) -> Result<Option<(String, Info)>, LogControllerError> {
        let uuids = self.log.search_by_hash(&tag.index_key()).await?;
        if uuids.is_empty() {
            return Ok(None);
        }

        let mut accepted: HashMap<String, Info> = HashMap::new();
        for uuid in uuids {
            let entry = match self.log.get_by_uuid(&uuid).await {
                Ok(entry) => entry,
                Err(error) => {
                    warn!(%uuid, %error, "failed to fetch candidate entry, skipping");
                    continue;
                }
            };
            if let Some((digest, info)) = self.verifier.verify(&entry, tag) {
                accepted.entry(digest).or_insert(info);
            }
        }

        resolve(&tag.to_string(), accepted)
    }
}

/// The cardinality decision from §4.F step 4, factored out so it can be
/// exercised without a live log: 0 accepted entries means first sighting,
/// exactly 1 means an agreed-upon binding, 2 or more distinct digests is
/// a conflict that should be structurally impossible (§8 P10).
fn resolve(
    tag: &str,
    accepted: HashMap<String, Info>,
) -> Result<Option<(String, Info)>, LogControllerError> {
    match accepted.len() {
        0 => Ok(None),
        1 => Ok(accepted.into_iter().next()),
        count => Err(LogControllerError::Conflict {
            tag: tag.to_string(),
            count,
            digests: accepted.into_keys().collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(uuid: &str) -> Info {
        Info {
            uuid: uuid.to_string(),
            log_index: 1,
            integrated_time: 1000,
        }
    }

    #[test]
    fn zero_accepted_is_first_sighting() {
        assert_eq!(resolve("t", HashMap::new()).unwrap(), None);
    }

    #[test]
    fn one_accepted_is_returned() {
        let mut accepted = HashMap::new();
        accepted.insert("sha256:AAA".to_string(), info("uuid-1"));
        let (digest, returned_info) = resolve("t", accepted).unwrap().unwrap();
        assert_eq!(digest, "sha256:AAA");
        assert_eq!(returned_info.uuid, "uuid-1");
    }

    #[test]
    fn two_distinct_digests_is_a_conflict() {
        let mut accepted = HashMap::new();
        accepted.insert("sha256:AAA".to_string(), info("uuid-1"));
        accepted.insert("sha256:BBB".to_string(), info("uuid-2"));
        let err = resolve("registry.example/img:v1", accepted).unwrap_err();
        match err {
            LogControllerError::Conflict { tag, count, .. } => {
                assert_eq!(tag, "registry.example/img:v1");
                assert_eq!(count, 2);
            }
            other => panic!("expected Conflict, got {other:?}"),
        }
    }
}
