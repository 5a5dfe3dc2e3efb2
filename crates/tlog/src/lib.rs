// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! A thin client for the transparency log's three operations this proxy
//! needs: submit an entry, search the index by hash, and fetch a full
//! entry by UUID. The log is treated as opaque beyond these shapes;
//! `tlogistry-verify` is responsible for interpreting `body`.

use std::collections::HashMap;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tlogistry_reference::Envelope;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("failed to reach transparency log: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("transparency log returned status {0}: {1}")]
    Status(reqwest::StatusCode, String),
    #[error("transparency log response was not well-formed: {0}")]
    Malformed(String),
}

/// A log entry as returned by `CreateEntry` or `GetByUUID`, before
/// cryptographic verification.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub uuid: String,
    pub integrated_time: i64,
    pub log_index: i64,
    /// base64-encoded body; decodes to JSON containing `spec.publicKey`.
    pub body: String,
    /// The decoded DSSE envelope payload (the attestation), already parsed
    /// out of `body.spec.content.envelope` for convenience.
    pub attestation: Option<Value>,
}

#[derive(Deserialize)]
struct RawEntry {
    body: String,
    #[serde(rename = "integratedTime")]
    integrated_time: i64,
    #[serde(rename = "logIndex")]
    log_index: i64,
}

fn parse_entry_map(uuid_hint: Option<&str>, raw: &str) -> Result<LogEntry, LogError> {
    let map: HashMap<String, RawEntry> =
        serde_json::from_str(raw).map_err(|e| LogError::Malformed(e.to_string()))?;
    let (uuid, entry) = if let Some(hint) = uuid_hint {
        let entry = map
            .get(hint)
            .ok_or_else(|| LogError::Malformed(format!("response missing uuid {hint}")))?;
        (hint.to_string(), entry)
    } else {
        let (uuid, entry) = map
            .iter()
            .next()
            .ok_or_else(|| LogError::Malformed("empty entry map".to_string()))?;
        (uuid.clone(), entry)
    };

    let decoded_body = STANDARD
        .decode(&entry.body)
        .map_err(|e| LogError::Malformed(e.to_string()))?;
    let body_json: Value =
        serde_json::from_slice(&decoded_body).map_err(|e| LogError::Malformed(e.to_string()))?;

    let attestation = body_json
        .pointer("/spec/content/envelope")
        .and_then(Value::as_str)
        .and_then(|envelope_str| serde_json::from_str::<Envelope>(envelope_str).ok())
        .and_then(|envelope| STANDARD.decode(envelope.payload).ok())
        .and_then(|payload| serde_json::from_slice::<Value>(&payload).ok());

    Ok(LogEntry {
        uuid,
        integrated_time: entry.integrated_time,
        log_index: entry.log_index,
        body: entry.body.clone(),
        attestation,
    })
}

#[derive(Serialize)]
struct ProposedContent {
    envelope: String,
    #[serde(rename = "publicKey")]
    public_key: String,
}

#[derive(Serialize)]
struct ProposedSpec {
    content: ProposedContent,
}

#[derive(Serialize)]
struct ProposedEntry {
    kind: &'static str,
    #[serde(rename = "apiVersion")]
    api_version: &'static str,
    spec: ProposedSpec,
}

#[derive(Serialize)]
struct SearchIndexRequest {
    hash: String,
}

#[derive(Clone)]
pub struct LogClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl LogClient {
    pub fn new(client: Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    /// Submits `envelope` as a new `intoto` entry, with `cert_chain_pem`
    /// as the verification material.
    pub async fn create_entry(
        &self,
        envelope: &Envelope,
        cert_chain_pem: &str,
    ) -> Result<LogEntry, LogError> {
        let envelope_str =
            serde_json::to_string(envelope).map_err(|e| LogError::Malformed(e.to_string()))?;
        let request = ProposedEntry {
            kind: "intoto",
            api_version: "0.0.1",
            spec: ProposedSpec {
                content: ProposedContent {
                    envelope: envelope_str,
                    public_key: STANDARD.encode(cert_chain_pem),
                },
            },
        };

        let response = self
            .client
            .post(format!("{}/api/v1/log/entries", self.base_url))
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LogError::Status(status, body));
        }
        let entry = parse_entry_map(None, &body)?;
        debug!(uuid = %entry.uuid, log_index = entry.log_index, "created log entry");
        Ok(entry)
    }

    /// Returns the UUIDs of entries indexed under `hex_sha256` — the hex
    /// SHA-256 of the textual tag reference.
    pub async fn search_by_hash(&self, hex_sha256: &str) -> Result<Vec<String>, LogError> {
        let response = self
            .client
            .post(format!("{}/api/v1/index/retrieve", self.base_url))
            .timeout(self.timeout)
            .json(&SearchIndexRequest {
                hash: format!("sha256:{hex_sha256}"),
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LogError::Status(status, body));
        }
        let uuids: Vec<String> =
            serde_json::from_str(&body).map_err(|e| LogError::Malformed(e.to_string()))?;
        Ok(uuids)
    }

    pub async fn get_by_uuid(&self, uuid: &str) -> Result<LogEntry, LogError> {
        let response = self
            .client
            .get(format!("{}/api/v1/log/entries/{uuid}", self.base_url))
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LogError::Status(status, body));
        }
        parse_entry_map(Some(uuid), &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlogistry_reference::EnvelopeSignature;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_envelope() -> Envelope {
        Envelope {
            payload_type: "application/vnd.in-toto+json".to_string(),
            payload: STANDARD.encode(b"{\"tag\":\"registry.example/img:v1\"}"),
            signatures: vec![EnvelopeSignature {
                sig: STANDARD.encode(b"sig"),
            }],
        }
    }

    fn entry_map_body(uuid: &str, integrated_time: i64, log_index: i64) -> String {
        let envelope = test_envelope();
        let body = serde_json::json!({
            "spec": {
                "content": {
                    "envelope": serde_json::to_string(&envelope).unwrap(),
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

    #[tokio::test]
    async fn create_entry_parses_uuid_and_attestation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/log/entries"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_string(entry_map_body("uuid-1", 1000, 5)),
            )
            .mount(&server)
            .await;

        let client = LogClient::new(Client::new(), server.uri(), Duration::from_secs(5));
        let entry = client
            .create_entry(&test_envelope(), "-----BEGIN CERTIFICATE-----\n")
            .await
            .unwrap();

        assert_eq!(entry.uuid, "uuid-1");
        assert_eq!(entry.log_index, 5);
        assert!(entry.attestation.is_some());
    }

    #[tokio::test]
    async fn search_by_hash_returns_uuids() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/index/retrieve"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vec!["uuid-1", "uuid-2"]))
            .mount(&server)
            .await;

        let client = LogClient::new(Client::new(), server.uri(), Duration::from_secs(5));
        let uuids = client.search_by_hash("abc123").await.unwrap();
        assert_eq!(uuids, vec!["uuid-1".to_string(), "uuid-2".to_string()]);
    }

    #[tokio::test]
    async fn search_by_hash_empty_on_first_sighting() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/index/retrieve"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<String>::new()))
            .mount(&server)
            .await;

        let client = LogClient::new(Client::new(), server.uri(), Duration::from_secs(5));
        let uuids = client.search_by_hash("abc123").await.unwrap();
        assert!(uuids.is_empty());
    }

    #[tokio::test]
    async fn get_by_uuid_parses_matching_entry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/log/entries/uuid-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(entry_map_body("uuid-1", 2000, 9)),
            )
            .mount(&server)
            .await;

        let client = LogClient::new(Client::new(), server.uri(), Duration::from_secs(5));
        let entry = client.get_by_uuid("uuid-1").await.unwrap();
        assert_eq!(entry.integrated_time, 2000);
        assert_eq!(entry.log_index, 9);
    }
}
