// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Performs the OCI distribution auth-challenge dance against an arbitrary
//! upstream registry: probe `/v2/`, parse the `WWW-Authenticate: Bearer`
//! challenge if one comes back, and exchange it for a repository-scoped
//! pull token. No caching: every call is independent, by design (the
//! proxy keeps no local state at all).

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamAuthError {
    #[error("failed to reach upstream registry: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("upstream registry returned unexpected status {0} probing /v2/")]
    UnexpectedStatus(StatusCode),
    #[error("upstream registry's WWW-Authenticate challenge could not be parsed: {0}")]
    Challenge(String),
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

struct BearerChallenge {
    realm: String,
    service: Option<String>,
}

/// Parses a `WWW-Authenticate` header value. Only the first scheme is
/// considered; per the design, it must be `Bearer`.
fn parse_bearer_challenge(header_value: &str) -> Result<BearerChallenge, UpstreamAuthError> {
    let mut parts = header_value.splitn(2, char::is_whitespace);
    let scheme = parts.next().unwrap_or_default();
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(UpstreamAuthError::Challenge(format!(
            "unsupported auth scheme `{scheme}`"
        )));
    }
    let params = parts.next().unwrap_or_default();

    let mut realm = None;
    let mut service = None;
    for pair in split_challenge_params(params) {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let value = value.trim_matches('"');
        match key.trim() {
            "realm" => realm = Some(value.to_string()),
            "service" => service = Some(value.to_string()),
            _ => {}
        }
    }

    Ok(BearerChallenge {
        realm: realm.ok_or_else(|| UpstreamAuthError::Challenge("missing realm".to_string()))?,
        service,
    })
}

/// Splits `key="value", key2="value2"` respecting quoted commas.
fn split_challenge_params(params: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in params.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                out.push(params[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < params.len() {
        out.push(params[start..].trim());
    }
    out
}

#[derive(Clone)]
pub struct UpstreamAuth {
    client: Client,
}

impl UpstreamAuth {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Returns a bearer token scoped to `repository:<repository>:pull`, or
    /// an empty string if the registry allows anonymous pulls.
    pub async fn token_for(
        &self,
        registry: &str,
        repository: &str,
    ) -> Result<String, UpstreamAuthError> {
        let probe = self
            .client
            .get(format!("https://{registry}/v2/"))
            .send()
            .await?;

        match probe.status() {
            StatusCode::OK => Ok(String::new()),
            StatusCode::UNAUTHORIZED => {
                let header = probe
                    .headers()
                    .get(reqwest::header::WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        UpstreamAuthError::Challenge("missing WWW-Authenticate header".to_string())
                    })?;
                let challenge = parse_bearer_challenge(header)?;

                let mut request = self.client.get(&challenge.realm).query(&[(
                    "scope",
                    format!("repository:{repository}:pull"),
                )]);
                if let Some(service) = &challenge.service {
                    request = request.query(&[("service", service)]);
                }

                let response = request.send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(UpstreamAuthError::UnexpectedStatus(status));
                }
                let token_response: TokenResponse = response.json().await?;
                debug!(%registry, %repository, "exchanged bearer challenge for pull token");
                Ok(token_response.token)
            }
            other => Err(UpstreamAuthError::UnexpectedStatus(other)),
        }
    }
}
