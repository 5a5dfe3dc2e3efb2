// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! The deployment's identity, as handed out by the cloud instance metadata
//! server. `Identity::discover` runs once at startup and is fatal on
//! failure (the proxy cannot produce verifiable attestations without it);
//! `identity_token` is called per-operation and its failures are reported
//! to the caller instead.

use reqwest::Client;
use tracing::{debug, warn};

const METADATA_FLAVOR_HEADER: &str = "Metadata-Flavor";
const METADATA_FLAVOR_VALUE: &str = "Google";
const METADATA_BASE: &str = "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default";

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("failed to reach instance metadata service: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("instance metadata service returned status {0}")]
    Status(reqwest::StatusCode),
}

/// The process-wide deployment identity. Immutable after construction.
#[derive(Debug, Clone)]
pub struct Identity {
    client: Client,
    metadata_base: String,
    email: String,
}

impl Identity {
    /// Fetches the deployment's service-account email once. Intended to be
    /// called a single time at startup; the caller should treat any error
    /// here as fatal.
    pub async fn discover(client: Client) -> Result<Self, IdentityError> {
        Self::discover_at(client, METADATA_BASE).await
    }

    /// Same as [`Identity::discover`] but against an arbitrary metadata
    /// base URL. Exposed so deployments can point at a proxy or test
    /// double for the metadata service.
    pub async fn discover_at(client: Client, metadata_base: &str) -> Result<Self, IdentityError> {
        let email = fetch_text(&client, &format!("{metadata_base}/email")).await?;
        debug!(identity = %email, "resolved deployment identity");
        Ok(Self {
            client,
            metadata_base: metadata_base.to_string(),
            email,
        })
    }

    /// The deployment's stable identity string (an email address).
    pub fn identity(&self) -> &str {
        &self.email
    }

    /// A short-lived bearer token bound to `audience`. A transport or
    /// non-200 failure is reported to the caller; it is not fatal.
    pub async fn identity_token(&self, audience: &str) -> Result<String, IdentityError> {
        let url = format!(
            "{}/identity?audience={}",
            self.metadata_base,
            urlencode(audience)
        );
        let token = fetch_text(&self.client, &url).await?;
        Ok(token)
    }
}

async fn fetch_text(client: &Client, url: &str) -> Result<String, IdentityError> {
    let response = client
        .get(url)
        .header(METADATA_FLAVOR_HEADER, METADATA_FLAVOR_VALUE)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        warn!(%url, %status, "instance metadata request failed");
        return Err(IdentityError::Status(status));
    }
    Ok(response.text().await?)
}

fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn discover_reads_email_with_required_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/email"))
            .and(header(METADATA_FLAVOR_HEADER, METADATA_FLAVOR_VALUE))
            .respond_with(ResponseTemplate::new(200).set_body_string("deploy@project.iam.gserviceaccount.com"))
            .mount(&server)
            .await;

        let identity = Identity::discover_at(Client::new(), &server.uri())
            .await
            .unwrap();
        assert_eq!(identity.identity(), "deploy@project.iam.gserviceaccount.com");
    }

    #[tokio::test]
    async fn discover_fails_on_non_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/email"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = Identity::discover_at(Client::new(), &server.uri())
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::Status(_)));
    }

    #[tokio::test]
    async fn identity_token_passes_audience_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/email"))
            .respond_with(ResponseTemplate::new(200).set_body_string("deploy@project.iam.gserviceaccount.com"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/identity"))
            .and(query_param("audience", "sigstore"))
            .respond_with(ResponseTemplate::new(200).set_body_string("opaque-token"))
            .mount(&server)
            .await;

        let identity = Identity::discover_at(Client::new(), &server.uri())
            .await
            .unwrap();
        let token = identity.identity_token("sigstore").await.unwrap();
        assert_eq!(token, "opaque-token");
    }
}
