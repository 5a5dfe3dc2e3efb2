// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! The proxy handler (§4.H): classifies a registry request, consults the
//! log controller for tag requests, performs the upstream fetch, enforces
//! the consistency rule, and streams the response back.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use tlogistry_reference::{RefSpec, Reference};
use tracing::{info, warn};

use crate::error::ServiceError;
use crate::state::AppState;

const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

pub async fn version_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            "Docker-Distribution-API-Version",
            "registry/2.0",
        )],
    )
}

pub async fn landing_page(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/html")],
        state.landing_page.to_string(),
    )
}

pub async fn style_sheet() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "text/css")], "")
}

/// Splits `/v2/<repo-path>/<kind>/<ref>` into its repository path, kind,
/// and reference, by stripping the trailing two path segments.
fn parse_registry_path(path: &str) -> Option<(String, String, String)> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 3 {
        return None;
    }
    let (repo_segments, tail) = segments.split_at(segments.len() - 2);
    let kind = tail[0].to_string();
    let reference = tail[1].to_string();
    if repo_segments.is_empty() || (kind != "manifests" && kind != "blobs") {
        return None;
    }
    Some((repo_segments.join("/"), kind, reference))
}

fn registry_host(headers: &HeaderMap) -> String {
    headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

pub async fn proxy(
    State(state): State<AppState>,
    method: Method,
    Path(rest): Path<String>,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return ServiceError::Denied.into_response();
    }

    let Some((repo, kind, raw_ref)) = parse_registry_path(&format!("/{rest}")) else {
        return ServiceError::NameInvalid(tlogistry_reference::ReferenceError::InvalidRef(rest))
            .into_response();
    };

    let registry = registry_host(&headers);
    let reference = match Reference::from_parts(&registry, &repo, &raw_ref) {
        Ok(reference) => reference,
        Err(error) => return ServiceError::NameInvalid(error).into_response(),
    };

    match handle_proxied_request(&state, &headers, &reference, &kind).await {
        Ok(response) => response,
        Err(error) => error.into_response(),
    }
}

async fn handle_proxied_request(
    state: &AppState,
    inbound_headers: &HeaderMap,
    reference: &Reference,
    kind: &str,
) -> Result<Response, ServiceError> {
    let is_tag_manifest = kind == "manifests" && reference.is_tag();

    let mut want_digest = None;
    let mut info = None;
    if is_tag_manifest {
        if let Some((digest, provenance)) = state.log_controller.lookup_binding(reference).await? {
            want_digest = Some(digest);
            info = Some(provenance);
        }
    }

    let upstream_url = format!(
        "{}://{}/v2/{}/{}/{}",
        state.upstream_scheme,
        reference.registry,
        reference.repository,
        kind,
        reference.spec
    );

    let mut request = state.upstream_client.get(&upstream_url);
    for (name, value) in inbound_headers.iter() {
        if name == axum::http::header::HOST {
            continue;
        }
        request = request.header(name, value);
    }
    if !inbound_headers.contains_key(axum::http::header::AUTHORIZATION) {
        let token = state
            .upstream_auth
            .token_for(&reference.registry, &reference.repository)
            .await?;
        if !token.is_empty() {
            request = request.bearer_auth(token);
        }
    }

    let upstream_response = request.send().await?;
    let status = StatusCode::from_u16(upstream_response.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let got_digest = upstream_response
        .headers()
        .get(DOCKER_CONTENT_DIGEST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if let (Some(want), Some(got)) = (&want_digest, &got_digest) {
        if want != got {
            return Err(ServiceError::TagInvalid {
                recorded: want.clone(),
                observed: got.clone(),
            });
        }
    }

    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream_response.headers().iter() {
        response_headers.insert(name.clone(), value.clone());
    }

    if is_tag_manifest && want_digest.is_none() {
        if let Some(got) = &got_digest {
            match state.log_controller.record_binding(reference, got).await {
                Ok(provenance) => {
                    info!(tag = %reference, digest = %got, "recorded first-sighting binding");
                    response_headers.insert(
                        HeaderName::from_static("tlog-first-seen"),
                        HeaderValue::from_static("true"),
                    );
                    info = Some(provenance);
                }
                Err(error) => {
                    warn!(tag = %reference, %error, "failed to record binding, serving anyway");
                }
            }
        }
    }

    if let Some(provenance) = &info {
        response_headers.insert(
            HeaderName::from_static("tlog-uuid"),
            HeaderValue::from_str(&provenance.uuid).unwrap_or(HeaderValue::from_static("")),
        );
        response_headers.insert(
            HeaderName::from_static("tlog-logindex"),
            HeaderValue::from_str(&provenance.log_index.to_string())
                .unwrap_or(HeaderValue::from_static("0")),
        );
        if let Ok(rendered) = provenance.integrated_time_rfc3339() {
            response_headers.insert(
                HeaderName::from_static("tlog-integratedtime"),
                HeaderValue::from_str(&rendered).unwrap_or(HeaderValue::from_static("")),
            );
        }
    }

    let body = if kind == "blobs" {
        Body::empty()
    } else {
        Body::from_stream(upstream_response.bytes_stream())
    };

    let mut response = Response::builder().status(status);
    *response.headers_mut().unwrap() = response_headers;
    Ok(response.body(body).unwrap())
}
