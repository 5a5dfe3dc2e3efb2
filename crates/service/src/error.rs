// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Maps internal failures onto the OCI distribution error schema
//! (`{"errors":[{"code":...,"message":...}]}`) with the status codes
//! fixed by the design (§4.I).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tlogistry_logctl::LogControllerError;
use tlogistry_reference::ReferenceError;
use tlogistry_upstream::UpstreamAuthError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("read-only proxy, method not allowed")]
    Denied,
    #[error("malformed repository reference: {0}")]
    NameInvalid(#[from] ReferenceError),
    #[error("digest mismatch: log holds `{recorded}`, upstream returned `{observed}`")]
    TagInvalid { recorded: String, observed: String },
    #[error("failed to look up or record tag binding: {0}")]
    LogController(#[from] LogControllerError),
    #[error("failed to obtain upstream pull token: {0}")]
    UpstreamAuth(#[from] UpstreamAuthError),
    #[error("failed to reach upstream registry: {0}")]
    Upstream(#[from] reqwest::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    errors: Vec<ErrorEntry>,
}

#[derive(Serialize)]
struct ErrorEntry {
    code: &'static str,
    message: String,
}

impl ServiceError {
    fn code(&self) -> &'static str {
        match self {
            ServiceError::Denied => "DENIED",
            ServiceError::NameInvalid(_) => "NAME_INVALID",
            ServiceError::TagInvalid { .. } => "TAG_INVALID",
            ServiceError::LogController(_) | ServiceError::UpstreamAuth(_) | ServiceError::Upstream(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ServiceError::Denied => StatusCode::METHOD_NOT_ALLOWED,
            ServiceError::NameInvalid(_) => StatusCode::BAD_REQUEST,
            ServiceError::TagInvalid { .. } => StatusCode::BAD_REQUEST,
            ServiceError::LogController(_) | ServiceError::UpstreamAuth(_) | ServiceError::Upstream(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            errors: vec![ErrorEntry {
                code: self.code(),
                message: self.to_string(),
            }],
        };
        (status, Json(body)).into_response()
    }
}
