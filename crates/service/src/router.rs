// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Request router (§4.J): exact routes for the landing page, style
//! sheet, and the two spellings of the API version check; everything
//! else under `/v2/` falls through to the proxy handler.

use axum::routing::{any, get};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handler::{landing_page, proxy, style_sheet, version_check};
use crate::state::AppState;

pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/", get(landing_page))
        .route("/style.css", get(style_sheet))
        .route("/v2", get(version_check))
        .route("/v2/", get(version_check))
        .route("/v2/{*rest}", any(proxy))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
