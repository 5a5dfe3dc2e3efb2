// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use reqwest::Client;
use tlogistry_logctl::LogController;
use tlogistry_upstream::UpstreamAuth;

/// Everything a request handler needs, shared across every task. Nothing
/// here is mutated after construction: the log controller composes its
/// own HTTP clients (safe for concurrent use), and `landing_page` is
/// built once at startup by the single caller that constructs `AppState`.
#[derive(Clone)]
pub struct AppState {
    pub log_controller: Arc<LogController>,
    pub upstream_auth: UpstreamAuth,
    /// Dedicated client with redirects disabled: upstream redirects (most
    /// commonly blob storage locations) are passed through to the client
    /// verbatim rather than followed here.
    pub upstream_client: Client,
    pub landing_page: Arc<str>,
    /// `https` in production; overridable so tests can point the proxy at
    /// a local, unencrypted stand-in registry.
    pub upstream_scheme: &'static str,
}
