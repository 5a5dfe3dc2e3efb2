// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! A read-only OCI registry proxy that pins tags to the digest they first
//! resolved to, via a public transparency log.
//!
//! `main.rs` is a thin binary wrapper around [`run`]; the modules here are
//! `pub` so integration tests can build an [`AppState`](state::AppState)
//! against mock collaborators and drive [`router::build`] directly,
//! matching the split the indexer service draws between its binary
//! entrypoint and `service.rs`/`server/mod.rs`.

use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tlogistry_identity::Identity;
use tlogistry_issuer::Issuer;
use tlogistry_logctl::LogController;
use tlogistry_tlog::LogClient;
use tlogistry_upstream::UpstreamAuth;
use tlogistry_verify::{TrustRoot, Verifier};
use tracing::info;

pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod state;

use config::Cli;
use state::AppState;

const LANDING_PAGE: &str = include_str!("../assets/index.html");

pub fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .tcp_nodelay(true)
        .timeout(timeout)
        .build()
        .expect("failed to build HTTP client")
}

/// Resolves the deployment identity, wires up the log controller and
/// upstream auth agent, and serves the proxy until `Ctrl+C`.
///
/// Startup fetches the deployment's identity from the instance metadata
/// service; failure there is fatal, since nothing downstream can produce
/// a verifiable attestation without it (§4.A of the design).
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let metadata_client = build_client(Duration::from_secs(10));
    let identity = Identity::discover_at(metadata_client, &cli.metadata_base)
        .await
        .expect("failed to resolve deployment identity from instance metadata");
    let identity_string = identity.identity().to_string();
    info!(identity = %identity_string, "resolved deployment identity");

    let issuer = Issuer::new(build_client(cli.fulcio_timeout), &cli.fulcio_url, cli.fulcio_timeout);
    let log = LogClient::new(build_client(cli.rekor_timeout), &cli.rekor_url, cli.rekor_timeout);

    let roots_pem = fs::read_to_string(&cli.trust_root_path)
        .unwrap_or_else(|e| panic!("failed to read trust root at {:?}: {e}", cli.trust_root_path));
    let intermediates_pem = match &cli.trust_intermediates_path {
        Some(path) => fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("failed to read trust intermediates at {path:?}: {e}")),
        None => String::new(),
    };
    let trust_root =
        TrustRoot::from_pem(&roots_pem, &intermediates_pem).expect("failed to parse trust root PEM");
    // The verifier trusts only entries whose certificate identity equals
    // the identity this very deployment was just handed — never a
    // separately configured value, or a recorded entry from a restarted
    // deployment with a new identity would silently stop verifying.
    let verifier = Verifier::new(trust_root, identity_string);

    let log_controller = Arc::new(LogController::new(
        identity,
        issuer,
        log,
        verifier,
        cli.audience.clone(),
    ));

    let upstream_auth = UpstreamAuth::new(build_client(cli.upstream_timeout));
    let upstream_client = Client::builder()
        .tcp_nodelay(true)
        .timeout(cli.upstream_timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("failed to build upstream HTTP client");

    let state = AppState {
        log_controller,
        upstream_auth,
        upstream_client,
        landing_page: Arc::from(LANDING_PAGE),
        upstream_scheme: "https",
    };

    let app = router::build(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    info!(%addr, "serving registry proxy");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}
