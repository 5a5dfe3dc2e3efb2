// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use tlogistry_service::config::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(cli.log_level.clone().unwrap_or_else(|| "info".to_string()))
        .init();

    tlogistry_service::run(cli).await
}
