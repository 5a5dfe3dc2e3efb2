// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

fn parse_duration(raw: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(raw)
}

#[derive(Clone, Debug, Parser)]
#[command(name = "tlogistry-service", about = "Tag-pinning transparency-log proxy")]
pub struct Cli {
    #[arg(
        long,
        value_name = "port",
        env = "PORT",
        default_value_t = 8080,
        help = "Port to serve registry traffic on"
    )]
    pub port: u16,

    #[arg(
        long,
        value_name = "audience",
        env = "AUDIENCE",
        default_value = "sigstore",
        help = "Audience requested when minting the identity token exchanged for a signing certificate"
    )]
    pub audience: String,

    #[arg(
        long,
        value_name = "metadata-base",
        env = "GCE_METADATA_HOST",
        default_value = "http://metadata.google.internal",
        help = "Base URL of the instance metadata service used to discover identity and mint identity tokens"
    )]
    pub metadata_base: String,

    #[arg(
        long,
        value_name = "fulcio-url",
        env = "FULCIO_URL",
        default_value = "https://fulcio.sigstore.dev",
        help = "Base URL of the certificate-issuing authority"
    )]
    pub fulcio_url: String,

    #[arg(
        long,
        value_name = "fulcio-timeout",
        env = "FULCIO_TIMEOUT",
        default_value = "1m",
        value_parser = parse_duration,
        help = "Timeout for certificate-issuance requests"
    )]
    pub fulcio_timeout: Duration,

    #[arg(
        long,
        value_name = "rekor-url",
        env = "REKOR_URL",
        default_value = "https://rekor.sigstore.dev",
        help = "Base URL of the transparency log"
    )]
    pub rekor_url: String,

    #[arg(
        long,
        value_name = "rekor-timeout",
        env = "REKOR_TIMEOUT",
        default_value = "1m",
        value_parser = parse_duration,
        help = "Timeout for transparency-log requests"
    )]
    pub rekor_timeout: Duration,

    #[arg(
        long,
        value_name = "trust-root-path",
        env = "TLOGISTRY_TRUST_ROOT_PATH",
        help = "Path to a PEM bundle of root certificates the issuer's certificate chains must terminate at"
    )]
    pub trust_root_path: PathBuf,

    #[arg(
        long,
        value_name = "trust-intermediates-path",
        env = "TLOGISTRY_TRUST_INTERMEDIATES_PATH",
        help = "Path to a PEM bundle of intermediate certificates usable while validating a chain"
    )]
    pub trust_intermediates_path: Option<PathBuf>,

    #[arg(
        long,
        value_name = "upstream-timeout",
        env = "UPSTREAM_TIMEOUT",
        default_value = "30s",
        value_parser = parse_duration,
        help = "Timeout for requests made to the upstream registry being proxied"
    )]
    pub upstream_timeout: Duration,

    #[arg(
        long,
        value_name = "log-level",
        env = "LOG_LEVEL",
        help = "Log level in RUST_LOG format"
    )]
    pub log_level: Option<String>,
}
