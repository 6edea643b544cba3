mod cli;
mod ingest;

use std::fs::File;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use cli::{ClearMarkersArg, NetworkArg, Opts, OptsCmd, OutputFormatArg};
use coord_core::export::{ExportOptions, OutputFormat};
use coord_core::join::{JoinConfig, JoinError};
use coord_core::resolver::{ClearMarkers, ResolveOutcome, ResolverConfig, ResolverError, TokenBucket};
use coord_core::store::{DbError, Store};
use coord_util_error::FmtCompact as _;
use ingest::IngestError;
use snafu::{FromString, ResultExt, Snafu, Whatever};
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

const LOG_TARGET: &str = "coord_cli";

type WhateverResult<T> = std::result::Result<T, Whatever>;

#[derive(Debug, Snafu)]
pub enum CliError {
    #[snafu(transparent)]
    Store { source: DbError },
    #[snafu(transparent)]
    Join { source: JoinError },
    #[snafu(transparent)]
    Resolver { source: ResolverError },
    #[snafu(transparent)]
    Export { source: coord_core::export::ExportError },
    #[snafu(transparent)]
    Ingest { source: IngestError },
    #[snafu(display("too many malformed rows: {rejected} > {limit}"))]
    TooManyMalformedRows { rejected: u64, limit: u64 },
    #[snafu(display("failed to open output file {path}: {source}"))]
    OutputFile { path: String, source: io::Error },
    #[snafu(display("failed to build http client: {source}"))]
    HttpClient { source: reqwest::Error },
}

pub type CliResult<T> = std::result::Result<T, CliError>;

impl CliError {
    /// Maps an error to one of the §6.4 exit codes.
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Store { source } => match source {
                DbError::UnknownNetwork { .. } => 2,
                _ => 4,
            },
            CliError::Join { source } => match source {
                JoinError::InvalidWindow { .. } | JoinError::InvalidThreshold { .. } => 2,
                JoinError::Store { .. } | JoinError::ShardFailed { .. } | JoinError::Cancelled => 4,
            },
            CliError::Resolver { .. } => 4,
            CliError::Export { .. } => 4,
            CliError::Ingest { source } => match source {
                IngestError::Io { .. } => 2,
                IngestError::Json { .. } | IngestError::Csv { .. } => 3,
            },
            CliError::TooManyMalformedRows { .. } => 3,
            CliError::OutputFile { .. } => 2,
            CliError::HttpClient { .. } => 4,
        }
    }
}

fn main() {
    if let Err(err) = init_logging() {
        eprintln!("failed to initialize logging: {err}");
        std::process::exit(4);
    }

    let opts = Opts::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to start tokio runtime");

    match runtime.block_on(handle_cmd(opts)) {
        Ok(()) => {}
        Err(err) => {
            let code = err.exit_code();
            error!(target: LOG_TARGET, err = %err.fmt_compact(), code, "command failed");
            std::process::exit(code);
        }
    }
}

async fn handle_cmd(opts: Opts) -> CliResult<()> {
    let store = Store::open(&opts.global.db)?;

    match opts.cmd {
        OptsCmd::Preprocess { format, max_malformed_rows, files } => {
            cmd_preprocess(&store, format, max_malformed_rows, files).await
        }
        OptsCmd::ResolveUrls { n_cpus, clear_markers } => {
            cmd_resolve_urls(&store, n_cpus, clear_markers).await
        }
        OptsCmd::Compute { network, time_window, n_cpus, min_edge_weight, similarity_threshold, resolved } => {
            cmd_compute(&store, network, time_window, n_cpus, min_edge_weight, similarity_threshold, resolved)
        }
        OptsCmd::ExportNetwork { out_path, network, output_format, n_messages, include_self_loops } => {
            cmd_export(&store, out_path, network, output_format, n_messages, include_self_loops)
        }
    }
}

async fn cmd_preprocess(
    store: &Store,
    format: cli::IngestFormat,
    max_malformed_rows: Option<u64>,
    files: Vec<std::path::PathBuf>,
) -> CliResult<()> {
    let mut total_rejected = 0u64;
    for path in files {
        let rows = ingest::parse_file(format.into(), &path)?;
        let report = store.insert_messages(rows)?;
        total_rejected += report.rejected_invalid.len() as u64;
        info!(
            target: LOG_TARGET,
            path = %path.display(),
            accepted = report.accepted,
            duplicates = report.rejected_as_duplicate,
            rejected = report.rejected_invalid.len(),
            "ingested file"
        );
        if let Some(limit) = max_malformed_rows {
            if total_rejected > limit {
                return TooManyMalformedRowsSnafu { rejected: total_rejected, limit }.fail();
            }
        }
    }
    Ok(())
}

async fn cmd_resolve_urls(
    store: &Store,
    n_cpus: Option<usize>,
    clear_markers: Option<ClearMarkersArg>,
) -> CliResult<()> {
    if let Some(scope) = clear_markers {
        let scope = match scope {
            ClearMarkersArg::Transient => ClearMarkers::Transient,
            ClearMarkersArg::All => ClearMarkers::All,
        };
        let cleared = store.clear_resolver_markers(scope)?;
        info!(target: LOG_TARGET, cleared, "cleared resolver markers");
        return Ok(());
    }

    let n_cpus = n_cpus.unwrap_or_else(num_cpus_or_one);
    let bucket = TokenBucket::new(25, 25);
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .context(HttpClientSnafu)?;

    let resolve = |url: String| {
        let client = client.clone();
        async move {
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() || resp.status().is_redirection() => {
                    ResolveOutcome::Resolved(resp.url().to_string())
                }
                Ok(resp) if resp.status().is_client_error() => ResolveOutcome::Permanent,
                Ok(_) => ResolveOutcome::Transient,
                Err(err) if err.is_timeout() => ResolveOutcome::Transient,
                Err(_) => ResolveOutcome::Permanent,
            }
        }
    };

    let summary = store.resolve_urls(&ResolverConfig { n_cpus }, &bucket, resolve).await?;
    info!(
        target: LOG_TARGET,
        resolved = summary.resolved,
        transient = summary.transient_failures,
        permanent = summary.permanent_failures,
        "resolver run complete"
    );
    Ok(())
}

fn cmd_compute(
    store: &Store,
    network: NetworkArg,
    time_window: f64,
    n_cpus: Option<usize>,
    min_edge_weight: u64,
    similarity_threshold: f64,
    resolved: bool,
) -> CliResult<()> {
    let config = JoinConfig {
        network: network.into(),
        time_window,
        n_cpus: n_cpus.unwrap_or_else(num_cpus_or_one),
        min_edge_weight,
        similarity_threshold,
        use_resolved_urls: resolved,
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let watcher_cancel = Arc::clone(&cancel);
    let watcher = std::thread::spawn(move || {
        if let Ok(rt) = tokio::runtime::Builder::new_current_thread().enable_all().build() {
            rt.block_on(async {
                let _ = tokio::signal::ctrl_c().await;
                watcher_cancel.store(true, Ordering::Relaxed);
            });
        }
    });

    let written = store.compute_network(&config, &cancel)?;
    cancel.store(true, Ordering::Relaxed);
    let _ = watcher.join();

    info!(target: LOG_TARGET, network = ?config.network, edges = written, "compute complete");
    Ok(())
}

fn cmd_export(
    store: &Store,
    out_path: std::path::PathBuf,
    network: NetworkArg,
    output_format: OutputFormatArg,
    n_messages: usize,
    include_self_loops: bool,
) -> CliResult<()> {
    let mut file = File::create(&out_path)
        .context(OutputFileSnafu { path: out_path.display().to_string() })?;

    let format = match output_format {
        OutputFormatArg::Graphml => OutputFormat::GraphMl,
        OutputFormatArg::Csv => OutputFormat::Csv,
    };
    let options = ExportOptions { min_weight: 1, n_messages, include_self_loops };

    store.export_network(network.into(), format, &options, &mut file)?;
    info!(target: LOG_TARGET, path = %out_path.display(), "exported network");
    Ok(())
}

fn num_cpus_or_one() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

pub fn init_logging() -> WhateverResult<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|_| Whatever::without_source("failed to initialize logging".to_string()))?;

    Ok(())
}
