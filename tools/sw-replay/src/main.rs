//! Drive the ChitraKalakar offline worker against a live site.
//!
//! ## Usage
//!
//! ```bash
//! # Install the worker, then replay page loads through it
//! sw-replay replay --scope https://chitrakalakar.com/ / /artists /api/public/stats
//!
//! # Same, with a JSON report
//! sw-replay -v replay --scope https://chitrakalakar.com/ /paintings --report replay.json
//!
//! # Upload an artwork via the signed-URL flow
//! sw-replay upload --backend https://chitrakalakar.com/ --token $TOKEN artwork.jpg
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use kalakar_common::{init_logging, KalakarError, LogConfig, LogFormat, Result, ResultExt};
use kalakar_net::{
    Fetcher, HttpFetcher, LoaderConfig, Request, UploadClient, UploadConfig, UploadFile,
};
use kalakar_sw::{
    EventOutcome, FetchEvent, FetchOutcome, ResponseSource, ServiceWorker, WorkerConfig,
    WorkerEvent, WorkerHost,
};
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

#[derive(Parser)]
#[command(name = "sw-replay")]
#[command(about = "Replay page requests through the ChitraKalakar offline worker")]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a worker and replay requests through it
    Replay {
        /// Origin the worker controls
        #[arg(long)]
        scope: Option<Url>,
        /// Worker config file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the cache version
        #[arg(long)]
        cache_version: Option<String>,
        /// Paths to request, relative to the scope
        #[arg(required = true)]
        paths: Vec<String>,
        /// Output JSON report path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Upload a file through the signed-URL exchange
    Upload {
        /// Backend base URL
        #[arg(long)]
        backend: Url,
        /// Bearer token of the signed-in user
        #[arg(long)]
        token: Option<String>,
        /// Destination folder
        #[arg(long, default_value = "artworks")]
        folder: String,
        /// Content type of the file
        #[arg(long, default_value = "application/octet-stream")]
        content_type: String,
        /// File to upload
        file: PathBuf,
    },
}

#[derive(Debug, Serialize)]
struct ReplayReport {
    scope: String,
    cache_version: String,
    precached: usize,
    requests: Vec<ReplayResult>,
}

#[derive(Debug, Serialize)]
struct ReplayResult {
    path: String,
    source: &'static str,
    status: Option<u16>,
    bytes: Option<usize>,
    error: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_verbosity(cli.verbose);
    if cli.json_logs {
        log_config = log_config.with_format(LogFormat::Json);
    }
    init_logging(log_config)?;

    match cli.command {
        Commands::Replay {
            scope,
            config,
            cache_version,
            paths,
            report,
        } => {
            let config = load_config(scope, config.as_deref(), cache_version)?;
            let report_data = replay(config, &paths).await?;
            print_report(&report_data);

            if let Some(report_path) = report {
                let json = serde_json::to_string_pretty(&report_data).context("serialize report")?;
                std::fs::write(&report_path, json)?;
                println!("Report written to: {}", report_path.display());
            }
        }

        Commands::Upload {
            backend,
            token,
            folder,
            content_type,
            file,
        } => {
            let public_url = upload(backend, token, &folder, content_type, &file).await?;
            println!("{public_url}");
        }
    }

    Ok(())
}

fn load_config(
    scope: Option<Url>,
    path: Option<&Path>,
    cache_version: Option<String>,
) -> Result<WorkerConfig> {
    let mut config = match (path, scope) {
        (Some(path), scope) => {
            let mut config = WorkerConfig::from_json_file(path)
                .map_err(|e| KalakarError::config_with_source("cannot load worker config", e))?;
            if let Some(scope) = scope {
                config.scope = scope;
            }
            config
        }
        (None, Some(scope)) => WorkerConfig::new(scope),
        (None, None) => {
            return Err(KalakarError::InvalidArgument(
                "either --scope or --config is required".to_string(),
            ))
        }
    };
    if let Some(version) = cache_version {
        config = config.with_version(version);
    }
    config
        .validate()
        .map_err(|e| KalakarError::config_with_source("invalid worker config", e))?;
    Ok(config)
}

fn http_fetcher() -> Result<Arc<dyn Fetcher>> {
    let fetcher = HttpFetcher::new(LoaderConfig::default())
        .map_err(|e| KalakarError::network_with_source("cannot build HTTP client", e))?;
    Ok(Arc::new(fetcher))
}

async fn replay(config: WorkerConfig, paths: &[String]) -> Result<ReplayReport> {
    let fetcher = http_fetcher()?;
    let scope = config.scope.clone();
    let cache_version = config.cache_version.clone();

    let (host, _events) = WorkerHost::new(scope.clone());
    let worker = ServiceWorker::new(&host, config, Arc::clone(&fetcher))
        .await
        .map_err(|e| KalakarError::worker_with_source("cannot create worker", e))?;

    let precached = match worker.dispatch(WorkerEvent::Install).await {
        Ok(EventOutcome::Installed(outcome)) if outcome.activated => outcome.precached,
        Ok(_) => return Err(KalakarError::worker("worker installed but did not activate")),
        Err(e) => return Err(KalakarError::worker_with_source("install failed", e)),
    };
    info!(precached, version = %cache_version, "Worker installed");

    let mut requests = Vec::with_capacity(paths.len());
    for path in paths {
        requests.push(replay_one(&worker, fetcher.as_ref(), &scope, path).await?);
    }

    // Let background revalidation settle before reporting.
    worker.tasks().wait_idle().await;

    Ok(ReplayReport {
        scope: scope.to_string(),
        cache_version,
        precached,
        requests,
    })
}

async fn replay_one(
    worker: &ServiceWorker,
    fetcher: &dyn Fetcher,
    scope: &Url,
    path: &str,
) -> Result<ReplayResult> {
    let url = scope
        .join(path)
        .map_err(|e| KalakarError::InvalidArgument(format!("{path}: {e}")))?;
    let request = if looks_like_page(&url) {
        Request::navigate(url)
    } else {
        Request::get(url)
    };

    let outcome = worker
        .dispatch(WorkerEvent::Fetch(FetchEvent::new(request.clone())))
        .await
        .map_err(|e| KalakarError::worker_with_source("fetch dispatch failed", e))?;

    let result = match outcome {
        EventOutcome::Fetch(FetchOutcome::Respond { response, source }) => ReplayResult {
            path: path.to_string(),
            source: source_label(source),
            status: Some(response.status.as_u16()),
            bytes: Some(response.body.len()),
            error: None,
        },
        EventOutcome::Fetch(FetchOutcome::Passthrough(_)) => match fetcher.fetch(request).await {
            Ok(response) => ReplayResult {
                path: path.to_string(),
                source: "passthrough",
                status: Some(response.status.as_u16()),
                bytes: Some(response.body.len()),
                error: None,
            },
            Err(e) => ReplayResult {
                path: path.to_string(),
                source: "passthrough",
                status: None,
                bytes: None,
                error: Some(e.to_string()),
            },
        },
        _ => {
            warn!(path, "No response");
            ReplayResult {
                path: path.to_string(),
                source: "empty",
                status: None,
                bytes: None,
                error: Some("network unavailable".to_string()),
            }
        }
    };
    Ok(result)
}

/// Paths without a file extension are treated as page navigations.
fn looks_like_page(url: &Url) -> bool {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .map_or(true, |last| !last.contains('.'))
}

fn source_label(source: ResponseSource) -> &'static str {
    match source {
        ResponseSource::Cache => "cache",
        ResponseSource::Network => "network",
        ResponseSource::OfflineFallback => "offline-fallback",
    }
}

fn print_report(report: &ReplayReport) {
    println!("Replay against {} ({})", report.scope, report.cache_version);
    println!("  Precached: {}", report.precached);
    for result in &report.requests {
        match (result.status, &result.error) {
            (Some(status), _) => println!(
                "  [{}] {} {} ({} bytes)",
                result.source,
                status,
                result.path,
                result.bytes.unwrap_or_default()
            ),
            (None, Some(error)) => println!("  [{}] {} - {}", result.source, result.path, error),
            (None, None) => println!("  [{}] {}", result.source, result.path),
        }
    }
}

async fn upload(
    backend: Url,
    token: Option<String>,
    folder: &str,
    content_type: String,
    path: &Path,
) -> Result<String> {
    let bytes = std::fs::read(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| KalakarError::InvalidArgument(format!("{} is not a file", path.display())))?;

    let client = UploadClient::new(
        http_fetcher()?,
        UploadConfig {
            backend_url: backend,
            access_token: token,
        },
    );
    let file = UploadFile {
        name,
        content_type,
        bytes: Bytes::from(bytes),
    };
    client
        .upload(&file, folder)
        .await
        .map_err(|e| KalakarError::network_with_source("upload failed", e))
}
