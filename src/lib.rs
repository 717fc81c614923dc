pub mod ai;
pub mod cli;
pub mod config;
pub mod pipeline;
pub mod scanner;
pub mod upload;

pub use ai::{FilenameRecommendation, FilenameRecommender, ProviderSelection};
pub use config::AppConfig;
pub use pipeline::{Pipeline, PipelineError, PipelineState, ScanStep, SessionSettings, TransientSlot};
pub use scanner::{BackendKind, ScanResult, ScannerBackend};
pub use upload::{UploadClient, UploadOutcome, UploadRequest};

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

pub fn run() -> ExitCode {
    // Load .env file - current dir first, then the parent
    if dotenvy::dotenv().is_err() {
        let _ = dotenvy::from_path("../.env");
    }

    // Default: warn for most crates, info for the pipeline stages
    // Use RUST_LOG=debug for request/stream details
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,paperless_scan_lib=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    // Scans abandoned by a crashed session
    pipeline::sweep_stale(&std::env::temp_dir(), pipeline::STALE_AFTER);

    match runtime.block_on(cli::execute(args)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
