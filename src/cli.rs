//! Terminal driver for the scan pipeline

use crate::ai::{FilenameRecommender, ProviderSelection};
use crate::config::{self, AppConfig, ConfigError};
use crate::pipeline::{Pipeline, PipelineError, ScanStep, SessionSettings, TransientSlot};
use crate::scanner::BackendKind;
use crate::upload::UploadClient;
use clap::{Parser, Subcommand};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tracing::info;

#[derive(Parser)]
#[command(name = "paperless-scan")]
#[command(about = "Scan a document, let an AI model name it, upload it to Paperless-ngx")]
#[command(version)]
pub struct Cli {
    /// Config file to use instead of the default lookup
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached scanners
    Scanners,
    /// Scan one page, suggest a filename and upload it
    Scan {
        /// Use this filename instead of prompting
        #[arg(short, long)]
        filename: Option<String>,
    },
    /// Upload an existing file without scanning
    Upload {
        file: PathBuf,
        /// Filename the document title is derived from
        #[arg(short, long)]
        filename: Option<String>,
    },
    /// Store the Paperless connection and the AI provider key
    Configure {
        #[arg(long)]
        api_url: Option<String>,
        #[arg(long)]
        api_token: Option<String>,
        #[arg(long, conflicts_with_all = ["gemini_key", "no_provider"])]
        openai_key: Option<String>,
        #[arg(long, conflicts_with = "no_provider")]
        gemini_key: Option<String>,
        /// Remove any stored provider key
        #[arg(long)]
        no_provider: bool,
    },
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("terminal I/O failed: {0}")]
    Io(#[from] io::Error),
}

pub async fn execute(cli: Cli) -> Result<ExitCode, CliError> {
    match cli.command {
        Commands::Scanners => {
            let (config, _) = load_config(cli.config.as_deref())?;
            let pipeline = build_pipeline(&config);
            for device in pipeline.scanner_choices() {
                println!("{}", device);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Scan { filename } => {
            let (config, _) = load_config(cli.config.as_deref())?;
            config.validate()?;
            scan_and_upload(build_pipeline(&config), filename).await
        }
        Commands::Upload { file, filename } => {
            let (config, _) = load_config(cli.config.as_deref())?;
            config.validate()?;
            let mut pipeline = build_pipeline(&config);
            let outcome = pipeline.upload_existing(&file, filename.as_deref()).await?;
            println!("{}", outcome);
            Ok(exit_code(outcome.is_success()))
        }
        Commands::Configure {
            api_url,
            api_token,
            openai_key,
            gemini_key,
            no_provider,
        } => {
            // Environment overrides are not written back to disk.
            let path = match cli.config {
                Some(path) => path,
                None => config::search_paths()
                    .into_iter()
                    .find(|p| p.is_file())
                    .unwrap_or_else(config::default_path),
            };
            let mut stored = if path.is_file() {
                AppConfig::from_file(&path)?
            } else {
                AppConfig::default()
            };

            if let Some(url) = api_url {
                stored.api_url = url;
            }
            if let Some(token) = api_token {
                stored.api_token = token;
            }
            if let Some(key) = openai_key {
                stored.set_provider(&ProviderSelection::openai(key));
            } else if let Some(key) = gemini_key {
                stored.set_provider(&ProviderSelection::gemini(key));
            } else if no_provider {
                stored.set_provider(&ProviderSelection::None);
            }

            stored.save(&path)?;
            println!(
                "Saved {} (provider: {})",
                path.display(),
                stored.provider().as_str()
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(explicit: Option<&Path>) -> Result<(AppConfig, Option<PathBuf>), ConfigError> {
    match explicit {
        Some(path) => {
            let config = AppConfig::from_file(path)?.with_overrides(|key| std::env::var(key).ok());
            Ok((config, Some(path.to_path_buf())))
        }
        None => AppConfig::load(),
    }
}

fn build_pipeline(config: &AppConfig) -> Pipeline {
    let kind = BackendKind::detect();
    let provider = config.provider();
    info!(backend = kind.as_str(), provider = provider.as_str(), "Starting session");

    Pipeline::new(
        kind.backend(),
        FilenameRecommender::new(),
        UploadClient::new(),
        SessionSettings {
            api_url: config.api_url.clone(),
            api_token: config.api_token.clone(),
            provider,
        },
        TransientSlot::new(),
    )
}

async fn scan_and_upload(
    mut pipeline: Pipeline,
    filename: Option<String>,
) -> Result<ExitCode, CliError> {
    let mut prompt = Prompt::new(BufReader::new(tokio::io::stdin()));
    let result = run_scan_session(&mut pipeline, &mut prompt, filename).await;
    if result.is_err() {
        pipeline.reset();
    }
    result
}

/// Scan, settle on a filename and upload
///
/// Returns an `UnexpectedEof` error when input closes while a filename or
/// retry answer is still needed.
async fn run_scan_session<R>(
    pipeline: &mut Pipeline,
    prompt: &mut Prompt<R>,
    filename: Option<String>,
) -> Result<ExitCode, CliError>
where
    R: AsyncBufRead + Unpin,
{
    println!("Scanning...");
    let suggestion = match pipeline.scan().await? {
        ScanStep::Cancelled => {
            println!("Scan cancelled");
            return Ok(ExitCode::SUCCESS);
        }
        ScanStep::Scanned { suggestion } => suggestion,
    };

    match &suggestion {
        Some(name) => println!("Suggested filename: {}", name),
        None => println!("No filename suggestion available"),
    }

    let interactive = filename.is_none();
    let mut name = match filename {
        Some(name) => name,
        None => {
            let default = suggestion.as_ref().map(|s| s.as_str()).unwrap_or("");
            prompt.ask_with_default("Filename", default).await?
        }
    };

    loop {
        pipeline.set_filename(name.clone())?;
        match pipeline.confirm_upload().await {
            Ok(outcome) if outcome.is_success() => {
                println!("{}", outcome);
                return Ok(ExitCode::SUCCESS);
            }
            Ok(outcome) => {
                println!("{}", outcome);
                if !interactive || !prompt.confirm("Retry upload?").await? {
                    pipeline.reset();
                    return Ok(ExitCode::FAILURE);
                }
            }
            Err(PipelineError::FilenameRequired) if interactive => {
                println!("A filename is required");
                name = prompt.ask_with_default("Filename", "").await?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

struct Prompt<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> Prompt<R> {
    fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }

    /// Closed input is an error, never an empty answer
    async fn read_line(&mut self, label: &str) -> io::Result<String> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(label.as_bytes()).await?;
        stdout.flush().await?;
        self.lines.next_line().await?.ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "input closed before an answer")
        })
    }

    /// Empty input keeps `default`
    async fn ask_with_default(&mut self, label: &str, default: &str) -> io::Result<String> {
        let question = if default.is_empty() {
            format!("{}: ", label)
        } else {
            format!("{} [{}]: ", label, default)
        };
        let answer = self.read_line(&question).await?;
        let answer = answer.trim();
        Ok(if answer.is_empty() {
            default.to_string()
        } else {
            answer.to_string()
        })
    }

    async fn confirm(&mut self, label: &str) -> io::Result<bool> {
        let answer = self.read_line(&format!("{} [y/N]: ", label)).await?;
        Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}
