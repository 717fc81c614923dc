//! Scan Pipeline
//!
//! Drives one document through capture, filename recommendation and upload:
//!
//! ```text
//! Idle ──scan──▶ Scanning ──▶ Scanned ──confirm_upload──▶ Uploading ──▶ Done
//!   ▲               │            ▲                            │
//!   └── cancelled ──┘            └────────── failure ─────────┘
//! ```
//!
//! `reset` returns to `Idle` from any state. Every stage takes `&mut self`,
//! so stages on one pipeline cannot overlap. A stage whose future was
//! dropped mid-flight leaves the pipeline `Scanning`/`Uploading`; further
//! stages are refused with [`PipelineError::Busy`] until `reset`.

pub mod transient;

pub use transient::{sweep_stale, TransientSlot, STALE_AFTER};

use crate::ai::{FilenameRecommendation, FilenameRecommender, ProviderSelection};
use crate::scanner::{ScanResult, ScannerBackend};
use crate::upload::{UploadClient, UploadOutcome, UploadRequest};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Shown by device pickers when no scanner is attached
pub const NO_SCANNERS_PLACEHOLDER: &str = "No scanners found";

/// Extensions accepted as-is when confirming a scan's filename
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff"];

const DEFAULT_EXTENSION: &str = "jpg";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0} is still in progress; reset to recover")]
    Busy(&'static str),

    #[error("no scanned document to upload")]
    NothingScanned,

    #[error("a scanned document is pending; upload or reset it first")]
    ScanPending,

    #[error("a filename is required")]
    FilenameRequired,

    #[error("scan worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Per-session connection details
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub api_url: String,
    pub api_token: String,
    pub provider: ProviderSelection,
}

/// A scan waiting for upload
#[derive(Debug, Clone)]
pub struct ScannedDocument {
    scan: ScanResult,
    suggestion: Option<FilenameRecommendation>,
    filename: String,
    last_failure: Option<UploadOutcome>,
}

impl ScannedDocument {
    pub fn scan(&self) -> &ScanResult {
        &self.scan
    }

    /// Recommendation issued for this scan, if any
    pub fn suggestion(&self) -> Option<&FilenameRecommendation> {
        self.suggestion.as_ref()
    }

    /// Current (editable) filename
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Outcome of the most recent failed upload attempt
    pub fn last_failure(&self) -> Option<&UploadOutcome> {
        self.last_failure.as_ref()
    }
}

#[derive(Debug, Clone, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    Scanning,
    Scanned(ScannedDocument),
    Uploading,
    Done,
}

impl PipelineState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Scanned(_) => "scanned",
            Self::Uploading => "uploading",
            Self::Done => "done",
        }
    }

    fn is_busy(&self) -> bool {
        matches!(self, Self::Scanning | Self::Uploading)
    }
}

/// Result of a completed `scan()` call
#[derive(Debug, Clone, PartialEq)]
pub enum ScanStep {
    Scanned {
        suggestion: Option<FilenameRecommendation>,
    },
    Cancelled,
}

/// Normalise a user-confirmed scan filename
///
/// Blank names are refused; names without an image extension get `.jpg`.
pub fn confirm_filename(name: &str) -> Option<String> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let has_image_extension = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false);

    if has_image_extension {
        Some(name.to_string())
    } else {
        Some(format!("{}.{}", name, DEFAULT_EXTENSION))
    }
}

pub struct Pipeline {
    scanner: Arc<dyn ScannerBackend>,
    recommender: FilenameRecommender,
    uploader: UploadClient,
    settings: SessionSettings,
    slot: TransientSlot,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(
        scanner: Arc<dyn ScannerBackend>,
        recommender: FilenameRecommender,
        uploader: UploadClient,
        settings: SessionSettings,
        slot: TransientSlot,
    ) -> Self {
        Self {
            scanner,
            recommender,
            uploader,
            settings,
            slot,
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Path of this session's transient scan copy
    pub fn transient_path(&self) -> &Path {
        self.slot.path()
    }

    pub fn list_scanners(&self) -> Vec<String> {
        self.scanner.list_scanners()
    }

    /// Device list for display, never empty
    pub fn scanner_choices(&self) -> Vec<String> {
        let devices = self.list_scanners();
        if devices.is_empty() {
            vec![NO_SCANNERS_PLACEHOLDER.to_string()]
        } else {
            devices
        }
    }

    /// Acquire a page and ask for a filename recommendation
    ///
    /// Re-scanning from `Scanned` or `Done` replaces the previous page.
    pub async fn scan(&mut self) -> Result<ScanStep, PipelineError> {
        if self.state.is_busy() {
            return Err(PipelineError::Busy(self.state.name()));
        }

        self.slot.clear();
        self.state = PipelineState::Scanning;

        let scanner = Arc::clone(&self.scanner);
        let target = self.slot.path().to_path_buf();
        let scan = match tokio::task::spawn_blocking(move || scanner.scan(&target)).await {
            Ok(scan) => scan,
            Err(e) => {
                warn!(error = %e, "Scan worker failed");
                self.recover();
                return Err(e.into());
            }
        };

        let Some(scan) = scan else {
            self.recover();
            return Ok(ScanStep::Cancelled);
        };

        let suggestion = self
            .recommender
            .recommend(scan.image(), &self.settings.provider)
            .await;
        let filename = suggestion
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_default();

        info!(
            provider = self.settings.provider.as_str(),
            suggestion = ?suggestion.as_ref().map(|s| s.as_str()),
            "Scan ready for upload"
        );

        self.state = PipelineState::Scanned(ScannedDocument {
            scan,
            suggestion: suggestion.clone(),
            filename,
            last_failure: None,
        });
        Ok(ScanStep::Scanned { suggestion })
    }

    /// Override the filename of the pending scan
    pub fn set_filename(&mut self, name: impl Into<String>) -> Result<(), PipelineError> {
        match &mut self.state {
            PipelineState::Scanned(document) => {
                document.filename = name.into();
                Ok(())
            }
            other if other.is_busy() => Err(PipelineError::Busy(other.name())),
            _ => Err(PipelineError::NothingScanned),
        }
    }

    /// Upload the pending scan under its confirmed filename
    ///
    /// On success the transient copy is removed and the pipeline is `Done`.
    /// Any failure keeps the scan pending with the failure recorded, so the
    /// upload can be retried or the page re-scanned.
    pub async fn confirm_upload(&mut self) -> Result<UploadOutcome, PipelineError> {
        let mut document = match std::mem::replace(&mut self.state, PipelineState::Uploading) {
            PipelineState::Scanned(document) => document,
            other => {
                let err = if other.is_busy() {
                    PipelineError::Busy(other.name())
                } else {
                    PipelineError::NothingScanned
                };
                self.state = other;
                return Err(err);
            }
        };

        let Some(filename) = confirm_filename(&document.filename) else {
            self.state = PipelineState::Scanned(document);
            return Err(PipelineError::FilenameRequired);
        };
        document.filename = filename.clone();

        let request = UploadRequest::new(
            self.slot.path(),
            self.settings.api_url.clone(),
            self.settings.api_token.clone(),
        )
        .with_filename(&filename);
        let outcome = self.uploader.upload(&request).await;

        if outcome.is_success() {
            info!(filename = %filename, "Scan uploaded");
            self.slot.clear();
            self.state = PipelineState::Done;
        } else {
            warn!(filename = %filename, outcome = %outcome, "Scan upload failed");
            document.last_failure = Some(outcome.clone());
            self.state = PipelineState::Scanned(document);
        }
        Ok(outcome)
    }

    /// Upload a file already on disk, skipping recommendation
    ///
    /// Only allowed when no scan is pending. Without a filename the file's
    /// own name is used for the title.
    pub async fn upload_existing(
        &mut self,
        path: &Path,
        filename: Option<&str>,
    ) -> Result<UploadOutcome, PipelineError> {
        match &self.state {
            PipelineState::Idle | PipelineState::Done => {}
            PipelineState::Scanned(_) => return Err(PipelineError::ScanPending),
            other => return Err(PipelineError::Busy(other.name())),
        }

        let mut request = UploadRequest::new(
            path,
            self.settings.api_url.clone(),
            self.settings.api_token.clone(),
        );
        match filename {
            Some(name) if name.trim().is_empty() => return Err(PipelineError::FilenameRequired),
            Some(name) => request = request.with_filename(name.trim()),
            None => {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    request = request.with_filename(name);
                }
            }
        }

        self.state = PipelineState::Uploading;
        let outcome = self.uploader.upload(&request).await;
        self.state = if outcome.is_success() {
            info!(path = %path.display(), "Existing document uploaded");
            PipelineState::Done
        } else {
            warn!(path = %path.display(), outcome = %outcome, "Existing document upload failed");
            PipelineState::Idle
        };
        Ok(outcome)
    }

    /// Discard any pending scan and return to `Idle`
    pub fn reset(&mut self) {
        self.recover();
    }

    fn recover(&mut self) {
        self.slot.clear();
        self.state = PipelineState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ProviderEndpoints;
    use crate::scanner::testing::{png_page, FakeBackend};
    use mockito::Matcher;
    use reqwest::Client;
    use std::sync::atomic::Ordering;
    use tempfile::{tempdir, TempDir};

    fn pipeline(backend: Arc<FakeBackend>, server_url: &str, dir: &TempDir) -> Pipeline {
        let endpoints = ProviderEndpoints {
            openai_base: server_url.to_string(),
            gemini_base: server_url.to_string(),
        };
        Pipeline::new(
            backend,
            FilenameRecommender::with_endpoints(endpoints),
            UploadClient::with_client(Client::new()),
            SessionSettings {
                api_url: server_url.to_string(),
                api_token: "token".to_string(),
                provider: ProviderSelection::None,
            },
            TransientSlot::new_in(dir.path()),
        )
    }

    #[test]
    fn test_confirm_filename() {
        assert_eq!(confirm_filename("Tax_Return_2023"), Some("Tax_Return_2023.jpg".to_string()));
        assert_eq!(confirm_filename("photo.PNG"), Some("photo.PNG".to_string()));
        assert_eq!(confirm_filename("page.tiff"), Some("page.tiff".to_string()));
        assert_eq!(confirm_filename("report.pdf"), Some("report.pdf.jpg".to_string()));
        assert_eq!(confirm_filename("   "), None);
    }

    #[test]
    fn test_scanner_choices_placeholder() {
        let dir = tempdir().unwrap();
        let empty = pipeline(Arc::new(FakeBackend::new(vec![], vec![])), "http://127.0.0.1:9", &dir);
        assert_eq!(empty.scanner_choices(), vec![NO_SCANNERS_PLACEHOLDER.to_string()]);
        assert!(empty.list_scanners().is_empty());

        let failing = pipeline(Arc::new(FakeBackend::failing()), "http://127.0.0.1:9", &dir);
        assert_eq!(failing.scanner_choices(), vec![NO_SCANNERS_PLACEHOLDER.to_string()]);

        let attached = pipeline(
            Arc::new(FakeBackend::new(vec!["Canon LiDE 300"], vec![])),
            "http://127.0.0.1:9",
            &dir,
        );
        assert_eq!(attached.scanner_choices(), vec!["Canon LiDE 300".to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_scan_returns_to_idle() {
        let dir = tempdir().unwrap();
        let mut server = mockito::Server::new_async().await;
        let no_requests = server.mock("POST", Matcher::Any).expect(0).create_async().await;
        let backend = Arc::new(FakeBackend::new(vec!["flatbed"], vec![None]));
        let mut pipeline = pipeline(Arc::clone(&backend), &server.url(), &dir);

        let step = pipeline.scan().await.unwrap();

        assert_eq!(step, ScanStep::Cancelled);
        assert!(matches!(pipeline.state(), PipelineState::Idle));
        assert!(!pipeline.transient_path().exists());
        assert_eq!(backend.acquire_calls.load(Ordering::SeqCst), 1);
        no_requests.assert_async().await;
    }

    #[tokio::test]
    async fn test_scan_then_typed_filename_uploads() {
        let dir = tempdir().unwrap();
        let mut server = mockito::Server::new_async().await;
        let upload = server
            .mock("POST", "/api/documents/post_document/")
            .match_body(Matcher::Regex(r#"name="title"\r\n\r\nTax_Return_2023\r\n"#.to_string()))
            .with_status(200)
            .create_async()
            .await;
        let backend = Arc::new(FakeBackend::new(vec!["flatbed"], vec![Some(png_page())]));
        let mut pipeline = pipeline(backend, &server.url(), &dir);

        let step = pipeline.scan().await.unwrap();
        assert_eq!(step, ScanStep::Scanned { suggestion: None });
        match pipeline.state() {
            PipelineState::Scanned(document) => {
                assert_eq!(document.filename(), "");
                assert_eq!(document.scan().dimensions(), (24, 32));
            }
            other => panic!("unexpected state: {:?}", other),
        }
        assert!(pipeline.transient_path().exists());

        pipeline.set_filename("Tax_Return_2023").unwrap();
        let outcome = pipeline.confirm_upload().await.unwrap();

        assert!(outcome.is_success());
        assert!(matches!(pipeline.state(), PipelineState::Done));
        assert!(!pipeline.transient_path().exists());
        upload.assert_async().await;
    }

    #[tokio::test]
    async fn test_blank_filename_is_refused() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(FakeBackend::new(vec!["flatbed"], vec![Some(png_page())]));
        let mut pipeline = pipeline(backend, "http://127.0.0.1:9", &dir);

        pipeline.scan().await.unwrap();
        let err = pipeline.confirm_upload().await.unwrap_err();

        assert!(matches!(err, PipelineError::FilenameRequired));
        assert!(matches!(pipeline.state(), PipelineState::Scanned(_)));
        assert!(pipeline.transient_path().exists());
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_scan_for_retry() {
        let dir = tempdir().unwrap();
        let mut server = mockito::Server::new_async().await;
        let _rejected = server
            .mock("POST", "/api/documents/post_document/")
            .with_status(400)
            .with_body(r#"{"error":"bad"}"#)
            .create_async()
            .await;
        let backend = Arc::new(FakeBackend::new(vec!["flatbed"], vec![Some(png_page())]));
        let mut pipeline = pipeline(backend, &server.url(), &dir);

        pipeline.scan().await.unwrap();
        pipeline.set_filename("Lease").unwrap();
        let outcome = pipeline.confirm_upload().await.unwrap();

        assert!(matches!(outcome, UploadOutcome::HttpFailure { status_code: 400, .. }));
        match pipeline.state() {
            PipelineState::Scanned(document) => {
                assert_eq!(document.filename(), "Lease.jpg");
                assert_eq!(document.last_failure(), Some(&outcome));
            }
            other => panic!("unexpected state: {:?}", other),
        }
        assert!(pipeline.transient_path().exists());
    }

    #[tokio::test]
    async fn test_stage_guards() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(FakeBackend::new(vec!["flatbed"], vec![Some(png_page())]));
        let mut pipeline = pipeline(backend, "http://127.0.0.1:9", &dir);

        assert!(matches!(pipeline.set_filename("x"), Err(PipelineError::NothingScanned)));
        assert!(matches!(
            pipeline.confirm_upload().await,
            Err(PipelineError::NothingScanned)
        ));

        pipeline.scan().await.unwrap();
        let existing = dir.path().join("existing.pdf");
        std::fs::write(&existing, b"%PDF").unwrap();
        assert!(matches!(
            pipeline.upload_existing(&existing, None).await,
            Err(PipelineError::ScanPending)
        ));

        pipeline.reset();
        assert!(matches!(pipeline.state(), PipelineState::Idle));
        assert!(!pipeline.transient_path().exists());
    }

    #[tokio::test]
    async fn test_upload_existing_uses_file_name_for_title() {
        let dir = tempdir().unwrap();
        let mut server = mockito::Server::new_async().await;
        let upload = server
            .mock("POST", "/api/documents/post_document/")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"filename="statement.march.pdf""#.to_string()),
                Matcher::Regex(r#"name="title"\r\n\r\nstatement\.march\r\n"#.to_string()),
            ]))
            .with_status(200)
            .create_async()
            .await;
        let backend = Arc::new(FakeBackend::new(vec![], vec![]));
        let mut pipeline = pipeline(Arc::clone(&backend), &server.url(), &dir);
        let existing = dir.path().join("statement.march.pdf");
        std::fs::write(&existing, b"%PDF-1.7").unwrap();

        let outcome = pipeline.upload_existing(&existing, None).await.unwrap();

        assert!(outcome.is_success());
        assert!(matches!(pipeline.state(), PipelineState::Done));
        assert!(existing.exists());
        assert_eq!(backend.acquire_calls.load(Ordering::SeqCst), 0);
        upload.assert_async().await;
    }

    #[tokio::test]
    async fn test_upload_existing_failure_returns_to_idle() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(FakeBackend::new(vec![], vec![]));
        let mut pipeline = pipeline(backend, "http://127.0.0.1:9", &dir);

        let outcome = pipeline
            .upload_existing(&dir.path().join("missing.pdf"), Some("Missing"))
            .await
            .unwrap();

        assert!(matches!(outcome, UploadOutcome::TransportFailure { .. }));
        assert!(matches!(pipeline.state(), PipelineState::Idle));
    }

    #[tokio::test]
    async fn test_dropping_pipeline_removes_transient_copy() {
        let dir = tempdir().unwrap();
        let backend = Arc::new(FakeBackend::new(vec!["flatbed"], vec![Some(png_page())]));
        let mut pipeline = pipeline(backend, "http://127.0.0.1:9", &dir);

        pipeline.scan().await.unwrap();
        let path = pipeline.transient_path().to_path_buf();
        assert!(path.exists());

        drop(pipeline);
        assert!(!path.exists());
    }
}
