//! Paperless-ngx Upload Client
//!
//! Submits one document to `POST {base_url}/api/documents/post_document/`
//! and reports exactly one [`UploadOutcome`] per attempt. There is no retry
//! here; re-invoking is the caller's decision.

use crate::ai::http_client::upload_client;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const POST_DOCUMENT_PATH: &str = "/api/documents/post_document/";

/// Strip exactly one trailing extension from a filename
///
/// `report.final.pdf` → `report.final`. A leading dot (`.hidden`) is not an
/// extension separator.
pub fn title_from_filename(filename: &str) -> String {
    match filename.rfind('.') {
        Some(pos) if pos > 0 => filename[..pos].to_string(),
        _ => filename.to_string(),
    }
}

/// One document submission
#[derive(Debug, Clone)]
pub struct UploadRequest {
    file_path: PathBuf,
    base_url: String,
    token: String,
    title: Option<String>,
    filename: Option<String>,
}

impl UploadRequest {
    pub fn new(
        file_path: impl Into<PathBuf>,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            base_url: base_url.into(),
            token: token.into(),
            title: None,
            filename: None,
        }
    }

    /// Name the document: the part carries `filename`, the title is its stem
    pub fn with_filename(mut self, filename: &str) -> Self {
        self.title = Some(title_from_filename(filename));
        self.filename = Some(filename.to_string());
        self
    }

    /// Set the title directly, leaving the part name alone
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), POST_DOCUMENT_PATH)
    }

    /// Filename announced for the `document` part
    fn part_file_name(&self) -> String {
        self.filename.clone().unwrap_or_else(|| {
            self.file_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document".to_string())
        })
    }
}

/// Response body of a rejected upload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    /// JSON when it parses, raw text otherwise
    pub fn parse(text: String) -> Self {
        match serde_json::from_str(&text) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(text),
        }
    }
}

impl fmt::Display for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(value) => write!(f, "{}", value),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// Result of one upload attempt
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// Server answered 200
    Success,
    /// Server answered with any other status
    HttpFailure {
        status_code: u16,
        body: ResponseBody,
    },
    /// No response at all (refused, DNS, timeout) or the file could not be read
    TransportFailure { cause: String },
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// `(success, status_code, body)`
    ///
    /// `(true, None, None)` on success; transport failures carry no status.
    pub fn into_parts(self) -> (bool, Option<u16>, Option<ResponseBody>) {
        match self {
            Self::Success => (true, None, None),
            Self::HttpFailure { status_code, body } => (false, Some(status_code), Some(body)),
            Self::TransportFailure { cause } => (false, None, Some(ResponseBody::Text(cause))),
        }
    }
}

impl fmt::Display for UploadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("Document uploaded"),
            Self::HttpFailure { status_code, body } => {
                write!(f, "Upload rejected ({}): {}", status_code, body)
            }
            Self::TransportFailure { cause } => write!(f, "Upload failed: {}", cause),
        }
    }
}

/// Client for the Paperless-ngx document endpoint
#[derive(Clone)]
pub struct UploadClient {
    client: Client,
}

impl UploadClient {
    pub fn new() -> Self {
        Self::with_client(upload_client().clone())
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Submit the document, never panicking and never returning an error
    ///
    /// The opened file is moved into the request body, so it is closed when
    /// the request finishes on every path.
    pub async fn upload(&self, request: &UploadRequest) -> UploadOutcome {
        let form = match build_form(request).await {
            Ok(form) => form,
            Err(cause) => {
                warn!(path = %request.file_path.display(), cause = %cause, "Upload aborted before sending");
                return UploadOutcome::TransportFailure { cause };
            }
        };

        let response = self
            .client
            .post(request.endpoint())
            .header("Authorization", format!("Token {}", request.token))
            .multipart(form)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                let cause = describe_transport_error(&e);
                warn!(endpoint = %request.endpoint(), cause = %cause, "Upload transport failure");
                return UploadOutcome::TransportFailure { cause };
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to read upload response body");
                String::new()
            }
        };

        if status == StatusCode::OK {
            info!(title = ?request.title(), response = %text, "Upload successful");
            return UploadOutcome::Success;
        }

        let body = ResponseBody::parse(text);
        warn!(status = status.as_u16(), body = %body, "Upload failed");
        UploadOutcome::HttpFailure {
            status_code: status.as_u16(),
            body,
        }
    }
}

impl Default for UploadClient {
    fn default() -> Self {
        Self::new()
    }
}

async fn build_form(request: &UploadRequest) -> Result<Form, String> {
    let path = &request.file_path;
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| format!("cannot open {}: {}", path.display(), e))?;
    let length = file
        .metadata()
        .await
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?
        .len();

    let file_name = request.part_file_name();
    let mime = mime_guess::from_path(&file_name).first_or_octet_stream();

    let document = Part::stream_with_length(Body::from(file), length)
        .file_name(file_name)
        .mime_str(mime.essence_str())
        .map_err(|e| format!("invalid content type {}: {}", mime, e))?;

    let mut form = Form::new().part("document", document);
    if let Some(title) = &request.title {
        form = form.text("title", title.clone());
    }
    Ok(form)
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {}", e)
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        format!("request failed: {}", e)
    }
}
