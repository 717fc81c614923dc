//! Vision providers
//!
//! Each provider turns one JPEG scan into a finite list of text fragments.
//! Single-shot providers return one fragment, streaming providers return one
//! per received chunk; callers concatenate before sanitizing.

mod gemini;
mod openai;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

use async_trait::async_trait;
use reqwest::StatusCode;
use std::fmt;
use thiserror::Error;

pub const OPENAI_API_BASE: &str = "https://api.openai.com";
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Errors a provider call can end with
///
/// All of them are recovered by the recommender into an absent suggestion.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API error ({status}): {body}")]
    Api { status: StatusCode, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// A multimodal completion endpoint that can describe a scanned page
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &'static str;

    /// Send the JPEG scan with the filename instructions, return the text fragments
    async fn complete(&self, jpeg: &[u8]) -> Result<Vec<String>, ProviderError>;
}

/// The single active AI backend for a session
///
/// Holding the key inside the variant makes "two providers configured at
/// once" unrepresentable.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum ProviderSelection {
    OpenAi {
        api_key: String,
    },
    Gemini {
        api_key: String,
    },
    #[default]
    None,
}

impl ProviderSelection {
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::OpenAi {
            api_key: api_key.into(),
        }
    }

    pub fn gemini(api_key: impl Into<String>) -> Self {
        Self::Gemini {
            api_key: api_key.into(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi { .. } => "openai",
            Self::Gemini { .. } => "gemini",
            Self::None => "none",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

// Keys never reach logs.
impl fmt::Debug for ProviderSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi { .. } => f.write_str("OpenAi { api_key: <redacted> }"),
            Self::Gemini { .. } => f.write_str("Gemini { api_key: <redacted> }"),
            Self::None => f.write_str("None"),
        }
    }
}

/// Base URLs of the provider APIs
///
/// Overridable so tests can point the providers at a local server.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub openai_base: String,
    pub gemini_base: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            openai_base: OPENAI_API_BASE.to_string(),
            gemini_base: GEMINI_API_BASE.to_string(),
        }
    }
}
