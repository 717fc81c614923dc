//! Best-effort filename recommendation
//!
//! A failed recommendation is never an error for the caller: the user can
//! always type a filename, so every provider failure is logged and turned
//! into `None`.

use super::http_client::recommend_client;
use super::naming::{sanitize, FilenameRecommendation};
use super::providers::{
    GeminiProvider, OpenAiProvider, ProviderEndpoints, ProviderSelection, VisionProvider,
};
use super::vision::encode_jpeg;
use image::DynamicImage;
use reqwest::Client;
use tracing::{info, warn};

/// Dispatches a scan to the selected vision provider
#[derive(Clone)]
pub struct FilenameRecommender {
    client: Client,
    endpoints: ProviderEndpoints,
}

impl FilenameRecommender {
    pub fn new() -> Self {
        Self::with_endpoints(ProviderEndpoints::default())
    }

    pub fn with_endpoints(endpoints: ProviderEndpoints) -> Self {
        Self {
            client: recommend_client().clone(),
            endpoints,
        }
    }

    /// Build the provider for a selection, `None` when no provider is active
    pub fn provider_for(&self, selection: &ProviderSelection) -> Option<Box<dyn VisionProvider>> {
        match selection {
            ProviderSelection::OpenAi { api_key } => Some(Box::new(OpenAiProvider::new(
                self.client.clone(),
                self.endpoints.openai_base.clone(),
                api_key.clone(),
            ))),
            ProviderSelection::Gemini { api_key } => Some(Box::new(GeminiProvider::new(
                self.client.clone(),
                self.endpoints.gemini_base.clone(),
                api_key.clone(),
            ))),
            ProviderSelection::None => None,
        }
    }

    /// Suggest a filename stem for a scanned page
    ///
    /// Returns `None` without any network call when no provider is selected,
    /// and `None` on any provider failure or unusable answer.
    pub async fn recommend(
        &self,
        image: &DynamicImage,
        selection: &ProviderSelection,
    ) -> Option<FilenameRecommendation> {
        let provider = self.provider_for(selection)?;

        let jpeg = match encode_jpeg(image) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to encode scan for filename recommendation");
                return None;
            }
        };

        let fragments = match provider.complete(&jpeg).await {
            Ok(fragments) => fragments,
            Err(e) => {
                warn!(provider = provider.name(), error = %e, "Filename recommendation failed");
                return None;
            }
        };

        // Streamed answers are only meaningful once complete.
        let raw = fragments.concat();
        let recommendation = sanitize(&raw);

        match &recommendation {
            Some(name) => info!(provider = provider.name(), filename = %name, "Filename recommended"),
            None => info!(
                provider = provider.name(),
                raw_len = raw.len(),
                "Provider answer unusable as a filename"
            ),
        }

        recommendation
    }
}

impl Default for FilenameRecommender {
    fn default() -> Self {
        Self::new()
    }
}
