//! Google Gemini streamed content generation with an inline image

use super::{ProviderError, VisionProvider};
use crate::ai::prompts::{FILENAME_SYSTEM_PROMPT, FILENAME_TEMPERATURE, FILENAME_USER_PROMPT};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

const GEMINI_MODEL: &str = "gemini-2.5-pro";

/// Maximum buffered bytes of an unterminated SSE line
const MAX_SSE_BUFFER_SIZE: usize = 1_000_000;

pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GeminiProvider {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            GEMINI_MODEL
        )
    }
}

#[async_trait]
impl VisionProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn complete(&self, jpeg: &[u8]) -> Result<Vec<String>, ProviderError> {
        let request = build_request(jpeg);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }

        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::default();
        let mut fragments = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for data in decoder.push(&chunk)? {
                collect_fragments(&data, &mut fragments)?;
            }
        }
        if let Some(data) = decoder.finish() {
            collect_fragments(&data, &mut fragments)?;
        }

        debug!(fragments = fragments.len(), "Gemini stream finished");
        Ok(fragments)
    }
}

/// Append the text parts of one `data:` payload
///
/// Metadata-only chunks add nothing. An error object or an unparseable
/// payload fails the whole stream, since the text so far is truncated.
fn collect_fragments(data: &str, fragments: &mut Vec<String>) -> Result<(), ProviderError> {
    let chunk: StreamChunk = serde_json::from_str(data).map_err(|e| {
        debug!(error = %e, "Unparseable Gemini stream payload");
        ProviderError::Malformed(format!("unparseable stream payload: {}", e))
    })?;

    if let Some(error) = chunk.error {
        return Err(ProviderError::Malformed(format!(
            "stream error {}: {}",
            error.code.map(|c| c.to_string()).unwrap_or_else(|| "?".to_string()),
            error.message.or(error.status).unwrap_or_default()
        )));
    }

    for candidate in chunk.candidates {
        let Some(content) = candidate.content else {
            continue;
        };
        fragments.extend(content.parts.into_iter().filter_map(|part| part.text));
    }
    Ok(())
}

/// Line splitter for a `text/event-stream` body
///
/// Buffers raw bytes so a multi-byte character split across network chunks
/// is decoded intact.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed bytes, return the `data:` payloads of every completed line
    ///
    /// Only the unterminated remainder counts against the buffer cap.
    fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, ProviderError> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            if let Some(data) = data_payload(&line) {
                payloads.push(data);
            }
        }

        if self.buffer.len() > MAX_SSE_BUFFER_SIZE {
            return Err(ProviderError::Malformed(
                "SSE buffer exceeded maximum size".to_string(),
            ));
        }
        Ok(payloads)
    }

    /// Flush a final line that had no trailing newline
    fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        data_payload(&line)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(data.to_string())
}

fn build_request(jpeg: &[u8]) -> GenerateRequest {
    GenerateRequest {
        system_instruction: Content {
            role: None,
            parts: vec![Part::Text {
                text: FILENAME_SYSTEM_PROMPT.to_string(),
            }],
        },
        contents: vec![Content {
            role: Some("user"),
            parts: vec![
                Part::Text {
                    text: FILENAME_USER_PROMPT.to_string(),
                },
                Part::InlineData {
                    inline_data: InlineData {
                        mime_type: "image/jpeg",
                        data: STANDARD.encode(jpeg),
                    },
                },
            ],
        }],
        generation_config: GenerationConfig {
            temperature: FILENAME_TEMPERATURE,
        },
    }
}

// API request/response types

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: &'static str,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<StreamError>,
}

#[derive(Deserialize)]
struct StreamError {
    code: Option<i64>,
    message: Option<String>,
    status: Option<String>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn stream_path() -> Matcher {
        Matcher::Exact("/v1beta/models/gemini-2.5-pro:streamGenerateContent".to_string())
    }

    fn chunk(text: &str) -> String {
        format!(
            "data: {{\"candidates\":[{{\"content\":{{\"parts\":[{{\"text\":\"{}\"}}],\"role\":\"model\"}}}}]}}\r\n\r\n",
            text
        )
    }

    #[test]
    fn test_request_shape() {
        let value = serde_json::to_value(build_request(&[0xFF, 0xD8])).unwrap();

        assert!(value["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("underscores"));
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["contents"][0]["parts"][1]["inlineData"]["mimeType"], "image/jpeg");
        assert!(value["generationConfig"]["temperature"].as_f64().is_some());
    }

    #[test]
    fn test_decoder_handles_lines_split_across_chunks() {
        let body = format!("{}{}", chunk("Electric"), chunk("_Bill"));
        let (head, tail) = body.as_bytes().split_at(17);

        let mut decoder = SseDecoder::default();
        let mut fragments = Vec::new();
        for data in decoder.push(head).unwrap() {
            collect_fragments(&data, &mut fragments).unwrap();
        }
        for data in decoder.push(tail).unwrap() {
            collect_fragments(&data, &mut fragments).unwrap();
        }

        assert_eq!(fragments, vec!["Electric".to_string(), "_Bill".to_string()]);
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_decoder_flushes_unterminated_line() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"candidates\":[]}").unwrap().is_empty());
        assert_eq!(decoder.finish().as_deref(), Some("{\"candidates\":[]}"));
    }

    #[test]
    fn test_decoder_keeps_multibyte_characters_intact() {
        let body = chunk("März");
        let bytes = body.as_bytes();
        let split = body.find('ä').unwrap() + 1; // inside the two-byte sequence

        let mut decoder = SseDecoder::default();
        let mut payloads = decoder.push(&bytes[..split]).unwrap();
        payloads.extend(decoder.push(&bytes[split..]).unwrap());

        let mut fragments = Vec::new();
        for data in payloads {
            collect_fragments(&data, &mut fragments).unwrap();
        }
        assert_eq!(fragments, vec!["März".to_string()]);
    }

    #[test]
    fn test_metadata_payloads_add_nothing() {
        let mut fragments = Vec::new();
        collect_fragments(r#"{"usageMetadata":{"totalTokenCount":12}}"#, &mut fragments).unwrap();
        assert!(fragments.is_empty());
    }

    #[test]
    fn test_error_and_garbage_payloads_fail_the_stream() {
        let mut fragments = Vec::new();
        let err = collect_fragments(
            r#"{"error":{"code":500,"message":"Internal error","status":"INTERNAL"}}"#,
            &mut fragments,
        )
        .unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(msg) if msg.contains("500")));

        assert!(matches!(
            collect_fragments("not json", &mut fragments),
            Err(ProviderError::Malformed(_))
        ));
        assert!(fragments.is_empty());
    }

    #[test]
    fn test_decoder_accepts_large_chunk_of_complete_lines() {
        let line = chunk(&"x".repeat(1000));
        let body = line.repeat(MAX_SSE_BUFFER_SIZE / line.len() + 10);
        assert!(body.len() > MAX_SSE_BUFFER_SIZE);

        let mut decoder = SseDecoder::default();
        let payloads = decoder.push(body.as_bytes()).unwrap();

        assert_eq!(payloads.len(), MAX_SSE_BUFFER_SIZE / line.len() + 10);
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_decoder_rejects_oversized_partial_line() {
        let mut decoder = SseDecoder::default();
        let partial = vec![b'x'; MAX_SSE_BUFFER_SIZE + 1];
        assert!(matches!(
            decoder.push(&partial),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_fails_on_midstream_error() {
        let mut server = mockito::Server::new_async().await;
        let body = format!(
            "{}data: {{\"error\":{{\"code\":500,\"message\":\"Internal error\",\"status\":\"INTERNAL\"}}}}\r\n\r\n",
            chunk("Lease")
        );
        let _mock = server
            .mock("POST", stream_path())
            .match_query(Matcher::UrlEncoded("alt".into(), "sse".into()))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let provider = GeminiProvider::new(Client::new(), server.url(), "g-key");
        let err = provider.complete(&[1]).await.unwrap_err();

        assert!(matches!(err, ProviderError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_complete_collects_all_chunks() {
        let mut server = mockito::Server::new_async().await;
        let body = format!("{}{}{}", chunk("Lease"), chunk("_Agreement"), chunk("_2024"));
        let mock = server
            .mock("POST", stream_path())
            .match_query(Matcher::UrlEncoded("alt".into(), "sse".into()))
            .match_header("x-goog-api-key", "g-key")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let provider = GeminiProvider::new(Client::new(), server.url(), "g-key");
        let fragments = provider.complete(&[1, 2, 3]).await.unwrap();

        assert_eq!(fragments.concat(), "Lease_Agreement_2024");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_complete_surfaces_api_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", stream_path())
            .match_query(Matcher::UrlEncoded("alt".into(), "sse".into()))
            .with_status(403)
            .with_body(r#"{"error":{"code":403,"status":"PERMISSION_DENIED"}}"#)
            .create_async()
            .await;

        let provider = GeminiProvider::new(Client::new(), server.url(), "bad");
        let err = provider.complete(&[1]).await.unwrap_err();

        assert!(matches!(err, ProviderError::Api { status, .. } if status == 403));
    }
}
