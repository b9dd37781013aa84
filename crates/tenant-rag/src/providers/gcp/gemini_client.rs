//! Gemini client for answer generation via Vertex AI
//!
//! Single-shot calls use `:generateContent`; streaming uses
//! `:streamGenerateContent?alt=sse` and forwards text fragments over a
//! bounded channel.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::auth::GcpAuth;
use crate::config::GenerationSettings;
use crate::error::{Error, Result};
use crate::providers::llm::{GenerationOutput, TextGenerator, TokenUsage};

const SERVICE: &str = "gemini";

/// Gemini client via Vertex AI
pub struct GeminiClient {
    auth: Arc<GcpAuth>,
    location: String,
    settings: GenerationSettings,
    stream_buffer: usize,
    http: reqwest::Client,
}

impl GeminiClient {
    /// # Arguments
    /// * `auth` - GCP authentication
    /// * `location` - GCP region (e.g., "us-central1")
    /// * `settings` - sampling parameters sent with every request
    /// * `timeout` - HTTP timeout covering the whole response
    pub fn new(
        auth: Arc<GcpAuth>,
        location: impl Into<String>,
        settings: GenerationSettings,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            auth,
            location: location.into(),
            settings,
            stream_buffer: 32,
            http,
        })
    }

    /// Capacity of the fragment channel returned by `generate_stream`
    pub fn with_stream_buffer(mut self, capacity: usize) -> Self {
        self.stream_buffer = capacity.max(1);
        self
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!(
            "https://{}-aiplatform.googleapis.com/v1/projects/{}/locations/{}/publishers/google/models/{}:{}",
            self.location,
            self.auth.project_id(),
            self.location,
            model,
            method
        )
    }

    fn request_body(&self, prompt: &str) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.settings.temperature,
                max_output_tokens: self.settings.max_output_tokens,
                top_p: self.settings.top_p,
                top_k: self.settings.top_k,
            },
        }
    }

    async fn post(&self, url: String, prompt: &str) -> Result<reqwest::Response> {
        let token = self.auth.bearer_token().await?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&self.request_body(prompt))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status, body = %body, "Gemini request failed");
            return Err(Error::remote(SERVICE, status, body));
        }
        Ok(response)
    }
}

#[derive(serde::Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(serde::Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(serde::Serialize)]
struct Part {
    text: String,
}

#[derive(serde::Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "topK")]
    top_k: u32,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<ResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, serde::Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

impl GenerateResponse {
    /// First candidate's first part, the single-shot answer
    fn into_output(self) -> Result<GenerationOutput> {
        let usage = self.usage_metadata.map(|u| TokenUsage {
            prompt_tokens: u.prompt_token_count,
            candidates_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        });
        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or(Error::EmptyGenerationResult)?;
        let text = candidate
            .content
            .and_then(|c| c.parts.into_iter().next())
            .and_then(|p| p.text)
            .ok_or(Error::EmptyGenerationResult)?;

        Ok(GenerationOutput {
            text,
            finish_reason: candidate.finish_reason,
            usage,
        })
    }

    /// All text of the first candidate, for one streamed event
    fn fragment(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter().filter_map(|p| p.text.as_deref()).collect())
            .unwrap_or_default()
    }
}

/// Text carried by one SSE payload; `None` when there is nothing to forward
fn parse_fragment(payload: &str) -> Result<Option<String>> {
    let event: GenerateResponse = serde_json::from_str(payload)?;
    let text = event.fragment();
    Ok((!text.trim().is_empty()).then_some(text))
}

/// Decode an SSE byte stream and forward each event's text.
///
/// A transport failure or an event that does not parse is sent as the last
/// item, so a truncated answer never looks complete.
pub(crate) async fn forward_events<S, B, E>(bytes: S, tx: mpsc::Sender<Result<String>>)
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let events = bytes.eventsource();
    futures_util::pin_mut!(events);

    while let Some(event) = events.next().await {
        let fragment = match event {
            Ok(event) if event.data.trim().is_empty() || event.data.trim() == "[DONE]" => continue,
            Ok(event) => parse_fragment(&event.data),
            Err(e) => Err(Error::remote(SERVICE, 0, format!("stream failed: {}", e))),
        };
        match fragment {
            Ok(Some(text)) => {
                if tx.send(Ok(text)).await.is_err() {
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(error = %e, "Gemini stream broke off");
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str, model: &str) -> Result<GenerationOutput> {
        let response = self
            .post(self.endpoint(model, "generateContent"), prompt)
            .await?;
        let body: GenerateResponse = response.json().await?;
        let output = body.into_output()?;

        tracing::debug!(
            model,
            finish_reason = ?output.finish_reason,
            total_tokens = output.usage.map(|u| u.total_tokens),
            "Generation complete"
        );
        Ok(output)
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        model: &str,
    ) -> Result<mpsc::Receiver<Result<String>>> {
        let response = self
            .post(self.endpoint(model, "streamGenerateContent?alt=sse"), prompt)
            .await?;

        let (tx, rx) = mpsc::channel(self.stream_buffer);
        tokio::spawn(forward_events(response.bytes_stream(), tx));

        Ok(rx)
    }

    fn name(&self) -> &str {
        SERVICE
    }
}
