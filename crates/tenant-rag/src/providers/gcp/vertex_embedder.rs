//! Vertex AI embedding provider
//!
//! Every call holds a permit of the process-wide [`RequestGate`] from its
//! first attempt until its last; HTTP 429 replies are retried with
//! exponential backoff, anything else fails fast.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::auth::GcpAuth;
use crate::config::RateLimitSettings;
use crate::error::{Error, Result};
use crate::providers::embedding::EmbeddingProvider;
use crate::providers::rate_limit::{BackoffPolicy, RequestGate, RetryState, Sleeper, TokioSleeper};

const SERVICE: &str = "vertex-ai";
const TOO_MANY_REQUESTS: u16 = 429;

/// Raw HTTP outcome of a predict call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictReply {
    pub status: u16,
    pub body: String,
}

impl PredictReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one `:predict` request; no retry or gating
#[async_trait]
pub trait PredictTransport: Send + Sync {
    async fn predict(&self, model: &str, text: &str) -> Result<PredictReply>;
}

/// Vertex AI `:predict` over HTTPS
pub struct VertexPredictTransport {
    auth: Arc<GcpAuth>,
    location: String,
    http: reqwest::Client,
}

impl VertexPredictTransport {
    /// # Arguments
    /// * `auth` - GCP authentication
    /// * `location` - GCP region (e.g., "us-central1")
    /// * `timeout` - per-request HTTP timeout
    pub fn new(auth: Arc<GcpAuth>, location: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            auth,
            location: location.into(),
            http,
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "https://{}-aiplatform.googleapis.com/v1/projects/{}/locations/{}/publishers/google/models/{}:predict",
            self.location,
            self.auth.project_id(),
            self.location,
            model
        )
    }
}

#[derive(serde::Serialize)]
struct EmbedRequest<'a> {
    instances: Vec<EmbedInstance<'a>>,
}

#[derive(serde::Serialize)]
struct EmbedInstance<'a> {
    content: &'a str,
}

#[derive(serde::Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    predictions: Vec<EmbedPrediction>,
}

#[derive(serde::Deserialize)]
struct EmbedPrediction {
    embeddings: EmbeddingValues,
}

#[derive(serde::Deserialize)]
struct EmbeddingValues {
    #[serde(default)]
    values: Vec<f32>,
}

#[async_trait]
impl PredictTransport for VertexPredictTransport {
    async fn predict(&self, model: &str, text: &str) -> Result<PredictReply> {
        let token = self.auth.bearer_token().await?;
        let request = EmbedRequest {
            instances: vec![EmbedInstance { content: text }],
        };

        let response = self
            .http
            .post(self.endpoint(model))
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::remote(SERVICE, 0, format!("request failed: {}", e)))?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(PredictReply { status, body })
    }
}

/// Extract `predictions[0].embeddings.values` from a predict reply body
pub fn parse_embedding(body: &str) -> Result<Vec<f32>> {
    let response: EmbedResponse = serde_json::from_str(body)
        .map_err(|e| Error::remote(SERVICE, 200, format!("invalid response: {}", e)))?;

    let values = response
        .predictions
        .into_iter()
        .next()
        .map(|p| p.embeddings.values)
        .ok_or_else(|| Error::remote(SERVICE, 200, "no predictions in response"))?;

    if values.is_empty() {
        return Err(Error::remote(SERVICE, 200, "empty embedding values"));
    }
    Ok(values)
}

/// Vertex AI embedding provider with gating and retry
pub struct VertexAiEmbedder {
    transport: Arc<dyn PredictTransport>,
    gate: RequestGate,
    backoff: BackoffPolicy,
    max_retries: u32,
    sleeper: Arc<dyn Sleeper>,
}

impl VertexAiEmbedder {
    pub fn new(transport: Arc<dyn PredictTransport>, gate: RequestGate, settings: &RateLimitSettings) -> Self {
        Self {
            transport,
            gate,
            backoff: BackoffPolicy::from(settings),
            max_retries: settings.max_retries,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the sleeper used between retries
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for VertexAiEmbedder {
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        // held through every backoff sleep, released after the cooldown
        let _permit = self.gate.acquire().await?;
        let mut state = RetryState::default();

        loop {
            let reply = self.transport.predict(model, text).await?;

            if reply.is_success() {
                return parse_embedding(&reply.body);
            }

            if reply.status != TOO_MANY_REQUESTS {
                tracing::error!(status = reply.status, body = %reply.body, "Embedding request failed");
                return Err(Error::remote(SERVICE, reply.status, reply.body));
            }

            let jitter = self.backoff.jitter();
            match state.record_failure(reply.body, &self.backoff, self.max_retries, jitter) {
                Some(delay) => {
                    tracing::warn!(
                        "Rate limit hit (attempt {}/{}), retrying in {:?}",
                        state.attempt,
                        self.max_retries,
                        delay
                    );
                    self.sleeper.sleep(delay).await;
                }
                None => {
                    tracing::error!(
                        attempts = state.attempt + 1,
                        "Embedding rate limit retries exhausted"
                    );
                    return Err(state.exhausted());
                }
            }
        }
    }

    fn name(&self) -> &str {
        SERVICE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays canned replies and counts calls
    struct ScriptedTransport {
        replies: Mutex<VecDeque<PredictReply>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<PredictReply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl PredictTransport for ScriptedTransport {
        async fn predict(&self, model: &str, text: &str) -> Result<PredictReply> {
            self.calls.lock().push((model.to_string(), text.to_string()));
            self.replies
                .lock()
                .pop_front()
                .ok_or_else(|| Error::internal("no scripted reply left"))
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.delays.lock().push(duration);
        }
    }

    fn ok_reply(values: &[f32]) -> PredictReply {
        PredictReply {
            status: 200,
            body: serde_json::json!({"predictions": [{"embeddings": {"values": values}}]}).to_string(),
        }
    }

    fn rate_limited(n: usize) -> PredictReply {
        PredictReply {
            status: 429,
            body: format!("quota exceeded #{}", n),
        }
    }

    fn embedder(transport: Arc<ScriptedTransport>, sleeper: Arc<RecordingSleeper>) -> VertexAiEmbedder {
        let settings = RateLimitSettings {
            release_delay_ms: 0,
            ..Default::default()
        };
        VertexAiEmbedder::new(transport, RequestGate::from_settings(&settings), &settings)
            .with_sleeper(sleeper)
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let transport = ScriptedTransport::new(vec![ok_reply(&[0.1, 0.2, 0.3])]);
        let sleeper = Arc::new(RecordingSleeper::default());
        let embedder = embedder(transport.clone(), sleeper.clone());

        let vector = embedder.embed("hello", "text-embedding-004").await.unwrap();
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
        assert_eq!(transport.call_count(), 1);
        assert!(sleeper.delays.lock().is_empty());
        assert_eq!(
            transport.calls.lock()[0],
            ("text-embedding-004".to_string(), "hello".to_string())
        );
    }

    #[tokio::test]
    async fn test_retries_rate_limit_then_succeeds() {
        let mut replies: Vec<PredictReply> = (0..3).map(rate_limited).collect();
        replies.push(ok_reply(&[1.0, 0.0]));
        let transport = ScriptedTransport::new(replies);
        let sleeper = Arc::new(RecordingSleeper::default());
        let embedder = embedder(transport.clone(), sleeper.clone());

        let vector = embedder.embed("text", "m").await.unwrap();
        assert_eq!(vector, vec![1.0, 0.0]);
        assert_eq!(transport.call_count(), 4);

        let delays = sleeper.delays.lock().clone();
        assert_eq!(delays.len(), 3);
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(30)));
        assert!(delays[0] >= Duration::from_millis(2000) && delays[0] < Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_exhausts_retries() {
        let replies: Vec<PredictReply> = (0..9).map(rate_limited).collect();
        let transport = ScriptedTransport::new(replies);
        let sleeper = Arc::new(RecordingSleeper::default());
        let embedder = embedder(transport.clone(), sleeper.clone());

        let err = embedder.embed("text", "m").await.unwrap_err();
        match err {
            Error::RateLimitExceeded {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 9);
                assert_eq!(last_error, "quota exceeded #8");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.call_count(), 9);
        assert_eq!(sleeper.delays.lock().len(), 8);
        assert!(sleeper
            .delays
            .lock()
            .iter()
            .all(|d| *d <= Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_other_errors_fail_fast() {
        let transport = ScriptedTransport::new(vec![PredictReply {
            status: 400,
            body: "bad request".to_string(),
        }]);
        let sleeper = Arc::new(RecordingSleeper::default());
        let embedder = embedder(transport.clone(), sleeper.clone());

        let err = embedder.embed("text", "m").await.unwrap_err();
        assert!(matches!(err, Error::Remote { status: 400, .. }));
        assert_eq!(transport.call_count(), 1);
        assert!(sleeper.delays.lock().is_empty());
    }

    /// Rate-limits the first request for one text, then succeeds
    struct ThrottledOnce {
        throttled_text: &'static str,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PredictTransport for ThrottledOnce {
        async fn predict(&self, _model: &str, text: &str) -> Result<PredictReply> {
            let mut calls = self.calls.lock();
            calls.push(text.to_string());
            if text == self.throttled_text && calls.iter().filter(|t| *t == text).count() == 1 {
                return Ok(rate_limited(0));
            }
            Ok(ok_reply(&[1.0]))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_permit_is_held_while_backing_off() {
        let transport = Arc::new(ThrottledOnce {
            throttled_text: "a",
            calls: Mutex::new(Vec::new()),
        });
        let settings = RateLimitSettings {
            max_concurrent_requests: 1,
            ..Default::default()
        };
        let embedder = Arc::new(VertexAiEmbedder::new(
            transport.clone(),
            RequestGate::from_settings(&settings),
            &settings,
        ));

        let first = tokio::spawn({
            let embedder = embedder.clone();
            async move { embedder.embed("a", "m").await }
        });
        let second = tokio::spawn({
            let embedder = embedder.clone();
            async move { embedder.embed("b", "m").await }
        });

        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        assert_eq!(*transport.calls.lock(), vec!["a", "a", "b"]);
    }

    #[test]
    fn test_parse_embedding_errors() {
        assert!(parse_embedding(r#"{"predictions": []}"#).is_err());
        assert!(parse_embedding(r#"{}"#).is_err());
        assert!(parse_embedding(r#"{"predictions": [{"embeddings": {"values": []}}]}"#).is_err());
        assert!(parse_embedding("not json").is_err());
        assert_eq!(
            parse_embedding(r#"{"predictions": [{"embeddings": {"values": [0.5]}}]}"#).unwrap(),
            vec![0.5]
        );
    }

    #[test]
    fn test_endpoint_format() {
        let auth = Arc::new(GcpAuth::from_token("t", "my-project"));
        let transport =
            VertexPredictTransport::new(auth, "europe-west1", Duration::from_secs(5)).unwrap();
        assert_eq!(
            transport.endpoint("text-embedding-004"),
            "https://europe-west1-aiplatform.googleapis.com/v1/projects/my-project/locations/europe-west1/publishers/google/models/text-embedding-004:predict"
        );
    }
}
