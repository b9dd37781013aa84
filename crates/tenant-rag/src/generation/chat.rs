//! Chat orchestration: retrieve, gate, prompt, generate, persist
//!
//! Each turn appends the user message, optionally retrieves grounded
//! context and either short-circuits with [`NO_CONTEXT_MESSAGE`] or calls
//! the text generator. The assistant message is written only once a full
//! answer exists.

use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::prompt::{PromptBuilder, NO_CONTEXT_MESSAGE};
use crate::config::{ChatSettings, RagConfiguration};
use crate::error::{Error, Result};
use crate::providers::{ConfigurationStore, ConversationStore, TextGenerator};
use crate::retrieval::{Retrieval, Retriever};
use crate::types::{
    ChatRequest, ChatResponse, Conversation, ConversationMessage, DocumentReference, MessageRole,
};

const TITLE_CHARS: usize = 50;

/// What to do with a turn once retrieval is done
enum Turn {
    NoContext {
        confidence: Option<f32>,
    },
    Generate {
        prompt: String,
        references: Vec<DocumentReference>,
        confidence: Option<f32>,
    },
}

/// Runs chat turns against the retriever and the text generator
#[derive(Clone)]
pub struct ChatOrchestrator {
    retriever: Retriever,
    generator: Arc<dyn TextGenerator>,
    conversations: Arc<dyn ConversationStore>,
    config: Arc<dyn ConfigurationStore>,
    settings: ChatSettings,
}

impl ChatOrchestrator {
    pub fn new(
        retriever: Retriever,
        generator: Arc<dyn TextGenerator>,
        conversations: Arc<dyn ConversationStore>,
        config: Arc<dyn ConfigurationStore>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            retriever,
            generator,
            conversations,
            config,
            settings,
        }
    }

    /// Open a conversation titled after its first message
    pub async fn start_conversation(&self, user_id: Uuid, first_message: &str) -> Result<Conversation> {
        let title: String = first_message.trim().chars().take(TITLE_CHARS).collect();
        let conversation = Conversation::new(user_id, title);
        self.conversations.create_conversation(&conversation).await?;
        Ok(conversation)
    }

    /// Full conversation history in insertion order
    pub async fn history(&self, conversation_id: Uuid) -> Result<Vec<ConversationMessage>> {
        self.conversations.list_messages(conversation_id).await
    }

    /// Answer a turn in one piece
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let config = self.config.get().await?;
        let turn = self.prepare(&config, request).await?;

        let (content, references, confidence) = match turn {
            Turn::NoContext { confidence } => (NO_CONTEXT_MESSAGE.to_string(), Vec::new(), confidence),
            Turn::Generate {
                prompt,
                references,
                confidence,
            } => {
                let output = self
                    .generator
                    .generate(&prompt, &config.text_model)
                    .await
                    .map_err(|e| {
                        tracing::error!(
                            conversation_id = %request.conversation_id,
                            error = %e,
                            "Generation failed"
                        );
                        e
                    })?;
                (output.text, references, confidence)
            }
        };

        let message = self
            .persist_assistant(request.conversation_id, content.clone())
            .await?;

        tracing::info!(conversation_id = %request.conversation_id, "Generated chat response");

        Ok(ChatResponse {
            conversation_id: request.conversation_id,
            message_id: message.id,
            content,
            references,
            confidence_score: confidence,
        })
    }

    /// Answer a turn as a stream of text fragments.
    ///
    /// The assistant message is persisted after the upstream stream ends.
    /// Dropping the returned [`ChatStream`] stops generation and nothing
    /// is persisted.
    pub async fn chat_stream(&self, request: &ChatRequest) -> Result<ChatStream> {
        let config = self.config.get().await?;
        let turn = self.prepare(&config, request).await?;
        let (tx, rx) = mpsc::channel(self.settings.stream_buffer.max(1));

        match turn {
            Turn::NoContext { confidence } => {
                self.persist_assistant(request.conversation_id, NO_CONTEXT_MESSAGE.to_string())
                    .await?;
                // capacity is at least one, so this never waits
                let _ = tx.send(Ok(NO_CONTEXT_MESSAGE.to_string())).await;
                Ok(ChatStream {
                    conversation_id: request.conversation_id,
                    references: Vec::new(),
                    confidence_score: confidence,
                    receiver: rx,
                    producer: None,
                })
            }
            Turn::Generate {
                prompt,
                references,
                confidence,
            } => {
                let upstream = self
                    .generator
                    .generate_stream(&prompt, &config.text_model)
                    .await?;
                let producer = tokio::spawn(forward_stream(
                    upstream,
                    tx,
                    self.conversations.clone(),
                    request.conversation_id,
                ));
                Ok(ChatStream {
                    conversation_id: request.conversation_id,
                    references,
                    confidence_score: confidence,
                    receiver: rx,
                    producer: Some(producer),
                })
            }
        }
    }

    /// Persist the user turn, retrieve and decide how to answer
    async fn prepare(&self, config: &RagConfiguration, request: &ChatRequest) -> Result<Turn> {
        tracing::info!(
            conversation_id = %request.conversation_id,
            use_rag = request.use_rag,
            "Handling chat turn"
        );

        let user_message = ConversationMessage::new(
            request.conversation_id,
            MessageRole::User,
            request.message.clone(),
        );
        self.conversations.add_message(&user_message).await?;

        if !request.use_rag {
            return Ok(Turn::Generate {
                prompt: request.message.clone(),
                references: Vec::new(),
                confidence: None,
            });
        }

        let Some(scope) = request.scope else {
            tracing::info!("No scope given, skipping retrieval");
            return Ok(Turn::NoContext { confidence: None });
        };

        let retrieval = self
            .retriever
            .retrieve_with(
                config,
                &request.message,
                &scope,
                self.settings.retrieval_top_k,
                config.similarity_threshold,
            )
            .await?;

        Ok(match retrieval {
            Retrieval::Grounded(ctx) => Turn::Generate {
                prompt: PromptBuilder::grounded_prompt(&request.message, &ctx.context),
                references: ctx.references,
                confidence: Some(ctx.max_similarity),
            },
            other => Turn::NoContext {
                confidence: other.max_similarity(),
            },
        })
    }

    async fn persist_assistant(&self, conversation_id: Uuid, content: String) -> Result<ConversationMessage> {
        let message = ConversationMessage::new(conversation_id, MessageRole::Assistant, content);
        self.conversations.add_message(&message).await?;
        Ok(message)
    }
}

/// Forward fragments to the consumer and persist the full answer at the end
async fn forward_stream(
    mut upstream: mpsc::Receiver<Result<String>>,
    tx: mpsc::Sender<Result<String>>,
    conversations: Arc<dyn ConversationStore>,
    conversation_id: Uuid,
) {
    let mut full = String::new();

    while let Some(item) = upstream.recv().await {
        match item {
            Ok(fragment) => {
                full.push_str(&fragment);
                if tx.send(Ok(fragment)).await.is_err() {
                    tracing::info!(%conversation_id, "Stream consumer went away, discarding answer");
                    return;
                }
            }
            Err(e) => {
                tracing::error!(%conversation_id, error = %e, "Generation stream failed");
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }

    if full.is_empty() {
        let _ = tx.send(Err(Error::EmptyGenerationResult)).await;
        return;
    }

    let message = ConversationMessage::new(conversation_id, MessageRole::Assistant, full);
    match conversations.add_message(&message).await {
        Ok(()) => tracing::info!(%conversation_id, "Persisted streamed response"),
        Err(e) => {
            tracing::error!(%conversation_id, error = %e, "Failed to persist streamed response");
            let _ = tx.send(Err(e)).await;
        }
    }
}

/// Handle on a streaming answer; yields fragments in order
pub struct ChatStream {
    conversation_id: Uuid,
    references: Vec<DocumentReference>,
    confidence_score: Option<f32>,
    receiver: mpsc::Receiver<Result<String>>,
    producer: Option<JoinHandle<()>>,
}

impl ChatStream {
    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    /// References behind the answer, empty when ungrounded
    pub fn references(&self) -> &[DocumentReference] {
        &self.references
    }

    pub fn confidence_score(&self) -> Option<f32> {
        self.confidence_score
    }

    /// Next fragment; `None` once the answer is complete and persisted
    pub async fn next_fragment(&mut self) -> Option<Result<String>> {
        self.receiver.recv().await
    }

    /// Drain the stream into one string
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(fragment) = self.next_fragment().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }

    /// Stop generation; nothing is persisted for this turn
    pub fn cancel(self) {
        drop(self);
    }
}

impl Stream for ChatStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::llm::GenerationOutput;
    use crate::providers::EmbeddingProvider;
    use crate::retrieval::VectorIndex;
    use crate::storage::Database;
    use crate::types::{Chunk, Document, Embedding, Scope};
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Maps text onto [has "alpha", has "beta"]
    struct KeywordEmbedder;

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        async fn embed(&self, text: &str, _model: &str) -> Result<Vec<f32>> {
            let lower = text.to_lowercase();
            let alpha = if lower.contains("alpha") { 1.0 } else { 0.0 };
            let beta = if lower.contains("beta") { 1.0 } else { 0.0 };
            Ok(vec![alpha, beta, 0.1])
        }

        fn name(&self) -> &str {
            "keyword"
        }
    }

    #[derive(Default)]
    struct FakeGenerator {
        answer: Option<String>,
        prompts: Mutex<Vec<String>>,
        stream: Mutex<Option<mpsc::Receiver<Result<String>>>>,
    }

    impl FakeGenerator {
        fn answering(text: &str) -> Arc<Self> {
            Arc::new(Self {
                answer: Some(text.to_string()),
                ..Default::default()
            })
        }

        fn streaming(rx: mpsc::Receiver<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                stream: Mutex::new(Some(rx)),
                ..Default::default()
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().len()
        }
    }

    #[async_trait]
    impl TextGenerator for FakeGenerator {
        async fn generate(&self, prompt: &str, _model: &str) -> Result<GenerationOutput> {
            self.prompts.lock().push(prompt.to_string());
            let text = self.answer.clone().ok_or(Error::EmptyGenerationResult)?;
            Ok(GenerationOutput {
                text,
                finish_reason: Some("STOP".to_string()),
                usage: None,
            })
        }

        async fn generate_stream(
            &self,
            prompt: &str,
            _model: &str,
        ) -> Result<mpsc::Receiver<Result<String>>> {
            self.prompts.lock().push(prompt.to_string());
            self.stream
                .lock()
                .take()
                .ok_or_else(|| Error::internal("no stream configured"))
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    struct Harness {
        db: Arc<Database>,
        scope: Scope,
        conversation: Conversation,
        orchestrator: ChatOrchestrator,
    }

    async fn harness(generator: Arc<FakeGenerator>) -> Harness {
        let db = Arc::new(Database::in_memory().unwrap());
        let scope = Scope::new(Uuid::new_v4(), Uuid::new_v4());
        let retriever = Retriever::new(
            Arc::new(KeywordEmbedder),
            VectorIndex::new(db.clone()),
            db.clone(),
            db.clone(),
        );
        let orchestrator = ChatOrchestrator::new(
            retriever,
            generator,
            db.clone(),
            db.clone(),
            ChatSettings::default(),
        );
        let conversation = orchestrator
            .start_conversation(Uuid::new_v4(), "Questions about alpha")
            .await
            .unwrap();

        // one indexed document about alpha
        let doc = Document::new(scope, Uuid::new_v4(), "alpha.txt", "Alpha Notes.txt", "text/plain", 42);
        db.insert_document(&doc).unwrap();
        let chunk = Chunk::new(doc.id, 0, "Alpha is the first letter.".to_string());
        db.insert_chunk(&chunk).unwrap();
        let vector = KeywordEmbedder.embed(&chunk.content, "m").await.unwrap();
        db.upsert_embedding(&Embedding::new(&chunk, scope, vector, "m")).unwrap();

        Harness {
            db,
            scope,
            conversation,
            orchestrator,
        }
    }

    fn roles(messages: &[ConversationMessage]) -> Vec<MessageRole> {
        messages.iter().map(|m| m.role).collect()
    }

    #[tokio::test]
    async fn test_grounded_answer() {
        let generator = FakeGenerator::answering("Alpha comes first.");
        let h = harness(generator.clone()).await;

        let request = ChatRequest::new(h.conversation.id, "Tell me about alpha").with_scope(h.scope);
        let response = h.orchestrator.chat(&request).await.unwrap();

        assert_eq!(response.content, "Alpha comes first.");
        assert_eq!(response.references.len(), 1);
        assert_eq!(response.references[0].file_name, "alpha.txt");
        assert!(response.confidence_score.unwrap() > 0.9);

        let prompt = generator.prompts.lock()[0].clone();
        assert!(prompt.contains("[Document: alpha.txt]\nAlpha is the first letter."));
        assert!(prompt.contains("User Question: Tell me about alpha"));

        let history = h.orchestrator.history(h.conversation.id).await.unwrap();
        assert_eq!(roles(&history), vec![MessageRole::User, MessageRole::Assistant]);
        assert_eq!(history[1].id, response.message_id);
    }

    #[tokio::test]
    async fn test_low_confidence_short_circuits() {
        let generator = FakeGenerator::answering("should not be used");
        let h = harness(generator.clone()).await;

        let request = ChatRequest::new(h.conversation.id, "What about beta?").with_scope(h.scope);
        let response = h.orchestrator.chat(&request).await.unwrap();

        // the threshold doubles as the search floor, so the weak match is filtered out
        assert_eq!(response.content, NO_CONTEXT_MESSAGE);
        assert!(response.references.is_empty());
        assert_eq!(response.confidence_score, None);
        assert_eq!(generator.calls(), 0);

        let history = h.orchestrator.history(h.conversation.id).await.unwrap();
        assert_eq!(history[1].content, NO_CONTEXT_MESSAGE);
    }

    #[tokio::test]
    async fn test_missing_scope_short_circuits() {
        let generator = FakeGenerator::answering("unused");
        let h = harness(generator.clone()).await;

        let response = h
            .orchestrator
            .chat(&ChatRequest::new(h.conversation.id, "alpha?"))
            .await
            .unwrap();
        assert_eq!(response.content, NO_CONTEXT_MESSAGE);
        assert_eq!(response.confidence_score, None);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_without_rag_sends_raw_message() {
        let generator = FakeGenerator::answering("Hello!");
        let h = harness(generator.clone()).await;

        let request = ChatRequest::new(h.conversation.id, "Hi there").without_rag();
        let response = h.orchestrator.chat(&request).await.unwrap();

        assert_eq!(response.content, "Hello!");
        assert_eq!(response.confidence_score, None);
        assert_eq!(generator.prompts.lock()[0], "Hi there");
    }

    #[tokio::test]
    async fn test_empty_generation_is_not_persisted() {
        let generator = Arc::new(FakeGenerator::default());
        let h = harness(generator).await;

        let request = ChatRequest::new(h.conversation.id, "alpha").with_scope(h.scope);
        let err = h.orchestrator.chat(&request).await.unwrap_err();
        assert!(matches!(err, Error::EmptyGenerationResult));

        let history = h.orchestrator.history(h.conversation.id).await.unwrap();
        assert_eq!(roles(&history), vec![MessageRole::User]);
    }

    #[tokio::test]
    async fn test_repeated_turns_append() {
        let generator = FakeGenerator::answering("Answer");
        let h = harness(generator).await;
        let request = ChatRequest::new(h.conversation.id, "Hi").without_rag();

        h.orchestrator.chat(&request).await.unwrap();
        let first = h.orchestrator.history(h.conversation.id).await.unwrap();
        h.orchestrator.chat(&request).await.unwrap();
        let second = h.orchestrator.history(h.conversation.id).await.unwrap();

        assert_eq!(second.len(), 4);
        assert_eq!(&second[..2], &first[..]);
    }

    #[tokio::test]
    async fn test_unknown_conversation_fails() {
        let generator = FakeGenerator::answering("Answer");
        let h = harness(generator).await;
        let request = ChatRequest::new(Uuid::new_v4(), "Hi").without_rag();
        assert!(matches!(
            h.orchestrator.chat(&request).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_stream_forwards_and_persists() {
        let (upstream_tx, upstream_rx) = mpsc::channel(8);
        let h = harness(FakeGenerator::streaming(upstream_rx)).await;

        for fragment in ["Alpha ", "is ", "first."] {
            upstream_tx.send(Ok(fragment.to_string())).await.unwrap();
        }
        drop(upstream_tx);

        let request = ChatRequest::new(h.conversation.id, "alpha?").with_scope(h.scope);
        let stream = h.orchestrator.chat_stream(&request).await.unwrap();
        assert_eq!(stream.references().len(), 1);

        let fragments: Vec<String> = stream.map(|f| f.unwrap()).collect().await;
        assert_eq!(fragments, vec!["Alpha ", "is ", "first."]);

        let history = h.db.messages_for_conversation(h.conversation.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "Alpha is first.");
    }

    #[tokio::test]
    async fn test_stream_cancel_persists_nothing() {
        let (upstream_tx, upstream_rx) = mpsc::channel(8);
        let h = harness(FakeGenerator::streaming(upstream_rx)).await;

        let request = ChatRequest::new(h.conversation.id, "alpha?").with_scope(h.scope);
        let mut stream = h.orchestrator.chat_stream(&request).await.unwrap();

        upstream_tx.send(Ok("partial".to_string())).await.unwrap();
        assert_eq!(stream.next_fragment().await.unwrap().unwrap(), "partial");
        stream.cancel();

        // the producer is gone, so the upstream receiver is dropped
        tokio::time::timeout(Duration::from_secs(1), upstream_tx.closed())
            .await
            .unwrap();

        let history = h.db.messages_for_conversation(h.conversation.id).unwrap();
        assert_eq!(roles(&history), vec![MessageRole::User]);
    }

    #[tokio::test]
    async fn test_stream_error_persists_nothing() {
        let (upstream_tx, upstream_rx) = mpsc::channel(8);
        let h = harness(FakeGenerator::streaming(upstream_rx)).await;

        upstream_tx.send(Ok("Alpha".to_string())).await.unwrap();
        upstream_tx
            .send(Err(Error::remote("gemini", 500, "stream reset")))
            .await
            .unwrap();
        drop(upstream_tx);

        let request = ChatRequest::new(h.conversation.id, "alpha?").with_scope(h.scope);
        let result = h.orchestrator.chat_stream(&request).await.unwrap().collect_text().await;
        assert!(matches!(result, Err(Error::Remote { status: 500, .. })));

        let history = h.db.messages_for_conversation(h.conversation.id).unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_stream_with_malformed_event_persists_nothing() {
        let (upstream_tx, upstream_rx) = mpsc::channel(8);
        let h = harness(FakeGenerator::streaming(upstream_rx)).await;

        let sse: Vec<std::result::Result<&'static [u8], std::convert::Infallible>> = vec![
            Ok("data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Alpha\"}]}}]}\n\n".as_bytes()),
            Ok("data: {oops\n\n".as_bytes()),
            Ok("data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\" first\"}]}}]}\n\n".as_bytes()),
        ];
        tokio::spawn(crate::providers::gcp::forward_events(
            futures_util::stream::iter(sse),
            upstream_tx,
        ));

        let request = ChatRequest::new(h.conversation.id, "alpha?").with_scope(h.scope);
        let result = h.orchestrator.chat_stream(&request).await.unwrap().collect_text().await;
        assert!(matches!(result, Err(Error::Json(_))));

        let history = h.db.messages_for_conversation(h.conversation.id).unwrap();
        assert_eq!(roles(&history), vec![MessageRole::User]);
    }

    #[tokio::test]
    async fn test_stream_short_circuit_emits_single_fragment() {
        let (_upstream_tx, upstream_rx) = mpsc::channel(8);
        let generator = FakeGenerator::streaming(upstream_rx);
        let h = harness(generator.clone()).await;

        let request = ChatRequest::new(h.conversation.id, "beta?").with_scope(h.scope);
        let stream = h.orchestrator.chat_stream(&request).await.unwrap();
        assert_eq!(stream.collect_text().await.unwrap(), NO_CONTEXT_MESSAGE);
        assert_eq!(generator.calls(), 0);

        let history = h.db.messages_for_conversation(h.conversation.id).unwrap();
        assert_eq!(history[1].content, NO_CONTEXT_MESSAGE);
    }

    #[tokio::test]
    async fn test_stream_empty_upstream_is_an_error() {
        let (upstream_tx, upstream_rx) = mpsc::channel(8);
        drop(upstream_tx);
        let h = harness(FakeGenerator::streaming(upstream_rx)).await;

        let request = ChatRequest::new(h.conversation.id, "Hi").without_rag();
        let result = h.orchestrator.chat_stream(&request).await.unwrap().collect_text().await;
        assert!(matches!(result, Err(Error::EmptyGenerationResult)));
        assert_eq!(h.db.messages_for_conversation(h.conversation.id).unwrap().len(), 1);
    }
}
