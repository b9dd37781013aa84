//! Prompt templates for grounded generation

/// Assistant reply used when retrieval found nothing usable
pub const NO_CONTEXT_MESSAGE: &str =
    "No relevant information found in the knowledge base for this query.";

/// Sentence the model is told to use when the context is insufficient
pub const INSUFFICIENT_CONTEXT_REPLY: &str =
    "I don't have enough information in the provided documents to answer this question.";

/// Prompt builder for RAG queries
pub struct PromptBuilder;

impl PromptBuilder {
    /// Concatenate `(file name, chunk text)` pairs into a context block
    pub fn build_context(blocks: &[(&str, &str)]) -> String {
        let mut context = String::new();
        for (file_name, content) in blocks {
            context.push_str(&format!("[Document: {}]\n{}\n\n", file_name, content));
        }
        context
    }

    /// Prompt instructing the model to answer only from `context`
    pub fn grounded_prompt(question: &str, context: &str) -> String {
        format!(
            r#"You are a helpful assistant. Answer the user's question based on the following context.

Context:
{context}

User Question: {question}

Please provide a clear and accurate answer based only on the information in the context. If the context doesn't contain relevant information, say '{fallback}'"#,
            context = context,
            question = question,
            fallback = INSUFFICIENT_CONTEXT_REPLY,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_context() {
        let context = PromptBuilder::build_context(&[("a.pdf", "Alpha"), ("b.txt", "Beta")]);
        assert_eq!(context, "[Document: a.pdf]\nAlpha\n\n[Document: b.txt]\nBeta\n\n");
        assert_eq!(PromptBuilder::build_context(&[]), "");
    }

    #[test]
    fn test_grounded_prompt_contains_parts() {
        let prompt = PromptBuilder::grounded_prompt("What is alpha?", "[Document: a.pdf]\nAlpha\n\n");
        assert!(prompt.starts_with("You are a helpful assistant."));
        assert!(prompt.contains("Context:\n[Document: a.pdf]\nAlpha"));
        assert!(prompt.contains("User Question: What is alpha?"));
        assert!(prompt.contains("based only on the information in the context"));
        assert!(prompt.ends_with(&format!("'{}'", INSUFFICIENT_CONTEXT_REPLY)));
    }
}
