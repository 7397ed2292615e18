//! Turns retrieved context into an answer with one completion call.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::document::{Answer, AnswerKind, RetrievedContext};
use crate::error::Result;
use crate::llm::{CompletionClient, CompletionError};
use crate::prompt::PromptTemplate;

/// Reply used when no policy documents are loaded from `docs_dir`.
pub fn fallback_answer(docs_dir: &Path) -> String {
    format!(
        "I currently don't have the policy documents loaded. \
         Please upload PDFs to the '{}' folder.",
        docs_dir.display()
    )
}

/// Renders the prompt and calls the completion endpoint.
pub struct AnswerSynthesizer {
    client: Arc<dyn CompletionClient>,
    template: PromptTemplate,
    institution: String,
    timeout: Duration,
    fallback: String,
}

impl AnswerSynthesizer {
    /// Create a synthesizer that answers on behalf of `institution`.
    ///
    /// Each completion call is cut off after `timeout`. The no-documents
    /// reply points at the `policies` folder until
    /// [`with_fallback`](Self::with_fallback) replaces it.
    pub fn new(
        client: Arc<dyn CompletionClient>,
        template: PromptTemplate,
        institution: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            template,
            institution: institution.into(),
            timeout,
            fallback: fallback_answer(Path::new("policies")),
        }
    }

    /// Use `text` as the reply when no documents are loaded.
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = text.into();
        self
    }

    /// The prompt template in use.
    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// Answer `question`.
    ///
    /// With no context (no documents loaded) this returns the fallback
    /// reply without contacting the endpoint. Otherwise it
    /// makes exactly one completion call, bounded by the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Completion`](crate::RagError::Completion) on
    /// timeout, endpoint error or an unusable response. No fallback text is
    /// substituted for a failed call.
    pub async fn synthesize(
        &self,
        question: &str,
        context: Option<RetrievedContext>,
    ) -> Result<Answer> {
        let Some(context) = context else {
            info!("no documents loaded, returning fallback answer");
            return Ok(Answer {
                text: self.fallback.clone(),
                kind: AnswerKind::Fallback,
                sources: Vec::new(),
                prompt_version: None,
            });
        };

        let prompt = self.template.render(&self.institution, &context);
        let model = self.client.model().to_string();

        let text = match tokio::time::timeout(self.timeout, self.client.complete(&prompt)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                error!(model = %model, error = %e, "completion failed");
                return Err(e.into());
            }
            Err(_) => {
                error!(model = %model, timeout = ?self.timeout, "completion timed out");
                return Err(CompletionError::Timeout(self.timeout).into());
            }
        };

        info!(
            model = %model,
            question_len = question.len(),
            sources = context.results.len(),
            "answer generated"
        );

        Ok(Answer {
            text: text.trim().to_string(),
            kind: AnswerKind::Grounded,
            sources: context.sources(),
            prompt_version: Some(self.template.version.clone()),
        })
    }
}
