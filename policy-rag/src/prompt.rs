//! Versioned prompt template for grounded answers.
//!
//! Rendering is a pure function of the template, the institution, the
//! question and the retrieved context. Placeholders are substituted in a
//! single pass over the template, so text coming from users or documents
//! is never re-scanned for placeholders.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::document::RetrievedContext;

/// Version tag of [`PromptTemplate::default`].
pub const DEFAULT_PROMPT_VERSION: &str = "policy-qa/v1";

const DEFAULT_PERSONA: &str = "You are an official assistant for {institution}.\n\
You are professional, accurate, and helpful.\n\
Answer using the policy excerpts below, or consistently with {institution}'s policies. \
If the excerpts do not contain the answer, say that you do not know rather than guessing.\n\
Start the answer directly.";

const DEFAULT_BODY: &str = "{persona}\n\n\
Policy excerpts:\n\
{context}\n\n\
Question: {question}\n\
Answer:";

/// An explicit, versioned prompt.
///
/// `persona` may use `{institution}`. `body` may use `{persona}`,
/// `{institution}`, `{context}` and `{question}`. Unknown placeholders are
/// left as written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptTemplate {
    /// Recorded on every [`Answer`](crate::Answer) for audit.
    pub version: String,
    /// Institutional instructions.
    pub persona: String,
    /// Layout of the full prompt.
    pub body: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            version: DEFAULT_PROMPT_VERSION.to_string(),
            persona: DEFAULT_PERSONA.to_string(),
            body: DEFAULT_BODY.to_string(),
        }
    }
}

impl PromptTemplate {
    /// Render the prompt sent to the completion endpoint.
    pub fn render(&self, institution: &str, context: &RetrievedContext) -> String {
        let persona = substitute(&self.persona, |name| match name {
            "institution" => Some(institution.to_string()),
            _ => None,
        });
        let excerpts = format_context(context);

        substitute(&self.body, |name| match name {
            "persona" => Some(persona.clone()),
            "institution" => Some(institution.to_string()),
            "context" => Some(excerpts.clone()),
            "question" => Some(context.question.clone()),
            _ => None,
        })
    }
}

/// Numbered excerpts with their source labels, best match first.
pub fn format_context(context: &RetrievedContext) -> String {
    if context.results.is_empty() {
        return "(no relevant excerpts were found)".to_string();
    }
    let mut out = String::new();
    for (i, result) in context.results.iter().enumerate() {
        if i > 0 {
            out.push_str("\n\n");
        }
        let _ = write!(out, "[{}] ({})\n{}", i + 1, result.chunk.source, result.chunk.text.trim());
    }
    out
}

/// Replace `{name}` tokens in `template` with `lookup(name)`, in one pass.
fn substitute(template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let name = &after[..close];
            let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if valid { lookup(name).map(|v| (v, close)) } else { None }
        });
        match value {
            Some((value, close)) => {
                out.push_str(&value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
