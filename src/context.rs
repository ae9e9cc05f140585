//! Building the answer context and synthesizing answers.

use serde::Serialize;

use crate::llm::LanguageModel;

/// Hard cap on the context handed to the language model, in characters.
pub const MAX_CONTEXT_CHARS: usize = 15_000;

/// Terminal state of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    Answered,
    NoIndex,
    NoMatches,
    NoUsableContent,
    SearchFailed,
    NoDocuments,
    NoRelevantDocuments,
    TimedOut,
}

impl QueryOutcome {
    /// Whether the similarity path ended without anything worth answering
    /// from, so the outline search should be tried instead.
    pub fn wants_outline_search(self) -> bool {
        matches!(
            self,
            Self::NoIndex
                | Self::NoMatches
                | Self::NoUsableContent
                | Self::SearchFailed
        )
    }
}

/// Answer with its sources and the reasoning trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnswer {
    pub answer: String,
    pub sources: Vec<String>,
    pub thinking: String,
    #[serde(skip)]
    pub outcome: QueryOutcome,
}

impl QueryAnswer {
    pub fn new(
        outcome: QueryOutcome,
        answer: impl Into<String>,
        thinking: impl Into<String>,
    ) -> Self {
        Self {
            answer: answer.into(),
            sources: Vec::new(),
            thinking: thinking.into(),
            outcome,
        }
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    pub fn timed_out(limit: std::time::Duration) -> Self {
        Self::new(
            QueryOutcome::TimedOut,
            format!("The query did not finish within {} seconds.", limit.as_secs()),
            "Query deadline expired before an answer was produced.",
        )
    }
}

/// Accumulates section blocks, source references and diagnostic notes.
#[derive(Debug, Default)]
pub struct ContextBuilder {
    text: String,
    sources: Vec<String>,
    notes: Vec<String>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn source(&mut self, reference: impl Into<String>) {
        self.sources.push(reference.into());
    }

    /// Append a section block. Summaries are marked as such in the header.
    pub fn push_section(
        &mut self,
        doc_name: &str,
        title: &str,
        body: &str,
        is_summary: bool,
    ) {
        let marker = if is_summary { " (summary)" } else { "" };
        self.text.push_str(&format!(
            "\n--- Document: {doc_name}, Section: {title}{marker} ---\n{body}\n"
        ));
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// The context, truncated to `max_chars` characters.
    pub fn context(&self, max_chars: usize) -> &str {
        truncate_chars(&self.text, max_chars)
    }

    pub fn thinking(&self) -> String {
        self.notes.join("\n")
    }

    pub fn into_parts(self) -> (Vec<String>, String) {
        let thinking = self.thinking();
        (self.sources, thinking)
    }
}

/// Longest prefix of `s` holding at most `max_chars` characters.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub fn answer_prompt(query: &str, context: &str) -> String {
    format!(
        "You are a research assistant working with excerpts from several documents.\n\
         Answer the user's question using only the context below.\n\
         If the sources conflict, say so.\n\
         Always cite the document names you rely on.\n\
         \n\
         Question: {query}\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Assistant:"
    )
}

/// Ask the model for an answer. A model failure becomes the answer text.
pub async fn synthesize(
    llm: &dyn LanguageModel,
    query: &str,
    context: &str,
) -> String {
    match llm.complete(&answer_prompt(query, context)).await {
        Ok(answer) => answer,
        Err(e) => {
            tracing::warn!(error = %e, "answer generation failed");
            format!("Answer generation failed: {e}")
        }
    }
}

/// Finish a query from the gathered context.
///
/// An empty context ends with [`QueryOutcome::NoUsableContent`] and
/// `empty_message` without contacting the model.
pub async fn answer_from_context(
    llm: &dyn LanguageModel,
    query: &str,
    ctx: ContextBuilder,
    max_chars: usize,
    empty_message: &str,
) -> QueryAnswer {
    if ctx.is_empty() {
        let (sources, thinking) = ctx.into_parts();
        return QueryAnswer::new(
            QueryOutcome::NoUsableContent,
            empty_message,
            thinking,
        )
        .with_sources(sources);
    }

    let answer = synthesize(llm, query, ctx.context(max_chars)).await;
    let (sources, thinking) = ctx.into_parts();
    QueryAnswer::new(QueryOutcome::Answered, answer, thinking)
        .with_sources(sources)
}
