//! Similarity-first query pipeline.
//!
//! A query is embedded and matched against the section index. Hits are
//! grouped by document, their full content is recovered from the outline
//! (or the source document), and the gathered context is handed to the
//! language model.

use std::{sync::Arc, time::Duration};

use serde::Serialize;

use crate::{
    context::{
        ContextBuilder,
        MAX_CONTEXT_CHARS,
        QueryAnswer,
        QueryOutcome,
        answer_from_context,
    },
    error::Result,
    index::{SearchHit, SectionIndex},
    library::Library,
    llm::LanguageModel,
    outline::OutlineDocument,
    resolver::{ContentResolver, Resolution},
};

const EMPTY_INDEX: &str =
    "The similarity index is empty. Add and process documents first.";
const NO_MATCHES: &str = "No document content related to the question was found.";
const NO_CONTENT: &str = "Relevant sections were found, but no usable content \
                          could be recovered from them. Make sure the documents \
                          were processed correctly.";

pub struct QueryEngine {
    index: Arc<SectionIndex>,
    library: Library,
    resolver: Arc<ContentResolver>,
    llm: Arc<dyn LanguageModel>,
    max_context_chars: usize,
    deadline: Option<Duration>,
}

/// Raw retrieval result, without answer synthesis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawResponse {
    pub status: RawStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_results: Option<usize>,
    pub results: Vec<RawHit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RawStatus {
    Ok,
    Error,
}

impl RawResponse {
    fn error(message: impl Into<String>) -> Self {
        Self {
            status: RawStatus::Error,
            message: Some(message.into()),
            query: None,
            total_results: None,
            results: Vec::new(),
        }
    }

    fn empty(message: impl Into<String>) -> Self {
        Self {
            status: RawStatus::Ok,
            ..Self::error(message)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawHit {
    pub doc_name: String,
    pub node_id: String,
    pub title: String,
    pub score: f32,
    pub summary: String,
    /// Full section text; summaries are never substituted here.
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RawHit {
    fn from_hit(hit: &SearchHit) -> Self {
        Self {
            doc_name: hit.doc_name.clone(),
            node_id: hit.node_id.clone(),
            title: hit.title.clone(),
            score: hit.score,
            summary: hit.summary.clone(),
            text: None,
            start_index: None,
            end_index: None,
            error: None,
        }
    }
}

/// Group hits by document, keeping the order in which documents first
/// appear.
pub fn group_by_document(hits: Vec<SearchHit>) -> Vec<(String, Vec<SearchHit>)> {
    let mut groups: Vec<(String, Vec<SearchHit>)> = Vec::new();
    for hit in hits {
        match groups.iter_mut().find(|(name, _)| *name == hit.doc_name) {
            Some((_, group)) => group.push(hit),
            None => groups.push((hit.doc_name.clone(), vec![hit])),
        }
    }
    groups
}

impl QueryEngine {
    pub fn new(
        index: Arc<SectionIndex>,
        library: Library,
        resolver: Arc<ContentResolver>,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            index,
            library,
            resolver,
            llm,
            max_context_chars: MAX_CONTEXT_CHARS,
            deadline: None,
        }
    }

    /// Abandon queries that run longer than `deadline`.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_max_context_chars(mut self, max_chars: usize) -> Self {
        self.max_context_chars = max_chars;
        self
    }

    pub fn index(&self) -> &Arc<SectionIndex> {
        &self.index
    }

    /// Answer `query` from the `top_k` most similar sections.
    pub async fn answer(&self, query: &str, top_k: usize) -> Result<QueryAnswer> {
        let Some(limit) = self.deadline else {
            return self.run(query, top_k).await;
        };
        match tokio::time::timeout(limit, self.run(query, top_k)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(query, limit_secs = limit.as_secs(), "query timed out");
                Ok(QueryAnswer::timed_out(limit))
            }
        }
    }

    async fn run(&self, query: &str, top_k: usize) -> Result<QueryAnswer> {
        if self.index.get_stats()?.total_nodes == 0 {
            return Ok(QueryAnswer::new(
                QueryOutcome::NoIndex,
                EMPTY_INDEX,
                "The similarity index holds no sections.",
            ));
        }

        let hits = match self.index.search(query, top_k, None).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "similarity search failed");
                return Ok(QueryAnswer::new(
                    QueryOutcome::SearchFailed,
                    format!("Similarity search failed: {e}"),
                    "Check that the embedding service is running.",
                ));
            }
        };
        if hits.is_empty() {
            return Ok(QueryAnswer::new(
                QueryOutcome::NoMatches,
                NO_MATCHES,
                "Similarity search returned no results.",
            ));
        }

        let hit_count = hits.len();
        let groups = group_by_document(hits);
        let mut ctx = ContextBuilder::new();
        ctx.note(format!(
            "Similarity search returned {hit_count} sections from {} documents",
            groups.len()
        ));

        for (doc_name, hits) in &groups {
            let Some(outline) = self.load_outline(doc_name, &mut ctx) else {
                continue;
            };
            let nodes = outline.node_map();
            let source = self.library.source_path(doc_name);

            for hit in hits {
                ctx.source(format!(
                    "[{doc_name}] {} (score: {:.3})",
                    hit.title, hit.score
                ));
                let resolution = self.resolver.resolve(
                    &nodes,
                    &hit.node_id,
                    source.as_ref(),
                    Some(hit.summary.as_str()),
                );
                match resolution {
                    Resolution::Stored(text) | Resolution::Extracted(text) => {
                        ctx.push_section(doc_name, &hit.title, &text, false);
                    }
                    Resolution::Summary(summary) => {
                        ctx.push_section(doc_name, &hit.title, &summary, true);
                    }
                    Resolution::Failed(reason) => ctx.note(format!(
                        "[{doc_name}] page extraction failed for '{}': {reason}",
                        hit.title
                    )),
                    Resolution::UnknownNode => ctx.note(format!(
                        "[{doc_name}] section {} is not in the outline",
                        hit.node_id
                    )),
                    Resolution::Missing => {}
                }
            }
        }

        Ok(answer_from_context(
            self.llm.as_ref(),
            query,
            ctx,
            self.max_context_chars,
            NO_CONTENT,
        )
        .await)
    }

    fn load_outline(
        &self,
        doc_name: &str,
        ctx: &mut ContextBuilder,
    ) -> Option<OutlineDocument> {
        match self.library.load_outline(doc_name) {
            Ok(Some(outline)) => Some(outline),
            Ok(None) => {
                ctx.note(format!("[{doc_name}] outline file not found, skipped"));
                None
            }
            Err(e) => {
                tracing::warn!(doc = doc_name, error = %e, "unreadable outline");
                ctx.note(format!("[{doc_name}] outline unreadable ({e}), skipped"));
                None
            }
        }
    }

    /// Retrieve and resolve sections without synthesizing an answer.
    pub async fn answer_raw(&self, query: &str, top_k: usize) -> Result<RawResponse> {
        let Some(limit) = self.deadline else {
            return self.run_raw(query, top_k).await;
        };
        match tokio::time::timeout(limit, self.run_raw(query, top_k)).await {
            Ok(result) => result,
            Err(_) => Ok(RawResponse::error(format!(
                "The query did not finish within {} seconds.",
                limit.as_secs()
            ))),
        }
    }

    async fn run_raw(&self, query: &str, top_k: usize) -> Result<RawResponse> {
        if self.index.get_stats()?.total_nodes == 0 {
            return Ok(RawResponse::error(EMPTY_INDEX));
        }

        let hits = match self.index.search(query, top_k, None).await {
            Ok(hits) => hits,
            Err(e) => {
                return Ok(RawResponse::error(format!(
                    "Similarity search failed: {e}"
                )));
            }
        };
        if hits.is_empty() {
            return Ok(RawResponse::empty(NO_MATCHES));
        }

        let mut results = Vec::with_capacity(hits.len());
        for (doc_name, hits) in group_by_document(hits) {
            let outline = match self.library.load_outline(&doc_name) {
                Ok(Some(outline)) => outline,
                Ok(None) => {
                    results.extend(hits.iter().map(|hit| RawHit {
                        error: Some("outline file not found".to_string()),
                        ..RawHit::from_hit(hit)
                    }));
                    continue;
                }
                Err(e) => {
                    tracing::warn!(doc = %doc_name, error = %e, "unreadable outline");
                    let reason = format!("outline unreadable: {e}");
                    results.extend(hits.iter().map(|hit| RawHit {
                        error: Some(reason.clone()),
                        ..RawHit::from_hit(hit)
                    }));
                    continue;
                }
            };

            let nodes = outline.node_map();
            let source = self.library.source_path(&doc_name);
            for hit in &hits {
                let mut raw = RawHit::from_hit(hit);
                if let Some(node) = nodes.get(hit.node_id.as_str()) {
                    raw.start_index = node.start_index;
                    raw.end_index = node.end_index;
                }
                match self
                    .resolver
                    .resolve(&nodes, &hit.node_id, source.as_ref(), None)
                {
                    Resolution::Stored(text) | Resolution::Extracted(text) => {
                        raw.text = Some(text);
                    }
                    Resolution::Failed(reason) => {
                        raw.error = Some(format!("page extraction failed: {reason}"));
                    }
                    _ => {}
                }
                results.push(raw);
            }
        }

        Ok(RawResponse {
            status: RawStatus::Ok,
            message: None,
            query: Some(query.to_string()),
            total_results: Some(results.len()),
            results,
        })
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("index", &self.index)
            .field("library", &self.library)
            .field("max_context_chars", &self.max_context_chars)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}
