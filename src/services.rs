//! Wiring of the retrieval components for the CLI and the MCP server.

use std::{path::Path, sync::Arc, time::Duration};

use serde::Serialize;

use crate::{
    context::QueryAnswer,
    data_dir::DataDir,
    embedding::{EmbeddingClient, OllamaEmbedder, RetryPolicy},
    error::{Error, Result},
    extract::PdfPageExtractor,
    fallback::OutlineSearch,
    index::SectionIndex,
    library::{Library, outline_key, stem_of},
    llm::{LanguageModel, OpenAiChat},
    outline::OutlineDocument,
    query::QueryEngine,
    resolver::ContentResolver,
    settings::Settings,
    vector_store::RedbVectorStore,
};

const EMBEDDING_TIMEOUT: Duration = Duration::from_secs(60);
const LLM_TIMEOUT: Duration = Duration::from_secs(120);

/// Outcome of re-indexing every outline in the library.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub rebuilt_documents: usize,
    pub indexed_sections: usize,
    pub errors: Vec<String>,
}

/// What `remove_document` deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemovalReport {
    pub sections: usize,
    pub outline: bool,
    pub source: bool,
}

pub struct Services {
    pub settings: Settings,
    pub index: Arc<SectionIndex>,
    pub library: Library,
    pub resolver: Arc<ContentResolver>,
    pub llm: Arc<dyn LanguageModel>,
}

impl Services {
    /// Open the index and build HTTP clients from `settings`.
    pub fn open(data_dir: &DataDir, settings: Settings) -> Result<Self> {
        let store = Arc::new(RedbVectorStore::open(&data_dir.index_db())?);
        let embedder = Arc::new(OllamaEmbedder::new(
            &settings.embedding_url,
            &settings.embedding_model,
            EMBEDDING_TIMEOUT,
        )?);
        let index = Arc::new(SectionIndex::new(
            store,
            EmbeddingClient::new(embedder, RetryPolicy::default()),
        ));
        let llm = Arc::new(OpenAiChat::new(
            &settings.llm_base_url,
            &settings.llm_model,
            settings.llm_api_key.as_deref(),
            LLM_TIMEOUT,
        )?);

        Ok(Self {
            library: Library::from_data_dir(data_dir)?,
            resolver: Arc::new(ContentResolver::new(Arc::new(PdfPageExtractor))),
            settings,
            index,
            llm,
        })
    }

    pub fn query_engine(&self) -> QueryEngine {
        self.similarity_engine()
            .with_deadline(self.settings.query_timeout)
    }

    fn similarity_engine(&self) -> QueryEngine {
        QueryEngine::new(
            self.index.clone(),
            self.library.clone(),
            self.resolver.clone(),
            self.llm.clone(),
        )
    }

    pub fn outline_search(&self) -> OutlineSearch {
        OutlineSearch::new(
            self.library.clone(),
            self.resolver.clone(),
            self.llm.clone(),
        )
    }

    /// Answer `query`, falling back to outline search when asked to or when
    /// similarity search yields nothing usable and outlines exist.
    ///
    /// The query deadline covers both paths together.
    pub async fn ask(
        &self,
        query: &str,
        top_k: usize,
        outline_only: bool,
    ) -> Result<QueryAnswer> {
        let Some(limit) = self.settings.query_timeout else {
            return self.run_ask(query, top_k, outline_only).await;
        };
        match tokio::time::timeout(limit, self.run_ask(query, top_k, outline_only))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(query, limit_secs = limit.as_secs(), "query timed out");
                Ok(QueryAnswer::timed_out(limit))
            }
        }
    }

    async fn run_ask(
        &self,
        query: &str,
        top_k: usize,
        outline_only: bool,
    ) -> Result<QueryAnswer> {
        if outline_only {
            return self.outline_search().answer(query).await;
        }

        let similar = self.similarity_engine().answer(query, top_k).await?;
        if !similar.outcome.wants_outline_search()
            || self.library.list()?.is_empty()
        {
            return Ok(similar);
        }
        tracing::info!(
            outcome = ?similar.outcome,
            "similarity search found nothing usable, using outline search"
        );

        let mut answer = self.outline_search().answer(query).await?;
        let mut trail =
            vec![format!("Similarity search gave no answer: {}", similar.answer)];
        if !similar.thinking.is_empty() {
            trail.push(similar.thinking);
        }
        if !answer.thinking.is_empty() {
            trail.push(answer.thinking);
        }
        answer.thinking = trail.join("\n");
        Ok(answer)
    }

    /// Copy an outline file into the library and index it.
    ///
    /// Returns the document name and the number of sections indexed.
    pub async fn add_outline(&self, path: &Path) -> Result<(String, usize)> {
        let mut doc = OutlineDocument::from_path(path)?;
        if doc.doc_name.trim().is_empty() {
            doc.doc_name = doc_name_from_file(path).ok_or_else(|| {
                Error::Config(format!(
                    "cannot derive a document name from {}",
                    path.display()
                ))
            })?;
        }

        self.library.save_outline(outline_key(&doc.doc_name), &doc)?;
        let count = self.index.add_document_outline(&doc).await?;
        Ok((doc.doc_name, count))
    }

    /// Re-index every outline in the library.
    ///
    /// A failing document is recorded and the rest continue.
    pub async fn rebuild(&self) -> Result<RebuildReport> {
        let mut report = RebuildReport::default();
        for entry in self.library.load_all()? {
            match self.index.add_document_outline(&entry.doc).await {
                Ok(count) => {
                    report.rebuilt_documents += 1;
                    report.indexed_sections += count;
                    tracing::info!(doc = %entry.doc.doc_name, sections = count, "rebuilt");
                }
                Err(e) => {
                    tracing::warn!(file = %entry.file, error = %e, "rebuild failed");
                    report.errors.push(format!("{}: {e}", entry.file));
                }
            }
        }
        Ok(report)
    }
}

impl Services {
    /// Delete a document everywhere: its index records, its outline and
    /// its uploaded source.
    ///
    /// `doc_name` may be the outline key or the indexed document name;
    /// both spellings are cleaned up.
    pub fn remove_document(&self, doc_name: &str) -> Result<RemovalReport> {
        let mut names = vec![doc_name.to_string()];
        match self.library.load_outline(doc_name) {
            Ok(Some(doc)) if !names.contains(&doc.doc_name) => {
                names.push(doc.doc_name);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(doc = doc_name, error = %e, "unreadable outline, removing anyway");
            }
        }
        let key = outline_key(doc_name);
        if !names.iter().any(|n| n == key) {
            names.push(key.to_string());
        }

        let mut report = RemovalReport::default();
        for name in &names {
            report.sections += self.index.delete_document(name)?;
            report.outline |= self.library.remove_outline(name)?;
            report.source |= self.library.remove_source(name)?;
        }

        if report == RemovalReport::default() {
            return Err(Error::NotFound {
                kind: "document",
                name: doc_name.to_string(),
            });
        }
        tracing::info!(
            doc = doc_name,
            sections = report.sections,
            outline = report.outline,
            source = report.source,
            "removed document"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("settings", &self.settings)
            .field("index", &self.index)
            .field("library", &self.library)
            .finish_non_exhaustive()
    }
}

fn doc_name_from_file(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let stem = stem_of(name);
    let stem = stem.strip_suffix(".json").unwrap_or(stem);
    (!stem.is_empty()).then(|| stem.to_string())
}
