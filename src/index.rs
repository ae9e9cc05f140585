//! Similarity index over document sections.

use std::sync::Arc;

use serde::Serialize;

use crate::{
    embedding::EmbeddingClient,
    error::{Error, Result},
    flatten::flatten,
    outline::{OutlineDocument, OutlineNode},
    vector_store::{
        DocumentFilter,
        Neighbor,
        SectionMetadata,
        StoredSection,
        VectorStore,
    },
};

/// One similarity search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub doc_name: String,
    pub node_id: String,
    pub title: String,
    /// `1 - distance`; a relative ranking signal.
    pub score: f32,
    pub summary: String,
    pub start_index: Option<u64>,
    pub end_index: Option<u64>,
    pub line_num: Option<u64>,
    pub path: String,
    pub doc_description: String,
    pub has_children: bool,
    pub embedded_text: String,
}

impl From<Neighbor> for SearchHit {
    fn from(n: Neighbor) -> Self {
        let m = n.section.metadata;
        Self {
            doc_name: m.doc_name,
            node_id: m.node_id,
            title: m.title,
            score: 1.0 - n.distance,
            summary: m.summary,
            start_index: m.start_index,
            end_index: m.end_index,
            line_num: m.line_num,
            path: m.path,
            doc_description: m.doc_description,
            has_children: m.has_children,
            embedded_text: n.section.document,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub total_nodes: usize,
    pub total_documents: usize,
    pub documents: Vec<String>,
}

/// Owns the section records of every indexed document.
pub struct SectionIndex {
    store: Arc<dyn VectorStore>,
    embedder: EmbeddingClient,
}

impl SectionIndex {
    pub fn new(store: Arc<dyn VectorStore>, embedder: EmbeddingClient) -> Self {
        Self { store, embedder }
    }

    /// Index every section of a document, replacing its previous records.
    ///
    /// All embeddings are computed before the store is touched, so a failed
    /// or abandoned call leaves the previous records in place. Returns the
    /// number of sections indexed.
    pub async fn add_document(
        &self,
        doc_name: &str,
        structure: &[OutlineNode],
        description: Option<&str>,
    ) -> Result<usize> {
        let candidates = flatten(structure);
        if candidates.is_empty() {
            let stats = self.store.replace_document(doc_name, &[])?;
            tracing::info!(
                doc = doc_name,
                removed = stats.removed,
                "outline has no sections, nothing indexed"
            );
            return Ok(0);
        }

        let texts: Vec<String> = candidates
            .iter()
            .map(|c| c.embedding_text.clone())
            .collect();
        tracing::info!(
            doc = doc_name,
            sections = texts.len(),
            model = self.embedder.model(),
            "embedding sections"
        );
        let vectors = self.embedder.embed_batch(&texts).await?;

        let mut sections = Vec::with_capacity(candidates.len());
        for (candidate, vector) in candidates.into_iter().zip(vectors) {
            if vector.is_empty() {
                return Err(Error::EmbeddingUnavailable {
                    attempts: 1,
                    reason: format!(
                        "no vector returned for section '{}'",
                        candidate.node_id
                    ),
                });
            }
            let metadata = SectionMetadata {
                doc_name: doc_name.to_string(),
                doc_description: description.unwrap_or_default().to_string(),
                node_id: candidate.node_id.clone(),
                title: candidate.title,
                path: candidate.path,
                start_index: candidate.start_index,
                end_index: candidate.end_index,
                line_num: candidate.line_num,
                has_children: candidate.has_children,
                summary: String::new(),
            }
            .with_summary(candidate.summary.as_deref().unwrap_or_default());
            sections.push(StoredSection {
                id: StoredSection::record_id(doc_name, &candidate.node_id),
                vector,
                document: candidate.embedding_text,
                metadata,
            });
        }

        let stats = self.store.replace_document(doc_name, &sections)?;
        tracing::info!(
            doc = doc_name,
            inserted = stats.inserted,
            replaced = stats.removed,
            "indexed document"
        );
        Ok(stats.inserted)
    }

    /// Index an outline document under its own name.
    pub async fn add_document_outline(
        &self,
        doc: &OutlineDocument,
    ) -> Result<usize> {
        self.add_document(&doc.doc_name, &doc.structure, doc.description())
            .await
    }

    /// Sections most similar to `query`, best first.
    ///
    /// An empty index yields no hits without contacting the embedding
    /// service; use [`Self::get_stats`] to tell the cases apart.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        doc_filter: Option<&[String]>,
    ) -> Result<Vec<SearchHit>> {
        if top_k == 0 || self.store.count()? == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query).await?;
        if vector.is_empty() {
            return Ok(Vec::new());
        }

        let filter = doc_filter.and_then(DocumentFilter::from_names);
        let neighbors = self.store.query(&vector, top_k, filter.as_ref())?;
        tracing::debug!(query, hits = neighbors.len(), "similarity search");
        Ok(neighbors.into_iter().map(SearchHit::from).collect())
    }

    pub fn delete_document(&self, doc_name: &str) -> Result<usize> {
        let removed = self.store.delete_document(doc_name)?;
        tracing::info!(doc = doc_name, removed, "removed document from index");
        Ok(removed)
    }

    /// Remove every document from the index.
    ///
    /// Returns the statistics of what was removed.
    pub fn clear(&self) -> Result<IndexStats> {
        let removed = self.get_stats()?;
        for name in &removed.documents {
            self.store.delete_document(name)?;
        }
        tracing::info!(
            documents = removed.total_documents,
            sections = removed.total_nodes,
            "cleared index"
        );
        Ok(removed)
    }

    pub fn get_stats(&self) -> Result<IndexStats> {
        let documents = self.store.document_names()?;
        Ok(IndexStats {
            total_nodes: self.store.count()?,
            total_documents: documents.len(),
            documents,
        })
    }

    pub fn get_document_node_count(&self, doc_name: &str) -> Result<usize> {
        self.store.count_document(doc_name)
    }

    pub fn documents(&self) -> Result<Vec<String>> {
        self.store.document_names()
    }
}

impl std::fmt::Debug for SectionIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionIndex")
            .field("embedder", &self.embedder)
            .finish_non_exhaustive()
    }
}
