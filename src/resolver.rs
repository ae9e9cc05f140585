//! Recovering the full text of a section.

use std::sync::Arc;

use crate::{
    extract::TextExtractor,
    library::{SourceDocument, SourceKind},
    outline::NodeMap,
};

/// Where a section's content came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Text stored on the outline node.
    Stored(String),
    /// Text extracted from the source document's page range.
    Extracted(String),
    /// Only a summary was available.
    Summary(String),
    /// The node exists but has no text, no extractable range and no summary.
    Missing,
    /// The node id is not part of the outline.
    UnknownNode,
    /// Extraction was attempted and failed.
    Failed(String),
}

impl Resolution {
    /// Full section text, excluding summaries.
    pub fn full_text(&self) -> Option<&str> {
        match self {
            Self::Stored(t) | Self::Extracted(t) => Some(t),
            _ => None,
        }
    }
}

pub struct ContentResolver {
    extractor: Arc<dyn TextExtractor>,
}

impl ContentResolver {
    pub fn new(extractor: Arc<dyn TextExtractor>) -> Self {
        Self { extractor }
    }

    /// Resolve the content of `node_id`.
    ///
    /// Tries, in order: text stored on the node, extraction from a paginated
    /// source using the node's page range, then the node's or the hit's
    /// summary.
    pub fn resolve(
        &self,
        nodes: &NodeMap<'_>,
        node_id: &str,
        source: Option<&SourceDocument>,
        hit_summary: Option<&str>,
    ) -> Resolution {
        let Some(node) = nodes.get(node_id) else {
            return Resolution::UnknownNode;
        };

        if let Some(text) = node.stored_text() {
            return Resolution::Stored(text.to_string());
        }

        if let Some(source) = source
            && source.kind == SourceKind::Paginated
            && let (Some(start), Some(end)) = (node.start_index, node.end_index)
        {
            return match self.extractor.extract(&source.path, start, end) {
                Ok(text) => Resolution::Extracted(text),
                Err(e) => {
                    tracing::warn!(
                        node = node_id,
                        source = %source.path.display(),
                        error = %e,
                        "page extraction failed"
                    );
                    Resolution::Failed(e.to_string())
                }
            };
        }

        node.effective_summary()
            .or(hit_summary.filter(|s| !s.trim().is_empty()))
            .map(|s| Resolution::Summary(s.to_string()))
            .unwrap_or(Resolution::Missing)
    }
}

impl std::fmt::Debug for ContentResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentResolver").finish_non_exhaustive()
    }
}
