//! Persistent storage for section vectors.
//!
//! Records are grouped by document so a document can be replaced or removed
//! as a unit. The bundled [`RedbVectorStore`] answers nearest-neighbour
//! queries with an exact cosine scan.

use std::path::Path;

use rayon::prelude::*;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// (document name, node id) -> JSON encoded [`StoredSection`] (without the
/// vector).
const SECTIONS: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("section_records");

/// (document name, node id) -> f32 vector bytes.
const VECTORS: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("section_vectors");

/// Document name -> JSON list of node ids.
const DOCUMENTS: TableDefinition<&str, &str> = TableDefinition::new("documents");

/// Longest summary kept in section metadata, in characters.
pub const MAX_METADATA_SUMMARY_CHARS: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionMetadata {
    pub doc_name: String,
    #[serde(default)]
    pub doc_description: String,
    pub node_id: String,
    pub title: String,
    #[serde(default)]
    pub path: String,
    pub start_index: Option<u64>,
    pub end_index: Option<u64>,
    #[serde(default)]
    pub line_num: Option<u64>,
    #[serde(default)]
    pub has_children: bool,
    #[serde(default)]
    pub summary: String,
}

impl SectionMetadata {
    /// Store `summary`, truncated to [`MAX_METADATA_SUMMARY_CHARS`].
    pub fn with_summary(mut self, summary: &str) -> Self {
        self.summary = summary
            .chars()
            .take(MAX_METADATA_SUMMARY_CHARS)
            .collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSection {
    /// Display id, `{doc}_{node}`. Not unique across documents; records are
    /// keyed by `(doc, node)`.
    pub id: String,
    #[serde(skip)]
    pub vector: Vec<f32>,
    /// The text that was embedded.
    pub document: String,
    pub metadata: SectionMetadata,
}

impl StoredSection {
    pub fn record_id(doc_name: &str, node_id: &str) -> String {
        format!("{doc_name}_{node_id}")
    }
}

/// Restricts a query to some documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentFilter {
    One(String),
    AnyOf(Vec<String>),
}

impl DocumentFilter {
    /// Build a filter from a list of names; an empty list means no filter.
    pub fn from_names(names: &[String]) -> Option<Self> {
        match names {
            [] => None,
            [one] => Some(Self::One(one.clone())),
            many => Some(Self::AnyOf(many.to_vec())),
        }
    }

    pub fn matches(&self, doc_name: &str) -> bool {
        match self {
            Self::One(name) => name == doc_name,
            Self::AnyOf(names) => names.iter().any(|n| n == doc_name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub section: StoredSection,
    /// Smaller is closer.
    pub distance: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceStats {
    pub removed: usize,
    pub inserted: usize,
}

/// Query, insert and delete capability over section records.
pub trait VectorStore: Send + Sync {
    /// Remove every record of `doc_name` and insert `sections` in their
    /// place, atomically.
    fn replace_document(
        &self,
        doc_name: &str,
        sections: &[StoredSection],
    ) -> Result<ReplaceStats>;

    /// Returns the number of records removed.
    fn delete_document(&self, doc_name: &str) -> Result<usize>;

    /// Nearest records to `vector`, closest first.
    fn query(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&DocumentFilter>,
    ) -> Result<Vec<Neighbor>>;

    fn count(&self) -> Result<usize>;

    fn count_document(&self, doc_name: &str) -> Result<usize>;

    /// Names of every document with at least one record, sorted.
    fn document_names(&self) -> Result<Vec<String>>;
}

pub struct RedbVectorStore {
    db: Database,
}

impl RedbVectorStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(SECTIONS)?;
        txn.open_table(VECTORS)?;
        txn.open_table(DOCUMENTS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    fn ids_for(&self, doc_name: &str) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        match table.get(doc_name)? {
            Some(v) => Ok(serde_json::from_str(v.value())?),
            None => Ok(Vec::new()),
        }
    }
}

impl std::fmt::Debug for RedbVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbVectorStore").finish_non_exhaustive()
    }
}

fn encode_vector(vector: &[f32]) -> &[u8] {
    bytemuck::cast_slice(vector)
}

/// Decode vector bytes; values may not be 4-byte aligned in the page.
fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn cosine_distance(a: &[f32], a_norm: f32, b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    let b_norm = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if b_norm == 0.0 {
        return None;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    Some(1.0 - dot / (a_norm * b_norm))
}

impl VectorStore for RedbVectorStore {
    fn replace_document(
        &self,
        doc_name: &str,
        sections: &[StoredSection],
    ) -> Result<ReplaceStats> {
        let txn = self.db.begin_write()?;
        let stats = {
            let mut docs = txn.open_table(DOCUMENTS)?;
            let mut rows = txn.open_table(SECTIONS)?;
            let mut vectors = txn.open_table(VECTORS)?;

            let old: Vec<String> = match docs.get(doc_name)? {
                Some(v) => serde_json::from_str(v.value())?,
                None => Vec::new(),
            };
            for node_id in &old {
                rows.remove((doc_name, node_id.as_str()))?;
                vectors.remove((doc_name, node_id.as_str()))?;
            }

            let mut ids: Vec<String> = Vec::with_capacity(sections.len());
            for section in sections {
                let key = (doc_name, section.metadata.node_id.as_str());
                let row = serde_json::to_vec(section)?;
                rows.insert(key, row.as_slice())?;
                vectors.insert(key, encode_vector(&section.vector))?;
                if !ids.contains(&section.metadata.node_id) {
                    ids.push(section.metadata.node_id.clone());
                }
            }

            if ids.is_empty() {
                docs.remove(doc_name)?;
            } else {
                let encoded = serde_json::to_string(&ids)?;
                docs.insert(doc_name, encoded.as_str())?;
            }

            ReplaceStats {
                removed: old.len(),
                inserted: ids.len(),
            }
        };
        txn.commit()?;
        Ok(stats)
    }

    fn delete_document(&self, doc_name: &str) -> Result<usize> {
        Ok(self.replace_document(doc_name, &[])?.removed)
    }

    fn query(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&DocumentFilter>,
    ) -> Result<Vec<Neighbor>> {
        let query_norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if limit == 0 || query_norm == 0.0 {
            return Ok(Vec::new());
        }

        let txn = self.db.begin_read()?;
        let docs = txn.open_table(DOCUMENTS)?;
        let rows = txn.open_table(SECTIONS)?;
        let vectors = txn.open_table(VECTORS)?;

        let mut candidates: Vec<(StoredSection, Vec<f32>)> = Vec::new();
        for entry in docs.iter()? {
            let (name, ids) = entry?;
            if let Some(f) = filter
                && !f.matches(name.value())
            {
                continue;
            }
            let doc_name = name.value();
            let node_ids: Vec<String> = serde_json::from_str(ids.value())?;
            for node_id in &node_ids {
                let key = (doc_name, node_id.as_str());
                let Some(row) = rows.get(key)? else {
                    continue;
                };
                let Some(bytes) = vectors.get(key)? else {
                    continue;
                };
                let section: StoredSection = serde_json::from_slice(row.value())?;
                candidates.push((section, decode_vector(bytes.value())));
            }
        }

        let mut neighbors: Vec<Neighbor> = candidates
            .into_par_iter()
            .filter_map(|(mut section, stored)| {
                let distance = cosine_distance(vector, query_norm, &stored)?;
                section.vector = stored;
                Some(Neighbor { section, distance })
            })
            .collect();

        neighbors.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| {
                    let ma = &a.section.metadata;
                    let mb = &b.section.metadata;
                    (&ma.doc_name, &ma.node_id).cmp(&(&mb.doc_name, &mb.node_id))
                })
        });
        neighbors.truncate(limit);
        Ok(neighbors)
    }

    fn count(&self) -> Result<usize> {
        let txn = self.db.begin_read()?;
        let docs = txn.open_table(DOCUMENTS)?;
        let mut total = 0;
        for entry in docs.iter()? {
            let (_, ids) = entry?;
            let ids: Vec<String> = serde_json::from_str(ids.value())?;
            total += ids.len();
        }
        Ok(total)
    }

    fn count_document(&self, doc_name: &str) -> Result<usize> {
        Ok(self.ids_for(doc_name)?.len())
    }

    fn document_names(&self) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let docs = txn.open_table(DOCUMENTS)?;
        let mut names = Vec::new();
        for entry in docs.iter()? {
            let (name, _) = entry?;
            names.push(name.value().to_string());
        }
        Ok(names)
    }
}
