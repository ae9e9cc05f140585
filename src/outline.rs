//! Outline trees produced by the outline builder.
//!
//! An outline file is the JSON document `<results>/<stem>_structure.json`.
//! Each node carries a title, an optional summary, optional page or line
//! bounds and optional pre-extracted text. Children are serialized under
//! `nodes`.

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlineNode {
    pub node_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Summary inherited from the parent; used when `summary` is empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_num: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "nodes", skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<OutlineNode>,
}

impl OutlineNode {
    /// The node's own summary, or the inherited prefix summary.
    pub fn effective_summary(&self) -> Option<&str> {
        non_empty(self.summary.as_deref())
            .or_else(|| non_empty(self.prefix_summary.as_deref()))
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Stored section text, ignoring blank strings.
    pub fn stored_text(&self) -> Option<&str> {
        non_empty(self.text.as_deref())
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}

/// The `structure` field holds either a single root or a list of roots.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Structure {
    Many(Vec<OutlineNode>),
    One(Box<OutlineNode>),
}

fn deserialize_structure<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<OutlineNode>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<Structure>::deserialize(deserializer)? {
        Some(Structure::Many(nodes)) => nodes,
        Some(Structure::One(node)) => vec![*node],
        None => Vec::new(),
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutlineDocument {
    #[serde(default)]
    pub doc_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "deserialize_structure")]
    pub structure: Vec<OutlineNode>,
}

/// Lookup table from node id to node, covering the whole tree.
pub type NodeMap<'a> = HashMap<&'a str, &'a OutlineNode>;

impl OutlineDocument {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Description used to route queries in the outline search.
    pub fn description(&self) -> Option<&str> {
        non_empty(self.doc_description.as_deref())
            .or_else(|| non_empty(self.description.as_deref()))
    }

    pub fn node_map(&self) -> NodeMap<'_> {
        let mut map = HashMap::new();
        let mut stack: Vec<&OutlineNode> = self.structure.iter().rev().collect();
        while let Some(node) = stack.pop() {
            map.entry(node.node_id.as_str()).or_insert(node);
            stack.extend(node.children.iter().rev());
        }
        map
    }

    pub fn node_count(&self) -> usize {
        self.node_map().len()
    }

    /// Copy of the tree with every `text` field removed, for prompting.
    pub fn strip_text(&self) -> Vec<OutlineNode> {
        fn strip(node: &OutlineNode) -> OutlineNode {
            OutlineNode {
                text: None,
                children: node.children.iter().map(strip).collect(),
                ..node.clone()
            }
        }
        self.structure.iter().map(strip).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "doc_name": "A",
        "doc_description": "An example",
        "structure": [{
            "node_id": "0001",
            "title": "Intro",
            "summary": "overview",
            "start_index": 1,
            "end_index": 3,
            "nodes": [{
                "node_id": "0002",
                "title": "Details",
                "text": "the answer is 42",
                "prefix_summary": "inherited"
            }]
        }]
    }"#;

    #[test]
    fn parses_nested_nodes() {
        let doc: OutlineDocument = serde_json::from_str(SAMPLE).unwrap();

        assert_eq!(doc.doc_name, "A");
        assert_eq!(doc.description(), Some("An example"));
        assert_eq!(doc.structure.len(), 1);

        let root = &doc.structure[0];
        assert_eq!(root.start_index, Some(1));
        assert!(!root.is_leaf());

        let child = &root.children[0];
        assert!(child.is_leaf());
        assert_eq!(child.stored_text(), Some("the answer is 42"));
        assert_eq!(child.effective_summary(), Some("inherited"));
    }

    #[test]
    fn single_root_structure_is_accepted() {
        let doc: OutlineDocument = serde_json::from_str(
            r#"{"doc_name": "B", "structure": {"node_id": "1", "title": "T"}}"#,
        )
        .unwrap();
        assert_eq!(doc.structure.len(), 1);
        assert_eq!(doc.structure[0].title, "T");
    }

    #[test]
    fn missing_structure_is_empty() {
        let doc: OutlineDocument =
            serde_json::from_str(r#"{"doc_name": "C"}"#).unwrap();
        assert!(doc.structure.is_empty());
        assert!(doc.node_map().is_empty());
    }

    #[test]
    fn node_map_covers_every_node() {
        let doc: OutlineDocument = serde_json::from_str(SAMPLE).unwrap();
        let map = doc.node_map();

        assert_eq!(map.len(), 2);
        assert_eq!(map["0002"].title, "Details");
        assert_eq!(doc.node_count(), 2);
    }

    #[test]
    fn description_falls_back_to_plain_field() {
        let doc: OutlineDocument = serde_json::from_str(
            r#"{"doc_name": "D", "doc_description": "  ", "description": "plain"}"#,
        )
        .unwrap();
        assert_eq!(doc.description(), Some("plain"));
    }

    #[test]
    fn strip_text_removes_text_at_every_depth() {
        let doc: OutlineDocument = serde_json::from_str(SAMPLE).unwrap();
        let stripped = doc.strip_text();

        let json = serde_json::to_string(&stripped).unwrap();
        assert!(!json.contains("the answer is 42"));
        assert!(json.contains("\"nodes\""));
        assert_eq!(stripped[0].children[0].title, "Details");
    }
}
