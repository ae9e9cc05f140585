use crate::outline::OutlineNode;

/// One indexable section, derived from an outline node.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionCandidate {
    pub node_id: String,
    pub title: String,
    /// Slash-separated titles from the root down to this node.
    pub path: String,
    pub summary: Option<String>,
    pub start_index: Option<u64>,
    pub end_index: Option<u64>,
    pub line_num: Option<u64>,
    pub has_children: bool,
    pub embedding_text: String,
}

/// Flatten an outline tree into sections in depth-first pre-order.
///
/// Every node is emitted, internal nodes included.
pub fn flatten(structure: &[OutlineNode]) -> Vec<SectionCandidate> {
    let mut out = Vec::new();
    // (node, parent path)
    let mut stack: Vec<(&OutlineNode, Option<String>)> =
        structure.iter().rev().map(|n| (n, None)).collect();

    while let Some((node, parent)) = stack.pop() {
        let path = match parent {
            Some(p) => format!("{p}/{}", node.title),
            None => node.title.clone(),
        };
        let summary = node.effective_summary().map(str::to_string);

        for child in node.children.iter().rev() {
            stack.push((child, Some(path.clone())));
        }

        out.push(SectionCandidate {
            node_id: node.node_id.clone(),
            embedding_text: embedding_text(&node.title, summary.as_deref()),
            title: node.title.clone(),
            path,
            summary,
            start_index: node.start_index,
            end_index: node.end_index,
            line_num: node.line_num,
            has_children: !node.is_leaf(),
        });
    }

    out
}

/// Text sent to the embedding service for a section.
pub fn embedding_text(title: &str, summary: Option<&str>) -> String {
    match summary.filter(|s| !s.trim().is_empty()) {
        Some(s) => format!("{title}: {s}"),
        None => title.to_string(),
    }
}
