//! Outline search driven by the language model.
//!
//! Used when no similarity index is available. The model first picks the
//! documents worth searching from their names and descriptions, then picks
//! sections from each selected document's outline.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    context::{
        ContextBuilder,
        MAX_CONTEXT_CHARS,
        QueryAnswer,
        QueryOutcome,
        answer_from_context,
    },
    error::Result,
    library::{Library, LibraryDocument, stem_of},
    llm::{LanguageModel, parse_structured},
    outline::OutlineNode,
    resolver::{ContentResolver, Resolution},
};

/// Libraries this small are searched in full when the model selects
/// nothing.
pub const EXHAUSTIVE_THRESHOLD: usize = 3;

const NO_DOCUMENTS: &str = "No documents have been processed yet.";
const NO_RELEVANT: &str = "No document related to the question was found.";
const NO_CONTENT: &str = "Sorry, no source text could be recovered from the \
                          relevant documents.";

/// Result of document selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// Indices into the library, in library order.
    Selected(Vec<usize>),
    /// Nothing was selected but the library is small enough to search all.
    AllByDefault,
    NoneRelevant,
}

/// Sections picked from one outline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TreeSearch {
    #[serde(default)]
    pub thinking: String,
    #[serde(default)]
    pub node_list: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DocumentSelection {
    #[serde(default)]
    relevant_docs: Vec<String>,
}

#[derive(Serialize)]
struct DocumentCard<'a> {
    file: &'a str,
    doc_name: &'a str,
    description: &'a str,
}

pub struct OutlineSearch {
    library: Library,
    resolver: Arc<ContentResolver>,
    llm: Arc<dyn LanguageModel>,
    max_context_chars: usize,
}

impl OutlineSearch {
    pub fn new(
        library: Library,
        resolver: Arc<ContentResolver>,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            library,
            resolver,
            llm,
            max_context_chars: MAX_CONTEXT_CHARS,
        }
    }

    /// Ask the model which documents may answer `query`.
    ///
    /// Names returned by the model are matched against outline file names,
    /// file stems and document names. Unparseable replies select nothing.
    pub async fn select_documents(
        &self,
        query: &str,
        docs: &[LibraryDocument],
    ) -> Result<SelectionOutcome> {
        let cards: Vec<DocumentCard<'_>> = docs
            .iter()
            .map(|d| DocumentCard {
                file: &d.file,
                doc_name: &d.doc.doc_name,
                description: d.doc.description().unwrap_or("No description"),
            })
            .collect();
        let prompt = selection_prompt(query, &serde_json::to_string_pretty(&cards)?);

        let names = match self.llm.complete(&prompt).await {
            Ok(reply) => match parse_structured::<DocumentSelection>(&reply) {
                Ok(selection) => selection.relevant_docs,
                Err(e) => {
                    tracing::warn!(error = %e, "unparseable document selection");
                    Vec::new()
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "document selection failed");
                Vec::new()
            }
        };

        let selected: Vec<usize> = docs
            .iter()
            .enumerate()
            .filter(|(_, d)| {
                names.iter().any(|n| {
                    n == &d.file || n == stem_of(&d.file) || n == &d.doc.doc_name
                })
            })
            .map(|(i, _)| i)
            .collect();

        Ok(if !selected.is_empty() {
            SelectionOutcome::Selected(selected)
        } else if docs.len() <= EXHAUSTIVE_THRESHOLD {
            SelectionOutcome::AllByDefault
        } else {
            SelectionOutcome::NoneRelevant
        })
    }

    /// Ask the model which sections of `structure` answer `query`.
    pub async fn search_tree(
        &self,
        query: &str,
        structure: &[OutlineNode],
    ) -> Result<TreeSearch> {
        let prompt = tree_search_prompt(query, &serde_json::to_string_pretty(structure)?);
        let reply = match self.llm.complete(&prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "outline search failed");
                return Ok(TreeSearch {
                    thinking: format!("Outline search failed: {e}"),
                    node_list: Vec::new(),
                });
            }
        };
        Ok(parse_structured(&reply).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "unparseable outline search reply");
            TreeSearch {
                thinking: format!("Could not parse the outline search reply: {e}"),
                node_list: Vec::new(),
            }
        }))
    }

    /// Answer `query` by searching document outlines.
    pub async fn answer(&self, query: &str) -> Result<QueryAnswer> {
        let docs = self.library.load_all()?;
        if docs.is_empty() {
            return Ok(QueryAnswer::new(QueryOutcome::NoDocuments, NO_DOCUMENTS, ""));
        }

        let selected: Vec<&LibraryDocument> =
            match self.select_documents(query, &docs).await? {
                SelectionOutcome::Selected(idx) => idx.iter().map(|&i| &docs[i]).collect(),
                SelectionOutcome::AllByDefault => docs.iter().collect(),
                SelectionOutcome::NoneRelevant => {
                    return Ok(QueryAnswer::new(
                        QueryOutcome::NoRelevantDocuments,
                        NO_RELEVANT,
                        "The model found no directly relevant document.",
                    ));
                }
            };

        let mut ctx = ContextBuilder::new();
        for entry in selected {
            let doc_name = entry.doc.doc_name.as_str();
            let search = self.search_tree(query, &entry.doc.strip_text()).await?;
            if !search.thinking.is_empty() {
                ctx.note(format!("**[{doc_name}]**: {}", search.thinking));
            }

            let nodes = entry.doc.node_map();
            let source = self
                .library
                .source_path(doc_name)
                .or_else(|| self.library.source_path(stem_of(&entry.file)));

            for node_id in &search.node_list {
                let Some(node) = nodes.get(node_id.as_str()) else {
                    continue;
                };
                let page = node
                    .start_index
                    .map_or_else(|| "?".to_string(), |p| p.to_string());
                ctx.source(format!("[{doc_name}] {} (page {page})", node.title));

                match self.resolver.resolve(&nodes, node_id, source.as_ref(), None) {
                    Resolution::Stored(text) | Resolution::Extracted(text) => {
                        ctx.push_section(doc_name, &node.title, &text, false);
                    }
                    Resolution::Summary(summary) => {
                        ctx.push_section(doc_name, &node.title, &summary, true);
                    }
                    Resolution::Failed(reason) => ctx.note(format!(
                        "[{doc_name}] page extraction failed for '{}': {reason}",
                        node.title
                    )),
                    Resolution::Missing | Resolution::UnknownNode => {}
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
}

impl std::fmt::Debug for OutlineSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutlineSearch")
            .field("library", &self.library)
            .finish_non_exhaustive()
    }
}

fn selection_prompt(query: &str, cards: &str) -> String {
    format!(
        "You are a document routing agent. Below is a list of documents with \
         their names and descriptions.\n\
         Select the documents that may contain the answer to the user's \
         question.\n\
         \n\
         Question: {query}\n\
         \n\
         Documents:\n\
         {cards}\n\
         \n\
         Reply only with JSON of this form:\n\
         {{\n    \"relevant_docs\": [\"file1_structure.json\", \"file2_structure.json\"]\n}}\n\
         If no document is relevant, return an empty list."
    )
}

fn tree_search_prompt(query: &str, tree: &str) -> String {
    format!(
        "You are a document retrieval expert. You are given a question and \
         the hierarchical outline of one document.\n\
         Every node has a `node_id`, a `title` and a `summary`.\n\
         \n\
         Identify the nodes that contain the information needed to answer \
         the question.\n\
         - Prefer leaf nodes; they hold the actual page content.\n\
         - Select several nodes when the information is spread out.\n\
         - Explain your reasoning in the `thinking` field.\n\
         \n\
         Question: {query}\n\
         \n\
         Document outline:\n\
         {tree}\n\
         \n\
         Reply only with JSON of this form:\n\
         {{\n    \"thinking\": \"<why these nodes>\",\n    \"node_list\": [\"node_id_1\", \"node_id_2\"]\n}}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        outline::OutlineDocument,
        testing::{ScriptedModel, TestEnv, scenario_outline},
    };

    fn search(env: &TestEnv, model: Arc<ScriptedModel>) -> OutlineSearch {
        OutlineSearch::new(env.library.clone(), Arc::new(env.resolver()), model)
    }

    fn outline(name: &str, description: Option<&str>) -> OutlineDocument {
        serde_json::from_value(serde_json::json!({
            "doc_name": name,
            "description": description,
            "structure": [{"node_id": "n1", "title": format!("{name} intro"), "text": format!("{name} body")}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn empty_library_makes_no_model_call() {
        let env = TestEnv::new();
        let model = Arc::new(ScriptedModel::new());

        let answer = search(&env, model.clone()).answer("q").await.unwrap();
        assert_eq!(answer.outcome, QueryOutcome::NoDocuments);
        assert!(model.prompts().is_empty());
    }

    #[tokio::test]
    async fn small_library_is_searched_in_full_when_nothing_selected() {
        let env = TestEnv::new();
        for name in ["alpha", "beta"] {
            env.library.save_outline(name, &outline(name, None)).unwrap();
        }
        let model = Arc::new(ScriptedModel::with_responses(&[
            r#"{"relevant_docs": []}"#,
            r#"{"thinking": "intro of alpha", "node_list": ["n1"]}"#,
            r#"{"thinking": "intro of beta", "node_list": ["n1"]}"#,
            "both bodies",
        ]));

        let answer = search(&env, model.clone()).answer("q").await.unwrap();

        assert_eq!(answer.outcome, QueryOutcome::Answered);
        assert_eq!(answer.answer, "both bodies");
        assert_eq!(
            answer.sources,
            vec![
                "[alpha] alpha intro (page ?)".to_string(),
                "[beta] beta intro (page ?)".to_string(),
            ]
        );
        assert_eq!(
            answer.thinking,
            "**[alpha]**: intro of alpha\n**[beta]**: intro of beta"
        );
        assert_eq!(model.prompts().len(), 4);
        assert!(model.prompts()[0].contains("No description"));
    }

    #[tokio::test]
    async fn large_library_with_no_selection_stops() {
        let env = TestEnv::new();
        for name in ["a", "b", "c", "d"] {
            env.library.save_outline(name, &outline(name, Some("desc"))).unwrap();
        }
        let model = Arc::new(ScriptedModel::with_responses(&["not json at all"]));

        let answer = search(&env, model.clone()).answer("q").await.unwrap();
        assert_eq!(answer.outcome, QueryOutcome::NoRelevantDocuments);
        assert_eq!(model.prompts().len(), 1);
    }

    #[tokio::test]
    async fn selection_matches_files_stems_and_names() {
        let env = TestEnv::new();
        for name in ["a", "b", "c", "d"] {
            env.library.save_outline(name, &outline(name, None)).unwrap();
        }
        let docs = env.library.load_all().unwrap();
        let model = Arc::new(ScriptedModel::with_responses(&[
            "```json\n{\"relevant_docs\": [\"b_structure.json\", \"d\", \"zzz\"]}\n```",
        ]));

        let outcome = search(&env, model)
            .select_documents("q", &docs)
            .await
            .unwrap();
        assert_eq!(outcome, SelectionOutcome::Selected(vec![1, 3]));
    }

    #[tokio::test]
    async fn fenced_tree_search_reply_is_parsed() {
        let env = TestEnv::new();
        let model = Arc::new(ScriptedModel::with_responses(&[
            "```json\n{\"thinking\":\"x\",\"node_list\":[\"n1\"]}\n```",
        ]));

        let result = search(&env, model).search_tree("q", &[]).await.unwrap();
        assert_eq!(result.node_list, vec!["n1".to_string()]);
        assert_eq!(result.thinking, "x");
    }

    #[tokio::test]
    async fn tree_search_failure_yields_diagnostic() {
        let env = TestEnv::new();
        let model = Arc::new(ScriptedModel::with_responses(&["{ broken"]));

        let result = search(&env, model).search_tree("q", &[]).await.unwrap();
        assert!(result.node_list.is_empty());
        assert!(result.thinking.starts_with("Could not parse"));
    }

    #[tokio::test]
    async fn tree_prompt_omits_section_text() {
        let env = TestEnv::new();
        let doc = scenario_outline();
        env.library.save_outline("A", &doc).unwrap();
        let model = Arc::new(ScriptedModel::with_responses(&[
            r#"{"relevant_docs": ["A"]}"#,
            r#"{"thinking": "details hold it", "node_list": ["0002", "missing"]}"#,
            "42",
        ]));

        let answer = search(&env, model.clone()).answer("what is the answer").await.unwrap();

        let prompts = model.prompts();
        assert!(!prompts[1].contains("the answer is 42"));
        assert!(prompts[2].contains("--- Document: A, Section: Details ---\nthe answer is 42"));
        assert_eq!(answer.sources, vec!["[A] Details (page ?)".to_string()]);
    }

    #[tokio::test]
    async fn failed_selection_call_counts_as_empty_selection() {
        let env = TestEnv::new();
        for name in ["alpha", "beta"] {
            env.library.save_outline(name, &outline(name, None)).unwrap();
        }
        let docs = env.library.load_all().unwrap();

        let model = Arc::new(ScriptedModel::new());
        model.push_error("connection refused");
        let outcome = search(&env, model.clone())
            .select_documents("q", &docs)
            .await
            .unwrap();
        assert_eq!(outcome, SelectionOutcome::AllByDefault);
        assert_eq!(model.prompts().len(), 1);

        let model = Arc::new(ScriptedModel::new());
        model.push_error("connection refused");
        model.push(r#"{"thinking": "alpha", "node_list": ["n1"]}"#);
        model.push(r#"{"thinking": "beta", "node_list": ["n1"]}"#);
        model.push("from both");
        let answer = search(&env, model.clone()).answer("q").await.unwrap();
        assert_eq!(answer.outcome, QueryOutcome::Answered);
        assert_eq!(answer.answer, "from both");
        assert_eq!(answer.sources.len(), 2);
    }

    #[tokio::test]
    async fn failed_selection_call_in_large_library_finds_nothing() {
        let env = TestEnv::new();
        for name in ["a", "b", "c", "d"] {
            env.library.save_outline(name, &outline(name, None)).unwrap();
        }
        let docs = env.library.load_all().unwrap();
        let model = Arc::new(ScriptedModel::new());
        model.push_error("timeout");

        let outcome = search(&env, model)
            .select_documents("q", &docs)
            .await
            .unwrap();
        assert_eq!(outcome, SelectionOutcome::NoneRelevant);
    }

    #[tokio::test]
    async fn nothing_recovered_skips_synthesis() {
        let env = TestEnv::new();
        env.library.save_outline("a", &outline("a", None)).unwrap();
        let model = Arc::new(ScriptedModel::with_responses(&[
            r#"{"relevant_docs": ["a"]}"#,
            r#"{"thinking": "", "node_list": []}"#,
        ]));

        let answer = search(&env, model.clone()).answer("q").await.unwrap();
        assert_eq!(answer.outcome, QueryOutcome::NoUsableContent);
        assert_eq!(model.prompts().len(), 2);
    }
}
