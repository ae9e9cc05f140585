use std::sync::Arc;

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    context::QueryAnswer,
    error,
    query::{RawResponse, RawStatus},
    services::Services,
};

#[derive(Clone)]
pub struct PagewiseMcpServer {
    services: Arc<Services>,
    tool_router: ToolRouter<Self>,
}

impl PagewiseMcpServer {
    fn new(services: Services) -> Self {
        Self {
            services: Arc::new(services),
            tool_router: Self::tool_router(),
        }
    }

    fn top_k(&self, requested: Option<usize>) -> usize {
        requested
            .filter(|k| *k > 0)
            .unwrap_or(self.services.settings.top_k)
    }
}

#[tool_router(router = tool_router)]
impl PagewiseMcpServer {
    /// Answer a question from the indexed documents.
    #[tool(
        name = "pagewise_query",
        description = "Answer a question from the document library. Retrieves the most similar sections, recovers their text and synthesizes a cited answer. Falls back to an outline search when similarity search finds nothing usable."
    )]
    pub async fn pagewise_query(
        &self,
        params: Parameters<QueryParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let answer = self
            .services
            .ask(
                &params.query,
                self.top_k(params.top_k),
                params.outline.unwrap_or(false),
            )
            .await
            .map_err(|e| mcp_error("query failed", e))?;

        let summary = format_answer(&answer);
        let structured = serde_json::to_value(&answer)
            .map_err(|e| mcp_error("failed to serialize answer", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        result.is_error = Some(false);
        Ok(result)
    }

    /// Retrieve sections without generating an answer.
    #[tool(
        name = "pagewise_query_raw",
        description = "Return the most similar document sections with their recovered text, without generating an answer."
    )]
    pub async fn pagewise_query_raw(
        &self,
        params: Parameters<RawQueryParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let raw = self
            .services
            .query_engine()
            .answer_raw(&params.query, self.top_k(params.top_k))
            .await
            .map_err(|e| mcp_error("raw query failed", e))?;

        let summary = format_raw(&raw);
        let structured = serde_json::to_value(&raw)
            .map_err(|e| mcp_error("failed to serialize results", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        result.is_error = Some(raw.status == RawStatus::Error);
        Ok(result)
    }

    /// Report the size of the similarity index.
    #[tool(
        name = "pagewise_index_stats",
        description = "Show how many sections and documents the similarity index holds."
    )]
    pub async fn pagewise_index_stats(
        &self,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let stats = self
            .services
            .index
            .get_stats()
            .map_err(|e| mcp_error("failed to read index", e))?;

        let summary = format!(
            "{} sections across {} documents",
            stats.total_nodes, stats.total_documents
        );
        let structured = serde_json::to_value(&stats)
            .map_err(|e| mcp_error("failed to serialize stats", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        result.is_error = Some(false);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for PagewiseMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("pagewise", env!("CARGO_PKG_VERSION"))
                    .with_title("pagewise MCP"),
            )
            .with_instructions(
                "Use pagewise_query to answer questions from the document library. Use pagewise_query_raw to inspect the retrieved sections.",
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    /// The question to answer.
    pub query: String,
    /// Number of sections to retrieve (default: the configured top_k).
    pub top_k: Option<usize>,
    /// Search document outlines with the language model instead of the
    /// similarity index.
    pub outline: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RawQueryParams {
    /// The search query.
    pub query: String,
    /// Number of sections to retrieve (default: the configured top_k).
    pub top_k: Option<usize>,
}

fn format_answer(answer: &QueryAnswer) -> String {
    if answer.sources.is_empty() {
        return answer.answer.clone();
    }
    let mut lines = vec![answer.answer.clone(), String::new(), "Sources:".to_string()];
    lines.extend(answer.sources.iter().map(|s| format!("- {s}")));
    lines.join("\n")
}

fn format_raw(raw: &RawResponse) -> String {
    if raw.results.is_empty() {
        return raw.message.clone().unwrap_or_else(|| "No results".to_string());
    }

    let suffix = if raw.results.len() == 1 { "" } else { "s" };
    let mut lines = Vec::with_capacity(raw.results.len() + 1);
    lines.push(format!("Found {} section{suffix}:", raw.results.len()));
    for r in &raw.results {
        lines.push(format!(
            "{:.3} [{}] {} ({})",
            r.score, r.doc_name, r.title, r.node_id
        ));
    }
    lines.join("\n")
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(services: Services) -> error::Result<()> {
    let server = PagewiseMcpServer::new(services);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        settings::{Overrides, Settings},
        testing::{ScriptedModel, TestEnv, scenario_outline},
    };

    fn server(env: &TestEnv, model: Arc<ScriptedModel>) -> PagewiseMcpServer {
        let settings =
            Settings::resolve_with(None, &Overrides::default(), |_| None)
                .unwrap();
        PagewiseMcpServer::new(Services {
            settings,
            index: env.index.clone(),
            library: env.library.clone(),
            resolver: Arc::new(env.resolver()),
            llm: model,
        })
    }

    fn text_of(result: &CallToolResult) -> String {
        result
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn query_tool_returns_structured_answer() {
        let env = TestEnv::new();
        env.add(&scenario_outline()).await;
        let model = Arc::new(ScriptedModel::with_responses(&["It is 42."]));
        let server = server(&env, model);

        let result = server
            .pagewise_query(Parameters(QueryParams {
                query: "what is the answer".to_string(),
                top_k: Some(5),
                outline: None,
            }))
            .await
            .unwrap();

        let structured = result.structured_content.clone().expect("structured");
        assert_eq!(structured["answer"], "It is 42.");
        assert!(!structured["sources"].as_array().unwrap().is_empty());
        assert!(structured.get("outcome").is_none());
        assert!(text_of(&result).contains("Sources:"));
    }

    #[tokio::test]
    async fn raw_tool_flags_empty_index_as_error() {
        let env = TestEnv::new();
        let server = server(&env, Arc::new(ScriptedModel::new()));

        let result = server
            .pagewise_query_raw(Parameters(RawQueryParams {
                query: "q".to_string(),
                top_k: None,
            }))
            .await
            .unwrap();

        assert_eq!(result.is_error, Some(true));
        let structured = result.structured_content.expect("structured");
        assert_eq!(structured["status"], "error");
    }

    #[tokio::test]
    async fn stats_tool_reports_counts() {
        let env = TestEnv::new();
        env.add(&scenario_outline()).await;
        let server = server(&env, Arc::new(ScriptedModel::new()));

        let result = server.pagewise_index_stats().await.unwrap();
        let structured = result.structured_content.clone().expect("structured");
        assert_eq!(structured["total_nodes"], 2);
        assert_eq!(structured["documents"], json!(["A"]));
        assert_eq!(text_of(&result), "2 sections across 1 documents");
    }
}
