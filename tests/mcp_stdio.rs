use std::path::PathBuf;

use rmcp::{
    ServiceExt,
    model::CallToolRequestParams,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::json;

fn call(
    name: &'static str,
    args: serde_json::Value,
) -> CallToolRequestParams {
    let mut params = CallToolRequestParams::new(name);
    params.arguments = args.as_object().cloned();
    params
}

#[tokio::test]
async fn mcp_stdio_empty_library_roundtrip()
-> Result<(), Box<dyn std::error::Error>> {
    let tempdir = tempfile::tempdir()?;

    let bin = pagewise_bin()?;
    let transport = TokioChildProcess::new(
        tokio::process::Command::new(bin).configure(|cmd| {
            cmd.arg("mcp")
                .env("PAGEWISE_DATA_DIR", tempdir.path())
                .env("PAGEWISE_LOG", "warn");
        }),
    )?;

    let client = ().serve(transport).await?;

    let stats = client
        .peer()
        .call_tool(call("pagewise_index_stats", json!({})))
        .await?;
    let stats = stats.structured_content.expect("structured stats");
    assert_eq!(stats["total_nodes"], 0);
    assert_eq!(stats["documents"], json!([]));

    let answer = client
        .peer()
        .call_tool(call(
            "pagewise_query",
            json!({ "query": "what is covered?", "topK": 3 }),
        ))
        .await?;
    let answer = answer.structured_content.expect("structured answer");
    assert!(
        answer["answer"]
            .as_str()
            .is_some_and(|a| a.contains("index is empty"))
    );
    assert_eq!(answer["sources"], json!([]));

    let raw = client
        .peer()
        .call_tool(call("pagewise_query_raw", json!({ "query": "anything" })))
        .await?;
    assert_eq!(raw.is_error, Some(true));
    let raw = raw.structured_content.expect("structured raw results");
    assert_eq!(raw["status"], "error");
    assert_eq!(raw["results"], json!([]));

    client.cancel().await?;
    Ok(())
}

fn pagewise_bin() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(bin) = std::env::var("CARGO_BIN_EXE_pagewise") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("pagewise");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}
