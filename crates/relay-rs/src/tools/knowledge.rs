//! The `wolfram_alpha` tool: factual and computational queries against the
//! Wolfram Alpha v2 query API.

use super::args::{opt_bool, parse_args};
use super::core::{Tool, ToolArgs, ToolFuture};
use super::rate_limit::RateLimit;
use crate::error::ToolError;
use crate::{ToolDef, json_schema_for};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    pub app_id: Option<String>,
    pub base_url: String,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            base_url: "https://api.wolframalpha.com/v2/query".into(),
        }
    }
}

#[derive(Deserialize, JsonSchema)]
struct KnowledgeArgs {
    /// The query to send, e.g. 'mass of earth', 'solve x^2 + 2x - 3 = 0', 'population of France'.
    query: String,
    /// Preferred unit system: 'metric' (default) or 'imperial'.
    #[serde(default)]
    units: Option<String>,
    /// Include the structured pods alongside the flattened texts (default true).
    #[serde(default, deserialize_with = "opt_bool")]
    #[schemars(with = "Option<bool>")]
    include_pods: Option<bool>,
}

// ── Wire format (output=json) ──────────────────────────────────────

#[derive(Deserialize)]
struct Envelope {
    queryresult: QueryResult,
}

#[derive(Deserialize)]
struct QueryResult {
    #[serde(default)]
    success: bool,
    /// `false`, or an object with a `msg`.
    #[serde(default)]
    error: Value,
    #[serde(default)]
    pods: Vec<RawPod>,
}

#[derive(Deserialize)]
struct RawPod {
    #[serde(default)]
    title: String,
    #[serde(default)]
    subpods: Vec<RawSubpod>,
}

#[derive(Deserialize)]
struct RawSubpod {
    #[serde(default)]
    title: String,
    #[serde(default)]
    plaintext: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Pod {
    pub title: String,
    pub subpods: Vec<Subpod>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Subpod {
    pub title: String,
    pub text: String,
}

/// Non-empty pods plus one `"Pod: text"` line per subpod.
fn flatten(pods: Vec<RawPod>) -> (Vec<Pod>, Vec<String>) {
    let mut texts = Vec::new();
    let pods = pods
        .into_iter()
        .filter_map(|pod| {
            let subpods: Vec<Subpod> = pod
                .subpods
                .into_iter()
                .filter_map(|sp| {
                    let text = sp.plaintext?.trim().to_string();
                    (!text.is_empty()).then_some(Subpod {
                        title: sp.title,
                        text,
                    })
                })
                .collect();
            if subpods.is_empty() {
                return None;
            }
            texts.extend(subpods.iter().map(|sp| format!("{}: {}", pod.title, sp.text)));
            Some(Pod {
                title: pod.title,
                subpods,
            })
        })
        .collect();
    (pods, texts)
}

#[derive(Debug, Clone)]
pub struct KnowledgeTool {
    config: KnowledgeConfig,
    client: reqwest::Client,
}

impl KnowledgeTool {
    pub fn new(config: KnowledgeConfig) -> Self {
        Self {
            config,
            client: super::http_client(),
        }
    }

    async fn query(&self, app_id: &str, query: &str, units: &str) -> Result<QueryResult, ToolError> {
        let url = reqwest::Url::parse_with_params(
            &self.config.base_url,
            &[
                ("input", query),
                ("appid", app_id),
                ("format", "plaintext"),
                ("output", "json"),
                ("units", units),
                ("podtimeout", "2"),
                ("formattimeout", "4"),
            ],
        )
        .map_err(|e| ToolError::Unavailable(format!("invalid Wolfram Alpha URL: {e}")))?;

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ToolError::Unavailable(format!(
                "Wolfram Alpha API returned status code {}",
                status.as_u16()
            )));
        }
        let envelope: Envelope = resp
            .json()
            .await
            .map_err(|e| ToolError::Unavailable(format!("unexpected Wolfram Alpha response: {e}")))?;
        let result = envelope.queryresult;
        if result.error.is_object() || result.error == Value::Bool(true) {
            let msg = result.error["msg"].as_str().unwrap_or("Unknown error");
            return Err(ToolError::Unavailable(format!("Wolfram Alpha error: {msg}")));
        }
        Ok(result)
    }
}

impl Tool for KnowledgeTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "wolfram_alpha",
            "Query Wolfram Alpha for factual information, calculations, or data",
            json_schema_for::<KnowledgeArgs>(),
        )
    }

    fn execute<'a>(&'a self, arguments: &'a ToolArgs) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: KnowledgeArgs = parse_args(arguments)?;
            let query = args.query.trim();
            if query.is_empty() {
                return Err(ToolError::invalid("query must not be empty"));
            }
            let units = match args.units.as_deref().map(str::to_ascii_lowercase).as_deref() {
                Some("imperial") => "imperial",
                _ => "metric",
            };
            info!("Querying Wolfram Alpha: '{query}' (units: {units})");

            let Some(app_id) = self.config.app_id.as_deref().filter(|id| !id.is_empty()) else {
                warn!("No Wolfram Alpha App ID configured, returning fallback");
                return Ok(json!({
                    "query": query,
                    "success": false,
                    "error": "No Wolfram Alpha App ID configured",
                    "pods": [],
                    "texts": [
                        "No Wolfram Alpha App ID configured.",
                        "Set the WOLFRAM_ALPHA_APP_ID environment variable to use this tool.",
                        format!("Your query was: '{query}'"),
                    ],
                }));
            };

            let result = self.query(app_id, query, units).await?;
            let (pods, texts) = flatten(result.pods);
            let mut out = json!({
                "query": query,
                "success": result.success,
                "texts": texts,
                "units": units,
            });
            if args.include_pods.unwrap_or(true) {
                out["pods"] = json!(pods);
            }
            Ok(out)
        })
    }

    fn rate_limit(&self) -> Option<RateLimit> {
        Some(RateLimit::per_minute(5))
    }
}
