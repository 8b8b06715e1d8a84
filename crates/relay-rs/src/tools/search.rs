//! The `web_search` tool, backed by the Google Custom Search JSON API.
//!
//! Without both an API key and an engine id the tool still answers, with
//! clearly marked simulated results, so prompts that mention search keep
//! working in development.

use super::args::{opt_bool, opt_u32, parse_args};
use super::core::{Tool, ToolArgs, ToolFuture};
use super::rate_limit::RateLimit;
use crate::error::ToolError;
use crate::{ToolDef, json_schema_for};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

const MAX_RESULTS: u32 = 10;
const DEFAULT_RESULTS: u32 = 3;
const MAX_SIMULATED: usize = 3;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub api_key: Option<String>,
    pub engine_id: Option<String>,
    pub base_url: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            engine_id: None,
            base_url: "https://www.googleapis.com/customsearch/v1".into(),
        }
    }
}

#[derive(Deserialize, JsonSchema)]
struct SearchArgs {
    /// The search query to look up information for.
    query: String,
    /// Number of search results to return (1-10, default 3).
    #[serde(default, deserialize_with = "opt_u32")]
    #[schemars(with = "Option<u32>")]
    num_results: Option<u32>,
    /// Whether to enable safe search filtering (default true).
    #[serde(default, deserialize_with = "opt_bool")]
    #[schemars(with = "Option<bool>")]
    safe_search: Option<bool>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    pub snippet: String,
    pub source: String,
}

#[derive(Deserialize)]
struct CustomSearchResponse {
    #[serde(default)]
    items: Vec<CustomSearchItem>,
}

#[derive(Deserialize)]
struct CustomSearchItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

#[derive(Debug, Clone)]
pub struct SearchTool {
    config: SearchConfig,
    client: reqwest::Client,
}

impl SearchTool {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            config,
            client: super::http_client(),
        }
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        let key = self.config.api_key.as_deref().filter(|k| !k.is_empty())?;
        let cx = self.config.engine_id.as_deref().filter(|k| !k.is_empty())?;
        Some((key, cx))
    }

    async fn search(
        &self,
        key: &str,
        cx: &str,
        query: &str,
        num: u32,
        safe: bool,
    ) -> Result<Vec<SearchHit>, ToolError> {
        let url = reqwest::Url::parse_with_params(
            &self.config.base_url,
            &[
                ("key", key),
                ("cx", cx),
                ("q", query),
                ("num", num.to_string().as_str()),
                ("safe", if safe { "active" } else { "off" }),
            ],
        )
        .map_err(|e| ToolError::Unavailable(format!("invalid search API URL: {e}")))?;

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ToolError::Unavailable(format!(
                "Search API returned status code {}: {text}",
                status.as_u16()
            )));
        }
        let data: CustomSearchResponse = resp
            .json()
            .await
            .map_err(|e| ToolError::Unavailable(format!("unexpected search API response: {e}")))?;

        Ok(data
            .items
            .into_iter()
            .map(|item| SearchHit {
                title: item.title,
                link: item.link,
                snippet: item.snippet,
                source: "Google Custom Search".into(),
            })
            .collect())
    }
}

impl Tool for SearchTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "web_search",
            "Search the web for real-time information on a given query",
            json_schema_for::<SearchArgs>(),
        )
    }

    fn execute<'a>(&'a self, arguments: &'a ToolArgs) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: SearchArgs = parse_args(arguments)?;
            let query = args.query.trim();
            if query.is_empty() {
                return Err(ToolError::invalid("query must not be empty"));
            }
            let num = args.num_results.unwrap_or(DEFAULT_RESULTS).clamp(1, MAX_RESULTS);
            let safe = args.safe_search.unwrap_or(true);
            info!("Searching for: '{query}' (max results: {num})");

            match self.credentials() {
                Some((key, cx)) => {
                    let results = self.search(key, cx, query, num, safe).await?;
                    Ok(json!({
                        "query": query,
                        "num_results": results.len(),
                        "results": results,
                        "simulated": false,
                    }))
                }
                None => {
                    warn!("No search API keys configured, returning simulated results");
                    let results = simulated_results(query, num);
                    Ok(json!({
                        "query": query,
                        "num_results": results.len(),
                        "results": results,
                        "simulated": true,
                    }))
                }
            }
        })
    }

    fn rate_limit(&self) -> Option<RateLimit> {
        Some(RateLimit::per_minute(10))
    }
}

fn simulated_results(query: &str, num: u32) -> Vec<SearchHit> {
    let link_query = query.replace(' ', "+");
    (1..=(num as usize).min(MAX_SIMULATED))
        .map(|i| SearchHit {
            title: format!("Search result for: {query} (#{i})"),
            link: format!("https://example.com/search?q={link_query}"),
            snippet: format!(
                "This is a simulated search result for '{query}'. Configure SEARCH_API_KEY and \
                 SEARCH_ENGINE_ID to enable real search."
            ),
            source: "Simulated Search".into(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn args(v: Value) -> ToolArgs {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn simulated_without_keys() {
        let tool = SearchTool::new(SearchConfig::default());
        let result = tool
            .execute(&args(json!({"query": "rust async", "num_results": 8})))
            .await
            .unwrap();
        assert_eq!(result["simulated"], true);
        assert_eq!(result["num_results"], 3);
        assert_eq!(
            result["results"][0]["link"],
            "https://example.com/search?q=rust+async"
        );
    }

    #[tokio::test]
    async fn real_search_passes_parameters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("key", "k"))
            .and(query_param("cx", "engine"))
            .and(query_param("q", "tokio"))
            .and(query_param("num", "10"))
            .and(query_param("safe", "off"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"title": "Tokio", "link": "https://tokio.rs", "snippet": "An async runtime"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tool = SearchTool::new(SearchConfig {
            api_key: Some("k".into()),
            engine_id: Some("engine".into()),
            base_url: server.uri(),
        });
        let result = tool
            .execute(&args(json!({"query": "tokio", "num_results": "25", "safe_search": "false"})))
            .await
            .unwrap();
        assert_eq!(result["simulated"], false);
        assert_eq!(result["results"][0]["title"], "Tokio");
        assert_eq!(result["results"][0]["source"], "Google Custom Search");
    }

    #[tokio::test]
    async fn api_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("quota"))
            .mount(&server)
            .await;
        let tool = SearchTool::new(SearchConfig {
            api_key: Some("k".into()),
            engine_id: Some("engine".into()),
            base_url: server.uri(),
        });
        let err = tool
            .execute(&args(json!({"query": "anything"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Search API returned status code 403: quota");
    }
}
