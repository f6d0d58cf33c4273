//! Tools the assistant can call while answering a question.
//!
//! Each [`Tool`] advertises an OpenAI function-calling schema and executes
//! against a shared [`ToolContext`]. The [`ToolRegistry`] holds the set
//! offered to the model.
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  ToolRegistry                    │
//! │ search_regulations  get_restaurants  web_search  │
//! │ download                                         │
//! └──────────────────────┬───────────────────────────┘
//!                        ▼
//!            agent loop → chat completions
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::llm::ToolSpec;
use crate::regulations::RegulationService;
use crate::restaurants::RestaurantService;
use crate::web::{download_snippet, TavilyClient};

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier with underscores, used as the function name.
    fn name(&self) -> &str;

    /// One-line description the model uses to decide whether to call it.
    fn description(&self) -> &str;

    /// JSON Schema (`type: "object"`) of the arguments.
    fn parameters_schema(&self) -> Value;

    /// Runs the tool. The returned text is handed back to the model.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String>;
}

/// Services available to tools during execution.
pub struct ToolContext {
    pub regulations: Arc<RegulationService>,
    pub restaurants: Arc<RestaurantService>,
    pub tavily: Option<Arc<TavilyClient>>,
    pub browser: reqwest::Client,
}

fn string_param(params: &Value, key: &str) -> Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("missing required string parameter '{}'", key))
}

fn single_string_schema(key: &str, description: &str) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert(
        key.to_string(),
        serde_json::json!({ "type": "string", "description": description }),
    );
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": [key]
    })
}

pub struct SearchRegulationsTool;

#[async_trait]
impl Tool for SearchRegulationsTool {
    fn name(&self) -> &str {
        "search_regulations"
    }
    fn description(&self) -> &str {
        "Summarize MA restaurant regulations"
    }
    fn parameters_schema(&self) -> Value {
        single_string_schema("query", "What to look up in the regulations")
    }
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let query = string_param(&params, "query")?;
        Ok(ctx.regulations.search_regulations(&query).await)
    }
}

pub struct GetRestaurantsTool;

#[async_trait]
impl Tool for GetRestaurantsTool {
    fn name(&self) -> &str {
        "get_restaurants"
    }
    fn description(&self) -> &str {
        "Fetch restaurant data by ZIP"
    }
    fn parameters_schema(&self) -> Value {
        single_string_schema("zip_code", "Five-digit US ZIP code")
    }
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let zip = string_param(&params, "zip_code")?;
        Ok(ctx.restaurants.format_for_agent(&zip).await)
    }
}

pub struct WebSearchTool;

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }
    fn description(&self) -> &str {
        "Search external info"
    }
    fn parameters_schema(&self) -> Value {
        single_string_schema("query", "Web search query")
    }
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let query = string_param(&params, "query")?;
        let tavily = ctx
            .tavily
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("web search is not configured (TAVILY_API_KEY)"))?;
        tavily.search(&query).await
    }
}

pub struct DownloadTool;

#[async_trait]
impl Tool for DownloadTool {
    fn name(&self) -> &str {
        "download"
    }
    fn description(&self) -> &str {
        "Download webpage content snippet"
    }
    fn parameters_schema(&self) -> Value {
        single_string_schema("url", "Absolute URL of the page")
    }
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let url = string_param(&params, "url")?;
        Ok(download_snippet(&ctx.browser, &url).await)
    }
}

/// Registry of tools offered to the model.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry pre-loaded with the four assistant tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchRegulationsTool));
        registry.register(Box::new(GetRestaurantsTool));
        registry.register(Box::new(WebSearchTool));
        registry.register(Box::new(DownloadTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Function-calling definitions for every registered tool.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| ToolSpec::function(t.name(), t.description(), t.parameters_schema()))
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
