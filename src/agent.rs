//! Restaurant business assistant behind `/qn_agent`.
//!
//! A function-calling loop: the model either answers or asks for tools from
//! the [`ToolRegistry`]; tool output goes back as observations until it
//! answers, the iteration cap is hit, or the time budget runs out.

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::AgentConfig;
use crate::llm::{ChatMessage, ChatModel, ChatRequest, ToolCall};
use crate::models::Restaurant;
use crate::traits::{ToolContext, ToolRegistry};

pub const STOPPED_ANSWER: &str = "Agent stopped due to iteration limit or time limit.";

const GLOBAL_SYSTEM_PROMPT: &str = "You are a Massachusetts Restaurant Business Assistant:
- Always provide very detailed, multi-paragraph answers with headings and bullet points where appropriate.
- For competitive analysis, deeply analyze local restaurant data provided.
- For a business plan request, produce a comprehensive, step-by-step plan including:
  - Massachusetts regulations (in simple terms)
  - Menu suggestions
  - Local market insights from provided data
  - Step-by-step guide to setting up
- For normal queries, provide detailed and helpful responses.
- If the query is out-of-scope, politely refuse.
- Use tools if needed, never mention them to the user.
- If stuck, finalize with the best info you have.
- Always summarize the answer at put that the end.";

/// Builds the assistant input from the dashboard request.
pub fn build_prompt(zip_code: &str, restaurants: &[Restaurant], question: &str) -> String {
    let mut context = String::from("Local Restaurants Data:\n");
    for r in restaurants.iter().take(10) {
        context.push_str(&format!(
            "- {} (Rating: {}, Cuisine: {}, Website: {})\n",
            r.name.as_deref().unwrap_or("N/A"),
            r.rating.map_or_else(|| "N/A".to_string(), |v| v.to_string()),
            r.cuisine_types.join(", "),
            r.website.as_deref().unwrap_or("N/A"),
        ));
    }
    format!(
        "{}\n\nZIP Code: {}\n\n{}\nUser Query: {}",
        GLOBAL_SYSTEM_PROMPT, zip_code, context, question
    )
}

pub struct Assistant {
    chat: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    ctx: Arc<ToolContext>,
    model: String,
    config: AgentConfig,
}

impl Assistant {
    pub fn new(
        chat: Arc<dyn ChatModel>,
        tools: Arc<ToolRegistry>,
        ctx: Arc<ToolContext>,
        model: impl Into<String>,
        config: AgentConfig,
    ) -> Self {
        Self {
            chat,
            tools,
            ctx,
            model: model.into(),
            config,
        }
    }

    /// Runs the loop. A failing completion call is an error; tool failures
    /// are reported to the model as observations.
    pub async fn run(&self, prompt: &str) -> Result<String> {
        let deadline = Instant::now() + Duration::from_secs(self.config.max_execution_secs);
        let mut messages = vec![ChatMessage::user(prompt)];

        for iteration in 1..=self.config.max_iterations {
            if Instant::now() >= deadline {
                tracing::warn!(iteration, "agent time budget exhausted");
                break;
            }

            let mut request = ChatRequest::new(self.model.clone(), messages.clone());
            request.tools = self.tools.specs();
            request.temperature = Some(self.config.temperature);
            request.max_tokens = Some(self.config.max_tokens);

            let remaining = deadline.saturating_duration_since(Instant::now());
            let reply = match tokio::time::timeout(remaining, self.chat.complete(&request)).await {
                Ok(reply) => reply?,
                Err(_) => {
                    tracing::warn!(iteration, "agent completion timed out");
                    break;
                }
            };

            if reply.tool_calls.is_empty() {
                return Ok(reply
                    .content
                    .unwrap_or_else(|| "No final answer provided.".to_string()));
            }

            let calls = reply.tool_calls.clone();
            messages.push(reply);
            for call in &calls {
                let observation = self.observe(call).await;
                messages.push(ChatMessage::tool(call.id.clone(), observation));
            }
        }

        Ok(STOPPED_ANSWER.to_string())
    }

    async fn observe(&self, call: &ToolCall) -> String {
        let name = call.function.name.as_str();
        let Some(tool) = self.tools.find(name) else {
            return format!(
                "{} is not a valid tool, try one of [{}].",
                name,
                self.tools.names().join(", ")
            );
        };

        let params: serde_json::Value = if call.function.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            match serde_json::from_str(&call.function.arguments) {
                Ok(v) => v,
                Err(e) => return format!("Invalid arguments for {}: {}", name, e),
            }
        };

        tracing::info!(tool = name, "agent tool call");
        match tool.execute(params, &self.ctx).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "agent tool failed");
                format!("Tool {} failed: {}", name, e)
            }
        }
    }
}
