// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! OpenRouter task extraction adapter.
//!
//! [`OpenRouterExtractor`] implements [`Extractor`] by asking a chat model to
//! turn a batch's text into a JSON task list.

pub mod client;
pub mod parse;
pub mod types;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use todobot_config::model::OpenRouterConfig;
use todobot_core::{Extractor, Stage, TaskItem, TodobotError};

use crate::client::OpenRouterClient;
use crate::parse::parse_tasks;
use crate::types::{ChatMessage, ChatRequest, ResponseFormat};

const SYSTEM_PROMPT: &str = "You turn chat messages into a todo list. \
Each line of the user's text may hold zero, one or several tasks. \
Reply with a JSON object only, no prose: \
{\"tasks\":[{\"title\":\"...\",\"due_date\":\"YYYY-MM-DD\",\"notes\":\"...\"}]}. \
`title` is a short imperative phrase. Omit `due_date` and `notes` when the text \
does not give them. Resolve relative dates against today's date. \
Reply {\"tasks\":[]} when there is nothing to do.";

/// Extracts tasks through an OpenRouter-hosted chat model.
///
/// API key resolution order: config -> `OPENROUTER_API_KEY` env var -> error.
pub struct OpenRouterExtractor {
    client: OpenRouterClient,
    model: String,
}

impl OpenRouterExtractor {
    pub fn new(config: &OpenRouterConfig) -> Result<Self, TodobotError> {
        let api_key = resolve_api_key(&config.api_key)?;
        let client = OpenRouterClient::new(&api_key, config.base_url.clone())?;
        info!(model = %config.model, "OpenRouter extractor initialized");
        Ok(Self {
            client,
            model: config.model.clone(),
        })
    }

    fn to_request(&self, text: &str) -> ChatRequest {
        let today = Utc::now().format("%Y-%m-%d");
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(format!("{SYSTEM_PROMPT} Today is {today}.")),
                ChatMessage::user(text),
            ],
            temperature: 0.0,
            response_format: Some(ResponseFormat::json_object()),
        }
    }
}

#[async_trait]
impl Extractor for OpenRouterExtractor {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn extract(&self, text: &str) -> Result<Vec<TaskItem>, TodobotError> {
        let response = self.client.complete(&self.to_request(text)).await?;

        let Some(choice) = response.choices.into_iter().next() else {
            // An empty choice list is how OpenRouter reports an upstream
            // provider hiccup.
            return Err(TodobotError::transient(
                Stage::Extraction,
                "model returned no choices",
            ));
        };

        let content = choice.message.content.unwrap_or_default();
        if content.trim().is_empty() {
            warn!(
                finish_reason = choice.finish_reason.as_deref().unwrap_or("unknown"),
                "model returned empty content"
            );
            return Err(TodobotError::permanent(
                Stage::Extraction,
                format!(
                    "model returned empty content (finish_reason: {})",
                    choice.finish_reason.as_deref().unwrap_or("unknown")
                ),
            ));
        }

        let tasks = parse_tasks(&content)?;
        debug!(count = tasks.len(), "tasks extracted");
        Ok(tasks)
    }
}

fn resolve_api_key(config_key: &Option<String>) -> Result<String, TodobotError> {
    if let Some(key) = config_key
        && !key.is_empty()
    {
        return Ok(key.clone());
    }

    std::env::var("OPENROUTER_API_KEY").map_err(|_| {
        TodobotError::Config(
            "OpenRouter API key not found. Set openrouter.api_key in config or OPENROUTER_API_KEY environment variable.".into(),
        )
    })
}
