// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the OpenRouter chat-completions API.
//!
//! The client makes exactly one request per call. Retrying is the delivery
//! queue's job, so every failure is returned classified as transient or
//! permanent instead of being retried here.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use tracing::debug;

use todobot_core::{Stage, TodobotError};

use crate::types::{ApiErrorResponse, ChatRequest, ChatResponse};

/// Upper bound on a single request. The queue's attempt deadline is usually
/// shorter and wins.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Maximum response body echoed into an error message.
const MAX_ERROR_BODY: usize = 300;

#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    client: reqwest::Client,
    base_url: String,
}

impl OpenRouterClient {
    pub fn new(api_key: &str, base_url: String) -> Result<Self, TodobotError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|e| TodobotError::Config(format!("invalid API key header value: {e}")))?,
        );
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("x-title", HeaderValue::from_static("todobot"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TodobotError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send one completion request and return the parsed response.
    pub async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, TodobotError> {
        let response = self
            .client
            .post(&self.base_url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                TodobotError::transient(Stage::Extraction, format!("HTTP request failed: {e}"))
            })?;

        let status = response.status();
        debug!(status = %status, model = %request.model, "completion response received");

        let body = response.text().await.map_err(|e| {
            TodobotError::transient(
                Stage::Extraction,
                format!("failed to read response body: {e}"),
            )
        })?;

        if !status.is_success() {
            let detail = match serde_json::from_str::<ApiErrorResponse>(&body) {
                Ok(api_err) => api_err.error.message,
                Err(_) => truncate(&body),
            };
            return Err(TodobotError::from_http_status(
                Stage::Extraction,
                status.as_u16(),
                &detail,
            ));
        }

        serde_json::from_str::<ChatResponse>(&body).map_err(|e| {
            TodobotError::permanent(
                Stage::Extraction,
                format!("failed to parse API response: {e}"),
            )
        })
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY).collect()
}
