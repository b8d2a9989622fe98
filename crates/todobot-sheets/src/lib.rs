// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Google Sheets delivery sink.
//!
//! [`AppsScriptSink`] POSTs each batch to a deployed Apps Script web app.
//! The script appends one row per task and remembers the `batch_id` of every
//! append, so a batch sent twice after a crash lands once.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use todobot_config::model::SheetsConfig;
use todobot_core::{Stage, TaskItem, TaskSink, TodobotError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Body sent to the script.
#[derive(Debug, Serialize)]
struct AppendRequest<'a> {
    batch_id: &'a str,
    tasks: &'a [TaskItem],
}

/// Body the script answers with.
#[derive(Debug, Deserialize)]
struct AppendResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    appended: Option<usize>,
}

pub struct AppsScriptSink {
    client: reqwest::Client,
    script_url: String,
}

impl AppsScriptSink {
    pub fn new(config: &SheetsConfig) -> Result<Self, TodobotError> {
        let script_url = config
            .script_url
            .clone()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| TodobotError::Config("sheets.script_url is not set".into()))?;

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TodobotError::Config(format!("failed to build HTTP client: {e}")))?;

        info!("Apps Script sink initialized");
        Ok(Self { client, script_url })
    }
}

#[async_trait]
impl TaskSink for AppsScriptSink {
    fn name(&self) -> &str {
        "sheets"
    }

    async fn append(&self, batch_id: &str, items: &[TaskItem]) -> Result<(), TodobotError> {
        let response = self
            .client
            .post(&self.script_url)
            .json(&AppendRequest {
                batch_id,
                tasks: items,
            })
            .send()
            .await
            .map_err(|e| {
                TodobotError::transient(Stage::Delivery, format!("HTTP request failed: {e}"))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            TodobotError::transient(Stage::Delivery, format!("failed to read response body: {e}"))
        })?;
        debug!(batch_id, status = %status, "append response received");

        if !status.is_success() {
            return Err(TodobotError::from_http_status(
                Stage::Delivery,
                status.as_u16(),
                body.trim(),
            ));
        }

        let reply: AppendResponse = serde_json::from_str(&body).map_err(|_| {
            // Apps Script serves an HTML error page when the script itself
            // throws; the append may or may not have happened.
            TodobotError::transient(
                Stage::Delivery,
                format!(
                    "unexpected response from script: {}",
                    body.chars().take(120).collect::<String>()
                ),
            )
        })?;

        match reply.status.as_str() {
            "ok" => {
                debug!(batch_id, appended = reply.appended.unwrap_or(items.len()), "rows appended");
                Ok(())
            }
            "duplicate" => {
                warn!(batch_id, "script already holds this batch, skipped append");
                Ok(())
            }
            "error" => Err(TodobotError::permanent(
                Stage::Delivery,
                reply.message.unwrap_or_else(|| "script reported an error".into()),
            )),
            other => Err(TodobotError::transient(
                Stage::Delivery,
                format!("unknown script status: {other}"),
            )),
        }
    }
}
