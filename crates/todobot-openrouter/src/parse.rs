// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lenient parsing of the model's task list.
//!
//! Models asked for JSON still wrap it in markdown fences or surround it with
//! prose often enough that the reply is trimmed down to the outermost JSON
//! value before deserializing.

use todobot_core::{Stage, TaskItem, TodobotError};

use crate::types::ExtractedTasks;

/// Parse a model reply into task items.
///
/// Accepts `{"tasks":[...]}` or a bare array, optionally fenced. Items with a
/// blank title are dropped. Anything else is a permanent error: the same
/// input would produce the same unusable output again.
pub fn parse_tasks(content: &str) -> Result<Vec<TaskItem>, TodobotError> {
    let body = strip_code_fence(content.trim());
    let json = outermost_json(body).ok_or_else(|| {
        TodobotError::permanent(
            Stage::Extraction,
            format!("model reply is not JSON: {}", preview(content)),
        )
    })?;

    let tasks = if json.starts_with('[') {
        serde_json::from_str::<Vec<TaskItem>>(json)
    } else {
        serde_json::from_str::<ExtractedTasks>(json).map(|t| t.tasks)
    }
    .map_err(|e| {
        TodobotError::permanent(
            Stage::Extraction,
            format!("model reply has unexpected shape: {e}"),
        )
    })?;

    Ok(tasks
        .into_iter()
        .filter_map(|mut task| {
            task.title = task.title.trim().to_string();
            (!task.title.is_empty()).then_some(task)
        })
        .collect())
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string ("json") on the opening line.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

fn outermost_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(80).collect();
    if text.chars().count() > 80 {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titles(items: &[TaskItem]) -> Vec<&str> {
        items.iter().map(|i| i.title.as_str()).collect()
    }

    #[test]
    fn plain_object() {
        let items = parse_tasks(r#"{"tasks":[{"title":"buy milk"},{"title":"call mom"}]}"#).unwrap();
        assert_eq!(titles(&items), vec!["buy milk", "call mom"]);
    }

    #[test]
    fn fenced_object_with_optional_fields() {
        let reply = "```json\n{\"tasks\":[{\"title\":\"pay rent\",\"due_date\":\"2026-11-01\",\"notes\":\"landlord\"}]}\n```";
        let items = parse_tasks(reply).unwrap();
        assert_eq!(items[0].title, "pay rent");
        assert_eq!(items[0].due_date.as_deref(), Some("2026-11-01"));
        assert_eq!(items[0].notes.as_deref(), Some("landlord"));
    }

    #[test]
    fn bare_array_inside_prose() {
        let reply = "Here you go:\n[{\"title\":\"water plants\"}]\nAnything else?";
        assert_eq!(titles(&parse_tasks(reply).unwrap()), vec!["water plants"]);
    }

    #[test]
    fn empty_task_list_is_valid() {
        assert!(parse_tasks(r#"{"tasks":[]}"#).unwrap().is_empty());
        assert!(parse_tasks("{}").unwrap().is_empty());
    }

    #[test]
    fn blank_titles_are_dropped() {
        let items = parse_tasks(r#"{"tasks":[{"title":"  "},{"title":" call mom "}]}"#).unwrap();
        assert_eq!(titles(&items), vec!["call mom"]);
    }

    #[test]
    fn prose_reply_is_permanent() {
        let err = parse_tasks("I could not find any tasks.").unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("not JSON"));
    }

    #[test]
    fn wrong_shape_is_permanent() {
        let err = parse_tasks(r#"{"tasks":"buy milk"}"#).unwrap_err();
        assert!(!err.is_retryable());
    }
}
