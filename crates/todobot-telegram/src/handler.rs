// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authorization filtering, message mapping, and acknowledgement texts.
//!
//! Decides whether an incoming Telegram message may enter the queue and
//! turns it into a transport-agnostic [`InboundMessage`].

use teloxide::types::{ChatKind, Message};

use todobot_core::{InboundMessage, TodobotError};
use todobot_queue::AddOutcome;

pub const ACK_QUEUED: &str = "Got it, noted.";
pub const ACK_FLUSHED: &str = "Got it. Sending this batch to your list now.";
pub const ACK_SHUTTING_DOWN: &str =
    "I'm restarting right now. Please send that again in a minute.";
pub const ACK_FAILED: &str = "Sorry, I couldn't save that. Please try again.";

/// Checks whether the message sender is authorized.
///
/// Authorization passes if the sender's user ID (as string) or username
/// matches any entry in the `allowed_users` list. If `allowed_users` is
/// empty, all messages are rejected.
///
/// Messages without a sender (e.g., channel posts) always return `false`.
pub fn is_authorized(msg: &Message, allowed_users: &[String]) -> bool {
    if allowed_users.is_empty() {
        return false;
    }

    let Some(user) = msg.from.as_ref() else {
        return false;
    };

    let user_id = user.id.0.to_string();
    allowed_users.iter().any(|allowed| {
        if *allowed == user_id {
            return true;
        }
        let allowed = allowed.strip_prefix('@').unwrap_or(allowed);
        user.username
            .as_deref()
            .is_some_and(|username| username.eq_ignore_ascii_case(allowed))
    })
}

/// Group, supergroup, and channel messages return `false`.
pub fn is_private(msg: &Message) -> bool {
    matches!(msg.chat.kind, ChatKind::Private(_))
}

/// Map a text message to an [`InboundMessage`] keyed by chat id.
///
/// Returns `None` for non-text messages and for text that is blank after
/// trimming.
pub fn to_inbound(msg: &Message) -> Option<InboundMessage> {
    let text = msg.text()?.trim();
    if text.is_empty() {
        return None;
    }
    Some(InboundMessage {
        conversation_id: msg.chat.id.0.to_string(),
        text: text.to_string(),
        received_at: msg.date,
    })
}

/// Reply sent back to the user for an intake result.
pub fn ack_text(result: &Result<AddOutcome, TodobotError>) -> &'static str {
    match result {
        Ok(outcome) if outcome.flushed => ACK_FLUSHED,
        Ok(_) => ACK_QUEUED,
        Err(TodobotError::ShuttingDown) => ACK_SHUTTING_DOWN,
        Err(_) => ACK_FAILED,
    }
}

/// Reject tokens that cannot be a Bot API token (`<bot id>:<secret>`)
/// before the dispatcher starts polling with them.
pub fn validate_token(token: &str) -> Result<(), TodobotError> {
    let Some((bot_id, secret)) = token.split_once(':') else {
        return Err(TodobotError::Config(
            "telegram.bot_token must look like <bot id>:<secret>".into(),
        ));
    };
    if bot_id.is_empty() || !bot_id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TodobotError::Config(
            "telegram.bot_token bot id must be numeric".into(),
        ));
    }
    if secret.len() < 20
        || !secret
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(TodobotError::Config(
            "telegram.bot_token secret is malformed".into(),
        ));
    }
    Ok(())
}
