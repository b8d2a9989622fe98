// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Telegram chat transport for todobot.
//!
//! Long-polls the Bot API via teloxide, filters messages by chat type and
//! authorization, and hands each text message to the [`QueueManager`].

pub mod handler;

use std::sync::Arc;

use teloxide::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use todobot_config::model::TelegramConfig;
use todobot_core::TodobotError;
use todobot_queue::QueueManager;

const HELP_TEXT: &str = "Send me your todos as plain messages. \
I collect messages sent close together into one batch and add the tasks to your sheet.";

/// Telegram long-polling transport feeding the delivery queue.
pub struct TelegramTransport {
    bot: Bot,
    allowed_users: Arc<Vec<String>>,
}

impl TelegramTransport {
    /// Requires `config.bot_token` to be set and well formed.
    pub fn new(config: &TelegramConfig) -> Result<Self, TodobotError> {
        let token = config.bot_token.as_deref().ok_or_else(|| {
            TodobotError::Config("telegram.bot_token is required for the Telegram transport".into())
        })?;
        handler::validate_token(token)?;

        if config.allowed_users.is_empty() {
            warn!("telegram.allowed_users is empty, every message will be ignored");
        }

        Ok(Self {
            bot: Bot::new(token),
            allowed_users: Arc::new(config.allowed_users.clone()),
        })
    }

    /// Poll until `cancel` fires, then stop the dispatcher and return.
    ///
    /// The queue manager is not shut down here; the caller owns its
    /// lifecycle.
    pub async fn run(self, manager: QueueManager, cancel: CancellationToken) {
        let allowed_users = self.allowed_users;

        let endpoint = Update::filter_message().endpoint(move |bot: Bot, msg: Message| {
            let manager = manager.clone();
            let allowed = Arc::clone(&allowed_users);
            async move {
                if !handler::is_private(&msg) {
                    debug!(chat_id = msg.chat.id.0, "ignoring non-private chat");
                    return respond(());
                }
                if !handler::is_authorized(&msg, &allowed) {
                    debug!(chat_id = msg.chat.id.0, "ignoring unauthorized user");
                    return respond(());
                }

                if matches!(msg.text(), Some("/start" | "/help")) {
                    reply(&bot, &msg, HELP_TEXT).await;
                    return respond(());
                }

                let Some(inbound) = handler::to_inbound(&msg) else {
                    debug!(msg_id = msg.id.0, "ignoring unsupported message type");
                    return respond(());
                };

                let result = manager.add(inbound).await;
                if let Err(ref e) = result
                    && !matches!(e, TodobotError::ShuttingDown)
                {
                    warn!(chat_id = msg.chat.id.0, error = %e, "failed to queue message");
                }
                reply(&bot, &msg, handler::ack_text(&result)).await;
                respond(())
            }
        });

        let mut dispatcher = Dispatcher::builder(self.bot, endpoint)
            .default_handler(|_| async {})
            .build();

        let shutdown = dispatcher.shutdown_token();
        tokio::spawn(async move {
            cancel.cancelled().await;
            match shutdown.shutdown() {
                Ok(stopped) => stopped.await,
                Err(_) => debug!("dispatcher was not running at shutdown"),
            }
        });

        info!("starting Telegram long polling");
        dispatcher.dispatch().await;
        info!("Telegram long polling stopped");
    }
}

async fn reply(bot: &Bot, msg: &Message, text: &str) {
    if let Err(e) = bot.send_message(msg.chat.id, text).await {
        warn!(chat_id = msg.chat.id.0, error = %e, "failed to send reply");
    }
}
