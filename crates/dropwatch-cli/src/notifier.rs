//! Telegram notifications for successful ingests.
//!
//! Uses the Bot API `sendMessage` method. Delivery is best-effort: failures
//! are logged and otherwise ignored.

use std::time::Duration;

use anyhow::{Context, Result};
use dropwatch::config::TelegramConfig;
use dropwatch::Notifier;
use serde::Serialize;

/// Timeout for a single Bot API request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Sends completion messages to one Telegram chat.
pub struct TelegramNotifier {
    agent: ureq::Agent,
    url: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(api_base: &str, bot_token: &str, chat_id: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Self {
            agent,
            url: format!(
                "{}/bot{}/sendMessage",
                api_base.trim_end_matches('/'),
                bot_token
            ),
            chat_id: chat_id.into(),
        }
    }

    /// Build a notifier from config, if both token and chat id are set.
    pub fn from_config(config: &TelegramConfig) -> Option<Self> {
        config
            .credentials()
            .map(|(token, chat)| Self::new(&config.api_base, token, chat))
    }

    /// Send `text`, reporting any failure to the caller.
    pub fn try_send(&self, text: &str) -> Result<()> {
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
        };
        self.agent
            .post(&self.url)
            .send_json(serde_json::to_value(&body)?)
            .context("Telegram sendMessage failed")?;
        Ok(())
    }
}

impl Notifier for TelegramNotifier {
    fn send(&self, message: &str) {
        if let Err(e) = self.try_send(message) {
            tracing::warn!("Failed to send Telegram notification: {:#}", e);
        }
    }
}

impl std::fmt::Debug for TelegramNotifier {
    // Keeps the bot token out of logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("chat_id", &self.chat_id)
            .finish_non_exhaustive()
    }
}
