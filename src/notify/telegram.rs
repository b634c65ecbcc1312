//! Telegram Bot API transport.
//!
//! One `GET <base>/bot<token>/sendMessage?chat_id=..&text=..` per recipient.
//! Any 2xx response counts as delivered; the body is not inspected.

use std::time::Duration;

use anyhow::{anyhow, Result};

use super::{describe_http_error, http_agent, Notifier};

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub api_base: String,
    pub bot_token: String,
    pub chat_ids: Vec<String>,
    pub timeout: Duration,
}

pub struct TelegramNotifier {
    agent: ureq::Agent,
    send_url: String,
    chat_ids: Vec<String>,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Result<Self> {
        if config.bot_token.trim().is_empty() {
            return Err(anyhow!("telegram bot token must not be empty"));
        }
        Ok(Self {
            agent: http_agent(config.timeout),
            send_url: format!(
                "{}/bot{}/sendMessage",
                config.api_base.trim_end_matches('/'),
                config.bot_token
            ),
            chat_ids: config.chat_ids,
        })
    }
}

impl Notifier for TelegramNotifier {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn recipients(&self) -> &[String] {
        &self.chat_ids
    }

    fn deliver(&self, recipient: &str, message: &str) -> Result<()> {
        self.agent
            .get(&self.send_url)
            .query("chat_id", recipient)
            .query("text", message)
            .call()
            .map_err(|err| describe_http_error("telegram", err))?;
        Ok(())
    }
}
