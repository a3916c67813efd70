//! Mattermost direct messages for the `mattermost` channel.
//!
//! # Responsibility
//! - Resolve a username to a direct channel with the kiosk bot and post the
//!   rendered notification there through the v4 REST API.
//!
//! # Invariants
//! - Every request carries the bot token as a bearer header and is bounded
//!   by the configured timeout.
//! - The bot's own user id is fetched once and then reused.
//! - An unknown username fails with `InvalidRecipient`; every other
//!   server-side failure is a `Transport` error.

use crate::config::MattermostConfig;
use crate::notify::channel::{Channel, ChannelSetupError, DeliveryError, DeliveryResult};
use crate::notify::message;
use crate::schedule::summary::MonthlySummary;
use log::{debug, info};
use once_cell::sync::OnceCell;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

pub const MATTERMOST_CHANNEL: &str = "mattermost";

#[derive(Debug, Deserialize)]
struct Identified {
    id: String,
}

pub struct MattermostChannel {
    client: Client,
    api_root: String,
    bot_token: String,
    bot_user_id: OnceCell<String>,
}

impl MattermostChannel {
    pub fn from_config(config: &MattermostConfig) -> Result<Self, ChannelSetupError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|err| ChannelSetupError::new(MATTERMOST_CHANNEL, err.to_string()))?;
        let api_root = format!("{}/api/v4", config.base_url.trim().trim_end_matches('/'));

        info!(
            "event=channel_setup module=notify status=ok channel={MATTERMOST_CHANNEL} api_root={api_root}"
        );
        Ok(Self {
            client,
            api_root,
            bot_token: config.bot_token.clone(),
            bot_user_id: OnceCell::new(),
        })
    }

    /// Posts `text` into the direct channel between the bot and `username`.
    pub fn send_direct(&self, recipient: &str, text: &str) -> DeliveryResult {
        let username = recipient.trim().trim_start_matches('@');
        if username.is_empty() {
            return Err(DeliveryError::InvalidRecipient(recipient.to_string()));
        }

        let bot_id = self.bot_user_id()?;
        let user_id = self.user_id(username)?;
        let channel = self.fetch_id(
            "create direct channel",
            self.authorized(self.client.post(self.url("/channels/direct")))
                .json(&json!([bot_id, user_id])),
        )?;
        self.fetch_id(
            "create post",
            self.authorized(self.client.post(self.url("/posts")))
                .json(&json!({ "channel_id": channel, "message": text })),
        )?;

        debug!(
            "event=channel_deliver module=notify status=ok channel={MATTERMOST_CHANNEL} recipient={username}"
        );
        Ok(())
    }

    fn bot_user_id(&self) -> Result<&str, DeliveryError> {
        self.bot_user_id
            .get_or_try_init(|| {
                self.fetch_id(
                    "look up bot user",
                    self.authorized(self.client.get(self.url("/users/me"))),
                )
            })
            .map(String::as_str)
    }

    fn user_id(&self, username: &str) -> Result<String, DeliveryError> {
        let response = self
            .authorized(self.client.get(self.url(&format!("/users/username/{username}"))))
            .send()
            .map_err(|err| transport("look up user", err))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(DeliveryError::InvalidRecipient(username.to_string()));
        }
        read_id("look up user", response)
    }

    fn fetch_id(&self, action: &str, request: RequestBuilder) -> Result<String, DeliveryError> {
        let response = request.send().map_err(|err| transport(action, err))?;
        read_id(action, response)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.bot_token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_root)
    }
}

fn read_id(action: &str, response: reqwest::blocking::Response) -> Result<String, DeliveryError> {
    let status = response.status();
    if !status.is_success() {
        return Err(DeliveryError::Transport(format!(
            "{action}: server answered {status}"
        )));
    }
    response
        .json::<Identified>()
        .map(|body| body.id)
        .map_err(|err| transport(action, err))
}

fn transport(action: &str, err: reqwest::Error) -> DeliveryError {
    DeliveryError::Transport(format!("{action}: {err}"))
}

impl Channel for MattermostChannel {
    fn channel_type(&self) -> &str {
        MATTERMOST_CHANNEL
    }

    fn send_message(&self, recipient: &str, body: &str, subject: Option<&str>) -> DeliveryResult {
        match subject {
            Some(subject) => self.send_direct(recipient, &format!("**{subject}**\n{body}")),
            None => self.send_direct(recipient, body),
        }
    }

    fn notify_low_balance(
        &self,
        recipient: &str,
        balance: Decimal,
        language: &str,
    ) -> DeliveryResult {
        self.send_direct(recipient, &message::low_balance(balance, language).text)
    }

    fn notify_low_stock(
        &self,
        recipient: &str,
        product_name: &str,
        available_quantity: u32,
        language: &str,
    ) -> DeliveryResult {
        let content = message::low_stock(product_name, available_quantity, language);
        self.send_direct(recipient, &content.text)
    }

    fn send_monthly_summary(
        &self,
        recipient: &str,
        summary: &MonthlySummary,
        language: &str,
    ) -> DeliveryResult {
        let content = message::monthly_summary(summary, language);
        self.send_direct(recipient, &format!("**{}**\n{}", content.subject, content.text))
    }
}
