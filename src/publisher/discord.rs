use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{PresencePublisher, PublishError, PublisherFactory};
use crate::models::TickerConfig;

pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Discord caps nicknames at 32 characters
pub const MAX_NICKNAME_CHARS: usize = 32;

#[derive(Debug, Clone, Deserialize)]
struct CurrentUser {
    id: String,
    #[serde(default)]
    username: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Guild {
    id: String,
    #[serde(default)]
    name: String,
}

/// Connects ticker bot tokens to Discord
pub struct DiscordFactory {
    client: reqwest::Client,
    api_base: String,
}

impl DiscordFactory {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_api_base(client, DISCORD_API_BASE)
    }

    pub fn with_api_base(client: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PublisherFactory for DiscordFactory {
    async fn connect(&self, config: &TickerConfig) -> Result<Box<dyn PresencePublisher>, PublishError> {
        let auth = format!("Bot {}", config.bot_token);

        let response = self
            .client
            .get(format!("{}/users/@me", self.api_base))
            .header(reqwest::header::AUTHORIZATION, &auth)
            .send()
            .await?;
        let user: CurrentUser = check_status(response).await?.json().await?;

        let response = self
            .client
            .get(format!("{}/users/@me/guilds", self.api_base))
            .header(reqwest::header::AUTHORIZATION, &auth)
            .send()
            .await?;
        let guilds: Vec<Guild> = check_status(response).await?.json().await?;

        if guilds.is_empty() {
            tracing::warn!(id = %config.id, bot = %user.username, "Bot is not a member of any guild");
        } else {
            tracing::info!(
                id = %config.id,
                bot = %user.username,
                guilds = guilds.len(),
                "Connected ticker bot"
            );
        }

        Ok(Box::new(DiscordPublisher {
            client: self.client.clone(),
            api_base: self.api_base.clone(),
            auth,
            user_id: user.id,
            guilds,
        }))
    }
}

/// Shows a ticker's display as the bot's nickname in every guild it's in
pub struct DiscordPublisher {
    client: reqwest::Client,
    api_base: String,
    auth: String,
    user_id: String,
    guilds: Vec<Guild>,
}

impl DiscordPublisher {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

#[async_trait]
impl PresencePublisher for DiscordPublisher {
    async fn publish(&self, display: &str) -> Result<(), PublishError> {
        let nick = truncate_nickname(display);
        let mut first_error = None;

        for guild in &self.guilds {
            let result = self
                .client
                .patch(format!("{}/guilds/{}/members/@me", self.api_base, guild.id))
                .header(reqwest::header::AUTHORIZATION, &self.auth)
                .json(&json!({ "nick": nick }))
                .send()
                .await;

            let outcome = match result {
                Ok(response) => check_status(response).await.map(|_| ()),
                Err(e) => Err(PublishError::from(e)),
            };

            if let Err(e) = outcome {
                tracing::debug!(guild = %guild.name, "Nickname update failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, PublishError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        reqwest::StatusCode::UNAUTHORIZED => Err(PublishError::Unauthorized),
        reqwest::StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(Duration::from_secs_f64);
            Err(PublishError::RateLimited { retry_after })
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(PublishError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            })
        }
    }
}

fn truncate_nickname(display: &str) -> String {
    display.chars().take(MAX_NICKNAME_CHARS).collect()
}
