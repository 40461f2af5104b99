use async_trait::async_trait;
use chrono::{DateTime, Local};
use reqwest::Client;
use serde::Serialize;

use crate::error::Error;
use crate::record::State;

/// Sends an alert about a target changing state.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), Error>;
}

/// `"<target> Down"` or `"<target> Up"`.
pub fn subject(target: &str, state: State) -> String {
    format!("{target} {state}")
}

/// Human readable body naming the new state and when it was seen.
pub fn body(state: State, timestamp: i64) -> String {
    let when = DateTime::from_timestamp(timestamp, 0).map_or_else(
        || timestamp.to_string(),
        |t| {
            t.with_timezone(&Local)
                .format("%a %b %e %H:%M:%S %Y")
                .to_string()
        },
    );
    let state = match state {
        State::Up => "up",
        State::Down => "down",
    };
    format!("Site is {state} at {when}")
}

#[derive(Serialize)]
struct DiscordMessage {
    content: String,
}

/// Posts alerts to a Discord webhook, optionally mentioning a user.
pub struct DiscordNotifier {
    client: Client,
    webhook_url: String,
    discord_id: Option<u64>,
}

impl DiscordNotifier {
    pub fn new(webhook_url: impl Into<String>, discord_id: Option<u64>) -> Self {
        Self {
            client: Client::new(),
            webhook_url: webhook_url.into(),
            discord_id,
        }
    }

    fn content(&self, subject: &str, body: &str) -> String {
        // If discord_id is None, we don't want to mention anyone
        let tag = self.discord_id.map_or(String::new(), |id| format!("<@{id}> "));
        format!("{tag}{subject}\n{body}")
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), Error> {
        let payload = DiscordMessage {
            content: self.content(subject, body),
        };

        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Error::Notify(format!(
                "webhook answered {}",
                resp.status()
            )));
        }
        Ok(())
    }
}
