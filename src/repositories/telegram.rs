use anyhow::bail;
use reqwest;
use serde_json::json;

use crate::models::telegram::Update;

/// Minimal Telegram Bot API client: long-poll for updates, reply to messages.
pub struct TelegramApi {
    token: String,
    url: String,
    client: reqwest::Client,
}

impl TelegramApi {
    pub fn new(token: String) -> Self {
        Self::with_url(token, "https://api.telegram.org".to_string())
    }

    pub fn with_url(token: String, url: String) -> Self {
        TelegramApi {
            token,
            url,
            client: reqwest::Client::new(),
        }
    }

    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, anyhow::Error> {
        let response = self
            .client
            .get(format!("{}/bot{}/getUpdates", self.url, self.token))
            .query(&[("offset", offset.to_string()), ("timeout", timeout_secs.to_string())])
            .send()
            .await?
            .text()
            .await?;

        let response_json: serde_json::Value = serde_json::from_str(&response)?;
        if response_json.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            bail!("Telegram: getUpdates failed: {}", response);
        }
        match response_json.get("result") {
            Some(r) => {
                let updates: Vec<Update> = serde_json::from_value(r.clone())?;
                Ok(updates)
            }
            None => bail!("Telegram: bad getUpdates response format."),
        }
    }

    pub async fn send_reply(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), anyhow::Error> {
        let payload = json!({
            "chat_id": chat_id,
            "reply_to_message_id": message_id,
            "text": text
        });

        let response = self
            .client
            .post(format!("{}/bot{}/sendMessage", self.url, self.token))
            .json(&payload)
            .send()
            .await?
            .text()
            .await?;

        let response_json: serde_json::Value = serde_json::from_str(&response)?;
        if response_json.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            bail!("Telegram: sendMessage failed: {}", response);
        }

        Ok(())
    }
}
