use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::TelegramConfig,
    messages::{Notification, NotificationBody},
    notify::NotificationSink,
};

const LONG_POLL_SECONDS: u64 = 60;
const PNG_MAGIC: &[u8] = b"\x89PNG";

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Bot API rejected {method}: {description}")]
    Api {
        method: &'static str,
        description: String,
    },
}

#[derive(Deserialize, Debug)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Chat {
    pub id: i64,
}

#[derive(Deserialize, Debug)]
pub struct User {
    pub username: Option<String>,
}

#[derive(Serialize)]
struct GetUpdates {
    offset: i64,
    timeout: u64,
    allowed_updates: &'static [&'static str],
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to_message_id: Option<i64>,
}

/// Bot API client bound to the single chat the station reports to.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    chat_id: i64,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Result<Self, TelegramError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(LONG_POLL_SECONDS + 30))
            .build()?;
        let api_url = config
            .api_url
            .as_deref()
            .unwrap_or("https://api.telegram.org")
            .trim_end_matches('/');
        Ok(TelegramClient {
            http,
            base_url: format!("{}/bot{}", api_url, config.token),
            chat_id: config.chat_id,
        })
    }

    pub fn chat_id(&self) -> i64 {
        self.chat_id
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    async fn call<B: serde::Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: &'static str,
        body: &B,
    ) -> Result<T, TelegramError> {
        let response = self
            .http
            .post(self.method_url(method))
            .json(body)
            .send()
            .await?;
        unwrap_response(method, response.json().await?)
    }

    /// Checks the token, returning the bot's user name.
    pub async fn get_me(&self) -> Result<String, TelegramError> {
        let me: User = self.call("getMe", &serde_json::json!({})).await?;
        Ok(me.username.unwrap_or_default())
    }

    /// Long-polls for updates after `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, TelegramError> {
        self.call(
            "getUpdates",
            &GetUpdates {
                offset,
                timeout: LONG_POLL_SECONDS,
                allowed_updates: &["message"],
            },
        )
        .await
    }

    /// Returns the offset past everything queued before startup.
    pub async fn skip_pending(&self) -> Result<i64, TelegramError> {
        let pending: Vec<Update> = self
            .call(
                "getUpdates",
                &GetUpdates {
                    offset: -1,
                    timeout: 0,
                    allowed_updates: &["message"],
                },
            )
            .await?;
        Ok(next_offset(0, &pending))
    }

    async fn send_message(&self, text: &str, reply_to: Option<i64>) -> Result<(), TelegramError> {
        let _: serde_json::Value = self
            .call(
                "sendMessage",
                &SendMessage {
                    chat_id: self.chat_id,
                    text,
                    reply_to_message_id: reply_to,
                },
            )
            .await?;
        Ok(())
    }

    async fn send_photo(
        &self,
        bytes: Vec<u8>,
        caption: &str,
        reply_to: Option<i64>,
    ) -> Result<(), TelegramError> {
        let (file_name, mime) = if bytes.starts_with(PNG_MAGIC) {
            ("picture.png", "image/png")
        } else {
            ("picture.jpg", "image/jpeg")
        };
        let photo = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime)?;
        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", self.chat_id.to_string())
            .text("caption", caption.to_string())
            .part("photo", photo);
        if let Some(reply_to) = reply_to {
            form = form.text("reply_to_message_id", reply_to.to_string());
        }

        let response = self
            .http
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await?;
        let _: serde_json::Value = unwrap_response("sendPhoto", response.json().await?)?;
        Ok(())
    }
}

fn unwrap_response<T>(method: &'static str, response: ApiResponse<T>) -> Result<T, TelegramError> {
    match response {
        ApiResponse {
            ok: true,
            result: Some(result),
            ..
        } => Ok(result),
        ApiResponse { description, .. } => Err(TelegramError::Api {
            method,
            description: description.unwrap_or_else(|| "no result".to_string()),
        }),
    }
}

pub fn next_offset(current: i64, updates: &[Update]) -> i64 {
    updates
        .iter()
        .map(|update| update.update_id + 1)
        .max()
        .unwrap_or(current)
        .max(current)
}

#[async_trait]
impl NotificationSink for TelegramClient {
    async fn send(&self, notification: Notification) -> anyhow::Result<()> {
        debug!("Sending notification {:?}", notification.caption());
        match notification.body {
            NotificationBody::Text(text) => self.send_message(&text, notification.reply_to).await?,
            NotificationBody::Image { bytes, caption } => {
                self.send_photo(bytes, &caption, notification.reply_to).await?
            }
        }
        Ok(())
    }
}
