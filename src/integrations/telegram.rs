use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use crate::{
    constants::{MEDIA_GROUP_MAX_ITEMS, MESSENGER_RETRY_ATTEMPTS},
    error::{AppError, Result},
    models::ProductMedia,
};

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct InputMedia<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    media: String,
}

/// Outbound Telegram Bot API client. Every send retries a few times;
/// callers treat a final failure as delivery_failed, not a crash.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    api_base: String,
    admin_id: i64,
}

impl TelegramClient {
    pub fn new(bot_token: &str, admin_id: i64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_base: format!("https://api.telegram.org/bot{}", bot_token),
            admin_id,
        }
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let body = json!({ "chat_id": chat_id, "text": text });
        self.post_with_retry("sendMessage", &body).await
    }

    /// Alert channel for money-touching failures.
    pub async fn notify_admin(&self, text: &str) -> Result<()> {
        self.send_message(self.admin_id, text).await
    }

    /// Sends photos/videos as media groups (chunks of at most 10, the Bot
    /// API limit). Items with only a local path are uploaded inline.
    pub async fn send_media_group(&self, chat_id: i64, items: &[ProductMedia]) -> Result<()> {
        for chunk in items.chunks(MEDIA_GROUP_MAX_ITEMS) {
            self.send_media_group_chunk(chat_id, chunk).await?;
        }
        Ok(())
    }

    async fn send_media_group_chunk(&self, chat_id: i64, items: &[ProductMedia]) -> Result<()> {
        let mut media = Vec::with_capacity(items.len());
        let mut uploads: Vec<(String, Vec<u8>)> = Vec::new();

        for (index, item) in items.iter().enumerate() {
            let kind = match item.media_type.as_str() {
                "photo" => "photo",
                "video" => "video",
                other => {
                    tracing::warn!("Unsupported media type '{}' in group, skipping", other);
                    continue;
                }
            };
            if let Some(file_id) = item.telegram_file_id.as_deref() {
                media.push(InputMedia {
                    kind,
                    media: file_id.to_string(),
                });
            } else if let Some(path) = item.file_path.as_deref() {
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|e| AppError::DeliveryFailed(format!("read {}: {}", path, e)))?;
                let attach_name = format!("file{}", index);
                media.push(InputMedia {
                    kind,
                    media: format!("attach://{}", attach_name),
                });
                uploads.push((attach_name, bytes));
            }
        }

        if media.is_empty() {
            return Ok(());
        }

        let media_json = serde_json::to_string(&media)
            .map_err(|e| AppError::Internal(format!("media group encode: {}", e)))?;

        let mut last_err = None;
        for attempt in 0..MESSENGER_RETRY_ATTEMPTS {
            let mut form = reqwest::multipart::Form::new()
                .text("chat_id", chat_id.to_string())
                .text("media", media_json.clone());
            for (name, bytes) in &uploads {
                form = form.part(
                    name.clone(),
                    reqwest::multipart::Part::bytes(bytes.clone()).file_name(name.clone()),
                );
            }

            match self
                .http
                .post(format!("{}/sendMediaGroup", self.api_base))
                .multipart(form)
                .send()
                .await
            {
                Ok(response) => match response.json::<ApiResponse>().await {
                    Ok(api) if api.ok => return Ok(()),
                    Ok(api) => {
                        last_err = Some(api.description.unwrap_or_else(|| "unknown".to_string()))
                    }
                    Err(e) => last_err = Some(e.to_string()),
                },
                Err(e) => last_err = Some(e.to_string()),
            }
            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
        }

        Err(AppError::Messenger(format!(
            "sendMediaGroup failed after {} attempts: {:?}",
            MESSENGER_RETRY_ATTEMPTS, last_err
        )))
    }

    pub async fn send_animation(&self, chat_id: i64, item: &ProductMedia) -> Result<()> {
        if let Some(file_id) = item.telegram_file_id.as_deref() {
            let body = json!({ "chat_id": chat_id, "animation": file_id });
            return self.post_with_retry("sendAnimation", &body).await;
        }

        let Some(path) = item.file_path.as_deref() else {
            return Err(AppError::DeliveryFailed(
                "animation has neither file_id nor path".to_string(),
            ));
        };
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AppError::DeliveryFailed(format!("read {}: {}", path, e)))?;

        let mut last_err = None;
        for attempt in 0..MESSENGER_RETRY_ATTEMPTS {
            let form = reqwest::multipart::Form::new()
                .text("chat_id", chat_id.to_string())
                .part(
                    "animation",
                    reqwest::multipart::Part::bytes(bytes.clone()).file_name("animation.gif"),
                );
            match self
                .http
                .post(format!("{}/sendAnimation", self.api_base))
                .multipart(form)
                .send()
                .await
            {
                Ok(response) => match response.json::<ApiResponse>().await {
                    Ok(api) if api.ok => return Ok(()),
                    Ok(api) => {
                        last_err = Some(api.description.unwrap_or_else(|| "unknown".to_string()))
                    }
                    Err(e) => last_err = Some(e.to_string()),
                },
                Err(e) => last_err = Some(e.to_string()),
            }
            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
        }

        Err(AppError::Messenger(format!(
            "sendAnimation failed after {} attempts: {:?}",
            MESSENGER_RETRY_ATTEMPTS, last_err
        )))
    }

    pub async fn answer_callback(&self, callback_query_id: &str, text: &str) -> Result<()> {
        let body = json!({ "callback_query_id": callback_query_id, "text": text });
        self.post_with_retry("answerCallbackQuery", &body).await
    }

    async fn post_with_retry(&self, method: &str, body: &serde_json::Value) -> Result<()> {
        let mut last_err = None;
        for attempt in 0..MESSENGER_RETRY_ATTEMPTS {
            match self
                .http
                .post(format!("{}/{}", self.api_base, method))
                .json(body)
                .send()
                .await
            {
                Ok(response) => match response.json::<ApiResponse>().await {
                    Ok(api) if api.ok => return Ok(()),
                    Ok(api) => {
                        last_err = Some(api.description.unwrap_or_else(|| "unknown".to_string()))
                    }
                    Err(e) => last_err = Some(e.to_string()),
                },
                Err(e) => last_err = Some(e.to_string()),
            }
            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
        }

        Err(AppError::Messenger(format!(
            "{} failed after {} attempts: {:?}",
            method, MESSENGER_RETRY_ATTEMPTS, last_err
        )))
    }
}
