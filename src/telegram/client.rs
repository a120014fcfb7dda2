use std::time::Duration;

use bytes::Bytes;
use reqwest::multipart;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use serde_json::Value;

use super::types::{File, Message, TelegramResponse};

const API_ROOT: &str = "https://api.telegram.org";
// Must outlive the getUpdates long-poll timeout.
const HTTP_TIMEOUT_SECS: u64 = 60;

/// Errors that can occur while talking to the Bot API.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("http error: {0}")]
    Http(#[source] reqwest::Error),
    #[error("telegram api error ({status}): {description}")]
    Api {
        status: StatusCode,
        description: String,
    },
    #[error("unexpected response ({status}): {body}")]
    UnexpectedResponse { status: StatusCode, body: String },
    #[error("file {0} has no download path")]
    NoFilePath(String),
}

// Request URLs carry the bot token, so they never reach an error message.
impl From<reqwest::Error> for TelegramError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.without_url())
    }
}

/// Async Bot API client for polling updates, downloading files and
/// sending photos.
#[derive(Debug, Clone)]
pub struct TelegramClient {
    http: Client,
    base_url: String,
    file_base_url: String,
}

impl TelegramClient {
    pub fn new(token: &str) -> Result<Self, TelegramError> {
        Self::with_base_urls(
            format!("{API_ROOT}/bot{token}"),
            format!("{API_ROOT}/file/bot{token}"),
        )
    }

    /// Targets arbitrary method and file roots, e.g. a local mock server.
    pub fn with_base_urls(
        base_url: impl Into<String>,
        file_base_url: impl Into<String>,
    ) -> Result<Self, TelegramError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            file_base_url: file_base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Long-polls for new messages starting at `offset`. Updates come back
    /// unparsed so one malformed entry cannot sink the whole batch.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Value>, TelegramError> {
        let url = format!("{}/getUpdates", self.base_url);
        let mut query = vec![
            ("timeout", timeout_secs.to_string()),
            ("allowed_updates", r#"["message"]"#.to_string()),
        ];
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }

        let response = self.http.get(url).query(&query).send().await?;
        let updates: Vec<Value> = Self::handle_response(response).await?;
        log::trace!("received {} telegram updates", updates.len());
        Ok(updates)
    }

    pub async fn get_file(&self, file_id: &str) -> Result<File, TelegramError> {
        let url = format!("{}/getFile", self.base_url);
        let response = self
            .http
            .get(url)
            .query(&[("file_id", file_id)])
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Resolves a file id and downloads its content.
    pub async fn download(&self, file_id: &str) -> Result<Bytes, TelegramError> {
        let file = self.get_file(file_id).await?;
        let path = file
            .file_path
            .ok_or_else(|| TelegramError::NoFilePath(file_id.to_string()))?;

        let url = format!("{}/{}", self.file_base_url, path.trim_start_matches('/'));
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TelegramError::UnexpectedResponse { status, body });
        }
        Ok(response.bytes().await?)
    }

    /// Sends a photo with an HTML caption.
    pub async fn send_photo(
        &self,
        chat: &str,
        photo: Bytes,
        caption: &str,
    ) -> Result<Message, TelegramError> {
        let url = format!("{}/sendPhoto", self.base_url);
        let len = photo.len() as u64;
        let part = multipart::Part::stream_with_length(photo, len)
            .file_name("photo.jpg")
            .mime_str("image/jpeg")?;
        let form = multipart::Form::new()
            .text("chat_id", chat.to_string())
            .text("caption", caption.to_string())
            .text("parse_mode", "HTML")
            .part("photo", part);

        let response = self.http.post(url).multipart(form).send().await?;
        Self::handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, TelegramError> {
        let status = response.status();
        let body = response.text().await?;

        let envelope: TelegramResponse<T> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) => return Err(TelegramError::UnexpectedResponse { status, body }),
        };

        match envelope {
            TelegramResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            TelegramResponse { ok: true, .. } => {
                Err(TelegramError::UnexpectedResponse { status, body })
            }
            TelegramResponse { description, .. } => Err(TelegramError::Api {
                status,
                description: description.unwrap_or_else(|| "unknown error".into()),
            }),
        }
    }
}
