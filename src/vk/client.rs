use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::types::{LongPollBatch, LongPollServer, VkResponse, VkUser};

const API_BASE: &str = "https://api.vk.com/method";
const API_VERSION: &str = "5.199";
// Must outlive the long-poll wait.
const HTTP_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum VkError {
    #[error("http error: {0}")]
    Http(#[source] reqwest::Error),
    #[error("vk api error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("vk returned neither response nor error")]
    EmptyResponse,
    #[error("no such user {0}")]
    UnknownUser(i64),
}

// Request URLs carry the access token, so they never reach an error message.
impl From<reqwest::Error> for VkError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.without_url())
    }
}

/// Async VK API client authenticated with a community token.
#[derive(Debug, Clone)]
pub struct VkClient {
    http: Client,
    base_url: String,
    token: String,
}

impl VkClient {
    pub fn new(token: impl Into<String>) -> Result<Self, VkError> {
        Self::with_base_url(API_BASE, token)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, VkError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T, VkError> {
        let url = format!("{}/{}", self.base_url, method);
        let response = self
            .http
            .get(url)
            .query(params)
            .query(&[("access_token", self.token.as_str()), ("v", API_VERSION)])
            .send()
            .await?
            .error_for_status()?;

        let envelope: VkResponse<T> = response.json().await?;
        match envelope {
            VkResponse {
                error: Some(err), ..
            } => Err(VkError::Api {
                code: err.error_code,
                message: err.error_msg,
            }),
            VkResponse {
                response: Some(value),
                ..
            } => Ok(value),
            _ => Err(VkError::EmptyResponse),
        }
    }

    /// `group_id` may be given negative (owner-id form); VK wants it positive.
    pub async fn get_long_poll_server(&self, group_id: i64) -> Result<LongPollServer, VkError> {
        self.call(
            "groups.getLongPollServer",
            &[("group_id", group_id.unsigned_abs().to_string())],
        )
        .await
    }

    /// One `a_check` round against the long-poll server.
    pub async fn poll(
        &self,
        server: &LongPollServer,
        ts: &str,
        wait_secs: u64,
    ) -> Result<LongPollBatch, VkError> {
        let wait = wait_secs.to_string();
        let batch = self
            .http
            .get(&server.server)
            .query(&[
                ("act", "a_check"),
                ("key", server.key.as_str()),
                ("ts", ts),
                ("wait", wait.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(batch)
    }

    /// Looks up a user profile including the short address (`domain`).
    pub async fn get_user(&self, user_id: i64) -> Result<VkUser, VkError> {
        let users: Vec<VkUser> = self
            .call(
                "users.get",
                &[
                    ("user_ids", user_id.to_string()),
                    ("fields", "domain".to_string()),
                ],
            )
            .await?;
        users
            .into_iter()
            .next()
            .ok_or(VkError::UnknownUser(user_id))
    }
}
