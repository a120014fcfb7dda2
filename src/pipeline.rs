//! Per-photo intake: fetch, optionally screen, then publish.

use std::sync::Arc;

use async_trait::async_trait;

use crate::content_filter::ContentFilter;
use crate::error::PipelineError;
use crate::frame::{build_tensor, decode_jpeg, ImageBytes};
use crate::policy::{CategoryScores, Decision, DecisionPolicy};
use crate::source::{Attribution, PhotoJob, PhotoReference, SenderIdentity};
use crate::telegram::TelegramClient;
use crate::vk::VkClient;

/// Resolves a photo reference to its encoded bytes.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, reference: &PhotoReference) -> Result<ImageBytes, PipelineError>;
}

/// Turns a sender identity into caption text.
#[async_trait]
pub trait AttributionResolver: Send + Sync {
    async fn resolve(&self, sender: &SenderIdentity) -> Result<Attribution, PipelineError>;
}

/// Sends a photo with an HTML caption to the destination channel.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        channel: &str,
        photo: ImageBytes,
        caption: &str,
    ) -> Result<(), PipelineError>;
}

/// Whether photos are screened before publishing.
#[derive(Clone)]
pub enum Moderation {
    /// Publish every fetched photo as-is.
    Relay,
    Screen {
        filter: Arc<dyn ContentFilter>,
        policy: DecisionPolicy,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Published,
    Rejected { category: String, probability: f32 },
}

pub struct Pipeline {
    fetcher: Arc<dyn ImageFetcher>,
    attribution: Arc<dyn AttributionResolver>,
    publisher: Arc<dyn Publisher>,
    moderation: Moderation,
    channel: String,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn ImageFetcher>,
        attribution: Arc<dyn AttributionResolver>,
        publisher: Arc<dyn Publisher>,
        moderation: Moderation,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            attribution,
            publisher,
            moderation,
            channel: channel.into(),
        }
    }

    /// Runs one photo end to end. Errors only concern this photo.
    pub async fn process(&self, job: &PhotoJob) -> Result<Outcome, PipelineError> {
        let (attribution, photo) = tokio::try_join!(
            self.attribution.resolve(&job.sender),
            self.fetcher.fetch(&job.reference),
        )?;
        log::debug!("fetched {} ({} bytes)", job.reference, photo.len());

        if let Moderation::Screen { filter, policy } = &self.moderation {
            let scores = classify(Arc::clone(filter), photo.clone()).await?;
            if policy.decide(&scores) == Decision::Reject {
                let (category, probability) = policy
                    .top_explicit(&scores)
                    .map(|(c, p)| (c.to_string(), p))
                    .unwrap_or_default();
                return Ok(Outcome::Rejected {
                    category,
                    probability,
                });
            }
        }

        let caption = format!("From {attribution}");
        self.publisher.publish(&self.channel, photo, &caption).await?;
        Ok(Outcome::Published)
    }
}

/// Decodes, builds the tensor and scores it on the blocking pool. The
/// decoded pixels and tensor never outlive this call.
async fn classify(
    filter: Arc<dyn ContentFilter>,
    photo: ImageBytes,
) -> Result<CategoryScores, PipelineError> {
    tokio::task::spawn_blocking(move || {
        let decoded = decode_jpeg(&photo)?;
        let tensor = build_tensor(&decoded)?;
        drop(decoded);
        filter
            .classify(tensor)
            .map_err(|e| PipelineError::Classification(format!("{e:#}")))
    })
    .await
    .map_err(|e| PipelineError::Classification(format!("classifier task failed: {e}")))?
}

/// Downloads VK photos by URL and Telegram photos through the Bot API.
pub struct PhotoFetcher {
    http: reqwest::Client,
    telegram: Arc<TelegramClient>,
}

impl PhotoFetcher {
    pub fn new(http: reqwest::Client, telegram: Arc<TelegramClient>) -> Self {
        Self { http, telegram }
    }

    async fn fetch_url(&self, url: &url::Url) -> Result<bytes::Bytes, String> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("unexpected status {status}"));
        }
        response.bytes().await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl ImageFetcher for PhotoFetcher {
    async fn fetch(&self, reference: &PhotoReference) -> Result<ImageBytes, PipelineError> {
        let result = match reference {
            PhotoReference::Url(url) => self.fetch_url(url).await,
            PhotoReference::TelegramFile(file_id) => self
                .telegram
                .download(file_id)
                .await
                .map_err(|e| e.to_string()),
        };
        result
            .map(ImageBytes::new)
            .and_then(|photo| {
                if photo.is_empty() {
                    Err("empty response body".to_string())
                } else {
                    Ok(photo)
                }
            })
            .map_err(|message| PipelineError::Fetch {
                reference: reference.clone(),
                message,
            })
    }
}

/// Looks up VK short addresses; Telegram handles need no lookup.
pub struct SenderDirectory {
    vk: Arc<VkClient>,
}

impl SenderDirectory {
    pub fn new(vk: Arc<VkClient>) -> Self {
        Self { vk }
    }
}

#[async_trait]
impl AttributionResolver for SenderDirectory {
    async fn resolve(&self, sender: &SenderIdentity) -> Result<Attribution, PipelineError> {
        match sender {
            SenderIdentity::Vk { user_id } => {
                let user = self
                    .vk
                    .get_user(*user_id)
                    .await
                    .map_err(|e| PipelineError::Attribution(e.to_string()))?;
                let domain = user.domain.unwrap_or_else(|| format!("id{}", user.id));
                Ok(Attribution::vk(*user_id, &domain))
            }
            SenderIdentity::Telegram {
                handle,
                is_username,
            } => Ok(Attribution::telegram(handle, *is_username)),
        }
    }
}

#[async_trait]
impl Publisher for TelegramClient {
    async fn publish(
        &self,
        channel: &str,
        photo: ImageBytes,
        caption: &str,
    ) -> Result<(), PipelineError> {
        self.send_photo(channel, photo.into_bytes(), caption)
            .await
            .map(|sent| log::debug!("posted to {channel} as message {}", sent.message_id))
            .map_err(|e| PipelineError::Publish {
                channel: channel.to_string(),
                message: e.to_string(),
            })
    }
}
