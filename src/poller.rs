//! Long-poll loops for both platforms. They only extract jobs and enqueue
//! them; pipeline errors never reach this layer.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde_json::Value;

use crate::source::{SourceEvent, SourceFilter};
use crate::telegram::types::Update;
use crate::telegram::TelegramClient;
use crate::vk::types::{GroupEvent, LongPollServer, MessageNew};
use crate::vk::VkClient;
use crate::worker::JobSender;

const TG_POLL_TIMEOUT_SECS: u64 = 30;
const VK_POLL_WAIT_SECS: u64 = 25;
const ERROR_RETRY_DELAY_SECS: u64 = 5;

/// Hands each job of an event to the worker queue. Returns false once the
/// queue is closed.
async fn dispatch(event: SourceEvent, filter: SourceFilter, jobs: &JobSender) -> bool {
    let platform = match &event {
        SourceEvent::VkMessageNew(_) => "vk",
        SourceEvent::TelegramMessage(_) => "telegram",
    };
    let extracted = match event.into_jobs(filter) {
        Ok(extracted) => extracted,
        Err(e) => {
            warn!("skipping malformed {platform} event: {e}");
            return true;
        }
    };
    for job in extracted {
        debug!("queueing {platform} photo {}", job.reference);
        if jobs.send(job).await.is_err() {
            return false;
        }
    }
    true
}

pub struct VkPoller {
    client: Arc<VkClient>,
    group_id: i64,
    filter: SourceFilter,
    jobs: JobSender,
}

impl VkPoller {
    pub fn new(client: Arc<VkClient>, group_id: i64, filter: SourceFilter, jobs: JobSender) -> Self {
        Self {
            client,
            group_id,
            filter,
            jobs,
        }
    }

    /// Polls until the job queue closes.
    pub async fn run(self) {
        info!("VK long poll started for group {}", self.group_id);
        let mut session: Option<(LongPollServer, String)> = None;

        loop {
            let (server, ts) = match session.take() {
                Some(s) => s,
                None => match self.client.get_long_poll_server(self.group_id).await {
                    Ok(server) => {
                        let ts = server.ts.clone();
                        (server, ts)
                    }
                    Err(e) => {
                        error!("VK: failed to get long poll server: {e}");
                        tokio::time::sleep(Duration::from_secs(ERROR_RETRY_DELAY_SECS)).await;
                        continue;
                    }
                },
            };

            match self.client.poll(&server, &ts, VK_POLL_WAIT_SECS).await {
                Ok(batch) => match batch.failed {
                    // History is outdated; continue from the returned ts.
                    Some(1) => {
                        let next = batch.ts.unwrap_or(ts);
                        session = Some((server, next));
                    }
                    // Key expired (2) or information lost (3).
                    Some(code) => {
                        debug!("VK: long poll failed with code {code}, refreshing server");
                    }
                    None => {
                        let next = batch.ts.unwrap_or(ts);
                        for event in batch.updates {
                            if !self.handle(event).await {
                                info!("VK poller stopping: job queue closed");
                                return;
                            }
                        }
                        session = Some((server, next));
                    }
                },
                Err(e) => {
                    error!("VK: long poll request failed: {e}");
                    tokio::time::sleep(Duration::from_secs(ERROR_RETRY_DELAY_SECS)).await;
                }
            }
        }
    }

    async fn handle(&self, event: GroupEvent) -> bool {
        if event.kind != "message_new" {
            return true;
        }
        match serde_json::from_value::<MessageNew>(event.object) {
            Ok(new) => dispatch(SourceEvent::VkMessageNew(new.message), self.filter, &self.jobs).await,
            Err(e) => {
                warn!("VK: unparseable message_new event: {e}");
                true
            }
        }
    }
}

pub struct TelegramPoller {
    client: Arc<TelegramClient>,
    filter: SourceFilter,
    jobs: JobSender,
}

impl TelegramPoller {
    pub fn new(client: Arc<TelegramClient>, filter: SourceFilter, jobs: JobSender) -> Self {
        Self {
            client,
            filter,
            jobs,
        }
    }

    /// Polls until the job queue closes.
    pub async fn run(self) {
        info!("Telegram polling started");
        let mut offset: Option<i64> = None;

        loop {
            let updates = match self.client.get_updates(offset, TG_POLL_TIMEOUT_SECS).await {
                Ok(updates) => updates,
                Err(e) => {
                    error!("Telegram: getUpdates failed: {e}");
                    tokio::time::sleep(Duration::from_secs(ERROR_RETRY_DELAY_SECS)).await;
                    continue;
                }
            };

            for raw in updates {
                let raw_id = raw.get("update_id").and_then(Value::as_i64);
                let update = match serde_json::from_value::<Update>(raw) {
                    Ok(update) => update,
                    Err(e) => {
                        warn!("Telegram: skipping unparseable update {raw_id:?}: {e}");
                        if let Some(id) = raw_id {
                            offset = Some(id + 1);
                        }
                        continue;
                    }
                };
                offset = Some(update.update_id + 1);
                let Some(message) = update.message else {
                    continue;
                };
                if !dispatch(SourceEvent::TelegramMessage(message), self.filter, &self.jobs).await {
                    info!("Telegram poller stopping: job queue closed");
                    return;
                }
            }
        }
    }
}
