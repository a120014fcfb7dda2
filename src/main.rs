mod config;
mod content_filter;
mod error;
mod frame;
mod logging;
mod pipeline;
mod policy;
mod poller;
mod source;
mod telegram;
mod vk;
mod worker;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use log::{error, info, warn};

use crate::config::{Config, Credentials, ENV_FILE};
use crate::content_filter::{ContentFilter, NsfwFilter};
use crate::error::ConfigError;
use crate::pipeline::{Moderation, PhotoFetcher, Pipeline, Publisher, SenderDirectory};
use crate::poller::{TelegramPoller, VkPoller};
use crate::source::SourceFilter;
use crate::telegram::TelegramClient;
use crate::vk::VkClient;
use crate::worker::WorkerPool;

const DOWNLOAD_TIMEOUT_SECS: u64 = 60;

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    match config::load_env_file(Path::new(ENV_FILE)) {
        Ok(true) => info!("Loaded environment from {ENV_FILE}"),
        Ok(false) => {}
        Err(e) => warn!("Ignoring {ENV_FILE}: {e}"),
    }
    let credentials = Credentials::from_env()?;
    let config_path = Config::path_from_env();
    let config = Config::from_path(&config_path)?;
    info!(
        "Loaded config from {} (vk peer {}, tg chat {}, channel {})",
        config_path.display(),
        config.vk.peer_id,
        config.tg.chat_id,
        config.tg.channel
    );

    let moderation = load_moderation(&config).await?;

    let telegram = Arc::new(TelegramClient::new(&credentials.tg_token)?);
    let vk = Arc::new(VkClient::new(credentials.vk_token.clone())?);
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
        .build()?;

    let pipeline = Arc::new(Pipeline::new(
        Arc::new(PhotoFetcher::new(http, Arc::clone(&telegram))),
        Arc::new(SenderDirectory::new(Arc::clone(&vk))),
        Arc::clone(&telegram) as Arc<dyn Publisher>,
        moderation,
        config.tg.channel.clone(),
    ));

    let (jobs, pool) = WorkerPool::spawn(pipeline, config.workers, config.queue_capacity);
    info!(
        "Started {} photo workers (queue capacity {})",
        config.workers, config.queue_capacity
    );

    let filter = SourceFilter {
        vk_peer_id: config.vk.peer_id,
    };
    let vk_poller = VkPoller::new(vk, config.vk.group_id, filter, jobs.clone());
    let tg_poller = TelegramPoller::new(telegram, filter, jobs);

    tokio::select! {
        _ = vk_poller.run() => warn!("VK poller exited"),
        _ = tg_poller.run() => warn!("Telegram poller exited"),
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for ctrl-c")?;
            info!("Shutting down");
        }
    }

    // Pollers are gone with the select, so the queue closes and drains.
    pool.join().await;
    Ok(())
}

/// Loads the classifier once, before any polling. Failure is fatal.
async fn load_moderation(config: &Config) -> Result<Moderation, ConfigError> {
    if !config.moderation.enabled {
        info!("Moderation disabled, relaying every photo");
        return Ok(Moderation::Relay);
    }

    let source = config
        .model_source()
        .ok_or_else(|| ConfigError::Invalid("model is required when moderation is enabled".into()))?;
    let filter = tokio::task::spawn_blocking(move || NsfwFilter::load(&source))
        .await
        .map_err(|e| ConfigError::Model(e.to_string()))?
        .map_err(|e| ConfigError::Model(format!("{e:#}")))?;

    let policy = config.moderation.policy();
    info!(
        "Moderation enabled: rejecting photos scoring above {} in {}",
        policy.threshold(),
        config.moderation.categories.join(", ")
    );

    Ok(Moderation::Screen {
        filter: Arc::new(filter) as Arc<dyn ContentFilter>,
        policy,
    })
}
