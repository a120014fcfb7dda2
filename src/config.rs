use std::env::{self, VarError};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::content_filter::ModelSource;
use crate::error::ConfigError;
use crate::policy::DecisionPolicy;

pub const CONFIG_ENV: &str = "CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const ENV_FILE: &str = ".env";
pub const VK_TOKEN_ENV: &str = "VK_TOKEN";
pub const TG_TOKEN_ENV: &str = "TG_TOKEN";

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub vk: VkSettings,
    pub tg: TgSettings,
    /// Model directory, or `hf:<repo>` for a hub model.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub moderation: ModerationSettings,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VkSettings {
    /// Community id. The long poll API takes its absolute value.
    pub group_id: i64,
    /// Conversation whose photos are relayed.
    pub peer_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgSettings {
    pub chat_id: i64,
    /// Destination channel, `@name` or numeric id.
    pub channel: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModerationSettings {
    /// When false every fetched photo is relayed without classification.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
}

impl Default for ModerationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_threshold(),
            categories: default_categories(),
        }
    }
}

impl ModerationSettings {
    pub fn policy(&self) -> DecisionPolicy {
        DecisionPolicy::new(self.threshold, self.categories.clone())
    }
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> f32 {
    DecisionPolicy::DEFAULT_THRESHOLD
}

fn default_categories() -> Vec<String> {
    DecisionPolicy::DEFAULT_CATEGORIES
        .iter()
        .map(|c| c.to_string())
        .collect()
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Config {
    /// Resolves the config path from `CONFIG`, falling back to `config.json`.
    pub fn path_from_env() -> PathBuf {
        env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.tg.channel.trim().is_empty() {
            return Err(ConfigError::Invalid("tg.channel must not be empty".into()));
        }
        if self.moderation.enabled {
            if self.model.is_none() {
                return Err(ConfigError::Invalid(
                    "model is required when moderation is enabled".into(),
                ));
            }
            if !(0.0..=1.0).contains(&self.moderation.threshold) {
                return Err(ConfigError::Invalid(format!(
                    "moderation.threshold {} is outside [0, 1]",
                    self.moderation.threshold
                )));
            }
        }
        Ok(())
    }

    /// Model location, present whenever moderation is enabled.
    pub fn model_source(&self) -> Option<ModelSource> {
        self.model.as_deref().map(ModelSource::parse)
    }
}

/// Platform tokens, both required at startup.
#[derive(Clone)]
pub struct Credentials {
    pub vk_token: String,
    pub tg_token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("vk_token", &"<redacted>")
            .field("tg_token", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Reads only the two token variables; the rest of the environment is
    /// never touched.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| match env::var(name) {
            Ok(value) => Ok(Some(value)),
            Err(VarError::NotPresent) => Ok(None),
            Err(VarError::NotUnicode(_)) => {
                Err(ConfigError::Invalid(format!("{name} is not valid UTF-8")))
            }
        })
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Result<Option<String>, ConfigError>,
    {
        Ok(Self {
            vk_token: required(lookup(VK_TOKEN_ENV)?, VK_TOKEN_ENV)?,
            tg_token: required(lookup(TG_TOKEN_ENV)?, TG_TOKEN_ENV)?,
        })
    }
}

fn required(value: Option<String>, name: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnv(name)),
    }
}

/// Loads `KEY=value` lines from `path` into the process environment.
/// Variables that are already set keep their value. Returns false when the
/// file does not exist.
pub fn load_env_file(path: &Path) -> Result<bool, dotenvy::Error> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(true),
        Err(e) if e.not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn credentials(vars: &HashMap<String, String>) -> Result<Credentials, ConfigError> {
        Credentials::from_lookup(|name| Ok(vars.get(name).cloned()))
    }

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(json.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let file = write_config(
            r#"{
                "vk": { "group_id": -1234, "peer_id": 2000000001 },
                "tg": { "chat_id": -100555, "channel": "@relay" },
                "model": "/models/nsfw"
            }"#,
        );
        let config = Config::from_path(file.path()).expect("valid config");

        assert_eq!(config.vk.group_id, -1234);
        assert_eq!(config.vk.peer_id, 2000000001);
        assert_eq!(config.tg.channel, "@relay");
        assert!(config.moderation.enabled);
        assert_eq!(config.moderation.threshold, 0.3);
        assert_eq!(config.moderation.categories, vec!["Sexy", "Porn", "Hentai"]);
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(
            config.model_source(),
            Some(ModelSource::Local(PathBuf::from("/models/nsfw")))
        );
    }

    #[test]
    fn relay_mode_does_not_need_a_model() {
        let file = write_config(
            r#"{
                "vk": { "group_id": 1, "peer_id": 2 },
                "tg": { "chat_id": 3, "channel": "@relay" },
                "moderation": { "enabled": false },
                "workers": 2
            }"#,
        );
        let config = Config::from_path(file.path()).expect("valid config");
        assert!(!config.moderation.enabled);
        assert!(config.model_source().is_none());
        assert_eq!(config.workers, 2);
    }

    #[test]
    fn moderation_without_model_is_rejected() {
        let file = write_config(
            r#"{
                "vk": { "group_id": 1, "peer_id": 2 },
                "tg": { "chat_id": 3, "channel": "@relay" }
            }"#,
        );
        let err = Config::from_path(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let file = write_config(
            r#"{
                "vk": { "group_id": 1, "peer_id": 2 },
                "tg": { "chat_id": 3, "channel": "@relay" },
                "model": "m",
                "workers": 0
            }"#,
        );
        assert!(matches!(
            Config::from_path(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let file = write_config("{ not json");
        assert!(matches!(
            Config::from_path(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let missing = dir.path().join("absent.json");
        assert!(matches!(
            Config::from_path(&missing),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn credentials_require_both_tokens() {
        let mut vars = HashMap::new();
        vars.insert(VK_TOKEN_ENV.to_string(), "vk".to_string());
        let err = credentials(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(TG_TOKEN_ENV)));

        vars.insert(TG_TOKEN_ENV.to_string(), String::new());
        assert!(credentials(&vars).is_err());

        vars.insert(TG_TOKEN_ENV.to_string(), "tg".to_string());
        let creds = credentials(&vars).expect("both tokens");
        assert_eq!(creds.vk_token, "vk");
        assert_eq!(creds.tg_token, "tg");
        let debug = format!("{creds:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("\"tg\""));
    }

    #[test]
    fn unreadable_token_variable_is_invalid() {
        let err = Credentials::from_lookup(|name| {
            Err(ConfigError::Invalid(format!("{name} is not valid UTF-8")))
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains(VK_TOKEN_ENV)));
    }

    #[test]
    fn env_file_sets_missing_variables_only() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "PHOTO_RELAY_ENV_FILE_CHECK=from-file").unwrap();
        writeln!(file, "PATH=/nowhere").unwrap();

        assert!(load_env_file(file.path()).expect("readable env file"));
        assert_eq!(
            env::var("PHOTO_RELAY_ENV_FILE_CHECK").as_deref(),
            Ok("from-file")
        );
        assert_ne!(env::var("PATH").as_deref(), Ok("/nowhere"));
    }

    #[test]
    fn missing_env_file_is_skipped() {
        let dir = tempfile::tempdir().expect("temp dir");
        let loaded = load_env_file(&dir.path().join(ENV_FILE)).expect("missing file is fine");
        assert!(!loaded);
    }
}
