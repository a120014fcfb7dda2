use anyhow::Result;
use std::fmt;
use std::path::PathBuf;

use crate::frame::ClassificationTensor;
use crate::policy::CategoryScores;

/// Pluggable content classifier for NSFW detection.
///
/// Implementations are loaded once and shared read-only between workers.
pub trait ContentFilter: Send + Sync {
    /// Scores one image. The tensor is consumed and freed when the call
    /// returns, whether it succeeds or not.
    fn classify(&self, tensor: ClassificationTensor) -> Result<CategoryScores>;
}

mod nsfw;

pub use nsfw::NsfwFilter;

const HUB_PREFIX: &str = "hf:";

/// Where the classifier weights come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// Directory holding `config.json` and `model.safetensors`.
    Local(PathBuf),
    /// Hugging Face hub repository id.
    Hub(String),
}

impl ModelSource {
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix(HUB_PREFIX) {
            Some(repo) => ModelSource::Hub(repo.to_string()),
            None => ModelSource::Local(PathBuf::from(raw)),
        }
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Local(path) => write!(f, "{}", path.display()),
            ModelSource::Hub(repo) => write!(f, "{HUB_PREFIX}{repo}"),
        }
    }
}

/// Maps model-specific label spellings onto Drawing/Hentai/Neutral/Porn/Sexy.
/// Unknown labels pass through unchanged.
pub fn canonical_label(raw: &str) -> String {
    match raw.to_ascii_lowercase().as_str() {
        "drawing" | "drawings" => "Drawing".to_string(),
        "hentai" => "Hentai".to_string(),
        "neutral" => "Neutral".to_string(),
        "porn" => "Porn".to_string(),
        "sexy" => "Sexy".to_string(),
        _ => raw.to_string(),
    }
}

/// Pairs class probabilities with their labels.
pub fn scores_from_probabilities(labels: &[String], probs: &[f32]) -> Result<CategoryScores> {
    if labels.len() != probs.len() {
        anyhow::bail!(
            "model returned {} probabilities for {} labels",
            probs.len(),
            labels.len()
        );
    }
    Ok(labels.iter().cloned().zip(probs.iter().copied()).collect())
}
