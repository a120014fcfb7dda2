use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::vit;
use hf_hub::{api::sync::Api, Repo, RepoType};
use image::{ImageBuffer, Rgb};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use super::{canonical_label, scores_from_probabilities, ContentFilter, ModelSource};
use crate::frame::{ClassificationTensor, RGB_CHANNELS};
use crate::policy::CategoryScores;

const DEFAULT_IMAGE_SIZE: usize = 224;
const WEIGHTS_FILE: &str = "model.safetensors";
const CONFIG_FILE: &str = "config.json";

// Class order of LukeJacob2023/nsfw-image-detector, used when the model
// config carries no id2label map.
const DEFAULT_LABELS: [&str; 5] = ["drawings", "hentai", "neutral", "porn", "sexy"];

#[derive(Debug, Deserialize)]
struct ModelMeta {
    #[serde(default)]
    id2label: BTreeMap<String, String>,
    #[serde(default)]
    image_size: Option<usize>,
}

/// NSFW filter backed by a ViT image classifier.
/// Labels are read from the model config and canonicalised.
pub struct NsfwFilter {
    model: Mutex<vit::Model>,
    device: Device,
    labels: Vec<String>,
    image_size: usize,
}

impl NsfwFilter {
    pub fn load(source: &ModelSource) -> Result<Self> {
        #[cfg(feature = "metal")]
        let device = Device::new_metal(0).unwrap_or(Device::Cpu);
        #[cfg(not(feature = "metal"))]
        let device = Device::Cpu;

        log::info!("Loading NSFW detection model from {} on {:?}", source, device);

        let (model_path, config_path) = resolve_files(source)?;
        let raw_config = std::fs::read_to_string(&config_path)
            .with_context(|| format!("reading {}", config_path.display()))?;

        let config: vit::Config = serde_json::from_str(&raw_config)?;
        let meta: ModelMeta = serde_json::from_str(&raw_config)?;
        let labels = labels_from_meta(&meta)?;
        let image_size = meta.image_size.unwrap_or(DEFAULT_IMAGE_SIZE);

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[model_path], DType::F32, &device)? };
        let model = vit::Model::new(&config, labels.len(), vb)?;

        log::info!(
            "NSFW model loaded ({} classes: {}, input {}x{})",
            labels.len(),
            labels.join(", "),
            image_size,
            image_size
        );

        Ok(Self {
            model: Mutex::new(model),
            device,
            labels,
            image_size,
        })
    }

    /// Resizes to the model's square input and normalizes into NCHW.
    fn preprocess(&self, tensor: ClassificationTensor) -> Result<Tensor> {
        let (width, height) = (tensor.width() as u32, tensor.height() as u32);
        if width == 0 || height == 0 {
            return Err(anyhow!("empty image {}x{}", width, height));
        }

        let img: ImageBuffer<Rgb<u8>, _> = ImageBuffer::from_raw(width, height, tensor.into_raw())
            .ok_or_else(|| anyhow!("Invalid image dimensions"))?;
        let size = self.image_size;
        let resized = image::imageops::resize(
            &img,
            size as u32,
            size as u32,
            image::imageops::FilterType::Triangle,
        );
        drop(img);

        // The detector uses mean=0.5, std=0.5 for all channels
        let mean = 0.5;
        let std = 0.5;
        let plane = size * size;
        let mut data = vec![0f32; RGB_CHANNELS * plane];
        for (i, pixel) in resized.pixels().enumerate() {
            for c in 0..RGB_CHANNELS {
                data[c * plane + i] = (pixel[c] as f32 / 255.0 - mean) / std;
            }
        }

        Ok(Tensor::from_vec(data, (1, RGB_CHANNELS, size, size), &self.device)?)
    }
}

impl ContentFilter for NsfwFilter {
    fn classify(&self, tensor: ClassificationTensor) -> Result<CategoryScores> {
        let [height, width, _] = tensor.shape();
        let input = self.preprocess(tensor)?;

        let logits = {
            let model = self.model.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            model.forward(&input)?
        };

        let probs = candle_nn::ops::softmax(&logits, 1)?;
        let probs_vec: Vec<f32> = probs.flatten_all()?.to_vec1()?;
        let scores = scores_from_probabilities(&self.labels, &probs_vec)?;

        log::debug!("[NSFW] classified {}x{} image: {:?}", width, height, scores);
        Ok(scores)
    }
}

fn resolve_files(source: &ModelSource) -> Result<(PathBuf, PathBuf)> {
    match source {
        ModelSource::Local(dir) => {
            let model_path = dir.join(WEIGHTS_FILE);
            let config_path = dir.join(CONFIG_FILE);
            for path in [&model_path, &config_path] {
                if !path.is_file() {
                    return Err(anyhow!("missing model file {}", path.display()));
                }
            }
            Ok((model_path, config_path))
        }
        ModelSource::Hub(repo_id) => {
            let api = Api::new()?;
            let repo = api.repo(Repo::new(repo_id.clone(), RepoType::Model));
            Ok((repo.get(WEIGHTS_FILE)?, repo.get(CONFIG_FILE)?))
        }
    }
}

fn labels_from_meta(meta: &ModelMeta) -> Result<Vec<String>> {
    if meta.id2label.is_empty() {
        return Ok(DEFAULT_LABELS.iter().map(|l| canonical_label(l)).collect());
    }

    let mut indexed = Vec::with_capacity(meta.id2label.len());
    for (id, label) in &meta.id2label {
        let index: usize = id
            .parse()
            .with_context(|| format!("non-numeric class id '{id}' in id2label"))?;
        indexed.push((index, canonical_label(label)));
    }
    indexed.sort_by_key(|(index, _)| *index);

    if indexed.iter().enumerate().any(|(pos, (index, _))| pos != *index) {
        return Err(anyhow!("id2label class ids are not contiguous from 0"));
    }
    Ok(indexed.into_iter().map(|(_, label)| label).collect())
}
