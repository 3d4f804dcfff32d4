//! Local ONNX Runtime image embedder.
//!
//! Implements [`ImageEmbedder`] with an image feature-extractor model (MobileNetV3 by
//! default) via `ort`. Handles resizing, ImageNet normalization, NCHW layout, and
//! flattening of the model output.

use std::sync::Mutex;

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::DynamicImage;
use ort::session::Session;
use ort::value::Tensor;

use super::{l2_normalize, ImageEmbedder};
use crate::config::EmbeddingConfig;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

pub struct OnnxImageEmbedder {
    session: Mutex<Session>,
    model: String,
    input_name: String,
    input_size: u32,
}

impl OnnxImageEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_path = crate::config::expand_tilde(&config.cache_dir).join("model.onnx");

        anyhow::ensure!(
            model_path.exists(),
            "ONNX model not found at {}. Run `photo-dedup model download --url <URL>` first.",
            model_path.display()
        );

        let session = Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&model_path)
            .context("failed to load ONNX model")?;

        tracing::info!(model = %model_path.display(), "ONNX model loaded");

        Ok(Self {
            session: Mutex::new(session),
            model: config.model.clone(),
            input_name: config.input_name.clone(),
            input_size: config.input_size,
        })
    }
}

impl ImageEmbedder for OnnxImageEmbedder {
    fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        let (shape, pixels) = preprocess(image, self.input_size);
        let input = Tensor::from_array((shape, pixels.into_boxed_slice()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;

        let outputs = session.run(ort::inputs! {
            self.input_name.as_str() => input,
        })?;

        // Feature extractors emit [1, D] or [1, D, 1, 1]; both flatten to D values.
        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("failed to extract embedding tensor")?;
        anyhow::ensure!(!data.is_empty(), "model returned an empty embedding");

        Ok(l2_normalize(data))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Resize to `size`², scale to [0, 1], apply ImageNet mean/std, lay out as NCHW.
fn preprocess(image: &DynamicImage, size: u32) -> (Vec<i64>, Vec<f32>) {
    let rgb = image
        .resize_exact(size, size, FilterType::Triangle)
        .to_rgb8();
    let side = size as usize;
    let plane = side * side;

    let mut data = vec![0.0f32; 3 * plane];
    for (x, y, px) in rgb.enumerate_pixels() {
        let idx = y as usize * side + x as usize;
        for c in 0..3 {
            data[c * plane + idx] = (px[c] as f32 / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }

    (vec![1, 3, side as i64, side as i64], data)
}
