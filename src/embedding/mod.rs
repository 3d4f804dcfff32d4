//! Image-to-vector embedding pipeline.
//!
//! Provides the [`ImageEmbedder`] trait, a local ONNX implementation created via
//! [`create_embedder`], and [`EmbeddingMatrix`]: the L2-normalized embeddings of one batch
//! of media items, computed once and borrowed by every consumer.

pub mod local;

use anyhow::{anyhow, Result};
use image::DynamicImage;
use ndarray::{Array2, ArrayView1, ArrayView2};
use std::time::{Duration, Instant};

use crate::error::{InputError, PipelineError};
use crate::media::types::MediaItem;
use crate::pipeline::ImageStore;

/// Trait for embedding images into vectors.
///
/// Implementations need not normalize; [`EmbeddingMatrix`] does. Methods are
/// synchronous, so async callers should use `tokio::task::spawn_blocking`.
pub trait ImageEmbedder: Send + Sync {
    fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>>;

    /// Model identifier, for logs.
    fn model_name(&self) -> &str;
}

/// Create an image embedder from config.
///
/// Currently only `"local"` is supported (ONNX Runtime).
pub fn create_embedder(
    config: &crate::config::EmbeddingConfig,
) -> Result<Box<dyn ImageEmbedder>> {
    match config.provider.as_str() {
        "local" => Ok(Box::new(local::OnnxImageEmbedder::new(config)?)),
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: local"),
    }
}

/// Row-aligned, L2-normalized embeddings: row `i` belongs to `media_items[i]`.
#[derive(Debug, Clone)]
pub struct EmbeddingMatrix {
    rows: Array2<f32>,
}

impl EmbeddingMatrix {
    /// Embed every item's cached image, in order.
    ///
    /// Resolution failures from the image store propagate; the caller is expected to
    /// have cached every image beforehand.
    pub fn compute(
        media_items: &[MediaItem],
        images: &dyn ImageStore,
        embedder: &dyn ImageEmbedder,
    ) -> Result<Self, PipelineError> {
        if media_items.is_empty() {
            return Err(InputError::EmptyItems.into());
        }

        let total = media_items.len();
        tracing::info!(total, model = embedder.model_name(), "calculating embeddings");
        let started = Instant::now();
        let mut last_log = Instant::now();

        let mut vectors = Vec::with_capacity(total);
        for (i, item) in media_items.iter().enumerate() {
            let key = item.storage_filename.as_deref().ok_or_else(|| {
                PipelineError::Other(anyhow!("media item {} has no cached image", item.id))
            })?;
            let image = images.resolve(key)?;
            vectors.push(embedder.embed(&image)?);

            if last_log.elapsed() > Duration::from_secs(3) {
                tracing::info!("calculated embeddings for {} of {total} images", i + 1);
                last_log = Instant::now();
            }
        }

        let matrix = Self::from_rows(vectors)?;
        matrix.ensure_aligned(total)?;
        tracing::info!(
            total,
            dimensions = matrix.dimensions(),
            "calculated embeddings in {:.2}s",
            started.elapsed().as_secs_f32()
        );
        Ok(matrix)
    }

    /// Build from raw vectors, normalizing each row.
    pub fn from_rows(vectors: Vec<Vec<f32>>) -> Result<Self, InputError> {
        let dims = vectors.first().ok_or(InputError::EmptyItems)?.len();
        if dims == 0 {
            return Err(InputError::ZeroDimension);
        }

        let mut flat = Vec::with_capacity(vectors.len() * dims);
        for (row, v) in vectors.iter().enumerate() {
            if v.len() != dims {
                return Err(InputError::RaggedRows {
                    row,
                    expected: dims,
                    found: v.len(),
                });
            }
            flat.extend(l2_normalize(v));
        }

        let rows = Array2::from_shape_vec((vectors.len(), dims), flat)
            .expect("row lengths checked above");
        Ok(Self { rows })
    }

    /// Fail fast when the matrix and the item list have drifted apart.
    pub fn ensure_aligned(&self, items: usize) -> Result<(), InputError> {
        if self.len() != items {
            return Err(InputError::LengthMismatch {
                items,
                rows: self.len(),
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.nrows() == 0
    }

    pub fn dimensions(&self) -> usize {
        self.rows.ncols()
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.rows.view()
    }

    pub fn row(&self, i: usize) -> ArrayView1<'_, f32> {
        self.rows.row(i)
    }

    /// Cosine similarity between rows `i` and `j`.
    pub fn similarity(&self, i: usize, j: usize) -> f32 {
        self.rows.row(i).dot(&self.rows.row(j))
    }
}

/// L2-normalize a vector. Returns the input unchanged if its norm is zero.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize() {
        let normalized = l2_normalize(&[3.0, 4.0]);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        assert_eq!(l2_normalize(&[0.0, 0.0, 0.0]), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn from_rows_normalizes_each_row() {
        let m = EmbeddingMatrix::from_rows(vec![vec![3.0, 4.0], vec![0.0, 2.0]]).unwrap();
        assert_eq!(m.len(), 2);
        assert_eq!(m.dimensions(), 2);
        for i in 0..m.len() {
            let norm: f32 = m.row(i).iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-6);
        }
        assert!((m.similarity(0, 1) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn from_rows_rejects_bad_input() {
        assert_eq!(
            EmbeddingMatrix::from_rows(vec![]).unwrap_err(),
            InputError::EmptyItems
        );
        assert_eq!(
            EmbeddingMatrix::from_rows(vec![vec![]]).unwrap_err(),
            InputError::ZeroDimension
        );
        assert_eq!(
            EmbeddingMatrix::from_rows(vec![vec![1.0, 0.0], vec![1.0]]).unwrap_err(),
            InputError::RaggedRows {
                row: 1,
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn ensure_aligned_detects_mismatch() {
        let m = EmbeddingMatrix::from_rows(vec![vec![1.0], vec![2.0]]).unwrap();
        assert!(m.ensure_aligned(2).is_ok());
        assert_eq!(
            m.ensure_aligned(3).unwrap_err(),
            InputError::LengthMismatch { items: 3, rows: 2 }
        );
    }
}
