//! Image decoding into fixed-size feature vectors.

use crate::data::dataset::Dataset;
use crate::error::{AutoClassError, Result};
use image::imageops::FilterType;
use std::path::Path;

/// Turns an image reference into a flat feature vector of `feature_dim()`
/// values. Implementations must be deterministic.
pub trait ImageLoader: Send + Sync {
    fn feature_dim(&self) -> usize;
    fn load(&self, path: &Path) -> Result<Vec<f32>>;
}

/// Reference loader: decode, resize to `side x side` RGB and scale to [0, 1]
/// in CHW order.
#[derive(Debug, Clone, Copy)]
pub struct ImageDecoder {
    side: u32,
}

impl ImageDecoder {
    pub fn new(side: u32) -> Self {
        Self { side: side.max(1) }
    }

    pub fn side(&self) -> u32 {
        self.side
    }
}

impl ImageLoader for ImageDecoder {
    fn feature_dim(&self) -> usize {
        3 * (self.side as usize) * (self.side as usize)
    }

    fn load(&self, path: &Path) -> Result<Vec<f32>> {
        let img = image::open(path)?;
        let rgb =
            image::imageops::resize(&img.to_rgb8(), self.side, self.side, FilterType::Triangle);
        let mut out = Vec::with_capacity(self.feature_dim());
        for c in 0..3 {
            for y in 0..self.side {
                for x in 0..self.side {
                    out.push(rgb.get_pixel(x, y)[c] as f32 / 255.0);
                }
            }
        }
        Ok(out)
    }
}

/// Decoded features for every sample of a dataset, indexed like the dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    rows: Vec<Vec<f32>>,
    dim: usize,
}

impl FeatureTable {
    /// Decode every sample once.
    pub fn build(dataset: &Dataset, loader: &dyn ImageLoader) -> Result<Self> {
        let dim = loader.feature_dim();
        let mut rows = Vec::with_capacity(dataset.len());
        for sample in dataset.samples() {
            let row = loader.load(&sample.path).inspect_err(|e| {
                tracing::warn!(path = %sample.path.display(), error = %e, "Failed to decode image");
            })?;
            rows.push(row);
        }
        tracing::debug!(samples = rows.len(), dim, "Decoded feature table");
        Self::from_rows(rows, dim)
    }

    /// Wrap pre-computed rows, checking that each has `dim` values.
    pub fn from_rows(rows: Vec<Vec<f32>>, dim: usize) -> Result<Self> {
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != dim) {
            return Err(AutoClassError::data_format(format!(
                "feature row {i} has {} values, expected {dim}",
                row.len()
            )));
        }
        Ok(Self { rows, dim })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> &[f32] {
        &self.rows[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::Sample;
    use tempfile::TempDir;

    #[test]
    fn test_decoder_resizes_and_normalizes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("red.png");
        image::RgbImage::from_pixel(10, 6, image::Rgb([255, 0, 51]))
            .save(&path)
            .unwrap();

        let decoder = ImageDecoder::new(4);
        let features = decoder.load(&path).unwrap();
        assert_eq!(features.len(), decoder.feature_dim());
        assert_eq!(features.len(), 48);
        assert!(features[..16].iter().all(|v| (*v - 1.0).abs() < 1e-6));
        assert!(features[16..32].iter().all(|v| v.abs() < 1e-6));
        assert!(features[32..].iter().all(|v| (*v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_decoder_rejects_non_image() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fake.png");
        std::fs::write(&path, b"not a png").unwrap();
        let err = ImageDecoder::new(4).load(&path).unwrap_err();
        assert!(matches!(err, AutoClassError::Image(_)));
    }

    #[test]
    fn test_from_rows_checks_dim() {
        assert!(FeatureTable::from_rows(vec![vec![0.0; 3], vec![0.0; 2]], 3).is_err());
        let table = FeatureTable::from_rows(vec![vec![1.0, 2.0]], 2).unwrap();
        assert_eq!(table.row(0), &[1.0, 2.0]);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_build_follows_dataset_order() {
        let dir = TempDir::new().unwrap();
        let mut samples = Vec::new();
        for (i, shade) in [0u8, 255].iter().enumerate() {
            let path = dir.path().join(format!("{i}.png"));
            image::RgbImage::from_pixel(2, 2, image::Rgb([*shade; 3]))
                .save(&path)
                .unwrap();
            samples.push(Sample {
                path,
                label: "gray".into(),
                class_id: Some(0),
            });
        }
        let ds = Dataset::new(dir.path(), vec!["gray".into()], samples).unwrap();
        let table = FeatureTable::build(&ds, &ImageDecoder::new(2)).unwrap();
        assert_eq!(table.dim(), 12);
        assert!(table.row(0).iter().all(|v| *v == 0.0));
        assert!(table.row(1).iter().all(|v| *v == 1.0));
    }
}
