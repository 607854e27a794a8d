//! Training set metadata
//!
//! Per-feature shapes plus the training column itself, which serves as
//! the marginal distribution for corruption.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use candle_core::{Device, Tensor};
use vecta_core::Vector2DMetadata;

use crate::dataset::Dataset;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureMetadata {
    pub row_shape: Vec<usize>,
    pub num_rows: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector2d: Option<Vector2DMetadata>,
    /// Flat training rows to draw replacements from.
    #[serde(skip)]
    marginal: Vec<f32>,
}

impl FeatureMetadata {
    pub fn new(row_shape: Vec<usize>, marginal: Vec<f32>) -> Self {
        let row_len = row_shape.iter().product::<usize>().max(1);
        Self {
            num_rows: marginal.len() / row_len,
            row_shape,
            vector2d: None,
            marginal,
        }
    }

    pub fn with_vector2d(mut self, meta: Vector2DMetadata) -> Self {
        self.vector2d = Some(meta);
        self
    }

    pub fn row_len(&self) -> usize {
        self.row_shape.iter().product()
    }

    /// Draw `batch_size` rows uniformly, with replacement, as a
    /// `(batch_size, row_shape..)` tensor.
    pub fn sample_marginal(&self, batch_size: usize, rng: &mut dyn RngCore, device: &Device) -> Result<Tensor> {
        if self.num_rows == 0 {
            anyhow::bail!("No training rows to sample from");
        }
        let row_len = self.row_len();
        let mut data = Vec::with_capacity(batch_size * row_len);
        for _ in 0..batch_size {
            let idx = rng.gen_range(0..self.num_rows);
            data.extend_from_slice(&self.marginal[idx * row_len..(idx + 1) * row_len]);
        }
        let mut shape = vec![batch_size];
        shape.extend_from_slice(&self.row_shape);
        Ok(Tensor::from_vec(data, shape, device)?)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingSetMetadata {
    pub features: BTreeMap<String, FeatureMetadata>,
}

impl TrainingSetMetadata {
    /// One entry per dataset column; vector2d metadata attached by name.
    pub fn from_dataset(dataset: &Dataset, vector2d: &BTreeMap<String, Vector2DMetadata>) -> Self {
        let features = dataset
            .columns()
            .iter()
            .map(|column| {
                let mut meta = FeatureMetadata::new(column.row_shape.clone(), column.values().to_vec());
                if let Some(v) = vector2d.get(&column.name) {
                    meta = meta.with_vector2d(v.clone());
                }
                (column.name.clone(), meta)
            })
            .collect();
        Self { features }
    }

    pub fn get(&self, name: &str) -> Result<&FeatureMetadata> {
        self.features
            .get(name)
            .with_context(|| format!("No training set metadata for feature {}", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Column;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_sample_marginal_draws_training_rows() -> Result<()> {
        let meta = FeatureMetadata::new(vec![2], vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
        let mut rng = StdRng::seed_from_u64(0);
        let sample = meta.sample_marginal(50, &mut rng, &Device::Cpu)?;
        assert_eq!(sample.dims(), &[50, 2]);
        for row in sample.to_vec2::<f32>()? {
            assert_eq!(row[0], row[1]);
            assert!([1.0, 2.0, 3.0].contains(&row[0]));
        }
        Ok(())
    }

    #[test]
    fn test_from_dataset() -> Result<()> {
        let ds = Dataset::new(vec![Column::numbers("x", vec![0.5, 1.5])?])?;
        let meta = TrainingSetMetadata::from_dataset(&ds, &BTreeMap::new());
        assert_eq!(meta.get("x")?.num_rows, 2);
        assert!(meta.get("y").is_err());
        assert!(serde_json::to_string(&meta).is_ok());
        Ok(())
    }
}
