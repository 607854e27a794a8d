//! SCARF feature corruption
//!
//! Every row gets exactly `k = floor(rate * num_features)` corrupted
//! features; which ones is drawn independently per row. A corrupted cell is
//! replaced by a fresh draw from that feature's marginal distribution.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;
use rand::RngCore;

use crate::features::InputFeature;
use crate::metadata::TrainingSetMetadata;

/// Row-major `batch_size × num_features` boolean mask.
#[derive(Debug, Clone, PartialEq)]
pub struct CorruptionMask {
    batch_size: usize,
    num_features: usize,
    cells: Vec<bool>,
}

impl CorruptionMask {
    pub fn sample(batch_size: usize, num_features: usize, k: usize, rng: &mut dyn RngCore) -> Self {
        let k = k.min(num_features);
        let mut cells = Vec::with_capacity(batch_size * num_features);
        let mut row = vec![false; num_features];
        for _ in 0..batch_size {
            row.iter_mut().enumerate().for_each(|(j, cell)| *cell = j < k);
            row.shuffle(rng);
            cells.extend_from_slice(&row);
        }
        Self {
            batch_size,
            num_features,
            cells,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn get(&self, row: usize, col: usize) -> bool {
        self.cells[row * self.num_features + col]
    }

    pub fn row_count(&self, row: usize) -> usize {
        self.cells[row * self.num_features..(row + 1) * self.num_features]
            .iter()
            .filter(|&&c| c)
            .count()
    }

    pub fn column(&self, col: usize) -> Vec<bool> {
        (0..self.batch_size).map(|row| self.get(row, col)).collect()
    }

    /// Column `col` as a `u8` tensor broadcast to `shape` (batch first).
    pub fn column_mask(&self, col: usize, shape: &[usize], device: &Device) -> Result<Tensor> {
        let values: Vec<u8> = self.column(col).into_iter().map(u8::from).collect();
        let mut view = vec![1usize; shape.len()];
        view[0] = self.batch_size;
        let mask = Tensor::from_vec(values, view, device)?.broadcast_as(shape)?;
        Ok(mask)
    }
}

#[derive(Debug, Clone)]
pub struct FeatureCorruptor {
    corruption_rate: f64,
    num_corrupted: usize,
}

impl FeatureCorruptor {
    pub fn new(corruption_rate: f64, num_features: usize) -> Result<Self> {
        if !(0.0..1.0).contains(&corruption_rate) {
            bail!("corruption_rate must be in [0, 1), got {}", corruption_rate);
        }
        Ok(Self {
            corruption_rate,
            num_corrupted: (corruption_rate * num_features as f64).floor() as usize,
        })
    }

    pub fn corruption_rate(&self) -> f64 {
        self.corruption_rate
    }

    pub fn num_corrupted(&self) -> usize {
        self.num_corrupted
    }

    /// Corrupted copy of `inputs`, built against `features` in order.
    pub fn corrupt(
        &self,
        features: &[Box<dyn InputFeature>],
        inputs: &BTreeMap<String, Tensor>,
        metadata: &TrainingSetMetadata,
        rng: &mut dyn RngCore,
        device: &Device,
    ) -> Result<BTreeMap<String, Tensor>> {
        let batch_size = match features.first() {
            Some(f) => batch_dim(inputs, f.name())?,
            None => return Ok(inputs.clone()),
        };

        let mut augmentations = Vec::with_capacity(features.len());
        for feature in features {
            let meta = metadata.get(feature.name())?;
            augmentations.push(feature.sample_augmentations(batch_size, meta, rng, device)?);
        }

        let mask = CorruptionMask::sample(batch_size, features.len(), self.num_corrupted, rng);

        let mut corrupted = BTreeMap::new();
        for (j, (feature, augmentation)) in features.iter().zip(augmentations).enumerate() {
            let values = inputs
                .get(feature.name())
                .with_context(|| format!("Batch has no feature {}", feature.name()))?;
            let augmentation = augmentation.to_dtype(values.dtype())?;
            let cond = mask.column_mask(j, values.dims(), device)?;
            corrupted.insert(feature.name().to_string(), cond.where_cond(&augmentation, values)?);
        }
        Ok(corrupted)
    }
}

fn batch_dim(inputs: &BTreeMap<String, Tensor>, name: &str) -> Result<usize> {
    let t = inputs
        .get(name)
        .with_context(|| format!("Batch has no feature {}", name))?;
    Ok(t.dim(0)?)
}

/// Fraction of set cells per feature column.
pub fn column_frequencies(mask: &CorruptionMask) -> Vec<f64> {
    (0..mask.num_features())
        .map(|j| mask.column(j).iter().filter(|&&c| c).count() as f64 / mask.batch_size().max(1) as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use crate::features::{FeatureType, InputFeatureConfig, InputFeatureRegistry};
    use crate::metadata::FeatureMetadata;
    use candle_nn::{VarBuilder, VarMap};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_fixed_count_per_row() {
        let corruptor = FeatureCorruptor::new(0.6, 10).unwrap();
        assert_eq!(corruptor.num_corrupted(), 6);

        let mut rng = StdRng::seed_from_u64(7);
        let mask = CorruptionMask::sample(100, 10, corruptor.num_corrupted(), &mut rng);
        for row in 0..100 {
            assert_eq!(mask.row_count(row), 6);
        }
    }

    #[test]
    fn test_column_frequency_approaches_rate() {
        let mut rng = StdRng::seed_from_u64(11);
        let mask = CorruptionMask::sample(20_000, 10, 6, &mut rng);
        for freq in column_frequencies(&mask) {
            assert!((freq - 0.6).abs() < 0.03, "frequency {}", freq);
        }
    }

    #[test]
    fn test_rows_differ() {
        let mut rng = StdRng::seed_from_u64(5);
        let mask = CorruptionMask::sample(50, 10, 3, &mut rng);
        let first: Vec<bool> = (0..10).map(|j| mask.get(0, j)).collect();
        assert!((1..50).any(|i| (0..10).any(|j| mask.get(i, j) != first[j])));
    }

    #[test]
    fn test_invalid_rate() {
        assert!(FeatureCorruptor::new(1.0, 4).is_err());
        assert!(FeatureCorruptor::new(-0.1, 4).is_err());
    }

    fn setup(values: [f32; 3]) -> Result<(Vec<Box<dyn InputFeature>>, TrainingSetMetadata, BTreeMap<String, Tensor>)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let registry = InputFeatureRegistry::default();

        let mut metadata = TrainingSetMetadata::default();
        let mut features = Vec::new();
        let mut inputs = BTreeMap::new();
        for (name, marginal) in [("a", values[0]), ("b", values[1]), ("c", values[2])] {
            let meta = FeatureMetadata::new(vec![1], vec![marginal; 4]);
            let config = InputFeatureConfig {
                name: name.to_string(),
                feature_type: FeatureType::Number,
                output_size: 2,
            };
            features.push(registry.build(&config, &meta, vb.clone())?);
            metadata.features.insert(name.to_string(), meta);
            inputs.insert(name.to_string(), Tensor::zeros((8, 1), DType::F32, &Device::Cpu)?);
        }
        Ok((features, metadata, inputs))
    }

    #[test]
    fn test_corrupt_replaces_exactly_k_cells() -> Result<()> {
        let (features, metadata, inputs) = setup([1.0, 1.0, 1.0])?;
        let corruptor = FeatureCorruptor::new(0.7, 3)?;
        assert_eq!(corruptor.num_corrupted(), 2);

        let mut rng = StdRng::seed_from_u64(2);
        let out = corruptor.corrupt(&features, &inputs, &metadata, &mut rng, &Device::Cpu)?;
        let cols: Vec<Vec<f32>> = ["a", "b", "c"]
            .iter()
            .map(|n| out[*n].flatten_all()?.to_vec1::<f32>())
            .collect::<candle_core::Result<_>>()?;
        for row in 0..8 {
            let replaced = cols.iter().filter(|c| c[row] == 1.0).count();
            assert_eq!(replaced, 2);
        }
        Ok(())
    }

    #[test]
    fn test_zero_k_leaves_batch_unchanged() -> Result<()> {
        let (features, metadata, inputs) = setup([5.0, 6.0, 7.0])?;
        let corruptor = FeatureCorruptor::new(0.2, 3)?;
        assert_eq!(corruptor.num_corrupted(), 0);

        let mut rng = StdRng::seed_from_u64(4);
        let out = corruptor.corrupt(&features, &inputs, &metadata, &mut rng, &Device::Cpu)?;
        for (name, t) in &inputs {
            assert_eq!(out[name].to_vec2::<f32>()?, t.to_vec2::<f32>()?);
        }
        Ok(())
    }
}
