//! SCARF contrastive wrapper around an encoder-combiner model
//!
//! The anchor batch and its corrupted copy go through the same encoders,
//! combiner and projection head. The loss ignores supervised targets.

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::corrupt::FeatureCorruptor;
use crate::dataset::Batch;
use crate::loss::SimClrLoss;
use crate::metadata::TrainingSetMetadata;
use crate::model::EcdModel;
use crate::projection::{HeadType, ProjectionHead};
use crate::trainer::TrainableModel;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScarfConfig {
    pub corruption_rate: f64,
    pub temperature: f64,
    pub projection_hidden: usize,
    pub projection_dim: usize,
    pub head_type: HeadType,
}

impl Default for ScarfConfig {
    fn default() -> Self {
        Self {
            corruption_rate: 0.6,
            temperature: 1.0,
            projection_hidden: 256,
            projection_dim: 64,
            head_type: HeadType::Nonlinear,
        }
    }
}

pub struct ScarfModel<'a> {
    model: &'a EcdModel,
    metadata: &'a TrainingSetMetadata,
    projection_head: ProjectionHead,
    corruptor: FeatureCorruptor,
    loss_fn: SimClrLoss,
    rng: StdRng,
    device: Device,
}

impl<'a> ScarfModel<'a> {
    pub fn new(
        model: &'a EcdModel,
        metadata: &'a TrainingSetMetadata,
        config: &ScarfConfig,
        batch_size: usize,
        seed: u64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let device = vb.device().clone();
        let projection_head = ProjectionHead::new(
            model.combiner().output_size(),
            config.projection_hidden,
            config.projection_dim,
            config.head_type,
            vb.pp("projection_head"),
        )?;
        let corruptor = FeatureCorruptor::new(config.corruption_rate, model.input_features().len())?;
        if corruptor.num_corrupted() == 0 {
            tracing::warn!(
                "corruption_rate {} corrupts no features out of {}; anchor and corrupted views are identical",
                config.corruption_rate,
                model.input_features().len()
            );
        }
        let loss_fn = SimClrLoss::new(batch_size, config.temperature, &device)
            .context("Failed to build contrastive loss")?;

        Ok(Self {
            model,
            metadata,
            projection_head,
            corruptor,
            loss_fn,
            rng: StdRng::seed_from_u64(seed),
            device,
        })
    }

    pub fn corruptor(&self) -> &FeatureCorruptor {
        &self.corruptor
    }

    fn embed(&self, inputs: &BTreeMap<String, Tensor>, train: bool) -> Result<Tensor> {
        let hidden = self.model.combine(inputs)?;
        Ok(self.projection_head.forward_t(&hidden, train)?)
    }

    /// Anchor and corrupted embeddings for one batch.
    pub fn forward(&mut self, inputs: &BTreeMap<String, Tensor>, train: bool) -> Result<(Tensor, Tensor)> {
        let anchor = self.embed(inputs, train)?;
        let corrupted_inputs = self.corruptor.corrupt(
            self.model.input_features(),
            inputs,
            self.metadata,
            &mut self.rng,
            &self.device,
        )?;
        let corrupted = self.embed(&corrupted_inputs, train)?;
        Ok((anchor, corrupted))
    }

    pub fn loss(&self, anchor: &Tensor, corrupted: &Tensor) -> Result<Tensor> {
        Ok(self.loss_fn.forward(anchor, corrupted)?)
    }
}

impl TrainableModel for ScarfModel<'_> {
    fn train_loss(&mut self, batch: &Batch) -> Result<Tensor> {
        let (anchor, corrupted) = self.forward(&batch.inputs, true)?;
        self.loss(&anchor, &corrupted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::{toy_config, toy_dataset};
    use candle_core::DType;
    use candle_nn::VarMap;

    fn build<'a>(
        model: &'a EcdModel,
        metadata: &'a TrainingSetMetadata,
        config: &ScarfConfig,
        varmap: &VarMap,
    ) -> Result<ScarfModel<'a>> {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        ScarfModel::new(model, metadata, config, 4, 0, vb)
    }

    #[test]
    fn test_embeddings_and_loss() -> Result<()> {
        let ds = toy_dataset(8)?;
        let metadata = TrainingSetMetadata::from_dataset(&ds, &BTreeMap::new());
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = EcdModel::new(&toy_config(), &metadata, vb)?;

        let config = ScarfConfig {
            projection_hidden: 16,
            projection_dim: 6,
            ..Default::default()
        };
        let mut scarf = build(&model, &metadata, &config, &varmap)?;
        assert_eq!(scarf.corruptor().num_corrupted(), 1);

        let batch = ds.batch(0, 4, &Device::Cpu)?;
        let (anchor, corrupted) = scarf.forward(&batch.inputs, true)?;
        assert_eq!(anchor.dims(), &[4, 6]);
        assert_eq!(corrupted.dims(), &[4, 6]);

        let loss = scarf.train_loss(&batch)?.to_scalar::<f32>()?;
        assert!(loss.is_finite() && loss > 0.0);
        Ok(())
    }

    #[test]
    fn test_wrong_runtime_batch_is_error() -> Result<()> {
        let ds = toy_dataset(8)?;
        let metadata = TrainingSetMetadata::from_dataset(&ds, &BTreeMap::new());
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = EcdModel::new(&toy_config(), &metadata, vb)?;
        let mut scarf = build(&model, &metadata, &ScarfConfig::default(), &varmap)?;

        let batch = ds.batch(0, 3, &Device::Cpu)?;
        assert!(scarf.train_loss(&batch).is_err());
        Ok(())
    }

    #[test]
    fn test_zero_corruption_gives_identical_views() -> Result<()> {
        let ds = toy_dataset(8)?;
        let metadata = TrainingSetMetadata::from_dataset(&ds, &BTreeMap::new());
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = EcdModel::new(&toy_config(), &metadata, vb)?;
        let config = ScarfConfig {
            corruption_rate: 0.2,
            projection_hidden: 8,
            projection_dim: 4,
            ..Default::default()
        };
        let mut scarf = build(&model, &metadata, &config, &varmap)?;
        assert_eq!(scarf.corruptor().num_corrupted(), 0);

        let batch = ds.batch(0, 4, &Device::Cpu)?;
        let (anchor, corrupted) = scarf.forward(&batch.inputs, false)?;
        assert_eq!(anchor.to_vec2::<f32>()?, corrupted.to_vec2::<f32>()?);
        Ok(())
    }
}
