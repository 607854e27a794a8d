//! Self-supervised pretraining through the generic trainer

use anyhow::Result;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use tracing::info;

use crate::dataset::Dataset;
use crate::metadata::TrainingSetMetadata;
use crate::model::EcdModel;
use crate::scarf::{ScarfConfig, ScarfModel};
use crate::trainer::{Trainer, TrainerConfig, TrainingMetrics};

pub struct Pretrainer {
    trainer: Trainer,
    scarf: ScarfConfig,
}

impl Pretrainer {
    /// The contrastive loss is sized for one batch size, so partial
    /// batches are always dropped.
    pub fn new(mut config: TrainerConfig, scarf: ScarfConfig, device: Device) -> Self {
        config.drop_last = true;
        Self {
            trainer: Trainer::new(config, device),
            scarf,
        }
    }

    pub fn trainer(&self) -> &Trainer {
        &self.trainer
    }

    /// Train `model`'s encoders and combiner with the contrastive objective.
    /// `varmap` must hold the model's variables; the projection head is
    /// added to it.
    pub fn pretrain<'a>(
        &self,
        model: &'a EcdModel,
        varmap: &VarMap,
        dataset: &mut Dataset,
        metadata: &TrainingSetMetadata,
    ) -> Result<(&'a EcdModel, TrainingMetrics)> {
        let config = self.trainer.config();
        let vb = VarBuilder::from_varmap(varmap, DType::F32, self.trainer.device());
        let mut ssl_model = ScarfModel::new(model, metadata, &self.scarf, config.batch_size, config.seed, vb)?;

        info!(
            "Pretraining with corruption rate {} ({} of {} features per row), temperature {}",
            self.scarf.corruption_rate,
            ssl_model.corruptor().num_corrupted(),
            model.input_features().len(),
            self.scarf.temperature
        );

        let stats = self.trainer.train(&mut ssl_model, varmap, dataset, None)?;
        Ok((model, stats))
    }

    /// Pretraining reports training loss only.
    pub fn evaluation(&self, _model: &EcdModel, _dataset: &Dataset) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::{toy_config, toy_dataset};
    use std::collections::BTreeMap;

    #[test]
    fn test_pretrain_runs_full_batches_only() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut ds = toy_dataset(22)?;
        let metadata = TrainingSetMetadata::from_dataset(&ds, &BTreeMap::new());
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = EcdModel::new(&toy_config(), &metadata, vb)?;

        let config = TrainerConfig {
            epochs: 2,
            batch_size: 8,
            drop_last: false,
            output_dir: dir.path().to_string_lossy().into_owned(),
            ..Default::default()
        };
        let scarf = ScarfConfig {
            projection_hidden: 16,
            projection_dim: 8,
            ..Default::default()
        };
        let pretrainer = Pretrainer::new(config, scarf, Device::Cpu);
        assert!(pretrainer.trainer().config().drop_last);

        let (returned, stats) = pretrainer.pretrain(&model, &varmap, &mut ds, &metadata)?;
        assert!(std::ptr::eq(returned, &model));
        // 22 rows, batch 8: two full batches per epoch.
        assert!(stats.epochs.iter().all(|e| e.num_steps == 2));
        assert!(stats.epochs.iter().all(|e| e.validation_loss.is_none()));
        assert!(stats.final_loss().unwrap().is_finite());
        assert!(pretrainer.evaluation(&model, &ds).is_ok());
        Ok(())
    }

    #[test]
    fn test_pretrain_rejects_tiny_batch() -> Result<()> {
        let mut ds = toy_dataset(4)?;
        let metadata = TrainingSetMetadata::from_dataset(&ds, &BTreeMap::new());
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = EcdModel::new(&toy_config(), &metadata, vb)?;

        let config = TrainerConfig {
            batch_size: 1,
            ..Default::default()
        };
        let pretrainer = Pretrainer::new(config, ScarfConfig::default(), Device::Cpu);
        assert!(pretrainer.pretrain(&model, &varmap, &mut ds, &metadata).is_err());
        Ok(())
    }
}
