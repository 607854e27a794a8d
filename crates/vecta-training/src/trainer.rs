//! Training orchestration

use anyhow::{bail, Result};
use candle_core::{Device, Tensor};
use candle_nn::{optim::AdamW, Optimizer, ParamsAdamW, VarMap};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::{Batch, Dataset};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub log_interval: usize,
    pub save_interval: usize,
    pub output_dir: String,
    pub max_steps: Option<usize>,
    /// Skip the trailing partial batch of every epoch.
    pub drop_last: bool,
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 3,
            batch_size: 128,
            learning_rate: 1e-3,
            weight_decay: 0.01,
            log_interval: 10,
            save_interval: 0,
            output_dir: "checkpoints".to_string(),
            max_steps: None,
            drop_last: false,
            seed: 42,
        }
    }
}

/// What the trainer needs from a model.
pub trait TrainableModel {
    /// Scalar loss for one training batch.
    fn train_loss(&mut self, batch: &Batch) -> Result<Tensor>;

    /// Mean loss over `dataset`, or `None` if the model does not evaluate.
    fn evaluation(&mut self, _dataset: &Dataset, _batch_size: usize, _device: &Device) -> Result<Option<f32>> {
        Ok(None)
    }
}

pub struct Trainer {
    config: TrainerConfig,
    device: Device,
}

impl Trainer {
    pub fn new(config: TrainerConfig, device: Device) -> Self {
        Self { config, device }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn train<M: TrainableModel>(
        &self,
        model: &mut M,
        varmap: &VarMap,
        dataset: &mut Dataset,
        validation: Option<&Dataset>,
    ) -> Result<TrainingMetrics> {
        if self.config.batch_size == 0 {
            bail!("batch_size must be positive");
        }
        if dataset.num_batches(self.config.batch_size, self.config.drop_last) == 0 {
            bail!(
                "Dataset of {} rows yields no batches of size {} (drop_last = {})",
                dataset.len(),
                self.config.batch_size,
                self.config.drop_last
            );
        }

        info!("Starting training");
        info!("  Epochs: {}", self.config.epochs);
        info!("  Batch size: {}", self.config.batch_size);
        info!("  Learning rate: {:.1e}", self.config.learning_rate);
        if let Some(max) = self.config.max_steps {
            info!("  Max steps: {}", max);
        }

        std::fs::create_dir_all(&self.config.output_dir)?;

        let mut optimizer = AdamW::new(
            varmap.all_vars(),
            ParamsAdamW {
                lr: self.config.learning_rate,
                beta1: 0.9,
                beta2: 0.999,
                eps: 1e-8,
                weight_decay: self.config.weight_decay,
            },
        )?;
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        let mut metrics = TrainingMetrics::new();
        let mut global_step: usize = 0;

        for epoch in 0..self.config.epochs {
            info!("[Epoch {}/{}]", epoch + 1, self.config.epochs);

            dataset.shuffle(&mut rng);

            let mut epoch_metrics = self.train_epoch(model, varmap, &mut optimizer, dataset, &mut global_step)?;
            if let Some(validation) = validation {
                epoch_metrics.validation_loss = model.evaluation(validation, self.config.batch_size, &self.device)?;
            }

            info!(
                "Epoch {} complete - avg loss: {:.4}{}",
                epoch + 1,
                epoch_metrics.avg_loss,
                epoch_metrics
                    .validation_loss
                    .map(|l| format!(" | validation loss: {:.4}", l))
                    .unwrap_or_default()
            );
            metrics.epochs.push(epoch_metrics);

            if let Some(max) = self.config.max_steps {
                if global_step >= max {
                    info!("Reached max_steps ({}), stopping.", max);
                    break;
                }
            }
        }

        let final_path = format!("{}/checkpoint-final.safetensors", self.config.output_dir);
        self.save_checkpoint(varmap, &final_path)?;
        info!("Final checkpoint saved to: {}", final_path);
        metrics.global_steps = global_step;

        Ok(metrics)
    }

    fn train_epoch<M: TrainableModel>(
        &self,
        model: &mut M,
        varmap: &VarMap,
        optimizer: &mut AdamW,
        dataset: &Dataset,
        global_step: &mut usize,
    ) -> Result<EpochMetrics> {
        let num_batches = dataset.num_batches(self.config.batch_size, self.config.drop_last);

        let pb = ProgressBar::new(num_batches as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {bar:40.cyan/blue} {pos}/{len} [{elapsed_precise}] {msg}")?,
        );

        let mut total_loss = 0.0;
        let mut num_steps = 0;
        let mut step_losses = Vec::new();

        for batch_idx in 0..num_batches {
            if let Some(max) = self.config.max_steps {
                if *global_step >= max {
                    break;
                }
            }

            let batch = dataset.batch(batch_idx, self.config.batch_size, &self.device)?;

            let loss = model.train_loss(&batch)?;
            let loss_val = loss.to_scalar::<f32>()?;

            total_loss += loss_val;
            num_steps += 1;
            step_losses.push(loss_val);

            optimizer.backward_step(&loss)?;
            *global_step += 1;

            if self.config.save_interval > 0 && *global_step % self.config.save_interval == 0 {
                let path = format!("{}/checkpoint-{}.safetensors", self.config.output_dir, global_step);
                self.save_checkpoint(varmap, &path)?;
                pb.println(format!("  Checkpoint saved: {}", path));
            }

            if self.config.log_interval > 0 && batch_idx % self.config.log_interval == 0 {
                pb.set_message(format!("loss: {:.4} | step: {}", loss_val, global_step));
            }

            pb.inc(1);
        }

        pb.finish_with_message("done");

        Ok(EpochMetrics {
            avg_loss: total_loss / num_steps.max(1) as f32,
            num_steps,
            step_losses,
            validation_loss: None,
        })
    }

    fn save_checkpoint(&self, varmap: &VarMap, path: &str) -> Result<()> {
        varmap.save(path)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub epochs: Vec<EpochMetrics>,
    pub global_steps: usize,
}

impl TrainingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn final_loss(&self) -> Option<f32> {
        self.epochs.last().map(|e| e.avg_loss)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub avg_loss: f32,
    pub num_steps: usize,
    pub step_losses: Vec<f32>,
    #[serde(default)]
    pub validation_loss: Option<f32>,
}
