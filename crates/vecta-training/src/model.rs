//! Encoder-combiner-decoder model

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use serde::{Deserialize, Serialize};

use crate::combiner::{Combiner, CombinerConfig, ConcatCombiner};
use crate::dataset::{Batch, Dataset};
use crate::features::{InputFeature, InputFeatureConfig, InputFeatureRegistry};
use crate::metadata::TrainingSetMetadata;
use crate::output::{OutputFeatureConfig, Vector2DOutputFeature};
use crate::trainer::TrainableModel;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    pub input_features: Vec<InputFeatureConfig>,
    #[serde(default)]
    pub combiner: CombinerConfig,
    #[serde(default)]
    pub output_features: Vec<OutputFeatureConfig>,
}

impl ModelConfig {
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid model config {}", path.display()))
    }
}

pub struct EcdModel {
    input_features: Vec<Box<dyn InputFeature>>,
    combiner: Box<dyn Combiner>,
    output_features: Vec<Vector2DOutputFeature>,
}

impl EcdModel {
    pub fn new(config: &ModelConfig, metadata: &TrainingSetMetadata, vb: VarBuilder) -> Result<Self> {
        Self::with_registry(config, metadata, &InputFeatureRegistry::default(), vb)
    }

    pub fn with_registry(
        config: &ModelConfig,
        metadata: &TrainingSetMetadata,
        registry: &InputFeatureRegistry,
        vb: VarBuilder,
    ) -> Result<Self> {
        if config.input_features.is_empty() {
            anyhow::bail!("Model needs at least one input feature");
        }

        let mut input_features = Vec::with_capacity(config.input_features.len());
        for feature_config in &config.input_features {
            let meta = metadata.get(&feature_config.name)?;
            input_features.push(registry.build(feature_config, meta, vb.pp("input_features"))?);
        }

        let sizes: Vec<usize> = input_features.iter().map(|f| f.output_size()).collect();
        let combiner = ConcatCombiner::new(&sizes, &config.combiner, vb.pp("combiner"))?;

        let mut output_features = Vec::with_capacity(config.output_features.len());
        for output_config in &config.output_features {
            let mut output_config = output_config.clone();
            if let Some(v2d) = metadata.get(&output_config.name)?.vector2d.as_ref() {
                output_config.update_config_with_metadata(v2d);
            }
            output_features.push(Vector2DOutputFeature::new(
                &output_config,
                combiner.output_size(),
                vb.pp("output_features"),
            )?);
        }

        Ok(Self {
            input_features,
            combiner: Box::new(combiner),
            output_features,
        })
    }

    pub fn input_features(&self) -> &[Box<dyn InputFeature>] {
        &self.input_features
    }

    pub fn combiner(&self) -> &dyn Combiner {
        self.combiner.as_ref()
    }

    pub fn output_features(&self) -> &[Vector2DOutputFeature] {
        &self.output_features
    }

    /// Run every input encoder and the combiner.
    pub fn combine(&self, inputs: &BTreeMap<String, Tensor>) -> Result<Tensor> {
        let mut encoded = Vec::with_capacity(self.input_features.len());
        for feature in &self.input_features {
            let values = inputs
                .get(feature.name())
                .with_context(|| format!("Missing input feature {}", feature.name()))?;
            encoded.push(feature.encode(values)?);
        }
        Ok(self.combiner.combine(&encoded)?)
    }

    /// Logits per output feature.
    pub fn forward(&self, inputs: &BTreeMap<String, Tensor>) -> Result<BTreeMap<String, Tensor>> {
        let hidden = self.combine(inputs)?;
        let mut outputs = BTreeMap::new();
        for feature in &self.output_features {
            outputs.insert(feature.name().to_string(), feature.logits(&hidden)?);
        }
        Ok(outputs)
    }

    fn batch_loss(&self, batch: &Batch) -> Result<Tensor> {
        if self.output_features.is_empty() {
            anyhow::bail!("Model has no output features to train");
        }
        let logits = self.forward(&batch.inputs)?;
        let mut total: Option<Tensor> = None;
        for feature in &self.output_features {
            let targets = batch.get(feature.name())?;
            let loss = feature.loss(&logits[feature.name()], targets)?;
            total = Some(match total {
                Some(t) => (t + loss)?,
                None => loss,
            });
        }
        total.context("no output loss")
    }
}

impl TrainableModel for EcdModel {
    fn train_loss(&mut self, batch: &Batch) -> Result<Tensor> {
        self.batch_loss(batch)
    }

    fn evaluation(&mut self, dataset: &Dataset, batch_size: usize, device: &Device) -> Result<Option<f32>> {
        let num_batches = dataset.num_batches(batch_size, false);
        if num_batches == 0 {
            return Ok(None);
        }
        let mut total = 0.0;
        for idx in 0..num_batches {
            let batch = dataset.batch(idx, batch_size, device)?;
            total += self.batch_loss(&batch)?.to_scalar::<f32>()?;
        }
        Ok(Some(total / num_batches as f32))
    }
}
