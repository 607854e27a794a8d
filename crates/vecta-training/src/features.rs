//! Input features
//!
//! Each feature owns a dense encoder over its flattened input and knows how
//! to draw replacement rows from its training distribution.

use std::collections::HashMap;

use anyhow::Result;
use candle_core::{Device, Module, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::metadata::FeatureMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureType {
    Number,
    Vector2d,
}

fn default_encoder_size() -> usize {
    32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputFeatureConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub feature_type: FeatureType,
    #[serde(default = "default_encoder_size")]
    pub output_size: usize,
}

/// Capability set every input feature provides to the model.
pub trait InputFeature {
    fn name(&self) -> &str;

    fn feature_type(&self) -> FeatureType;

    /// Width of the encoder output.
    fn output_size(&self) -> usize;

    /// `(batch, ..)` raw input to `(batch, output_size)`.
    fn encode(&self, inputs: &Tensor) -> candle_core::Result<Tensor>;

    /// `batch_size` rows drawn from the feature's marginal distribution,
    /// shaped like a real input batch.
    fn sample_augmentations(
        &self,
        batch_size: usize,
        metadata: &FeatureMetadata,
        rng: &mut dyn RngCore,
        device: &Device,
    ) -> Result<Tensor> {
        metadata.sample_marginal(batch_size, rng, device)
    }
}

/// Flatten, project, ReLU.
struct DenseEncoder {
    fc: Linear,
    output_size: usize,
}

impl DenseEncoder {
    fn new(input_size: usize, output_size: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            fc: linear(input_size, output_size, vb.pp("fc"))?,
            output_size,
        })
    }

    fn forward(&self, inputs: &Tensor) -> candle_core::Result<Tensor> {
        let x = inputs.flatten_from(1)?;
        self.fc.forward(&x)?.relu()
    }
}

pub struct NumberInputFeature {
    name: String,
    encoder: DenseEncoder,
}

impl NumberInputFeature {
    pub fn new(config: &InputFeatureConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            name: config.name.clone(),
            encoder: DenseEncoder::new(1, config.output_size, vb.pp("encoder"))?,
        })
    }
}

impl InputFeature for NumberInputFeature {
    fn name(&self) -> &str {
        &self.name
    }

    fn feature_type(&self) -> FeatureType {
        FeatureType::Number
    }

    fn output_size(&self) -> usize {
        self.encoder.output_size
    }

    fn encode(&self, inputs: &Tensor) -> candle_core::Result<Tensor> {
        let batch = inputs.dim(0)?;
        self.encoder.forward(&inputs.reshape((batch, 1))?)
    }
}

pub struct Vector2DInputFeature {
    name: String,
    input_shape: Vec<usize>,
    encoder: DenseEncoder,
}

impl Vector2DInputFeature {
    pub fn new(config: &InputFeatureConfig, input_shape: &[usize], vb: VarBuilder) -> candle_core::Result<Self> {
        let input_size = input_shape.iter().product();
        Ok(Self {
            name: config.name.clone(),
            input_shape: input_shape.to_vec(),
            encoder: DenseEncoder::new(input_size, config.output_size, vb.pp("encoder"))?,
        })
    }

    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }
}

impl InputFeature for Vector2DInputFeature {
    fn name(&self) -> &str {
        &self.name
    }

    fn feature_type(&self) -> FeatureType {
        FeatureType::Vector2d
    }

    fn output_size(&self) -> usize {
        self.encoder.output_size
    }

    fn encode(&self, inputs: &Tensor) -> candle_core::Result<Tensor> {
        self.encoder.forward(inputs)
    }
}

pub type InputFeatureBuilder =
    fn(&InputFeatureConfig, &FeatureMetadata, VarBuilder) -> candle_core::Result<Box<dyn InputFeature>>;

/// Input feature constructors keyed by feature type.
pub struct InputFeatureRegistry {
    builders: HashMap<FeatureType, InputFeatureBuilder>,
}

fn build_number(
    config: &InputFeatureConfig,
    _metadata: &FeatureMetadata,
    vb: VarBuilder,
) -> candle_core::Result<Box<dyn InputFeature>> {
    let feature = NumberInputFeature::new(config, vb)?;
    Ok(Box::new(feature))
}

fn build_vector2d(
    config: &InputFeatureConfig,
    metadata: &FeatureMetadata,
    vb: VarBuilder,
) -> candle_core::Result<Box<dyn InputFeature>> {
    let feature = Vector2DInputFeature::new(config, &metadata.row_shape, vb)?;
    Ok(Box::new(feature))
}

impl Default for InputFeatureRegistry {
    fn default() -> Self {
        let mut builders: HashMap<FeatureType, InputFeatureBuilder> = HashMap::new();
        builders.insert(FeatureType::Number, build_number);
        builders.insert(FeatureType::Vector2d, build_vector2d);
        Self { builders }
    }
}

impl InputFeatureRegistry {
    pub fn register(&mut self, feature_type: FeatureType, builder: InputFeatureBuilder) {
        self.builders.insert(feature_type, builder);
    }

    pub fn build(
        &self,
        config: &InputFeatureConfig,
        metadata: &FeatureMetadata,
        vb: VarBuilder,
    ) -> Result<Box<dyn InputFeature>> {
        let builder = self
            .builders
            .get(&config.feature_type)
            .ok_or_else(|| anyhow::anyhow!("No input feature registered for type {:?}", config.feature_type))?;
        Ok(builder(config, metadata, vb.pp(&config.name))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarMap;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config(name: &str, feature_type: FeatureType) -> InputFeatureConfig {
        InputFeatureConfig {
            name: name.to_string(),
            feature_type,
            output_size: 8,
        }
    }

    #[test]
    fn test_registry_builds_both_types() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let registry = InputFeatureRegistry::default();

        let img_meta = FeatureMetadata::new(vec![1, 3, 4], vec![0.5; 24]);
        let img = registry.build(&config("img", FeatureType::Vector2d), &img_meta, vb.clone())?;
        let x = Tensor::zeros((2, 1, 3, 4), DType::F32, &Device::Cpu)?;
        assert_eq!(img.encode(&x)?.dims(), &[2, 8]);

        let num_meta = FeatureMetadata::new(vec![1], vec![1.0, 2.0]);
        let num = registry.build(&config("x", FeatureType::Number), &num_meta, vb)?;
        let x = Tensor::new(&[1.0f32, 2.0, 3.0], &Device::Cpu)?;
        assert_eq!(num.encode(&x)?.dims(), &[3, 8]);
        assert_eq!(num.feature_type(), FeatureType::Number);
        Ok(())
    }

    #[test]
    fn test_sample_augmentations_shape() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let meta = FeatureMetadata::new(vec![1, 2, 2], vec![0.25; 12]);
        let feature = Vector2DInputFeature::new(&config("img", FeatureType::Vector2d), &[1, 2, 2], vb)?;

        let mut rng = StdRng::seed_from_u64(1);
        let aug = feature.sample_augmentations(5, &meta, &mut rng, &Device::Cpu)?;
        assert_eq!(aug.dims(), &[5, 1, 2, 2]);
        Ok(())
    }

    #[test]
    fn test_config_deserialize() {
        let c: InputFeatureConfig = serde_json::from_str(r#"{"name": "img", "type": "vector2d"}"#).unwrap();
        assert_eq!(c.feature_type, FeatureType::Vector2d);
        assert_eq!(c.output_size, 32);
    }
}
