//! Vector2D output feature
//!
//! A `projector2d` decoder maps the combiner output to a
//! `(channels, height, width)` grid, trained with mean squared error.

use std::collections::BTreeMap;

use candle_core::{Module, Result, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use serde::{Deserialize, Serialize};

use vecta_core::{StandardizeMode, Vector2DMetadata};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Projector2DConfig {
    #[serde(default)]
    pub height: usize,
    #[serde(default)]
    pub width: usize,
    #[serde(default = "default_channels")]
    pub num_channels: usize,
    #[serde(default)]
    pub standardize_image: Option<StandardizeMode>,
}

fn default_channels() -> usize {
    1
}

impl Default for Projector2DConfig {
    fn default() -> Self {
        Self {
            height: 0,
            width: 0,
            num_channels: default_channels(),
            standardize_image: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputFeatureConfig {
    pub name: String,
    #[serde(default)]
    pub decoder: Projector2DConfig,
    /// Softmax over the last axis of the decoded grid.
    #[serde(default)]
    pub softmax: bool,
}

impl OutputFeatureConfig {
    /// Copy the finalized preprocessing values into the decoder config.
    pub fn update_config_with_metadata(&mut self, metadata: &Vector2DMetadata) {
        let pre = &metadata.preprocessing;
        self.decoder.height = pre.height;
        self.decoder.width = pre.width;
        self.decoder.num_channels = pre.num_channels;
        self.decoder.standardize_image = pre.standardize_image;
    }
}

pub struct Projector2D {
    fc: Linear,
    shape: [usize; 3],
    softmax: bool,
}

impl Projector2D {
    pub fn new(input_size: usize, config: &Projector2DConfig, softmax: bool, vb: VarBuilder) -> Result<Self> {
        let shape = [config.num_channels, config.height, config.width];
        if shape.iter().any(|&d| d == 0) {
            candle_core::bail!("projector2d needs positive height, width and num_channels, got {:?}", shape);
        }
        Ok(Self {
            fc: linear(input_size, shape.iter().product(), vb.pp("fc"))?,
            shape,
            softmax,
        })
    }

    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        let batch = hidden.dim(0)?;
        let [c, h, w] = self.shape;
        let x = self.fc.forward(hidden)?.reshape((batch, c, h, w))?;
        if self.softmax {
            candle_nn::ops::softmax_last_dim(&x)
        } else {
            Ok(x)
        }
    }
}

pub struct Vector2DOutputFeature {
    name: String,
    decoder: Projector2D,
}

impl Vector2DOutputFeature {
    pub fn new(config: &OutputFeatureConfig, input_size: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            name: config.name.clone(),
            decoder: Projector2D::new(input_size, &config.decoder, config.softmax, vb.pp(&config.name))?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output_shape(&self) -> [usize; 3] {
        self.decoder.shape
    }

    pub fn logits(&self, hidden: &Tensor) -> Result<Tensor> {
        self.decoder.forward(hidden)
    }

    /// Predictions are the logits themselves.
    pub fn predictions(&self, logits: &Tensor) -> Result<Tensor> {
        Ok(logits.clone())
    }

    pub fn loss(&self, logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
        candle_nn::loss::mse(logits, targets)
    }

    /// No overall statistics for this feature type.
    pub fn calculate_overall_stats(&self, _predictions: &Tensor, _targets: &Tensor) -> BTreeMap<String, f64> {
        BTreeMap::new()
    }

    /// `(batch, c, h, w)` predictions as nested lists, one per row.
    pub fn postprocess_predictions(&self, predictions: &Tensor) -> Result<Vec<Vec<Vec<Vec<f32>>>>> {
        let batch = predictions.dim(0)?;
        (0..batch)
            .map(|i| predictions.get(i)?.to_vec3::<f32>())
            .collect()
    }
}
