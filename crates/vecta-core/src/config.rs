//! Vector2D preprocessing configuration
//!
//! Explicit values win; anything left unset is inferred from a sample
//! of the column when `infer_image_dimensions` is on.

use serde::{Deserialize, Serialize};

use crate::error::{PreprocessError, PreprocessResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResizeMethod {
    /// Bilinear interpolation to the target size.
    #[default]
    Interpolate,
    /// Edge-pad up to the target size, then center crop.
    CropOrPad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StandardizeMode {
    /// ImageNet-1k mean/std, defined for 3-channel images only.
    #[serde(rename = "imagenet1k")]
    Imagenet1k,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    pub height: Option<usize>,
    pub width: Option<usize>,
    pub num_channels: Option<usize>,
    pub resize_method: ResizeMethod,

    // Inference from a sample of the column
    pub infer_image_dimensions: bool,
    pub infer_image_max_height: usize,
    pub infer_image_max_width: usize,
    pub infer_image_sample_size: usize,

    pub standardize_image: Option<StandardizeMode>,

    /// Keep processed arrays in memory instead of writing the on-disk store.
    pub in_memory: bool,

    /// Set when the downstream encoder needs square inputs.
    pub requires_equal_dimensions: bool,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            height: None,
            width: None,
            num_channels: None,
            resize_method: ResizeMethod::Interpolate,

            infer_image_dimensions: true,
            infer_image_max_height: 256,
            infer_image_max_width: 256,
            infer_image_sample_size: 100,

            standardize_image: None,

            in_memory: true,
            requires_equal_dimensions: false,
        }
    }
}

impl PreprocessingConfig {
    /// Builder: fix height and width
    pub fn with_size(mut self, height: usize, width: usize) -> Self {
        self.height = Some(height);
        self.width = Some(width);
        self
    }

    /// Builder: fix the channel count
    pub fn with_channels(mut self, num_channels: usize) -> Self {
        self.num_channels = Some(num_channels);
        self
    }

    pub fn with_resize_method(mut self, method: ResizeMethod) -> Self {
        self.resize_method = method;
        self
    }

    pub fn on_disk(mut self) -> Self {
        self.in_memory = false;
        self
    }

    /// Either side given counts as an explicit size request.
    pub fn explicit_height_width(&self) -> bool {
        self.height.is_some() || self.width.is_some()
    }

    /// A zero channel count is treated as unset.
    pub fn explicit_num_channels(&self) -> Option<usize> {
        self.num_channels.filter(|&c| c > 0)
    }

    pub fn validate(&self) -> PreprocessResult<()> {
        if self.infer_image_dimensions {
            if self.infer_image_sample_size == 0 {
                return Err(PreprocessError::InvalidConfig(
                    "infer_image_sample_size must be at least 1".to_string(),
                ));
            }
            if self.infer_image_max_height == 0 || self.infer_image_max_width == 0 {
                return Err(PreprocessError::InvalidConfig(format!(
                    "infer_image_max_height ({}) and infer_image_max_width ({}) must be positive",
                    self.infer_image_max_height, self.infer_image_max_width
                )));
            }
        }
        Ok(())
    }
}

/// Encoder section of a feature config. Only the fields preprocessing reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    #[serde(rename = "type")]
    pub encoder_type: String,
    #[serde(default)]
    pub model_variant: Option<String>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            encoder_type: "dense".to_string(),
            model_variant: None,
        }
    }
}
