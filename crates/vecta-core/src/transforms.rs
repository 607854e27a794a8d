//! Pretrained vision model transforms
//!
//! An immutable table from `(model_type, variant)` to the input transform the
//! pretrained weights were trained with. The table is built by the caller and
//! passed by reference.

use serde::{Deserialize, Serialize};

use crate::entry::{DecodedImage, ImageArray};
use crate::error::{PreprocessError, PreprocessResult};

pub const IMAGENET1K_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET1K_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformMetadata {
    /// Shorter side is resized to this before cropping.
    pub resize_size: usize,
    /// Square center crop, the final height and width.
    pub crop_size: usize,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    /// Weights tag recorded in the feature metadata.
    pub weights: String,
}

impl TransformMetadata {
    fn imagenet(weights: &str, resize_size: usize, crop_size: usize) -> Self {
        Self {
            resize_size,
            crop_size,
            mean: IMAGENET1K_MEAN,
            std: IMAGENET1K_STD,
            weights: weights.to_string(),
        }
    }

    pub fn height(&self) -> usize {
        self.crop_size
    }

    pub fn width(&self) -> usize {
        self.crop_size
    }

    pub fn num_channels(&self) -> usize {
        self.mean.len()
    }
}

#[derive(Debug, Clone)]
pub struct PretrainedVariant {
    pub model_type: String,
    pub variant: String,
    pub transform: TransformMetadata,
}

#[derive(Debug, Clone, Default)]
pub struct TransformRegistry {
    entries: Vec<PretrainedVariant>,
}

impl TransformRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Torchvision classification weights supported out of the box.
    pub fn builtin() -> Self {
        let table: &[(&str, &str, &str, usize, usize)] = &[
            ("alexnet", "base", "AlexNet_Weights.IMAGENET1K_V1", 256, 224),
            ("densenet", "121", "DenseNet121_Weights.IMAGENET1K_V1", 256, 224),
            ("densenet", "161", "DenseNet161_Weights.IMAGENET1K_V1", 256, 224),
            ("efficientnet", "b0", "EfficientNet_B0_Weights.IMAGENET1K_V1", 256, 224),
            ("efficientnet", "b1", "EfficientNet_B1_Weights.IMAGENET1K_V2", 255, 240),
            ("efficientnet", "b4", "EfficientNet_B4_Weights.IMAGENET1K_V1", 384, 380),
            ("mobilenetv3", "small", "MobileNet_V3_Small_Weights.IMAGENET1K_V1", 256, 224),
            ("mobilenetv3", "large", "MobileNet_V3_Large_Weights.IMAGENET1K_V2", 232, 224),
            ("resnet", "18", "ResNet18_Weights.IMAGENET1K_V1", 256, 224),
            ("resnet", "34", "ResNet34_Weights.IMAGENET1K_V1", 256, 224),
            ("resnet", "50", "ResNet50_Weights.IMAGENET1K_V2", 232, 224),
            ("resnet", "101", "ResNet101_Weights.IMAGENET1K_V2", 232, 224),
            ("vgg", "16", "VGG16_Weights.IMAGENET1K_V1", 256, 224),
            ("vit", "b_16", "ViT_B_16_Weights.IMAGENET1K_V1", 256, 224),
            ("vit", "b_32", "ViT_B_32_Weights.IMAGENET1K_V1", 256, 224),
        ];

        let entries = table
            .iter()
            .map(|&(model_type, variant, weights, resize, crop)| PretrainedVariant {
                model_type: model_type.to_string(),
                variant: variant.to_string(),
                transform: TransformMetadata::imagenet(weights, resize, crop),
            })
            .collect();

        Self { entries }
    }

    /// Builder: add or replace an entry
    pub fn with_variant(mut self, model_type: &str, variant: &str, transform: TransformMetadata) -> Self {
        self.entries.retain(|e| !(e.model_type == model_type && e.variant == variant));
        self.entries.push(PretrainedVariant {
            model_type: model_type.to_string(),
            variant: variant.to_string(),
            transform,
        });
        self
    }

    pub fn get(&self, model_type: &str, variant: &str) -> Option<&PretrainedVariant> {
        self.entries
            .iter()
            .find(|e| e.model_type == model_type && e.variant == variant)
    }

    pub fn transform_for(&self, model_type: &str, variant: &str) -> PreprocessResult<PretrainedTransform> {
        self.get(model_type, variant)
            .map(|e| PretrainedTransform::new(e.transform.clone()))
            .ok_or_else(|| PreprocessError::UnknownPretrainedModel {
                model_type: model_type.to_string(),
                variant: variant.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Channel fix to 3, shorter-side resize, center crop, scale and normalize.
/// Output shape is always `(3, crop_size, crop_size)`.
#[derive(Debug, Clone)]
pub struct PretrainedTransform {
    metadata: TransformMetadata,
}

impl PretrainedTransform {
    pub fn new(metadata: TransformMetadata) -> Self {
        Self { metadata }
    }

    pub fn metadata(&self) -> &TransformMetadata {
        &self.metadata
    }

    pub fn apply(&self, img: &DecodedImage) -> ImageArray {
        let m = &self.metadata;
        let img = img.resize_channels(m.num_channels());

        let (h, w) = (img.height.max(1), img.width.max(1));
        let (new_h, new_w) = if h <= w {
            (m.resize_size, m.resize_size * w / h)
        } else {
            (m.resize_size * h / w, m.resize_size)
        };
        let img = img
            .interpolate(new_h.max(1), new_w.max(1))
            .pad_edge(m.crop_size, m.crop_size)
            .center_crop(m.crop_size, m.crop_size);

        let plane = m.crop_size * m.crop_size;
        let data = img
            .pixels
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                let c = i / plane;
                (p as f32 / 255.0 - m.mean[c]) / m.std[c]
            })
            .collect();

        ImageArray::new(img.shape(), data)
    }
}
