//! Sampling and inference of image size and channel depth
//!
//! Looks at the head of the column to fill in whatever the config leaves
//! unset. The sample is dropped once the parameters are final.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::{PreprocessingConfig, StandardizeMode};
use crate::entry::{decode_entry, read_image_from_path, DecodedImage, RawEntry};
use crate::error::{PreprocessError, PreprocessResult};

/// Everything the reader needs once inference is done.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedParameters {
    pub should_resize: bool,
    pub width: usize,
    pub height: usize,
    pub num_channels: usize,
    /// Channel count was pinned (explicitly or by inference): mismatching
    /// rows get zero-padded instead of rejected.
    pub user_specified_num_channels: bool,
    pub average_file_size: Option<f64>,
    pub standardize_image: Option<StandardizeMode>,
}

/// Decoded head of a column.
#[derive(Debug, Default)]
pub struct ImageSample {
    pub images: Vec<DecodedImage>,
    pub num_bytes: Vec<u64>,
    pub failed: Vec<String>,
}

impl ImageSample {
    pub fn read(column: &[RawEntry], sample_size: usize) -> Self {
        let mut sample = Self::default();
        for entry in column.iter().take(sample_size) {
            let image = match entry {
                RawEntry::Path(p) => {
                    let (image, num_bytes) = read_image_from_path(Path::new(p), None);
                    if let Some(n) = num_bytes {
                        sample.num_bytes.push(n);
                    }
                    image.filter(|img| img.height > 0 && img.width > 0)
                }
                other => decode_entry(other, None),
            };
            match image {
                Some(img) => sample.images.push(img),
                None => sample.failed.push(entry.describe()),
            }
        }
        sample
    }

    pub fn average_file_size(&self) -> Option<f64> {
        if self.num_bytes.is_empty() {
            return None;
        }
        Some(self.num_bytes.iter().sum::<u64>() as f64 / self.num_bytes.len() as f64)
    }
}

/// Square up the dimensions when the encoder needs it.
pub fn set_equal_dimensions(
    width: usize,
    height: usize,
    requires_equal_dimensions: bool,
    encoder_type: &str,
) -> (usize, usize) {
    if requires_equal_dimensions && height != width {
        let side = width.min(height);
        info!(
            "Set image feature height and width to {} to be compatible with {} encoder.",
            side, encoder_type
        );
        return (side, side);
    }
    (width, height)
}

/// Rounded mean of the sample dimensions, capped. Returns `(height, width)`.
pub fn infer_image_size(images: &[DecodedImage], max_height: usize, max_width: usize) -> (usize, usize) {
    let n = images.len().max(1) as f64;
    let height_avg = images.iter().map(|img| img.height as f64).sum::<f64>() / n;
    let width_avg = images.iter().map(|img| img.width as f64).sum::<f64>() / n;
    let height = (height_avg.round_ties_even() as usize).min(max_height);
    let width = (width_avg.round_ties_even() as usize).min(max_width);
    debug!("Inferring height: {} and width: {}", height, width);
    (height, width)
}

/// A channel depth of 1, 2 or 4 wins only with a strict majority;
/// mixed samples default to 3.
pub fn infer_number_of_channels(images: &[DecodedImage]) -> usize {
    let n_images = images.len();
    let mut frequency: BTreeMap<usize, usize> = BTreeMap::new();
    for img in images {
        *frequency.entry(img.channels).or_default() += 1;
    }

    let majority = |c: usize| frequency.get(&c).copied().unwrap_or(0) * 2 > n_images;
    let num_channels = [1, 2, 4].into_iter().find(|&c| majority(c)).unwrap_or(3);

    info!("Inferring num_channels from the first {} images.", n_images);
    for (channels, count) in &frequency {
        info!("  images with {} channels: {}", channels, count);
    }
    let most_common = frequency
        .iter()
        .max_by_key(|entry| *entry.1)
        .map(|entry| *entry.0);
    if most_common == Some(num_channels) {
        info!(
            "Using {} channels because it is the majority in sample. If an image with a different depth is read, will attempt to convert to {} channels.",
            num_channels, num_channels
        );
    } else {
        info!("Defaulting to {} channels.", num_channels);
    }
    num_channels
}

/// Work out height, width and channel depth for the whole column.
pub fn finalize_preprocessing_parameters(
    config: &PreprocessingConfig,
    encoder_type: &str,
    column: &[RawEntry],
) -> PreprocessResult<FinalizedParameters> {
    config.validate()?;

    let explicit_height_width = config.explicit_height_width();
    let explicit_num_channels = config.explicit_num_channels();

    let sample_size = if config.infer_image_dimensions
        && !(explicit_height_width && explicit_num_channels.is_some())
    {
        column.len().min(config.infer_image_sample_size)
    } else {
        1
    };

    let sample = ImageSample::read(column, sample_size);
    if sample.images.is_empty() {
        return Err(PreprocessError::NoReadableSamples {
            sample_size,
            failed: sample.failed.join("\n\t- "),
        });
    }

    let (width, height) = if explicit_height_width {
        let (height, width) = match (config.height, config.width) {
            (Some(h), Some(w)) => (h, w),
            (h, w) => {
                return Err(PreprocessError::InvalidDimensions(format!(
                    "got height={:?} and width={:?}",
                    h, w
                )))
            }
        };
        if height == 0 || width == 0 {
            return Err(PreprocessError::InvalidDimensions(
                "Image height and width must be positive integers".to_string(),
            ));
        }
        set_equal_dimensions(width, height, config.requires_equal_dimensions, encoder_type)
    } else if config.infer_image_dimensions {
        let (height, width) = infer_image_size(
            &sample.images,
            config.infer_image_max_height,
            config.infer_image_max_width,
        );
        set_equal_dimensions(width, height, config.requires_equal_dimensions, encoder_type)
    } else {
        return Err(PreprocessError::AmbiguousDimensions);
    };
    let should_resize = true;

    let (num_channels, user_specified_num_channels) = match explicit_num_channels {
        Some(c) => (c, true),
        None if config.infer_image_dimensions => (infer_number_of_channels(&sample.images), true),
        None => match sample.images.first() {
            Some(first) => (first.channels, false),
            None => return Err(PreprocessError::AmbiguousChannels),
        },
    };
    if explicit_num_channels.is_none() {
        info!("To explicitly set the number of channels, define num_channels in the preprocessing config of the vector2d feature.");
    }

    let mut standardize_image = config.standardize_image;
    if standardize_image == Some(StandardizeMode::Imagenet1k) && num_channels != 3 {
        warn!(
            "'standardize_image=imagenet1k' is defined only for 'num_channels=3' but detected 'num_channels={}'. For this situation setting 'standardize_image=None'.",
            num_channels
        );
        standardize_image = None;
    }

    Ok(FinalizedParameters {
        should_resize,
        width,
        height,
        num_channels,
        user_specified_num_channels,
        average_file_size: sample.average_file_size(),
        standardize_image,
    })
}
