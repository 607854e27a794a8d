//! Error types for vector2d preprocessing.

use thiserror::Error;

/// Fatal preprocessing errors.
///
/// Any of these aborts processing of the whole column. Per-row read
/// failures are not errors: the read function reports them as `None`
/// and the row is replaced by the default image.
#[derive(Debug, Error)]
pub enum PreprocessError {
    /// None of the sampled entries could be decoded.
    #[error("Image dimensions cannot be inferred. Failed to read {sample_size} images as samples:\n\t- {failed}")]
    NoReadableSamples { sample_size: usize, failed: String },

    /// No explicit height/width and inference disabled.
    #[error("Explicit image width/height are not set, infer_image_dimensions is false, and first image cannot be read, so image dimensions are unknown")]
    AmbiguousDimensions,

    /// No explicit channel count, inference disabled, and no sample to look at.
    #[error("Explicit image num channels is not set, infer_image_dimensions is false, and first image cannot be read, so image num channels is unknown")]
    AmbiguousChannels,

    /// Explicit height/width missing one side or non-positive.
    #[error("Image height and width must be set and have positive integer values: {0}")]
    InvalidDimensions(String),

    /// Processed image does not have the finalized shape.
    #[error("Images are not of the same size. Expected size is {expected:?}, current image size is {actual:?}. Images are expected to be all of the same size or explicit image width and height are expected to be provided")]
    ShapeMismatch {
        expected: [usize; 3],
        actual: [usize; 3],
    },

    /// Channel count differs from the first image and the user did not pin it.
    #[error("Image has {actual} channels, unlike the first image, which has {expected} channels. Make sure all the images have the same number of channels or use the num_channels property in image preprocessing")]
    ChannelMismatch { expected: usize, actual: usize },

    /// The standard path only accepts single-channel sources.
    #[error("vector2d images must have exactly one channel, got {0}")]
    NonSingleChannelSource(usize),

    #[error("No pretrained transform registered for model `{model_type}` variant `{variant}`")]
    UnknownPretrainedModel { model_type: String, variant: String },

    #[error("Invalid inference input: {0}")]
    InvalidInferenceInput(String),

    #[error("Invalid preprocessing config: {0}")]
    InvalidConfig(String),

    #[error("Image cache error: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

/// Result type for preprocessing operations.
pub type PreprocessResult<T> = Result<T, PreprocessError>;
