//! Vecta Core - Vector2D Preprocessing
//!
//! Size and channel inference, per-row image reading, pretrained
//! transforms and the memory-mapped processed image store.

pub mod config;
pub mod entry;
pub mod error;
pub mod feature;
pub mod image_cache;
pub mod infer;
pub mod inference;
pub mod reader;
pub mod transforms;

pub use config::{EncoderConfig, PreprocessingConfig, ResizeMethod, StandardizeMode};
pub use entry::{ImageArray, RawEntry};
pub use error::{PreprocessError, PreprocessResult};
pub use feature::{ColumnContext, ProcessedColumn, ProcessedFeature, Vector2DFeature, Vector2DMetadata};
pub use image_cache::{dataset_checksum, ImageStore, MappedImageStore};
pub use infer::{finalize_preprocessing_parameters, FinalizedParameters};
pub use inference::InferenceInput;
pub use reader::ImageReader;
pub use transforms::{PretrainedTransform, TransformRegistry};

/// Vecta version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
