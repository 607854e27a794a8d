//! Vecta Training Pipeline
//!
//! Encoder/combiner/decoder model, generic training loop and SCARF
//! contrastive pretraining.

pub mod combiner;
pub mod corrupt;
pub mod dataset;
pub mod features;
pub mod loss;
pub mod metadata;
pub mod model;
pub mod output;
pub mod pretrainer;
pub mod projection;
pub mod scarf;
pub mod trainer;

pub use corrupt::{CorruptionMask, FeatureCorruptor};
pub use dataset::{load_jsonl_table, Batch, Column, Dataset};
pub use features::{FeatureType, InputFeature, InputFeatureConfig, InputFeatureRegistry};
pub use loss::SimClrLoss;
pub use metadata::{FeatureMetadata, TrainingSetMetadata};
pub use model::{EcdModel, ModelConfig};
pub use pretrainer::Pretrainer;
pub use scarf::{ScarfConfig, ScarfModel};
pub use trainer::{TrainableModel, Trainer, TrainerConfig, TrainingMetrics};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
