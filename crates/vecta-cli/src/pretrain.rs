//! Pretrain subcommand - SCARF contrastive pretraining over a JSONL table

use anyhow::{Context, Result};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use std::collections::BTreeMap;
use std::path::PathBuf;

use vecta_core::{dataset_checksum, ColumnContext, EncoderConfig, TransformRegistry, Vector2DFeature};
use vecta_training::combiner::CombinerConfig;
use vecta_training::{
    load_jsonl_table, Column, Dataset, EcdModel, FeatureType, InputFeatureConfig, ModelConfig, Pretrainer,
    ScarfConfig, TrainerConfig, TrainingSetMetadata,
};

use crate::preprocess::load_preprocessing_config;

pub struct PretrainArgs {
    pub dataset: PathBuf,
    pub image_column: String,
    pub number_columns: Vec<String>,
    pub preprocessing: Option<PathBuf>,
    pub model_config: Option<PathBuf>,
    pub epochs: usize,
    pub batch_size: usize,
    pub lr: f64,
    pub corruption_rate: f64,
    pub temperature: f64,
    pub save_every: usize,
    pub max_steps: usize,
    pub seed: u64,
    pub cache_dir: PathBuf,
    pub output_dir: PathBuf,
}

/// Dense encoders over the image column and every numeric column.
pub fn default_model_config(image_column: &str, number_columns: &[String]) -> ModelConfig {
    let mut input_features = vec![InputFeatureConfig {
        name: image_column.to_string(),
        feature_type: FeatureType::Vector2d,
        output_size: 32,
    }];
    input_features.extend(number_columns.iter().map(|name| InputFeatureConfig {
        name: name.clone(),
        feature_type: FeatureType::Number,
        output_size: 8,
    }));
    ModelConfig {
        input_features,
        combiner: CombinerConfig { output_size: Some(64) },
        output_features: Vec::new(),
    }
}

/// Preprocess the table into a dataset plus its training set metadata.
fn build_dataset(args: &PretrainArgs) -> Result<(Dataset, TrainingSetMetadata)> {
    let table = load_jsonl_table(&args.dataset)?;
    println!("  Loaded {} rows from {}", table.len(), args.dataset.display());

    let preprocessing = load_preprocessing_config(args.preprocessing.as_deref())?;
    let feature = Vector2DFeature::new(&args.image_column, preprocessing, EncoderConfig::default());
    let ctx = ColumnContext {
        src: Some(args.dataset.clone()),
        checksum: dataset_checksum(&args.dataset),
        split: "training".to_string(),
        cache_dir: args.cache_dir.clone(),
    };
    let processed = feature
        .add_feature_data(table.raw_column(&args.image_column)?, &TransformRegistry::builtin(), &ctx, false)
        .with_context(|| format!("Failed to preprocess feature {}", args.image_column))?;
    let [c, h, w] = processed.metadata.reshape;
    println!(
        "  {}: {} x {} x {} ({} unreadable rows defaulted)",
        args.image_column, c, h, w, processed.num_failed
    );

    let mut columns = vec![Column::from_processed(&args.image_column, &processed.column)?];
    for name in &args.number_columns {
        columns.push(Column::numbers(name, table.number_column(name)?)?);
    }
    let dataset = Dataset::new(columns)?;

    let mut vector2d = BTreeMap::new();
    vector2d.insert(args.image_column.clone(), processed.metadata);
    let metadata = TrainingSetMetadata::from_dataset(&dataset, &vector2d);
    Ok((dataset, metadata))
}

pub fn run(args: PretrainArgs) -> Result<()> {
    println!("\n=== Vecta Pretraining ===\n");

    let device = if candle_core::utils::cuda_is_available() {
        println!("  CUDA available, using GPU");
        Device::new_cuda(0)?
    } else {
        println!("  No CUDA, using CPU");
        Device::Cpu
    };

    let (mut dataset, metadata) = build_dataset(&args)?;

    let model_config = match &args.model_config {
        Some(path) => ModelConfig::from_file(path)?,
        None => default_model_config(&args.image_column, &args.number_columns),
    };

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = EcdModel::new(&model_config, &metadata, vb)?;

    let output_dir = args.output_dir.to_string_lossy().into_owned();
    let trainer_config = TrainerConfig {
        epochs: args.epochs,
        batch_size: args.batch_size,
        learning_rate: args.lr,
        save_interval: args.save_every,
        output_dir: output_dir.clone(),
        max_steps: (args.max_steps > 0).then_some(args.max_steps),
        seed: args.seed,
        ..Default::default()
    };
    let scarf = ScarfConfig {
        corruption_rate: args.corruption_rate,
        temperature: args.temperature,
        ..Default::default()
    };

    let pretrainer = Pretrainer::new(trainer_config, scarf, device);
    let (_, stats) = pretrainer.pretrain(&model, &varmap, &mut dataset, &metadata)?;

    let stats_path = args.output_dir.join("training_statistics.json");
    std::fs::write(&stats_path, serde_json::to_string_pretty(&stats)?)
        .with_context(|| format!("Failed to write {}", stats_path.display()))?;
    let metadata_path = args.output_dir.join("training_set_metadata.json");
    std::fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)
        .with_context(|| format!("Failed to write {}", metadata_path.display()))?;

    println!("\n  Pretraining complete!");
    println!("  Steps: {}", stats.global_steps);
    if let Some(loss) = stats.final_loss() {
        println!("  Final loss: {:.4}", loss);
    }
    println!("  Checkpoint: {}/checkpoint-final.safetensors", output_dir);
    println!("  Statistics: {}", stats_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_table(dir: &std::path::Path, rows: usize) -> Result<PathBuf> {
        for i in 0..2u8 {
            image::GrayImage::from_fn(6, 6, |x, y| image::Luma([(x * 20 + y * 2) as u8 + i * 50]))
                .save(dir.join(format!("img{}.png", i)))?;
        }
        let path = dir.join("rows.jsonl");
        let mut file = std::fs::File::create(&path)?;
        for i in 0..rows {
            let image = if i % 5 == 4 {
                serde_json::Value::Null
            } else {
                serde_json::json!(format!("img{}.png", i % 2))
            };
            let row = serde_json::json!({"image": image, "age": i as f64 / 10.0, "score": (i % 3) as f64});
            writeln!(file, "{}", row)?;
        }
        Ok(path)
    }

    fn args(dir: &std::path::Path, dataset: PathBuf) -> PretrainArgs {
        PretrainArgs {
            dataset,
            image_column: "image".to_string(),
            number_columns: vec!["age".to_string(), "score".to_string()],
            preprocessing: None,
            model_config: None,
            epochs: 1,
            batch_size: 4,
            lr: 1e-3,
            corruption_rate: 0.6,
            temperature: 1.0,
            save_every: 0,
            max_steps: 0,
            seed: 7,
            cache_dir: dir.join("cache"),
            output_dir: dir.join("run"),
        }
    }

    #[test]
    fn test_default_model_config_covers_all_columns() {
        let config = default_model_config("image", &["a".to_string()]);
        assert_eq!(config.input_features.len(), 2);
        assert_eq!(config.input_features[0].feature_type, FeatureType::Vector2d);
        assert_eq!(config.input_features[1].feature_type, FeatureType::Number);
        assert!(config.output_features.is_empty());
    }

    #[test]
    fn test_build_dataset_infers_image_shape() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let table = write_table(dir.path(), 10)?;
        let (dataset, metadata) = build_dataset(&args(dir.path(), table))?;

        assert_eq!(dataset.len(), 10);
        assert_eq!(dataset.column("image").unwrap().row_shape, vec![1, 6, 6]);
        assert_eq!(metadata.get("age")?.row_shape, vec![1]);
        assert!(metadata.get("image")?.vector2d.is_some());
        Ok(())
    }

    #[test]
    fn test_run_writes_checkpoint_and_statistics() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let table = write_table(dir.path(), 10)?;
        run(args(dir.path(), table))?;

        let run_dir = dir.path().join("run");
        assert!(run_dir.join("checkpoint-final.safetensors").exists());
        let stats: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(run_dir.join("training_statistics.json"))?)?;
        // 10 rows at batch 4 with the partial batch dropped.
        assert_eq!(stats["global_steps"], serde_json::json!(2));
        assert!(run_dir.join("training_set_metadata.json").exists());
        Ok(())
    }
}
