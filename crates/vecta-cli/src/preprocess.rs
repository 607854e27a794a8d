//! Preprocess subcommand - Read a vector2d column and write its metadata

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use vecta_core::{
    dataset_checksum, ColumnContext, EncoderConfig, PreprocessingConfig, ProcessedColumn, RawEntry,
    ResizeMethod, TransformRegistry, Vector2DFeature,
};

pub struct PreprocessArgs {
    pub list: PathBuf,
    pub name: String,
    pub config: Option<PathBuf>,
    pub height: Option<usize>,
    pub width: Option<usize>,
    pub num_channels: Option<usize>,
    pub resize_method: Option<ResizeMethod>,
    pub encoder: String,
    pub model_variant: Option<String>,
    pub on_disk: bool,
    pub cache_dir: PathBuf,
    pub split: String,
    pub output: PathBuf,
}

/// One entry per line; blank lines are missing values.
pub fn read_list(path: &Path) -> Result<Vec<RawEntry>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read list file {}", path.display()))?;
    Ok(text
        .lines()
        .map(|line| match line.trim() {
            "" => RawEntry::Missing,
            p => RawEntry::Path(p.to_string()),
        })
        .collect())
}

pub fn load_preprocessing_config(path: Option<&Path>) -> Result<PreprocessingConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read preprocessing config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Invalid preprocessing config {}", path.display()))
        }
        None => Ok(PreprocessingConfig::default()),
    }
}

fn apply_overrides(mut config: PreprocessingConfig, args: &PreprocessArgs) -> PreprocessingConfig {
    if args.height.is_some() {
        config.height = args.height;
    }
    if args.width.is_some() {
        config.width = args.width;
    }
    if args.num_channels.is_some() {
        config.num_channels = args.num_channels;
    }
    if let Some(method) = args.resize_method {
        config.resize_method = method;
    }
    if args.on_disk {
        config = config.on_disk();
    }
    config
}

pub fn run(args: PreprocessArgs) -> Result<()> {
    println!("\n=== Vecta Preprocess ===\n");

    let config = apply_overrides(load_preprocessing_config(args.config.as_deref())?, &args);
    let encoder = EncoderConfig {
        encoder_type: args.encoder.clone(),
        model_variant: args.model_variant.clone(),
    };
    let feature = Vector2DFeature::new(&args.name, config, encoder);

    let column = read_list(&args.list)?;
    println!("  Column: {} ({} rows from {})", args.name, column.len(), args.list.display());

    let ctx = ColumnContext {
        src: Some(args.list.clone()),
        checksum: dataset_checksum(&args.list),
        split: args.split.clone(),
        cache_dir: args.cache_dir.clone(),
    };
    let processed = feature
        .add_feature_data(column, &TransformRegistry::builtin(), &ctx, false)
        .with_context(|| format!("Failed to preprocess feature {}", args.name))?;

    let [c, h, w] = processed.metadata.reshape;
    println!("  Shape: {} x {} x {}", c, h, w);
    println!("  Unreadable rows: {}", processed.num_failed);
    match &processed.column {
        ProcessedColumn::InMemory(rows) => println!("  Kept {} rows in memory", rows.len()),
        ProcessedColumn::OnDisk { path, indices } => {
            println!("  Store: {} ({} rows)", path.display(), indices.len())
        }
    }

    if let Some(parent) = args.output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(&args.output, processed.metadata.to_json()?)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    println!("  Metadata: {}", args.output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(dir: &Path, list: PathBuf) -> PreprocessArgs {
        PreprocessArgs {
            list,
            name: "image".to_string(),
            config: None,
            height: Some(4),
            width: Some(6),
            num_channels: Some(1),
            resize_method: None,
            encoder: "dense".to_string(),
            model_variant: None,
            on_disk: true,
            cache_dir: dir.join("cache"),
            split: "training".to_string(),
            output: dir.join("out").join("meta.json"),
        }
    }

    #[test]
    fn test_read_list_blank_lines_are_missing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let list = dir.path().join("list.txt");
        std::fs::write(&list, "a.png\n\n  b.png  \n")?;

        let entries = read_list(&list)?;
        assert_eq!(entries.len(), 3);
        assert!(matches!(&entries[0], RawEntry::Path(p) if p == "a.png"));
        assert!(matches!(entries[1], RawEntry::Missing));
        assert!(matches!(&entries[2], RawEntry::Path(p) if p == "b.png"));
        Ok(())
    }

    #[test]
    fn test_flags_override_config_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config_path = dir.path().join("pre.json");
        std::fs::write(&config_path, r#"{"height": 10, "width": 10, "resize_method": "crop_or_pad"}"#)?;

        let mut a = args(dir.path(), dir.path().join("list.txt"));
        a.config = Some(config_path.clone());
        a.width = None;
        let config = apply_overrides(load_preprocessing_config(Some(&config_path))?, &a);
        assert_eq!(config.height, Some(4));
        assert_eq!(config.width, Some(10));
        assert_eq!(config.resize_method, ResizeMethod::CropOrPad);
        assert!(!config.in_memory);
        Ok(())
    }

    #[test]
    fn test_run_defaults_unreadable_rows_and_writes_store() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let list = dir.path().join("list.txt");
        image::GrayImage::from_pixel(8, 8, image::Luma([200u8])).save(dir.path().join("a.png"))?;
        std::fs::write(&list, "a.png\nmissing_1.png\n\n")?;

        run(args(dir.path(), list))?;

        let meta: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("out").join("meta.json"))?)?;
        assert_eq!(meta["reshape"], serde_json::json!([1, 4, 6]));
        assert_eq!(meta["preprocessing"]["in_memory"], serde_json::json!(false));

        let stores: Vec<_> = std::fs::read_dir(dir.path().join("cache"))?.collect();
        assert_eq!(stores.len(), 1);
        Ok(())
    }
}
