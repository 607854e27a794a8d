//! Vector2D column preprocessing
//!
//! Picks the read function for a column, applies it to every row and stores
//! the result in memory or in the on-disk image store. Rows that cannot be
//! read are replaced by the gray default image, never dropped.

use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{EncoderConfig, PreprocessingConfig, ResizeMethod, StandardizeMode};
use crate::entry::{resolve_entry, ImageArray, RawEntry};
use crate::error::{PreprocessError, PreprocessResult};
use crate::image_cache::{ImageStore, MappedImageStore};
use crate::infer::finalize_preprocessing_parameters;
use crate::reader::{ImageReader, StandardReader};
use crate::transforms::TransformRegistry;

/// Preprocessing section of the feature metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingMetadata {
    pub height: usize,
    pub width: usize,
    pub num_channels: usize,
    pub resize_method: ResizeMethod,
    pub standardize_image: Option<StandardizeMode>,
    pub in_memory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pretrained_model_weights: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pretrained_model_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pretrained_model_variant: Option<String>,
}

/// Per-feature training set metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector2DMetadata {
    pub preprocessing: PreprocessingMetadata,
    /// (channels, height, width)
    pub reshape: [usize; 3],
}

impl Vector2DMetadata {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Where the column comes from and where its store would go.
#[derive(Debug, Clone)]
pub struct ColumnContext {
    /// Dataset source file; relative paths resolve against its directory.
    pub src: Option<PathBuf>,
    pub checksum: String,
    pub split: String,
    pub cache_dir: PathBuf,
}

impl ColumnContext {
    fn src_dir(&self) -> Option<PathBuf> {
        let src = self.src.as_ref()?;
        let abs = if src.is_absolute() {
            src.clone()
        } else {
            std::env::current_dir().ok()?.join(src)
        };
        abs.parent().map(Path::to_path_buf)
    }
}

#[derive(Debug, Clone)]
pub enum ProcessedColumn {
    InMemory(Vec<ImageArray>),
    /// Row indices into the store at `path`.
    OnDisk { path: PathBuf, indices: Vec<usize> },
}

impl ProcessedColumn {
    pub fn len(&self) -> usize {
        match self {
            ProcessedColumn::InMemory(rows) => rows.len(),
            ProcessedColumn::OnDisk { indices, .. } => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load every row into memory, in column order.
    pub fn materialize(&self) -> PreprocessResult<Vec<ImageArray>> {
        match self {
            ProcessedColumn::InMemory(rows) => Ok(rows.clone()),
            ProcessedColumn::OnDisk { path, indices } => {
                let store = MappedImageStore::load(path)?;
                indices
                    .iter()
                    .map(|&i| {
                        store.row_array(i).ok_or_else(|| {
                            PreprocessError::Cache(format!("row {} missing from {}", i, path.display()))
                        })
                    })
                    .collect()
            }
        }
    }
}

/// Output of `add_feature_data`.
#[derive(Debug, Clone)]
pub struct ProcessedFeature {
    pub column: ProcessedColumn,
    pub metadata: Vector2DMetadata,
    pub num_failed: usize,
}

/// A vector2d input column and its configuration.
#[derive(Debug, Clone)]
pub struct Vector2DFeature {
    pub name: String,
    pub preprocessing: PreprocessingConfig,
    pub encoder: EncoderConfig,
}

impl Vector2DFeature {
    pub fn new(name: &str, preprocessing: PreprocessingConfig, encoder: EncoderConfig) -> Self {
        Self {
            name: name.to_string(),
            preprocessing,
            encoder,
        }
    }

    /// Choose the read function and record the finalized metadata.
    pub fn build_reader(
        &self,
        column: &[RawEntry],
        registry: &TransformRegistry,
    ) -> PreprocessResult<(ImageReader, Vector2DMetadata)> {
        let config = &self.preprocessing;

        let pretrained = self
            .encoder
            .model_variant
            .as_deref()
            .and_then(|variant| registry.get(&self.encoder.encoder_type, variant));

        let (reader, preprocessing) = match pretrained {
            Some(entry) => {
                warn!(
                    "Using the transforms specified for the pretrained model {} {}. This sets the number of channels to 3 and resizes the image to the needs of the model.",
                    entry.model_type, entry.variant
                );
                let transform = registry.transform_for(&entry.model_type, &entry.variant)?;
                let m = transform.metadata();
                let preprocessing = PreprocessingMetadata {
                    height: m.height(),
                    width: m.width(),
                    num_channels: m.num_channels(),
                    resize_method: config.resize_method,
                    standardize_image: config.standardize_image,
                    in_memory: config.in_memory,
                    pretrained_model_weights: Some(m.weights.clone()),
                    pretrained_model_type: Some(entry.model_type.clone()),
                    pretrained_model_variant: Some(entry.variant.clone()),
                };
                (ImageReader::Pretrained(transform), preprocessing)
            }
            None => {
                let params = finalize_preprocessing_parameters(config, &self.encoder.encoder_type, column)?;
                let preprocessing = PreprocessingMetadata {
                    height: params.height,
                    width: params.width,
                    num_channels: params.num_channels,
                    resize_method: config.resize_method,
                    standardize_image: params.standardize_image,
                    in_memory: config.in_memory,
                    pretrained_model_weights: None,
                    pretrained_model_type: None,
                    pretrained_model_variant: None,
                };
                let reader = StandardReader::new(params, config.resize_method);
                (ImageReader::Standard(reader), preprocessing)
            }
        };

        let metadata = Vector2DMetadata {
            reshape: reader.output_shape(),
            preprocessing,
        };
        Ok((reader, metadata))
    }

    /// Process the whole column.
    pub fn add_feature_data(
        &self,
        column: Vec<RawEntry>,
        registry: &TransformRegistry,
        ctx: &ColumnContext,
        skip_save_processed_input: bool,
    ) -> PreprocessResult<ProcessedFeature> {
        let src_dir = ctx.src_dir();
        let column: Vec<RawEntry> = column
            .into_iter()
            .map(|entry| resolve_entry(entry, src_dir.as_deref()))
            .collect();

        let (reader, metadata) = self.build_reader(&column, registry)?;
        let [c, h, w] = metadata.reshape;
        let default_image = ImageArray::gray_default(c, h, w);

        let pb = ProgressBar::new(column.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message(self.name.clone());

        let mut num_failed = 0usize;
        let processed = if self.preprocessing.in_memory || skip_save_processed_input {
            let mut rows = Vec::with_capacity(column.len());
            for entry in &column {
                match reader.read(entry)? {
                    Some(row) => rows.push(row),
                    None => {
                        num_failed += 1;
                        rows.push(default_image.clone());
                    }
                }
                pb.inc(1);
            }
            ProcessedColumn::InMemory(rows)
        } else {
            let store = ImageStore::new(ctx.cache_dir.clone());
            match write_store(&store, ctx, &column, &reader, &default_image, &pb, &mut num_failed) {
                Ok(processed) => processed,
                Err(e) => {
                    pb.abandon();
                    // A partial store would pass `ImageStore::exists`.
                    let path = store.store_path(&ctx.checksum, &ctx.split);
                    if let Err(rm) = std::fs::remove_file(&path) {
                        warn!("Failed to remove partial store {}: {}", path.display(), rm);
                    }
                    return Err(e);
                }
            }
        };
        pb.finish_and_clear();

        if num_failed > 0 {
            warn!("Failed to read {} images for feature {}", num_failed, self.name);
        }
        info!(
            "Processed {} rows of feature {} to shape {:?}",
            processed.len(),
            self.name,
            metadata.reshape
        );

        Ok(ProcessedFeature {
            column: processed,
            metadata,
            num_failed,
        })
    }
}

fn write_store(
    store: &ImageStore,
    ctx: &ColumnContext,
    column: &[RawEntry],
    reader: &ImageReader,
    default_image: &ImageArray,
    pb: &ProgressBar,
    num_failed: &mut usize,
) -> PreprocessResult<ProcessedColumn> {
    let shape = default_image.shape();
    let mut writer = store.create_writer(&ctx.checksum, &ctx.split, column.len(), shape)?;
    let mut indices = Vec::with_capacity(column.len());
    for entry in column {
        let row = match reader.read(entry)? {
            Some(row) => row,
            None => {
                *num_failed += 1;
                default_image.clone()
            }
        };
        indices.push(writer.append_row(&row)?);
        pb.inc(1);
    }
    let path = writer.finish()?;
    Ok(ProcessedColumn::OnDisk { path, indices })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::tests::gray_png;
    use crate::entry::HwcArray;
    use tempfile::tempdir;

    fn ctx(dir: &Path) -> ColumnContext {
        ColumnContext {
            src: None,
            checksum: "test".to_string(),
            split: "training".to_string(),
            cache_dir: dir.to_path_buf(),
        }
    }

    fn feature(config: PreprocessingConfig) -> Vector2DFeature {
        Vector2DFeature::new("img", config, EncoderConfig::default())
    }

    fn column(n: usize) -> Vec<RawEntry> {
        (0..n).map(|i| RawEntry::Bytes(gray_png(6 + i as u32, 8))).collect()
    }

    #[test]
    fn test_all_rows_processed() -> PreprocessResult<()> {
        let dir = tempdir()?;
        let config = PreprocessingConfig::default().with_size(4, 4).with_channels(1);
        let out = feature(config).add_feature_data(column(5), &TransformRegistry::builtin(), &ctx(dir.path()), false)?;

        assert_eq!(out.num_failed, 0);
        assert_eq!(out.metadata.reshape, [1, 4, 4]);
        let rows = out.column.materialize()?;
        assert_eq!(rows.len(), 5);
        for row in &rows {
            assert_eq!(row.shape(), [1, 4, 4]);
            assert!(row.data().iter().all(|v| (0.0..=1.0).contains(v)));
        }
        Ok(())
    }

    #[test]
    fn test_failing_row_gets_default() -> PreprocessResult<()> {
        let dir = tempdir()?;
        let mut entries = column(4);
        entries.insert(2, RawEntry::Bytes(b"garbage".to_vec()));

        let config = PreprocessingConfig::default().with_size(4, 4).with_channels(1);
        let out = feature(config).add_feature_data(entries, &TransformRegistry::builtin(), &ctx(dir.path()), false)?;

        assert_eq!(out.num_failed, 1);
        let rows = out.column.materialize()?;
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[2], ImageArray::gray_default(1, 4, 4));
        Ok(())
    }

    #[test]
    fn test_on_disk_matches_in_memory() -> PreprocessResult<()> {
        let dir = tempdir()?;
        let mut entries = column(3);
        entries.push(RawEntry::Missing);
        let base = PreprocessingConfig::default().with_size(5, 3).with_channels(1);
        let registry = TransformRegistry::builtin();

        let in_memory = feature(base.clone()).add_feature_data(entries.clone(), &registry, &ctx(dir.path()), false)?;
        let on_disk = feature(base.on_disk()).add_feature_data(entries, &registry, &ctx(dir.path()), false)?;

        match &on_disk.column {
            ProcessedColumn::OnDisk { path, indices } => {
                assert_eq!(indices, &vec![0, 1, 2, 3]);
                assert!(path.exists());
            }
            other => panic!("expected on-disk column, got {:?}", other),
        }
        assert_eq!(in_memory.column.materialize()?, on_disk.column.materialize()?);
        assert_eq!(on_disk.num_failed, 1);
        Ok(())
    }

    #[test]
    fn test_fatal_row_removes_partial_store() -> PreprocessResult<()> {
        let dir = tempdir()?;
        let mut entries = column(2);
        entries.push(RawEntry::Array(HwcArray::new(4, 4, 3, vec![0; 48])));
        let config = PreprocessingConfig::default().with_size(4, 4).with_channels(1).on_disk();

        let result = feature(config).add_feature_data(entries, &TransformRegistry::builtin(), &ctx(dir.path()), false);
        assert!(matches!(result, Err(PreprocessError::NonSingleChannelSource(3))));
        assert!(!ImageStore::new(dir.path().to_path_buf()).exists("test", "training"));
        Ok(())
    }

    #[test]
    fn test_skip_save_forces_in_memory() -> PreprocessResult<()> {
        let dir = tempdir()?;
        let config = PreprocessingConfig::default().with_size(4, 4).with_channels(1).on_disk();
        let out = feature(config).add_feature_data(column(2), &TransformRegistry::builtin(), &ctx(dir.path()), true)?;
        assert!(matches!(out.column, ProcessedColumn::InMemory(_)));
        Ok(())
    }

    #[test]
    fn test_relative_paths_resolve_against_source() -> PreprocessResult<()> {
        let dir = tempdir()?;
        std::fs::create_dir(dir.path().join("imgs"))?;
        std::fs::write(dir.path().join("imgs/a.png"), gray_png(6, 6))?;

        let mut context = ctx(dir.path());
        context.src = Some(dir.path().join("data.jsonl"));
        let config = PreprocessingConfig::default().with_size(3, 3).with_channels(1);
        let out = feature(config).add_feature_data(
            vec![RawEntry::Path("imgs/a.png".to_string())],
            &TransformRegistry::builtin(),
            &context,
            false,
        )?;
        assert_eq!(out.num_failed, 0);
        Ok(())
    }

    #[test]
    fn test_pretrained_metadata() -> PreprocessResult<()> {
        let dir = tempdir()?;
        let encoder = EncoderConfig {
            encoder_type: "resnet".to_string(),
            model_variant: Some("18".to_string()),
        };
        let f = Vector2DFeature::new("img", PreprocessingConfig::default(), encoder);
        let out = f.add_feature_data(column(2), &TransformRegistry::builtin(), &ctx(dir.path()), false)?;

        assert_eq!(out.metadata.reshape, [3, 224, 224]);
        let pre = &out.metadata.preprocessing;
        assert_eq!(pre.pretrained_model_type.as_deref(), Some("resnet"));
        assert_eq!(pre.pretrained_model_weights.as_deref(), Some("ResNet18_Weights.IMAGENET1K_V1"));
        assert!(out.metadata.to_json().is_ok());
        Ok(())
    }

    #[test]
    fn test_no_readable_sample_is_fatal() {
        let dir = tempdir().unwrap();
        let result = feature(PreprocessingConfig::default()).add_feature_data(
            vec![RawEntry::Missing, RawEntry::Bytes(b"x".to_vec())],
            &TransformRegistry::builtin(),
            &ctx(dir.path()),
            false,
        );
        assert!(matches!(result, Err(PreprocessError::NoReadableSamples { .. })));
    }
}
