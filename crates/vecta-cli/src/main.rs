//! Vecta CLI - Preprocess vector2d columns and pretrain encoders
//!
//! Usage:
//!   vecta preprocess --list images.txt --name image --height 32 --width 32
//!   vecta cache info --store .vecta_cache/images_0123abcd.training.v2d
//!   vecta pretrain --dataset rows.jsonl --image-column image --number-columns age,score

mod cache;
mod preprocess;
mod pretrain;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use vecta_core::ResizeMethod;

#[derive(Parser)]
#[command(
    name = "vecta",
    about = "Vecta CLI - Preprocess vector2d features and run contrastive pretraining",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Preprocess one vector2d column listed one entry per line
    Preprocess {
        /// File with one image path per line (empty line = missing value)
        #[arg(long)]
        list: PathBuf,

        /// Feature name
        #[arg(long, default_value = "image")]
        name: String,

        /// Preprocessing config JSON; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        height: Option<usize>,

        #[arg(long)]
        width: Option<usize>,

        #[arg(long)]
        num_channels: Option<usize>,

        /// Resize method: interpolate or crop_or_pad
        #[arg(long, value_parser = parse_resize_method)]
        resize_method: Option<ResizeMethod>,

        /// Encoder type recorded for the feature
        #[arg(long, default_value = "dense")]
        encoder: String,

        /// Pretrained variant; uses the pretrained transform when registered
        #[arg(long)]
        model_variant: Option<String>,

        /// Write rows to the on-disk store instead of keeping them in memory
        #[arg(long)]
        on_disk: bool,

        /// Directory for on-disk stores
        #[arg(long, default_value = ".vecta_cache")]
        cache_dir: PathBuf,

        /// Split name used in the store file name
        #[arg(long, default_value = "training")]
        split: String,

        /// Output path for the feature metadata JSON
        #[arg(long, default_value = "vector2d_metadata.json")]
        output: PathBuf,
    },

    /// Inspect on-disk image stores
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Contrastive pretraining over a JSONL table
    Pretrain {
        /// JSONL file, one row object per line
        #[arg(long)]
        dataset: PathBuf,

        /// Column holding image paths
        #[arg(long)]
        image_column: String,

        /// Comma-separated numeric columns
        #[arg(long, value_delimiter = ',')]
        number_columns: Vec<String>,

        /// Preprocessing config JSON for the image column
        #[arg(long)]
        preprocessing: Option<PathBuf>,

        /// Model config JSON (default: dense encoders over every column)
        #[arg(long)]
        model_config: Option<PathBuf>,

        /// Number of training epochs
        #[arg(long, default_value = "3")]
        epochs: usize,

        /// Batch size (at least 2)
        #[arg(long, default_value = "128")]
        batch_size: usize,

        /// Learning rate
        #[arg(long, default_value = "1e-3")]
        lr: f64,

        /// Fraction of features replaced per row
        #[arg(long, default_value = "0.6")]
        corruption_rate: f64,

        /// Contrastive loss temperature
        #[arg(long, default_value = "1.0")]
        temperature: f64,

        /// Save checkpoint every N optimizer steps (0 = only at end)
        #[arg(long, default_value = "0")]
        save_every: usize,

        /// Max training steps (0 = run all epochs)
        #[arg(long, default_value = "0")]
        max_steps: usize,

        /// Seed for shuffling and corruption
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Directory for on-disk stores
        #[arg(long, default_value = ".vecta_cache")]
        cache_dir: PathBuf,

        /// Output directory for checkpoints and statistics
        #[arg(long, default_value = "checkpoints")]
        output_dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show info about an image store
    Info {
        /// Path to the .v2d store file
        #[arg(long)]
        store: PathBuf,
    },
}

/// Accepts the same names as the preprocessing config JSON.
fn parse_resize_method(s: &str) -> Result<ResizeMethod, String> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| format!("unknown resize method '{}' (expected interpolate or crop_or_pad)", s))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Preprocess {
            list, name, config, height, width, num_channels,
            resize_method, encoder, model_variant, on_disk,
            cache_dir, split, output,
        } => {
            preprocess::run(preprocess::PreprocessArgs {
                list, name, config, height, width, num_channels,
                resize_method, encoder, model_variant, on_disk,
                cache_dir, split, output,
            })?;
        }

        Commands::Cache { action } => match action {
            CacheAction::Info { store } => {
                cache::info(store)?;
            }
        },

        Commands::Pretrain {
            dataset, image_column, number_columns, preprocessing,
            model_config, epochs, batch_size, lr, corruption_rate,
            temperature, save_every, max_steps, seed, cache_dir, output_dir,
        } => {
            pretrain::run(pretrain::PretrainArgs {
                dataset, image_column, number_columns, preprocessing,
                model_config, epochs, batch_size, lr, corruption_rate,
                temperature, save_every, max_steps, seed, cache_dir, output_dir,
            })?;
        }
    }

    Ok(())
}
