//! Cache subcommand - Inspect on-disk image stores

use anyhow::{Context, Result};
use std::path::PathBuf;

use vecta_core::MappedImageStore;

/// Display info about an existing image store
pub fn info(store_path: PathBuf) -> Result<()> {
    println!("\n=== Store Info ===\n");

    let store = MappedImageStore::load(&store_path).context("Failed to load image store")?;
    let header = store.header();
    let [c, h, w] = store.shape();

    println!("  Path: {}", store_path.display());
    println!("  Format version: {}", header.version);
    println!("  Rows: {}", store.num_rows());
    println!("  Shape: {} x {} x {} (channels x height x width)", c, h, w);

    let values = store.values();
    if !values.is_empty() {
        let (min, max) = values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        println!("  Value range: [{:.4}, {:.4}]", min, max);
    }

    let meta = std::fs::metadata(&store_path)?;
    let size_mb = meta.len() as f64 / (1024.0 * 1024.0);
    println!("  File size: {:.1} MB", size_mb);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vecta_core::{ImageArray, ImageStore};

    #[test]
    fn test_info_reads_written_store() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ImageStore::new(dir.path().to_path_buf());
        let mut writer = store.create_writer("ds_0", "training", 2, [1, 2, 2])?;
        writer.append_row(&ImageArray::gray_default(1, 2, 2))?;
        writer.append_row(&ImageArray::gray_default(1, 2, 2))?;
        let path = writer.finish()?;

        info(path)?;
        assert!(info(dir.path().join("absent.v2d")).is_err());
        Ok(())
    }
}
