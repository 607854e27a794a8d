//! Image Store - Binary Memory-Mapped Processed Images
//!
//! One file per (dataset checksum, split): a fixed header followed by
//! `num_rows` float32 arrays of shape (channels, height, width).

use bytemuck::{Pod, Zeroable};
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};

use crate::entry::ImageArray;
use crate::error::{PreprocessError, PreprocessResult};

/// Header for the binary store file
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct StoreHeader {
    /// Magic bytes: "V2DI"
    pub magic: [u8; 4],
    pub version: u32,
    pub num_rows: u64,
    pub channels: u32,
    pub height: u32,
    pub width: u32,
    pub _reserved: [u8; 32],
    pub _pad: [u8; 4],
}

impl StoreHeader {
    pub const MAGIC: [u8; 4] = *b"V2DI";
    pub const VERSION: u32 = 1;
    pub const SIZE: usize = std::mem::size_of::<StoreHeader>();

    pub fn new(num_rows: u64, shape: [usize; 3]) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            num_rows,
            channels: shape[0] as u32,
            height: shape[1] as u32,
            width: shape[2] as u32,
            _reserved: [0; 32],
            _pad: [0; 4],
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == Self::MAGIC && self.version == Self::VERSION
    }

    pub fn shape(&self) -> [usize; 3] {
        [self.channels as usize, self.height as usize, self.width as usize]
    }

    pub fn row_len(&self) -> usize {
        self.shape().iter().product()
    }
}

/// Sequential row writer.
///
/// Rows must be appended in order. The buffered file is flushed by
/// `finish`, and by `BufWriter`'s drop on any early exit.
pub struct ImageStoreWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    shape: [usize; 3],
    num_rows: usize,
    written: usize,
}

impl ImageStoreWriter {
    pub fn create(path: &Path, num_rows: usize, shape: [usize; 3]) -> PreprocessResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header = StoreHeader::new(num_rows as u64, shape);
        writer.write_all(bytemuck::bytes_of(&header))?;

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            shape,
            num_rows,
            written: 0,
        })
    }

    /// Write the next row, returning its index.
    pub fn append_row(&mut self, row: &ImageArray) -> PreprocessResult<usize> {
        if row.shape() != self.shape {
            return Err(PreprocessError::ShapeMismatch {
                expected: self.shape,
                actual: row.shape(),
            });
        }
        if self.written >= self.num_rows {
            return Err(PreprocessError::Cache(format!(
                "store {} already holds {} rows",
                self.path.display(),
                self.num_rows
            )));
        }
        self.writer.write_all(bytemuck::cast_slice(row.data()))?;
        self.written += 1;
        Ok(self.written - 1)
    }

    pub fn finish(mut self) -> PreprocessResult<PathBuf> {
        self.writer.flush()?;
        if self.written != self.num_rows {
            return Err(PreprocessError::Cache(format!(
                "store {} expected {} rows, got {}",
                self.path.display(),
                self.num_rows,
                self.written
            )));
        }
        Ok(self.path.clone())
    }
}

/// Memory-mapped processed images
pub struct MappedImageStore {
    mmap: Mmap,
    header: StoreHeader,
}

impl MappedImageStore {
    pub fn load(path: &Path) -> PreprocessResult<Self> {
        let file = File::open(path)?;
        // SAFETY: the store is never written to after `finish`.
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        if mmap.len() < StoreHeader::SIZE {
            return Err(PreprocessError::Cache("Store file too small".to_string()));
        }
        let header: StoreHeader = *bytemuck::from_bytes(&mmap[..StoreHeader::SIZE]);
        if !header.is_valid() {
            return Err(PreprocessError::Cache(
                "Invalid store file (bad magic or version)".to_string(),
            ));
        }

        let expected = StoreHeader::SIZE + header.num_rows as usize * header.row_len() * 4;
        if mmap.len() != expected {
            return Err(PreprocessError::Cache(format!(
                "Store file has {} bytes, header describes {}",
                mmap.len(),
                expected
            )));
        }

        Ok(Self { mmap, header })
    }

    /// All rows as one flat slice (zero-copy)
    pub fn values(&self) -> &[f32] {
        bytemuck::cast_slice(&self.mmap[StoreHeader::SIZE..])
    }

    pub fn row(&self, idx: usize) -> Option<&[f32]> {
        if idx >= self.num_rows() {
            return None;
        }
        let len = self.header.row_len();
        Some(&self.values()[idx * len..(idx + 1) * len])
    }

    pub fn row_array(&self, idx: usize) -> Option<ImageArray> {
        self.row(idx).map(|r| ImageArray::new(self.shape(), r.to_vec()))
    }

    /// Gather rows into a (batch, channels, height, width) tensor.
    pub fn batch_tensor(&self, indices: &[usize], device: &Device) -> PreprocessResult<Tensor> {
        let mut data = Vec::with_capacity(indices.len() * self.header.row_len());
        for &idx in indices {
            let row = self.row(idx).ok_or_else(|| {
                PreprocessError::Cache(format!("row {} out of range ({} rows)", idx, self.num_rows()))
            })?;
            data.extend_from_slice(row);
        }
        let [c, h, w] = self.shape();
        Ok(Tensor::from_vec(data, (indices.len(), c, h, w), device)?)
    }

    pub fn num_rows(&self) -> usize {
        self.header.num_rows as usize
    }

    pub fn shape(&self) -> [usize; 3] {
        self.header.shape()
    }

    pub fn header(&self) -> &StoreHeader {
        &self.header
    }
}

/// Locates store files in a cache directory.
pub struct ImageStore {
    cache_dir: PathBuf,
}

impl ImageStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    pub fn store_path(&self, checksum: &str, split: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.{}.v2d", checksum, split))
    }

    pub fn exists(&self, checksum: &str, split: &str) -> bool {
        self.store_path(checksum, split).exists()
    }

    pub fn create_writer(
        &self,
        checksum: &str,
        split: &str,
        num_rows: usize,
        shape: [usize; 3],
    ) -> PreprocessResult<ImageStoreWriter> {
        ImageStoreWriter::create(&self.store_path(checksum, split), num_rows, shape)
    }

    pub fn open(&self, checksum: &str, split: &str) -> PreprocessResult<MappedImageStore> {
        MappedImageStore::load(&self.store_path(checksum, split))
    }
}

/// Checksum of a dataset source (hash of path, size and mtime)
pub fn dataset_checksum(path: &Path) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    path.to_string_lossy().hash(&mut hasher);
    if let Ok(meta) = std::fs::metadata(path) {
        meta.len().hash(&mut hasher);
        if let Ok(modified) = meta.modified() {
            modified.hash(&mut hasher);
        }
    }
    let hash = hasher.finish();

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("dataset");

    format!("{}_{:016x}", stem, hash)
}
