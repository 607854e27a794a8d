//! Columnar training data and batching

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{Map, Value};

use vecta_core::{ImageArray, ProcessedColumn, RawEntry};

/// One processed feature column, stored as flat float rows.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    /// Shape of a single row, e.g. `[1]` for numbers or `[c, h, w]`.
    pub row_shape: Vec<usize>,
    values: Vec<f32>,
}

impl Column {
    pub fn new(name: &str, row_shape: Vec<usize>, values: Vec<f32>) -> Result<Self> {
        let row_len: usize = row_shape.iter().product();
        if row_len == 0 || values.len() % row_len != 0 {
            bail!(
                "Column {} has {} values, not a multiple of row shape {:?}",
                name,
                values.len(),
                row_shape
            );
        }
        Ok(Self {
            name: name.to_string(),
            row_shape,
            values,
        })
    }

    pub fn numbers(name: &str, values: Vec<f32>) -> Result<Self> {
        Self::new(name, vec![1], values)
    }

    pub fn from_images(name: &str, rows: &[ImageArray]) -> Result<Self> {
        let shape = match rows.first() {
            Some(first) => first.shape(),
            None => bail!("Column {} is empty", name),
        };
        let mut values = Vec::with_capacity(rows.len() * shape.iter().product::<usize>());
        for row in rows {
            if row.shape() != shape {
                bail!("Column {} mixes shapes {:?} and {:?}", name, shape, row.shape());
            }
            values.extend_from_slice(row.data());
        }
        Self::new(name, shape.to_vec(), values)
    }

    pub fn from_processed(name: &str, column: &ProcessedColumn) -> Result<Self> {
        let rows = column
            .materialize()
            .with_context(|| format!("Failed to load processed column {}", name))?;
        Self::from_images(name, &rows)
    }

    pub fn row_len(&self) -> usize {
        self.row_shape.iter().product()
    }

    pub fn len(&self) -> usize {
        self.values.len() / self.row_len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn row(&self, idx: usize) -> Option<&[f32]> {
        let len = self.row_len();
        self.values.get(idx * len..(idx + 1) * len)
    }

    /// Stack the given rows into a `(n, row_shape..)` tensor.
    pub fn gather(&self, indices: &[usize], device: &Device) -> Result<Tensor> {
        let mut data = Vec::with_capacity(indices.len() * self.row_len());
        for &idx in indices {
            let row = self
                .row(idx)
                .with_context(|| format!("Row {} out of range for column {}", idx, self.name))?;
            data.extend_from_slice(row);
        }
        let mut shape = vec![indices.len()];
        shape.extend_from_slice(&self.row_shape);
        Ok(Tensor::from_vec(data, shape, device)?)
    }
}

/// A batch of feature tensors keyed by feature name.
pub struct Batch {
    pub inputs: BTreeMap<String, Tensor>,
    pub size: usize,
}

impl Batch {
    pub fn get(&self, name: &str) -> Result<&Tensor> {
        self.inputs
            .get(name)
            .with_context(|| format!("Batch has no feature {}", name))
    }
}

pub struct Dataset {
    columns: Vec<Column>,
    order: Vec<usize>,
}

impl Dataset {
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let len = columns.first().map(Column::len).unwrap_or(0);
        if let Some(bad) = columns.iter().find(|c| c.len() != len) {
            bail!("Column {} has {} rows, expected {}", bad.name, bad.len(), len);
        }
        Ok(Self {
            columns,
            order: (0..len).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.order.shuffle(rng);
    }

    pub fn num_batches(&self, batch_size: usize, drop_last: bool) -> usize {
        if batch_size == 0 {
            return 0;
        }
        if drop_last {
            self.len() / batch_size
        } else {
            (self.len() + batch_size - 1) / batch_size
        }
    }

    /// Batch `batch_idx` of the current (possibly shuffled) order.
    pub fn batch(&self, batch_idx: usize, batch_size: usize, device: &Device) -> Result<Batch> {
        let start = batch_idx * batch_size;
        let end = (start + batch_size).min(self.len());
        if start >= end {
            bail!("Empty batch at indices {}..{}", start, end);
        }
        let indices = &self.order[start..end];

        let mut inputs = BTreeMap::new();
        for column in &self.columns {
            inputs.insert(column.name.clone(), column.gather(indices, device)?);
        }
        Ok(Batch {
            inputs,
            size: indices.len(),
        })
    }
}

/// Rows of a JSONL file, one object per line.
pub struct JsonlTable {
    pub path: PathBuf,
    records: Vec<Map<String, Value>>,
}

impl JsonlTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// String cells become paths; null or missing cells are `Missing`.
    pub fn raw_column(&self, name: &str) -> Result<Vec<RawEntry>> {
        self.records
            .iter()
            .enumerate()
            .map(|(i, record)| match record.get(name) {
                Some(Value::String(s)) => Ok(RawEntry::Path(s.clone())),
                Some(Value::Null) | None => Ok(RawEntry::Missing),
                Some(other) => bail!("Line {}: field '{}' is not a string: {}", i + 1, name, other),
            })
            .collect()
    }

    pub fn number_column(&self, name: &str) -> Result<Vec<f32>> {
        self.records
            .iter()
            .enumerate()
            .map(|(i, record)| {
                record
                    .get(name)
                    .and_then(Value::as_f64)
                    .map(|v| v as f32)
                    .with_context(|| format!("Line {}: missing numeric field '{}'", i + 1, name))
            })
            .collect()
    }
}

/// Load a JSONL table
pub fn load_jsonl_table(path: impl AsRef<Path>) -> Result<JsonlTable> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open dataset file {}", path.display()))?;
    let reader = std::io::BufReader::new(file);

    let mut records = Vec::new();
    for (i, line) in std::io::BufRead::lines(reader).enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: Value = serde_json::from_str(&line).with_context(|| format!("Line {} is not valid JSON", i + 1))?;
        match entry {
            Value::Object(map) => records.push(map),
            _ => bail!("Line {} is not a JSON object", i + 1),
        }
    }

    Ok(JsonlTable {
        path: path.to_path_buf(),
        records,
    })
}
