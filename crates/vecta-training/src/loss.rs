//! SimCLR / NT-Xent contrastive loss
//!
//! For `z_i`, `z_j` of `B` rows each, the `2B` rows are compared pairwise
//! by cosine similarity over temperature. Each row's positive is its twin
//! at offset `B`; all other rows except itself are negatives. The loss is
//! cross entropy with the positive at index 0, averaged over `2B` rows.
//!
//! Gather indices are built once for the batch size given at construction.

use candle_core::{DType, Device, Result, Tensor};
use candle_nn::loss::cross_entropy;

pub struct SimClrLoss {
    batch_size: usize,
    temperature: f64,
    positive_index: Tensor,
    negative_index: Tensor,
    labels: Tensor,
}

impl SimClrLoss {
    pub fn new(batch_size: usize, temperature: f64, device: &Device) -> Result<Self> {
        if batch_size < 2 {
            candle_core::bail!("contrastive loss needs batch_size >= 2, got {}", batch_size);
        }
        if temperature <= 0.0 {
            candle_core::bail!("temperature must be positive, got {}", temperature);
        }

        let n = 2 * batch_size;
        let positives: Vec<u32> = (0..batch_size)
            .map(|i| i * n + i + batch_size)
            .chain((0..batch_size).map(|i| (batch_size + i) * n + i))
            .map(|idx| idx as u32)
            .collect();

        let mut negatives = Vec::with_capacity(n * (n - 2));
        for i in 0..n {
            for j in 0..n {
                if j != i && j != (i + batch_size) % n {
                    negatives.push((i * n + j) as u32);
                }
            }
        }

        Ok(Self {
            batch_size,
            temperature,
            positive_index: Tensor::from_vec(positives, n, device)?,
            negative_index: Tensor::from_vec(negatives, n * (n - 2), device)?,
            labels: Tensor::zeros(n, DType::U32, device)?,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn forward(&self, z_i: &Tensor, z_j: &Tensor) -> Result<Tensor> {
        let (bi, bj) = (z_i.dim(0)?, z_j.dim(0)?);
        if bi != self.batch_size || bj != self.batch_size {
            candle_core::bail!(
                "contrastive loss was built for batch_size {}, got {} and {}",
                self.batch_size,
                bi,
                bj
            );
        }
        let n = 2 * self.batch_size;

        let z = Tensor::cat(&[z_i, z_j], 0)?;
        let norms = z.sqr()?.sum_keepdim(1)?.sqrt()?.maximum(1e-8)?;
        let z = z.broadcast_div(&norms)?;
        let sim = (z.matmul(&z.t()?)? / self.temperature)?;

        let flat = sim.flatten_all()?;
        let positives = flat.index_select(&self.positive_index, 0)?.reshape((n, 1))?;
        let negatives = flat.index_select(&self.negative_index, 0)?.reshape((n, n - 2))?;
        let logits = Tensor::cat(&[&positives, &negatives], 1)?;

        cross_entropy(&logits, &self.labels)
    }
}
