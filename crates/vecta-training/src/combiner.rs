//! Combiners merge per-feature encoder outputs into one hidden vector.

use candle_core::{Module, Result, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CombinerConfig {
    /// Project the concatenation to this width. `None` keeps it as is.
    #[serde(default)]
    pub output_size: Option<usize>,
}

pub trait Combiner {
    fn output_size(&self) -> usize;

    /// Encoder outputs are given in input feature order.
    fn combine(&self, encoder_outputs: &[Tensor]) -> Result<Tensor>;
}

pub struct ConcatCombiner {
    fc: Option<Linear>,
    output_size: usize,
}

impl ConcatCombiner {
    pub fn new(input_sizes: &[usize], config: &CombinerConfig, vb: VarBuilder) -> Result<Self> {
        let concat_size: usize = input_sizes.iter().sum();
        match config.output_size {
            Some(out) => Ok(Self {
                fc: Some(linear(concat_size, out, vb.pp("fc"))?),
                output_size: out,
            }),
            None => Ok(Self {
                fc: None,
                output_size: concat_size,
            }),
        }
    }
}

impl Combiner for ConcatCombiner {
    fn output_size(&self) -> usize {
        self.output_size
    }

    fn combine(&self, encoder_outputs: &[Tensor]) -> Result<Tensor> {
        let hidden = Tensor::cat(encoder_outputs, 1)?;
        match &self.fc {
            Some(fc) => fc.forward(&hidden)?.relu(),
            None => Ok(hidden),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_concat() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let a = Tensor::ones((2, 3), DType::F32, &Device::Cpu)?;
        let b = Tensor::zeros((2, 5), DType::F32, &Device::Cpu)?;

        let plain = ConcatCombiner::new(&[3, 5], &CombinerConfig::default(), vb.pp("plain"))?;
        assert_eq!(plain.output_size(), 8);
        assert_eq!(plain.combine(&[a.clone(), b.clone()])?.dims(), &[2, 8]);

        let projected = ConcatCombiner::new(&[3, 5], &CombinerConfig { output_size: Some(4) }, vb.pp("proj"))?;
        assert_eq!(projected.combine(&[a, b])?.dims(), &[2, 4]);
        Ok(())
    }
}
