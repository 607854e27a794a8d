//! Projection head for the contrastive objective

use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::{batch_norm, linear, linear_no_bias, BatchNorm, BatchNormConfig, Linear, VarBuilder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadType {
    Linear,
    #[default]
    Nonlinear,
}

/// Linear layer, optionally followed by batch norm. The bias is dropped
/// whenever batch norm follows.
pub struct LinearLayer {
    linear: Linear,
    bn: Option<BatchNorm>,
}

impl LinearLayer {
    pub fn new(in_features: usize, out_features: usize, use_bias: bool, use_bn: bool, vb: VarBuilder) -> Result<Self> {
        let linear = if use_bias && !use_bn {
            linear(in_features, out_features, vb.pp("linear"))?
        } else {
            linear_no_bias(in_features, out_features, vb.pp("linear"))?
        };
        let bn = if use_bn {
            Some(batch_norm(out_features, BatchNormConfig::default(), vb.pp("bn"))?)
        } else {
            None
        };
        Ok(Self { linear, bn })
    }

    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let xs = self.linear.forward(xs)?;
        match &self.bn {
            Some(bn) => bn.forward_t(&xs, train),
            None => Ok(xs),
        }
    }
}

pub struct ProjectionHead {
    layers: Vec<LinearLayer>,
    out_features: usize,
}

impl ProjectionHead {
    pub fn new(
        in_features: usize,
        hidden_features: usize,
        out_features: usize,
        head_type: HeadType,
        vb: VarBuilder,
    ) -> Result<Self> {
        let layers = match head_type {
            HeadType::Linear => vec![LinearLayer::new(in_features, out_features, false, true, vb.pp("layers.0"))?],
            HeadType::Nonlinear => vec![
                LinearLayer::new(in_features, hidden_features, true, true, vb.pp("layers.0"))?,
                LinearLayer::new(hidden_features, out_features, false, true, vb.pp("layers.2"))?,
            ],
        };
        Ok(Self { layers, out_features })
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// ReLU between consecutive layers.
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let mut xs = xs.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            if i > 0 {
                xs = xs.relu()?;
            }
            xs = layer.forward_t(&xs, train)?;
        }
        Ok(xs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_head_shapes() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let x = Tensor::randn(0f32, 1.0, (6, 10), &Device::Cpu)?;

        let nonlinear = ProjectionHead::new(10, 16, 4, HeadType::Nonlinear, vb.pp("nl"))?;
        assert_eq!(nonlinear.forward_t(&x, true)?.dims(), &[6, 4]);
        assert_eq!(nonlinear.forward_t(&x, false)?.dims(), &[6, 4]);

        let lin = ProjectionHead::new(10, 16, 3, HeadType::Linear, vb.pp("l"))?;
        assert_eq!(lin.forward_t(&x, true)?.dims(), &[6, 3]);
        Ok(())
    }

    #[test]
    fn test_no_bias_with_batch_norm() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let layer = LinearLayer::new(3, 2, true, true, vb)?;
        assert!(layer.linear.bias().is_none());
        Ok(())
    }
}
