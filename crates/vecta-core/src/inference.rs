//! Serving-time input conversion for vector2d features.

use candle_core::{DType, Device, Tensor};

use crate::error::{PreprocessError, PreprocessResult};

/// A batch as it arrives at serving time.
#[derive(Debug, Clone)]
pub enum InferenceInput {
    Tensor(Tensor),
    /// Stacked along a new leading batch axis.
    TensorList(Vec<Tensor>),
    /// Whitespace-separated numbers, one row per string.
    Strings(Vec<String>),
}

impl InferenceInput {
    /// Convert to a single float32 tensor. NaN anywhere is an error.
    pub fn to_tensor(&self, device: &Device) -> PreprocessResult<Tensor> {
        let out = match self {
            InferenceInput::Tensor(t) => t.to_dtype(DType::F32)?,
            InferenceInput::TensorList(ts) => {
                if ts.is_empty() {
                    return Err(PreprocessError::InvalidInferenceInput("empty tensor list".to_string()));
                }
                Tensor::stack(ts, 0)?.to_dtype(DType::F32)?
            }
            InferenceInput::Strings(rows) => strings_to_tensor(rows, device)?,
        };

        let nan_count = out.ne(&out)?.to_dtype(DType::F32)?.sum_all()?.to_scalar::<f32>()?;
        if nan_count > 0.0 {
            return Err(PreprocessError::InvalidInferenceInput(
                "NaN values are not supported for vector2d inputs".to_string(),
            ));
        }
        Ok(out)
    }
}

fn strings_to_tensor(rows: &[String], device: &Device) -> PreprocessResult<Tensor> {
    let mut width = None;
    let mut values = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        let parsed = row
            .split_whitespace()
            .map(|x| x.parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| PreprocessError::InvalidInferenceInput(format!("row {}: {}", i, e)))?;
        match width {
            None => width = Some(parsed.len()),
            Some(w) if w != parsed.len() => {
                return Err(PreprocessError::InvalidInferenceInput(format!(
                    "row {} has {} values, expected {}",
                    i,
                    parsed.len(),
                    w
                )))
            }
            _ => {}
        }
        values.extend(parsed);
    }
    let width = width.ok_or_else(|| PreprocessError::InvalidInferenceInput("no rows".to_string()))?;
    Ok(Tensor::from_vec(values, (rows.len(), width), device)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strings() -> PreprocessResult<()> {
        let input = InferenceInput::Strings(vec!["1 2 3".to_string(), " 4\t5 6 ".to_string()]);
        let t = input.to_tensor(&Device::Cpu)?;
        assert_eq!(t.to_vec2::<f32>()?, vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        Ok(())
    }

    #[test]
    fn test_ragged_strings_rejected() {
        let input = InferenceInput::Strings(vec!["1 2".to_string(), "3".to_string()]);
        assert!(input.to_tensor(&Device::Cpu).is_err());
    }

    #[test]
    fn test_tensor_list_stacks() -> PreprocessResult<()> {
        let a = Tensor::zeros((2, 2), DType::F32, &Device::Cpu)?;
        let b = Tensor::ones((2, 2), DType::F32, &Device::Cpu)?;
        let t = InferenceInput::TensorList(vec![a, b]).to_tensor(&Device::Cpu)?;
        assert_eq!(t.dims(), &[2, 2, 2]);
        Ok(())
    }

    #[test]
    fn test_nan_rejected() -> PreprocessResult<()> {
        let t = Tensor::new(&[1.0f32, f32::NAN], &Device::Cpu)?;
        assert!(matches!(
            InferenceInput::Tensor(t).to_tensor(&Device::Cpu),
            Err(PreprocessError::InvalidInferenceInput(_))
        ));
        let s = InferenceInput::Strings(vec!["1 nan".to_string()]);
        assert!(s.to_tensor(&Device::Cpu).is_err());
        Ok(())
    }
}
