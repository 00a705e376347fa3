#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{Delegate, ModelRuntime, TensorLayout};

/// Tract-based runtime for ONNX detection models.
///
/// Tract executes on the CPU only; asking for the accelerator delegate fails
/// so the loader falls back.
pub struct TractRuntime {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    layout: TensorLayout,
    output_shape: Vec<usize>,
}

impl TractRuntime {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn open<P: AsRef<Path>>(
        model_path: P,
        input_size: u32,
        layout: TensorLayout,
        delegate: Delegate,
    ) -> Result<Self> {
        if delegate != Delegate::Cpu {
            bail!("tract runtime supports the cpu delegate only, not {}", delegate);
        }
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let shape = match layout {
            TensorLayout::Nhwc => tvec!(1, side, side, 3),
            TensorLayout::Nchw => tvec!(1, 3, side, side),
        };
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), shape))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let output_shape = model
            .model()
            .output_fact(0)
            .context("model declares no outputs")?
            .shape
            .as_concrete()
            .ok_or_else(|| anyhow!("model output shape is not concrete"))?
            .to_vec();

        log::info!(
            "tract model {} loaded: input {}x{} {:?}, output {:?}",
            model_path.display(),
            input_size,
            input_size,
            layout,
            output_shape
        );

        Ok(Self {
            model,
            input_size,
            layout,
            output_shape,
        })
    }

    fn build_input(&self, input: &[f32]) -> Result<Tensor> {
        let side = self.input_size as usize;
        let expected_len = side
            .checked_mul(side)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("input dimensions overflow"))?;

        if input.len() != expected_len {
            return Err(anyhow!(
                "expected {} input values, received {}",
                expected_len,
                input.len()
            ));
        }

        let tensor = match self.layout {
            TensorLayout::Nhwc => {
                tract_ndarray::Array4::from_shape_vec((1, side, side, 3), input.to_vec())
                    .context("failed to shape NHWC input")?
                    .into_tensor()
            }
            TensorLayout::Nchw => tract_ndarray::Array4::from_shape_fn(
                (1, 3, side, side),
                |(_, channel, y, x)| input[(y * side + x) * 3 + channel],
            )
            .into_tensor(),
        };
        Ok(tensor)
    }
}

impl ModelRuntime for TractRuntime {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn delegate(&self) -> Delegate {
        Delegate::Cpu
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    fn run(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let tensor = self.build_input(input)?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let values = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        Ok(values.iter().copied().collect())
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size as usize;
        self.run(&vec![0.0; side * side * 3]).map(|_| ())
    }
}
