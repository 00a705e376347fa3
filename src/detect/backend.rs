use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::Deserialize;

/// Execution backend for the network.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delegate {
    #[default]
    Cpu,
    Accelerator,
}

impl fmt::Display for Delegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delegate::Cpu => f.write_str("cpu"),
            Delegate::Accelerator => f.write_str("accelerator"),
        }
    }
}

impl FromStr for Delegate {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "cpu" | "default" => Ok(Delegate::Cpu),
            "accelerator" | "gpu" | "npu" => Ok(Delegate::Accelerator),
            other => Err(anyhow!(
                "unknown delegate '{}'; expected cpu or accelerator",
                other
            )),
        }
    }
}

/// Memory layout the network expects for its input tensor.
///
/// The preprocessor always produces interleaved HWC; runtimes declaring
/// `Nchw` transpose while building their input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    #[default]
    Nhwc,
    Nchw,
}

/// Loaded network, ready to execute.
///
/// The handle is read-only between calls from the caller's point of view and
/// is reused for every cycle. `run` may block for the whole inference.
pub trait ModelRuntime: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Delegate the model actually loaded on.
    fn delegate(&self) -> Delegate;

    /// Square input resolution in pixels.
    fn input_size(&self) -> u32;

    /// Declared shape of the first output tensor.
    fn output_shape(&self) -> &[usize];

    /// Execute the network over a normalized `input_size × input_size × 3` tensor.
    fn run(&mut self, input: &[f32]) -> Result<Vec<f32>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Open a runtime on the requested delegate, retrying once on the CPU when an
/// accelerator load fails. Only used at initialization; per-frame failures
/// are never retried here.
pub fn open_with_fallback<R, F>(requested: Delegate, mut open: F) -> Result<R>
where
    F: FnMut(Delegate) -> Result<R>,
{
    match open(requested) {
        Ok(runtime) => Ok(runtime),
        Err(err) if requested == Delegate::Accelerator => {
            log::warn!(
                "model failed to load on accelerator delegate ({:#}); retrying on cpu",
                err
            );
            open(Delegate::Cpu)
        }
        Err(err) => Err(err),
    }
}
