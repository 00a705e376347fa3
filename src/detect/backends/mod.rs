pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubRuntime;

#[cfg(feature = "backend-tract")]
pub use tract::TractRuntime;

use anyhow::Result;

use crate::config::ModelSettings;
use crate::detect::backend::{open_with_fallback, ModelRuntime};

/// Box slots of the stub model served for `stub://` paths.
const STUB_NUM_BOXES: usize = 8400;

/// Open the runtime named by the model settings.
///
/// `stub://` paths serve a fixed tensor holding one centered candidate; any
/// other path is an ONNX file and needs the `backend-tract` feature.
pub fn open_runtime(settings: &ModelSettings, num_classes: usize) -> Result<Box<dyn ModelRuntime>> {
    if settings.path.starts_with("stub://") {
        let side = settings.input_size as f32;
        let class_index = num_classes.saturating_sub(1).min(2);
        let runtime = StubRuntime::empty(settings.input_size, num_classes, STUB_NUM_BOXES)
            .with_candidate(
                0,
                (side / 2.0, side / 2.0),
                (side * 0.4, side * 0.45),
                class_index,
                0.9,
            );
        log::info!("using stub model {}", settings.path);
        return Ok(Box::new(runtime));
    }

    #[cfg(feature = "backend-tract")]
    {
        let runtime = open_with_fallback(settings.delegate, |delegate| {
            TractRuntime::open(
                &settings.path,
                settings.input_size,
                settings.tensor_layout,
                delegate,
            )
        })?;
        Ok(Box::new(runtime))
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        open_with_fallback(settings.delegate, |delegate| {
            anyhow::bail!(
                "model {} needs the backend-tract feature (delegate {})",
                settings.path,
                delegate
            )
        })
    }
}
