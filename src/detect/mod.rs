//! Model runtime adapter, output decoding and detection types.

mod backend;
pub mod backends;
pub mod decode;
mod labels;
mod result;

pub use backend::{open_with_fallback, Delegate, ModelRuntime, TensorLayout};
pub use backends::{open_runtime, StubRuntime};
#[cfg(feature = "backend-tract")]
pub use backends::TractRuntime;
pub use decode::{
    apply_nms, decode_output, filter_min_area, iou, BoxUnits, DecodeOptions, Decoder, OutputLayout,
};
pub use labels::load_labels;
pub use result::{best_detection, BoundingBox, Detection, InferenceStats};
