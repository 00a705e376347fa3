//! Ripeness Scan
//!
//! On-device avocado ripeness detection from a live camera.
//!
//! # Architecture
//!
//! Every cycle flows one way:
//!
//! camera snapshot -> bytes -> normalized tensor -> raw output -> candidate
//! boxes -> suppressed boxes -> screen boxes -> published update
//!
//! # Module Structure
//!
//! - `ingest`: snapshot cameras (synthetic `stub://`, image directory)
//! - `preprocess`: decode, center-crop, resize, normalize
//! - `detect`: model runtimes, label loading, output decoding, NMS
//! - `mapping`: model -> source -> screen, and screen -> cover-fit container
//! - `pipeline`: one full cycle over a loaded model
//! - `scheduler`: the armed/disarmed inference loop and its publishers
//! - `session`: scanning / capturing / result state machine
//! - `ripeness`: ripeness class catalogue and overlay colours
//! - `transport`: remote detection channel messages
//! - `config`: file + environment configuration

pub mod config;
pub mod detect;
pub mod ingest;
pub mod mapping;
pub mod pipeline;
pub mod preprocess;
pub mod ripeness;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use config::ScanConfig;
pub use detect::{BoundingBox, Detection, InferenceStats};
pub use ingest::{open_camera, Camera, SharedCamera};
pub use mapping::{CoverFit, Size};
pub use pipeline::Pipeline;
pub use scheduler::{DetectionBoard, InferenceLoop, LoopConfig, LoopControl, LoopState, ScanUpdate};
pub use session::{CaptureOutcome, CapturedResult, ScanSession, SessionSettings, SessionState};
