//! Wire messages of the remote detection channel.
//!
//! The client ships a base64 JPEG and gets back a flat detection list scored
//! by a server-side model. Messages are JSON objects tagged by `type`:
//!
//! - client: `{"type":"image","data":..,"timestamp":..}`, `{"type":"ping"}`
//! - server: `{"type":"detection_result",..}`, `{"type":"pong"}`,
//!   `{"type":"error","message":..}`

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::detect::BoundingBox;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Image {
        /// Base64-encoded JPEG, as produced by the camera.
        data: String,
        /// Milliseconds since the Unix epoch.
        timestamp: u64,
    },
    Ping,
}

impl ClientMessage {
    pub fn image(data: impl Into<String>, timestamp: u64) -> Self {
        ClientMessage::Image {
            data: data.into(),
            timestamp,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| anyhow!("encode error: {}", e))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteDetection {
    pub class_name: String,
    pub confidence: f32,
    /// `[x, y, width, height]` in pixels of the submitted image.
    pub bbox: [f32; 4],
}

impl RemoteDetection {
    pub fn bounding_box(&self) -> BoundingBox {
        let [x, y, width, height] = self.bbox;
        BoundingBox::new(x, y, width, height)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    DetectionResult {
        #[serde(default)]
        timestamp: Option<u64>,
        #[serde(default)]
        detections: Vec<RemoteDetection>,
        #[serde(default)]
        image_size: Option<ImageSize>,
    },
    Pong,
    Error {
        message: String,
    },
}

/// Parse one server message.
pub fn parse_server_message(payload: &[u8]) -> Result<ServerMessage> {
    serde_json::from_slice(payload).map_err(|e| anyhow!("parse error: {}", e))
}

/// Highest-confidence remote detection; the earliest wins a tie.
pub fn dominant_detection(detections: &[RemoteDetection]) -> Option<&RemoteDetection> {
    detections.iter().fold(None, |best, det| match best {
        Some(current) if det.confidence <= current.confidence => Some(current),
        _ => Some(det),
    })
}
