//! Remote detection channel message types.
//!
//! Connection handling and reconnection belong to the embedding application;
//! this module only defines and parses the messages.

pub mod remote;

pub use remote::{
    dominant_detection, parse_server_message, ClientMessage, ImageSize, RemoteDetection,
    ServerMessage,
};
