//! Virtual background server.
//!
//! Browser clients stream webcam frames over a WebSocket; each frame is
//! segmented with an ONNX person-segmentation model, composited over a
//! blurred copy of itself or a replacement image, and sent back as a
//! length-prefixed JPEG packet.

pub mod compositing;
pub mod config;
pub mod processor;
pub mod protocol;
pub mod segmentation;
pub mod server;
