//! Wire format between the browser client and the server.
//!
//! Inbound traffic is JSON text. Processed frames go back as binary packets:
//! `[u32 big-endian metadata length][UTF-8 JSON metadata][JPEG bytes]`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of the big-endian metadata length prefix
pub const LENGTH_PREFIX_LEN: usize = 4;

const DATA_URL_PREFIX: &str = "data:image";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("frame message has no image")]
    MissingImage,

    #[error("image is not an image data URL")]
    NotAnImageDataUrl,

    #[error("data URL has no payload")]
    MissingPayload,

    #[error("invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("packet too short: {0} bytes")]
    TruncatedPacket(usize),

    #[error("metadata length {declared} exceeds packet body of {available} bytes")]
    MetadataOverrun { declared: usize, available: usize },
}

/// Raw JSON sent by the client
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

/// Classified inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Ping,
    ModeChange(String),
    /// A frame without `mode` keeps the connection's current mode
    Frame { mode: Option<String>, image: String },
}

impl Inbound {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let message: ClientMessage = serde_json::from_str(text)?;
        message.classify()
    }
}

impl ClientMessage {
    pub fn classify(self) -> Result<Inbound, ProtocolError> {
        match self.kind.as_deref() {
            Some("ping") => Ok(Inbound::Ping),
            Some("mode_change") => Ok(Inbound::ModeChange(
                self.mode.unwrap_or_else(|| "none".to_string()),
            )),
            _ => {
                let image = self.image.ok_or(ProtocolError::MissingImage)?;
                Ok(Inbound::Frame {
                    mode: self.mode,
                    image,
                })
            }
        }
    }
}

/// Text replies sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionEstablished,
    Pong,
    ModeChangeAck { mode: String },
}

impl ServerMessage {
    pub fn to_json(&self) -> String {
        // Unit and string-only variants always serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Detection info sent in front of every processed frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMetadata {
    pub is_person_detected: bool,
    pub mode: String,
    pub percentage: f32,
}

/// Build a binary frame packet
pub fn encode_frame_packet(
    metadata: &FrameMetadata,
    jpeg: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    let info = serde_json::to_vec(metadata)?;
    let mut packet = Vec::with_capacity(LENGTH_PREFIX_LEN + info.len() + jpeg.len());
    packet.extend_from_slice(&(info.len() as u32).to_be_bytes());
    packet.extend_from_slice(&info);
    packet.extend_from_slice(jpeg);
    Ok(packet)
}

/// Split a binary frame packet into its metadata and image bytes
pub fn decode_frame_packet(packet: &[u8]) -> Result<(FrameMetadata, &[u8]), ProtocolError> {
    if packet.len() < LENGTH_PREFIX_LEN {
        return Err(ProtocolError::TruncatedPacket(packet.len()));
    }

    let (prefix, body) = packet.split_at(LENGTH_PREFIX_LEN);
    let mut len = [0u8; LENGTH_PREFIX_LEN];
    len.copy_from_slice(prefix);
    let declared = u32::from_be_bytes(len) as usize;

    if declared > body.len() {
        return Err(ProtocolError::MetadataOverrun {
            declared,
            available: body.len(),
        });
    }

    let (info, image) = body.split_at(declared);
    Ok((serde_json::from_slice(info)?, image))
}

/// Decode the bytes of a `data:image/...;base64,<payload>` URL
pub fn decode_data_url(url: &str) -> Result<Vec<u8>, ProtocolError> {
    if !url.starts_with(DATA_URL_PREFIX) {
        return Err(ProtocolError::NotAnImageDataUrl);
    }

    let (_, payload) = url.split_once(',').ok_or(ProtocolError::MissingPayload)?;
    if payload.is_empty() {
        return Err(ProtocolError::MissingPayload);
    }

    Ok(STANDARD.decode(payload.trim())?)
}
