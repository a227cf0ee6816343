//! Wire types for the signaling envelope and the application data channel.
//!
//! Envelopes travel as JSON over the relay:
//! - `init`: no payload
//! - `offer` / `answer`: `{"kind": "offer"|"answer", "body": "<sdp>"}`
//! - `candidate`: `{"mid": "...", "mLineIndex": 0, "body": "..."}`
//!
//! Application payloads travel as fixed 12-byte records on the data channel,
//! three little-endian `i32` values in order x, y, state. Both ends must
//! agree on this layout.

use serde::{Deserialize, Serialize};

use super::error::CallError;

/// Opaque name of a local or remote actor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Which side of the negotiation a description belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl SdpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpKind::Offer => "offer",
            SdpKind::Answer => "answer",
        }
    }
}

impl std::fmt::Display for SdpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A negotiation blob describing one side's proposed connection parameters.
/// The body is opaque to the signaling core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub body: String,
}

/// A hint about one possible network path for the direct connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub mid: String,
    #[serde(rename = "mLineIndex")]
    pub m_line_index: u16,
    pub body: String,
}

/// The message kinds of the negotiation protocol, together with their
/// payloads. Unknown kinds fail decoding; every known kind is handled
/// exhaustively by the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum Message {
    /// Ask the receiving side to start an offer round. No payload.
    Init,
    Offer(SessionDescription),
    Answer(SessionDescription),
    Candidate(IceCandidate),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Init => "init",
            Message::Offer(_) => "offer",
            Message::Answer(_) => "answer",
            Message::Candidate(_) => "candidate",
        }
    }
}

/// The unit exchanged via the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub to: Identity,
    pub from: Identity,
    #[serde(flatten)]
    pub message: Message,
}

impl Envelope {
    pub fn new(to: Identity, from: Identity, message: Message) -> Self {
        Self { to, from, message }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CallError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CallError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Size of one encoded [`DataPoint`] record.
pub const DATA_POINT_LEN: usize = 12;

/// One application record exchanged over the data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataPoint {
    pub x: i32,
    pub y: i32,
    pub state: i32,
}

impl DataPoint {
    pub fn new(x: i32, y: i32, state: i32) -> Self {
        Self { x, y, state }
    }

    /// Encode as three little-endian `i32` values: x, y, state.
    pub fn to_bytes(&self) -> [u8; DATA_POINT_LEN] {
        let mut buf = [0u8; DATA_POINT_LEN];
        buf[0..4].copy_from_slice(&self.x.to_le_bytes());
        buf[4..8].copy_from_slice(&self.y.to_le_bytes());
        buf[8..12].copy_from_slice(&self.state.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CallError> {
        if bytes.len() != DATA_POINT_LEN {
            return Err(CallError::Decode(format!(
                "data record must be {DATA_POINT_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            x: i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            y: i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            state: i32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        })
    }
}
