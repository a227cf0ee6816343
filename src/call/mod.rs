//! Peer-to-peer call signaling and session lifecycle.
//!
//! Negotiation messages (descriptions and path candidates) are exchanged as
//! JSON envelopes through an external relay. Inbound envelopes from the relay
//! and lifecycle events from the transport engine both funnel into a single
//! per-session task; the controller owns the one active session and replaces
//! it whenever a different remote identity shows up.

mod controller;
mod error;
mod rtc;
mod session;
mod transport;
mod types;


pub use controller::CallController;
pub use error::CallError;
pub use rtc::RtcEngine;
pub use session::{NegotiationState, SessionStatus};
pub use transport::{DataChannel, EventSender, Transport, TransportEngine, TransportEvent};
pub use types::{
    DataPoint, Envelope, IceCandidate, Identity, Message, SdpKind, SessionDescription,
    DATA_POINT_LEN,
};
