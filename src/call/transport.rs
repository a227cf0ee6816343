//! Seam to the transport engine that performs the actual connection
//! establishment, network-path discovery and media transport.
//!
//! The engine reports progress through a per-session event queue instead of
//! re-entrant observer callbacks: every event lands in the session actor's
//! mailbox and is handled on that single task, in arrival order.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::error::CallError;
use super::types::{IceCandidate, SessionDescription};

/// Queue end the engine pushes events into.
pub type EventSender = mpsc::Sender<TransportEvent>;

/// Lifecycle events reported by the transport engine for one connection.
pub enum TransportEvent {
    /// The engine finished creating the offer or answer that was requested.
    LocalDescriptionCreated(SessionDescription),
    /// A local or remote description was committed on the connection.
    DescriptionCommitted,
    /// The engine failed to create or commit a description.
    DescriptionFailed { stage: &'static str, reason: String },
    /// A new network-path candidate was discovered locally.
    CandidateDiscovered(IceCandidate),
    /// A data channel reached the open state (locally created or announced
    /// by the remote side).
    DataChannelOpened(Arc<dyn DataChannel>),
    /// One inbound buffer from the data channel.
    DataReceived(Bytes),
    /// Connection-level state change, reported for logging only.
    ConnectionStateChanged(String),
}

/// One open transport connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Ask the engine to create an offer. The resulting description arrives
    /// as [`TransportEvent::LocalDescriptionCreated`].
    async fn create_offer(&self) -> Result<(), CallError>;

    /// Ask the engine to create an answer to the committed remote offer.
    /// The resulting description arrives like the offer does.
    async fn create_answer(&self) -> Result<(), CallError>;

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), CallError>;

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), CallError>;

    /// Commit a remote network-path candidate.
    async fn add_candidate(&self, candidate: &IceCandidate) -> Result<(), CallError>;

    /// Create an unordered, unreliable data channel.
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, CallError>;

    /// Release the connection.
    async fn close(&self);
}

/// Application data channel over the negotiated connection.
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;

    fn is_open(&self) -> bool;

    async fn send(&self, payload: &[u8]) -> Result<(), CallError>;
}

/// Factory opening transport connections.
#[async_trait]
pub trait TransportEngine: Send + Sync {
    /// Open a connection parameterized by network-path server hints; all
    /// lifecycle events for it are delivered through `events`.
    async fn open(
        &self,
        ice_servers: &[String],
        events: EventSender,
    ) -> Result<Arc<dyn Transport>, CallError>;
}
