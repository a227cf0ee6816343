//! Top-level call API and signaling router.
//!
//! The controller owns the single active session. Inbound envelopes resolve
//! against it by remote identity: a different sender replaces the session
//! outright, the old one is released. Envelopes are routed one at a time in
//! relay delivery order.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::CallSettings;
use crate::relay::Relay;

use super::error::CallError;
use super::session::{PeerSession, SessionCommand, SessionHandle, SessionStatus};
use super::transport::TransportEngine;
use super::types::{DataPoint, Envelope, Identity, Message};

pub struct CallController {
    identity: Identity,
    engine: Arc<dyn TransportEngine>,
    settings: CallSettings,
    active: Option<SessionHandle>,
    outbound_tx: mpsc::UnboundedSender<Envelope>,
    outbound_rx: Option<mpsc::UnboundedReceiver<Envelope>>,
    data_tx: mpsc::Sender<DataPoint>,
    shutdown: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl CallController {
    /// Create a controller for `identity`. The returned receiver yields the
    /// application records decoded from the active session's data channel.
    pub fn new(
        identity: Identity,
        engine: Arc<dyn TransportEngine>,
        settings: CallSettings,
    ) -> (Self, mpsc::Receiver<DataPoint>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (data_tx, data_rx) = mpsc::channel(256);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let controller = Self {
            identity,
            engine,
            settings,
            active: None,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
            data_tx,
            shutdown,
            shutdown_rx,
        };
        (controller, data_rx)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Signal the run loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Place a call: bind a new session to `remote`, open its data channel
    /// eagerly, then start the offer round.
    pub async fn call(&mut self, remote: Identity) -> Result<(), CallError> {
        info!(%remote, "calling");
        let session = self.bind_session(remote).await?;
        session.command(SessionCommand::EstablishChannel).await;
        session.command(SessionCommand::Init).await;
        Ok(())
    }

    /// Create the data channel on the active session explicitly. The caller
    /// does this eagerly as part of [`call`](Self::call); the callee can use
    /// it after negotiation instead of waiting for the remote announcement.
    pub async fn establish_channel(&self) {
        match &self.active {
            Some(session) => session.command(SessionCommand::EstablishChannel).await,
            None => warn!("no active session, cannot establish data channel"),
        }
    }

    /// Encode and send one application record over the active session's data
    /// channel. Without an active session this is a logged no-op.
    pub async fn send_data(&self, x: i32, y: i32, state: i32) {
        match &self.active {
            Some(session) => {
                session
                    .command(SessionCommand::SendData(DataPoint::new(x, y, state)))
                    .await
            }
            None => warn!("no active session, outbound point dropped"),
        }
    }

    /// Snapshot of the active session, if any.
    pub async fn status(&self) -> Option<SessionStatus> {
        self.active.as_ref()?.status().await
    }

    /// Route one raw relay frame. Malformed frames and handler failures are
    /// logged and dropped; nothing propagates back through the relay.
    pub async fn handle_envelope(&mut self, raw: &[u8]) {
        let envelope = match Envelope::from_bytes(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("dropping inbound frame: {e}");
                return;
            }
        };
        if envelope.to != self.identity {
            debug!(to = %envelope.to, "envelope for someone else, ignored");
            return;
        }
        debug!(from = %envelope.from, kind = envelope.message.kind(), "inbound envelope");
        if let Err(e) = self.dispatch(envelope).await {
            warn!("dropping envelope: {e}");
        }
    }

    /// Take the outbound envelope stream. [`run`](Self::run) consumes it;
    /// callers driving the controller manually can drain it themselves.
    pub fn take_outbound(&mut self) -> Option<mpsc::UnboundedReceiver<Envelope>> {
        self.outbound_rx.take()
    }

    /// Drive the controller against a relay until [`shutdown`](Self::shutdown)
    /// is signaled or the relay closes.
    pub async fn run<R: Relay>(&mut self, mut relay: R) -> Result<()> {
        let mut outbound = self.take_outbound().expect("outbound stream already taken");
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("controller shutting down");
                        break;
                    }
                }
                frame = relay.recv() => match frame {
                    Some(raw) => self.handle_envelope(&raw).await,
                    None => {
                        warn!("relay closed");
                        break;
                    }
                },
                Some(envelope) = outbound.recv() => {
                    if let Err(e) = relay.send(envelope).await {
                        warn!("relay send failed: {e}");
                    }
                }
            }
        }

        self.outbound_rx = Some(outbound);
        Ok(())
    }

    /// Bind a fresh session to `remote`, releasing the previous one.
    async fn bind_session(&mut self, remote: Identity) -> Result<&SessionHandle, CallError> {
        if let Some(old) = self.active.take() {
            info!(old = %old.remote(), new = %remote, "replacing active session");
            old.shutdown().await;
        }
        let session = PeerSession::spawn(
            self.identity.clone(),
            remote,
            self.engine.as_ref(),
            &self.settings,
            self.outbound_tx.clone(),
            self.data_tx.clone(),
        )
        .await?;
        Ok(self.active.insert(session))
    }

    async fn dispatch(&mut self, envelope: Envelope) -> Result<(), CallError> {
        let Envelope { from, message, .. } = envelope;

        let stale = !matches!(&self.active, Some(session) if session.remote() == &from);
        if stale {
            self.bind_session(from.clone()).await?;
        }
        let Some(session) = self.active.as_ref() else {
            return Ok(());
        };

        let command = match message {
            Message::Init => SessionCommand::Init,
            Message::Offer(desc) => SessionCommand::Offer(desc),
            Message::Answer(desc) => SessionCommand::Answer(desc),
            Message::Candidate(candidate) => SessionCommand::Candidate(candidate),
        };
        session.command(command).await;
        Ok(())
    }
}
