//! Peer session: one negotiation, one transport connection and one optional
//! data channel, bound to exactly one remote identity.
//!
//! All session state lives inside a single task. Signaling commands from the
//! router and lifecycle events from the transport engine land in the same
//! mailbox, so their handling can never interleave.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CallSettings;

use super::error::CallError;
use super::transport::{DataChannel, Transport, TransportEngine, TransportEvent};
use super::types::{
    DataPoint, Envelope, IceCandidate, Identity, Message, SdpKind, SessionDescription,
};

/// Signaling-side inputs to a session.
pub enum SessionCommand {
    /// Start a negotiation round as the offerer.
    Init,
    /// A remote offer arrived.
    Offer(SessionDescription),
    /// A remote answer arrived.
    Answer(SessionDescription),
    /// A remote network-path candidate arrived.
    Candidate(IceCandidate),
    /// Create the application data channel.
    EstablishChannel,
    /// Write one application record to the data channel.
    SendData(DataPoint),
    /// Report current progress.
    Query(oneshot::Sender<SessionStatus>),
    /// Release the connection and stop the session task.
    Close,
}

/// Negotiation progress for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    /// Offerer: waiting for the engine to produce the local offer.
    OfferRequested,
    /// Offerer: offer sent, waiting for the remote answer.
    OfferSent,
    /// Answerer: remote offer committed, waiting for the engine to produce
    /// the local answer.
    AnswerRequested,
    /// Both descriptions committed.
    Negotiated,
    /// Negotiation gave up (bounded timeout expired).
    Failed,
}

/// Snapshot of a session's progress.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub remote: Identity,
    pub state: NegotiationState,
    pub remote_description_set: bool,
    pub channel_open: bool,
}

/// Handle to a running session task.
pub struct SessionHandle {
    remote: Identity,
    commands: mpsc::Sender<SessionCommand>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn remote(&self) -> &Identity {
        &self.remote
    }

    pub async fn command(&self, cmd: SessionCommand) {
        if self.commands.send(cmd).await.is_err() {
            warn!(remote = %self.remote, "session task gone, command dropped");
        }
    }

    pub async fn status(&self) -> Option<SessionStatus> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(SessionCommand::Query(tx)).await.ok()?;
        rx.await.ok()
    }

    /// Release the transport and stop the task. Used when this session is
    /// superseded by one bound to a different remote identity.
    pub async fn shutdown(self) {
        let _ = self.commands.send(SessionCommand::Close).await;
        let _ = self.task.await;
    }
}

pub struct PeerSession {
    local: Identity,
    remote: Identity,
    transport: Arc<dyn Transport>,
    outbound: mpsc::UnboundedSender<Envelope>,
    data_out: mpsc::Sender<DataPoint>,
    channel: Option<Arc<dyn DataChannel>>,
    channel_label: String,
    remote_description_set: bool,
    state: NegotiationState,
}

impl PeerSession {
    /// Open a transport connection for `remote` and start the session task.
    pub async fn spawn(
        local: Identity,
        remote: Identity,
        engine: &dyn TransportEngine,
        settings: &CallSettings,
        outbound: mpsc::UnboundedSender<Envelope>,
        data_out: mpsc::Sender<DataPoint>,
    ) -> Result<SessionHandle, CallError> {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let transport = engine.open(&settings.stun_servers, event_tx).await?;

        let session = PeerSession {
            local,
            remote: remote.clone(),
            transport,
            outbound,
            data_out,
            channel: None,
            channel_label: settings.channel_label.clone(),
            remote_description_set: false,
            state: NegotiationState::Idle,
        };
        let timeout = Duration::from_millis(settings.negotiation_timeout_ms);
        let task = tokio::spawn(session.run(cmd_rx, event_rx, timeout));

        Ok(SessionHandle {
            remote,
            commands: cmd_tx,
            task,
        })
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut events: mpsc::Receiver<TransportEvent>,
        negotiation_timeout: Duration,
    ) {
        let deadline = tokio::time::sleep(negotiation_timeout);
        tokio::pin!(deadline);

        let reason = loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    None => break "controller gone",
                    Some(SessionCommand::Close) => break "superseded",
                    Some(cmd) => {
                        if let Err(e) = self.handle_command(cmd).await {
                            warn!(remote = %self.remote, "command aborted: {e}");
                        }
                    }
                },
                Some(event) = events.recv() => {
                    if let Err(e) = self.handle_event(event).await {
                        warn!(remote = %self.remote, "transport event aborted: {e}");
                    }
                }
                _ = &mut deadline, if self.negotiating() => {
                    warn!(remote = %self.remote, state = ?self.state, "negotiation timed out");
                    self.state = NegotiationState::Failed;
                }
            }
        };

        self.transport.close().await;
        debug!(remote = %self.remote, reason, "session stopped");
    }

    fn negotiating(&self) -> bool {
        matches!(
            self.state,
            NegotiationState::OfferRequested
                | NegotiationState::OfferSent
                | NegotiationState::AnswerRequested
        )
    }

    async fn handle_command(&mut self, cmd: SessionCommand) -> Result<(), CallError> {
        match cmd {
            SessionCommand::Init => self.start_offer().await,
            SessionCommand::Offer(desc) => self.accept_offer(desc).await,
            SessionCommand::Answer(desc) => self.accept_answer(desc).await,
            SessionCommand::Candidate(candidate) => self.accept_candidate(candidate).await,
            SessionCommand::EstablishChannel => self.establish_channel().await,
            SessionCommand::SendData(point) => {
                self.send_data(point).await;
                Ok(())
            }
            SessionCommand::Query(reply) => {
                let _ = reply.send(self.status());
                Ok(())
            }
            // Intercepted by the run loop.
            SessionCommand::Close => Ok(()),
        }
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            remote: self.remote.clone(),
            state: self.state,
            remote_description_set: self.remote_description_set,
            channel_open: self.channel.as_ref().is_some_and(|c| c.is_open()),
        }
    }

    /// Offerer entry point: ask the engine for an offer.
    async fn start_offer(&mut self) -> Result<(), CallError> {
        info!(remote = %self.remote, "starting negotiation round");
        self.state = NegotiationState::OfferRequested;
        self.transport.create_offer().await
    }

    /// Answerer entry point: commit the remote offer, then ask for an answer.
    async fn accept_offer(&mut self, desc: SessionDescription) -> Result<(), CallError> {
        if desc.kind != SdpKind::Offer {
            return Err(CallError::Validation(format!(
                "offer message carries a {} description",
                desc.kind
            )));
        }
        if desc.body.is_empty() {
            return Err(CallError::Validation("offer with empty body".into()));
        }
        self.transport.set_remote_description(&desc).await?;
        self.remote_description_set = true;
        self.state = NegotiationState::AnswerRequested;
        self.transport.create_answer().await
    }

    /// Offerer completion: commit the remote answer.
    async fn accept_answer(&mut self, desc: SessionDescription) -> Result<(), CallError> {
        if desc.kind != SdpKind::Answer {
            return Err(CallError::Validation(format!(
                "answer message carries a {} description",
                desc.kind
            )));
        }
        self.transport.set_remote_description(&desc).await?;
        self.remote_description_set = true;
        self.state = NegotiationState::Negotiated;
        info!(remote = %self.remote, "negotiation complete");
        Ok(())
    }

    /// Candidates are only committed once the remote description is in
    /// place; earlier arrivals are dropped. No buffering, no retry.
    async fn accept_candidate(&mut self, candidate: IceCandidate) -> Result<(), CallError> {
        if !self.remote_description_set {
            debug!(remote = %self.remote, "candidate before remote description, dropped");
            return Ok(());
        }
        self.transport.add_candidate(&candidate).await
    }

    async fn establish_channel(&mut self) -> Result<(), CallError> {
        let channel = self
            .transport
            .create_data_channel(&self.channel_label)
            .await?;
        debug!(remote = %self.remote, label = %channel.label(), "data channel created");
        self.channel = Some(channel);
        Ok(())
    }

    /// Best-effort write; a missing or unopened channel is a logged no-op.
    async fn send_data(&self, point: DataPoint) {
        let Some(channel) = self.channel.as_ref() else {
            warn!(remote = %self.remote, "no data channel, outbound point dropped");
            return;
        };
        if !channel.is_open() {
            warn!(remote = %self.remote, "data channel not open, outbound point dropped");
            return;
        }
        if let Err(e) = channel.send(&point.to_bytes()).await {
            warn!(remote = %self.remote, "data channel send failed: {e}");
        }
    }

    async fn handle_event(&mut self, event: TransportEvent) -> Result<(), CallError> {
        match event {
            TransportEvent::LocalDescriptionCreated(desc) => self.publish_description(desc).await,
            TransportEvent::CandidateDiscovered(candidate) => {
                self.emit(Message::Candidate(candidate));
                Ok(())
            }
            TransportEvent::DataChannelOpened(channel) => {
                info!(remote = %self.remote, label = %channel.label(), "data channel open");
                self.channel = Some(channel);
                Ok(())
            }
            TransportEvent::DataReceived(payload) => {
                self.receive_data(&payload);
                Ok(())
            }
            TransportEvent::DescriptionCommitted => Ok(()),
            TransportEvent::DescriptionFailed { stage, reason } => {
                warn!(remote = %self.remote, stage, "description failed: {reason}");
                Ok(())
            }
            TransportEvent::ConnectionStateChanged(state) => {
                debug!(remote = %self.remote, %state, "connection state");
                Ok(())
            }
        }
    }

    /// The description goes out to the remote side before it is committed
    /// locally.
    async fn publish_description(&mut self, desc: SessionDescription) -> Result<(), CallError> {
        self.emit(match desc.kind {
            SdpKind::Offer => Message::Offer(desc.clone()),
            SdpKind::Answer => Message::Answer(desc.clone()),
        });
        self.transport.set_local_description(&desc).await?;
        self.state = match desc.kind {
            SdpKind::Offer => NegotiationState::OfferSent,
            SdpKind::Answer => {
                info!(remote = %self.remote, "negotiation complete");
                NegotiationState::Negotiated
            }
        };
        Ok(())
    }

    fn emit(&self, message: Message) {
        let envelope = Envelope::new(self.remote.clone(), self.local.clone(), message);
        if self.outbound.send(envelope).is_err() {
            warn!(remote = %self.remote, "outbound queue closed, envelope dropped");
        }
    }

    /// Decode one inbound data-channel buffer; malformed records are dropped
    /// without touching negotiation state. Delivery to a slow consumer is
    /// lossy, matching the channel's unreliable semantics.
    fn receive_data(&self, payload: &[u8]) {
        match DataPoint::from_bytes(payload) {
            Ok(point) => {
                if let Err(e) = self.data_out.try_send(point) {
                    debug!(remote = %self.remote, "inbound point dropped: {e}");
                }
            }
            Err(e) => warn!(remote = %self.remote, "bad data record: {e}"),
        }
    }
}
