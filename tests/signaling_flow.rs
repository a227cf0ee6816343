//! End-to-end signaling flows over an in-memory relay and a scripted
//! transport engine.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use paircall::call::{
    CallController, CallError, DataChannel, DataPoint, Envelope, EventSender, IceCandidate,
    Identity, Message, NegotiationState, SdpKind, SessionDescription, Transport, TransportEngine,
    TransportEvent,
};
use paircall::config::CallSettings;
use paircall::relay::MemoryRelay;
use tokio::sync::mpsc;

/// Everything the core asked the transport to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Op {
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpKind),
    SetRemote(SdpKind),
    AddCandidate(IceCandidate),
    CreateChannel(String),
    Close,
}

#[derive(Default)]
struct EngineState {
    ops: Vec<Op>,
    connections: Vec<EventSender>,
    channels: Vec<Arc<MockChannel>>,
    /// When set, create_offer/create_answer record but never produce a
    /// description, stalling the negotiation.
    mute: bool,
}

#[derive(Clone, Default)]
struct MockEngine {
    state: Arc<Mutex<EngineState>>,
}

impl MockEngine {
    fn muted() -> Self {
        let engine = Self::default();
        engine.state.lock().unwrap().mute = true;
        engine
    }

    fn ops(&self) -> Vec<Op> {
        self.state.lock().unwrap().ops.clone()
    }

    fn connections(&self) -> usize {
        self.state.lock().unwrap().connections.len()
    }

    fn connection(&self, idx: usize) -> EventSender {
        self.state.lock().unwrap().connections[idx].clone()
    }

    fn channel(&self, idx: usize) -> Arc<MockChannel> {
        self.state.lock().unwrap().channels[idx].clone()
    }
}

#[async_trait]
impl TransportEngine for MockEngine {
    async fn open(
        &self,
        _ice_servers: &[String],
        events: EventSender,
    ) -> Result<Arc<dyn Transport>, CallError> {
        self.state.lock().unwrap().connections.push(events.clone());
        Ok(Arc::new(MockTransport {
            state: self.state.clone(),
            events,
        }))
    }
}

struct MockTransport {
    state: Arc<Mutex<EngineState>>,
    events: EventSender,
}

impl MockTransport {
    fn record(&self, op: Op) {
        self.state.lock().unwrap().ops.push(op);
    }

    fn muted(&self) -> bool {
        self.state.lock().unwrap().mute
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn create_offer(&self) -> Result<(), CallError> {
        self.record(Op::CreateOffer);
        if self.muted() {
            return Ok(());
        }
        let desc = SessionDescription {
            kind: SdpKind::Offer,
            body: "v=0 mock-offer".to_string(),
        };
        let _ = self
            .events
            .send(TransportEvent::LocalDescriptionCreated(desc))
            .await;
        Ok(())
    }

    async fn create_answer(&self) -> Result<(), CallError> {
        self.record(Op::CreateAnswer);
        if self.muted() {
            return Ok(());
        }
        let desc = SessionDescription {
            kind: SdpKind::Answer,
            body: "v=0 mock-answer".to_string(),
        };
        let _ = self
            .events
            .send(TransportEvent::LocalDescriptionCreated(desc))
            .await;
        Ok(())
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), CallError> {
        self.record(Op::SetLocal(desc.kind));
        Ok(())
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), CallError> {
        self.record(Op::SetRemote(desc.kind));
        Ok(())
    }

    async fn add_candidate(&self, candidate: &IceCandidate) -> Result<(), CallError> {
        self.record(Op::AddCandidate(candidate.clone()));
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, CallError> {
        self.record(Op::CreateChannel(label.to_string()));
        let channel = Arc::new(MockChannel::new(label));
        self.state.lock().unwrap().channels.push(channel.clone());
        Ok(channel)
    }

    async fn close(&self) {
        self.record(Op::Close);
    }
}

struct MockChannel {
    label: String,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl MockChannel {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataChannel for MockChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_open(&self) -> bool {
        true
    }

    async fn send(&self, payload: &[u8]) -> Result<(), CallError> {
        self.sent.lock().unwrap().push(payload.to_vec());
        Ok(())
    }
}

fn controller(name: &str) -> (CallController, mpsc::Receiver<DataPoint>, MockEngine) {
    let engine = MockEngine::default();
    let (ctl, data_rx) = CallController::new(
        Identity::from(name),
        Arc::new(engine.clone()),
        CallSettings::default(),
    );
    (ctl, data_rx, engine)
}

fn frame(to: &str, from: &str, message: Message) -> Vec<u8> {
    Envelope::new(Identity::from(to), Identity::from(from), message)
        .to_bytes()
        .unwrap()
}

fn offer() -> Message {
    Message::Offer(SessionDescription {
        kind: SdpKind::Offer,
        body: "v=0 remote-offer".to_string(),
    })
}

async fn wait_until(cond: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_call_sends_single_offer_first() {
    let (mut ctl, _data, engine) = controller("alice");
    let mut out = ctl.take_outbound().unwrap();

    ctl.call(Identity::from("bob")).await.unwrap();
    assert!(wait_until(|| engine.ops().contains(&Op::SetLocal(SdpKind::Offer))).await);

    // Data channel is created eagerly, before the offer round starts, and
    // the offer is sent before it is committed locally.
    let ops = engine.ops();
    assert_eq!(
        ops,
        vec![
            Op::CreateChannel("paircall-points".to_string()),
            Op::CreateOffer,
            Op::SetLocal(SdpKind::Offer),
        ]
    );

    let first = out.recv().await.unwrap();
    assert_eq!(first.to, Identity::from("bob"));
    assert_eq!(first.from, Identity::from("alice"));
    assert!(matches!(first.message, Message::Offer(_)));
    assert!(out.try_recv().is_err(), "no other outbound signaling");
}

#[tokio::test]
async fn test_inbound_offer_creates_session_and_answers() {
    let (mut ctl, _data, engine) = controller("bob");
    let mut out = ctl.take_outbound().unwrap();

    ctl.handle_envelope(&frame("bob", "alice", offer())).await;
    assert!(wait_until(|| engine.ops().contains(&Op::SetLocal(SdpKind::Answer))).await);

    assert_eq!(engine.connections(), 1);
    assert_eq!(
        engine.ops(),
        vec![
            Op::SetRemote(SdpKind::Offer),
            Op::CreateAnswer,
            Op::SetLocal(SdpKind::Answer),
        ]
    );

    let answer = out.recv().await.unwrap();
    assert_eq!(answer.to, Identity::from("alice"));
    assert!(matches!(answer.message, Message::Answer(_)));
    assert!(out.try_recv().is_err(), "exactly one outbound envelope");
}

#[tokio::test]
async fn test_inbound_init_starts_offer_round() {
    let (mut ctl, _data, engine) = controller("bob");
    let mut out = ctl.take_outbound().unwrap();

    ctl.handle_envelope(&frame("bob", "alice", Message::Init))
        .await;
    assert!(wait_until(|| engine.ops().contains(&Op::SetLocal(SdpKind::Offer))).await);

    assert_eq!(engine.ops(), vec![Op::CreateOffer, Op::SetLocal(SdpKind::Offer)]);
    let out_envelope = out.recv().await.unwrap();
    assert!(matches!(out_envelope.message, Message::Offer(_)));
    assert_eq!(out_envelope.to, Identity::from("alice"));
}

#[tokio::test]
async fn test_candidate_before_description_is_discarded() {
    let (mut ctl, _data, engine) = controller("bob");

    let candidate = Message::Candidate(IceCandidate {
        mid: "0".to_string(),
        m_line_index: 0,
        body: "candidate:early".to_string(),
    });
    ctl.handle_envelope(&frame("bob", "alice", candidate)).await;

    // The first inbound message still creates the session.
    assert!(wait_until(|| engine.connections() == 1).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(engine.ops().is_empty(), "no add-candidate call: {:?}", engine.ops());
}

#[tokio::test]
async fn test_candidate_after_remote_description_is_committed() {
    let (mut ctl, _data, engine) = controller("bob");

    ctl.handle_envelope(&frame("bob", "alice", offer())).await;
    assert!(wait_until(|| engine.ops().contains(&Op::SetRemote(SdpKind::Offer))).await);

    let candidate = IceCandidate {
        mid: "audio".to_string(),
        m_line_index: 1,
        body: "candidate:1 1 UDP 2130706431 192.168.1.1 54321 typ host".to_string(),
    };
    ctl.handle_envelope(&frame(
        "bob",
        "alice",
        Message::Candidate(candidate.clone()),
    ))
    .await;

    assert!(wait_until(|| engine.ops().contains(&Op::AddCandidate(candidate.clone()))).await);
    let adds = engine
        .ops()
        .into_iter()
        .filter(|op| matches!(op, Op::AddCandidate(_)))
        .count();
    assert_eq!(adds, 1);
}

#[tokio::test]
async fn test_wrong_description_kind_aborts_round() {
    let (mut ctl, _data, engine) = controller("bob");

    // An offer message carrying an answer description fails validation
    // before anything is committed.
    let mismatched = Message::Offer(SessionDescription {
        kind: SdpKind::Answer,
        body: "v=0 not-an-offer".to_string(),
    });
    ctl.handle_envelope(&frame("bob", "alice", mismatched)).await;

    assert!(wait_until(|| engine.connections() == 1).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(engine.ops().is_empty(), "round aborted: {:?}", engine.ops());

    // Same for an answer message carrying an offer description.
    let mismatched = Message::Answer(SessionDescription {
        kind: SdpKind::Offer,
        body: "v=0 not-an-answer".to_string(),
    });
    ctl.handle_envelope(&frame("bob", "alice", mismatched)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(engine.ops().is_empty());
}

#[tokio::test]
async fn test_malformed_envelope_is_dropped() {
    let (mut ctl, _data, engine) = controller("bob");
    let mut out = ctl.take_outbound().unwrap();

    // Missing `type` field.
    ctl.handle_envelope(br#"{"to":"bob","from":"alice","payload":{}}"#)
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(engine.connections(), 0, "no session created");
    assert!(engine.ops().is_empty());
    assert!(out.try_recv().is_err(), "no outbound message");
}

#[tokio::test]
async fn test_envelope_for_other_identity_is_ignored() {
    let (mut ctl, _data, engine) = controller("bob");

    ctl.handle_envelope(&frame("carol", "alice", offer())).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.connections(), 0);
}

#[tokio::test]
async fn test_new_identity_replaces_active_session() {
    let (mut ctl, _data, engine) = controller("bob");
    let mut out = ctl.take_outbound().unwrap();

    ctl.handle_envelope(&frame("bob", "alice", offer())).await;
    assert!(wait_until(|| engine.ops().contains(&Op::SetLocal(SdpKind::Answer))).await);
    assert_eq!(engine.connections(), 1);

    ctl.handle_envelope(&frame("bob", "carol", offer())).await;
    assert!(wait_until(|| engine.connections() == 2).await);

    // The superseded session is released, and the new one negotiates.
    assert!(wait_until(|| engine.ops().contains(&Op::Close)).await);
    let closes = engine
        .ops()
        .into_iter()
        .filter(|op| *op == Op::Close)
        .count();
    assert_eq!(closes, 1);

    let first = out.recv().await.unwrap();
    assert_eq!(first.to, Identity::from("alice"));
    let second = out.recv().await.unwrap();
    assert_eq!(second.to, Identity::from("carol"));

    // The active session now belongs to carol.
    let status = ctl.status().await.unwrap();
    assert_eq!(status.remote, Identity::from("carol"));
}

#[tokio::test]
async fn test_send_data_without_session_is_noop() {
    let (ctl, _data, engine) = controller("alice");
    ctl.send_data(1, 2, 3).await;
    assert!(engine.ops().is_empty());
}

#[tokio::test]
async fn test_send_data_round_trip() {
    let (mut ctl, _data, engine) = controller("bob");

    ctl.handle_envelope(&frame("bob", "alice", offer())).await;
    assert!(wait_until(|| engine.ops().contains(&Op::SetLocal(SdpKind::Answer))).await);

    // The answerer opens its channel explicitly after negotiation.
    ctl.establish_channel().await;
    assert!(wait_until(|| {
        engine
            .ops()
            .iter()
            .any(|op| matches!(op, Op::CreateChannel(_)))
    })
    .await);

    ctl.send_data(3, 4, 1).await;
    let channel = engine.channel(0);
    assert!(wait_until(|| !channel.sent().is_empty()).await);

    let sent = channel.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].len(), 12);
    assert_eq!(DataPoint::from_bytes(&sent[0]).unwrap(), DataPoint::new(3, 4, 1));
}

#[tokio::test]
async fn test_inbound_data_is_decoded_and_forwarded() {
    let (mut ctl, mut data, engine) = controller("bob");

    ctl.handle_envelope(&frame("bob", "alice", offer())).await;
    assert!(wait_until(|| engine.connections() == 1).await);

    let events = engine.connection(0);
    events
        .send(TransportEvent::DataChannelOpened(Arc::new(
            MockChannel::new("remote"),
        )))
        .await
        .unwrap();

    let point = DataPoint::new(7, -8, 9);
    events
        .send(TransportEvent::DataReceived(Bytes::copy_from_slice(
            &point.to_bytes(),
        )))
        .await
        .unwrap();
    assert_eq!(data.recv().await.unwrap(), point);

    // A malformed record is dropped without breaking the stream.
    events
        .send(TransportEvent::DataReceived(Bytes::from_static(&[1, 2, 3])))
        .await
        .unwrap();
    let next = DataPoint::new(10, 11, 12);
    events
        .send(TransportEvent::DataReceived(Bytes::copy_from_slice(
            &next.to_bytes(),
        )))
        .await
        .unwrap();
    assert_eq!(data.recv().await.unwrap(), next);
}

#[tokio::test]
async fn test_negotiation_timeout_marks_session_failed() {
    let engine = MockEngine::muted();
    let settings = CallSettings {
        negotiation_timeout_ms: 100,
        ..Default::default()
    };
    let (mut ctl, _data) = CallController::new(
        Identity::from("alice"),
        Arc::new(engine.clone()),
        settings,
    );

    ctl.call(Identity::from("bob")).await.unwrap();
    assert!(wait_until(|| engine.ops().contains(&Op::CreateOffer)).await);

    let mut failed = false;
    for _ in 0..100 {
        if let Some(status) = ctl.status().await {
            if status.state == NegotiationState::Failed {
                failed = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(failed, "stalled negotiation should time out");
}

#[tokio::test]
async fn test_end_to_end_negotiation_over_relay() {
    let (relay_a, relay_b) = MemoryRelay::pair();
    let (mut alice, _da, engine_a) = controller("alice");
    let (mut bob, _db, engine_b) = controller("bob");

    alice.call(Identity::from("bob")).await.unwrap();

    let task_a = tokio::spawn(async move { alice.run(relay_a).await });
    let task_b = tokio::spawn(async move { bob.run(relay_b).await });

    // Offer crosses the relay, the answer comes back.
    assert!(wait_until(|| engine_b.ops().contains(&Op::SetRemote(SdpKind::Offer))).await);
    assert!(wait_until(|| engine_a.ops().contains(&Op::SetRemote(SdpKind::Answer))).await);

    // A candidate discovered on the caller's transport reaches the callee.
    let candidate = IceCandidate {
        mid: "0".to_string(),
        m_line_index: 0,
        body: "candidate:e2e".to_string(),
    };
    engine_a
        .connection(0)
        .send(TransportEvent::CandidateDiscovered(candidate.clone()))
        .await
        .unwrap();
    assert!(wait_until(|| engine_b.ops().contains(&Op::AddCandidate(candidate.clone()))).await);

    task_a.abort();
    task_b.abort();
}
