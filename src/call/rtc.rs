//! Production transport engine backed by the `webrtc` crate.
//!
//! Connections are data-channel only; no local media is attached. Engine
//! callbacks are forwarded into the owning session's event queue, so nothing
//! here touches session state directly.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::error::CallError;
use super::transport::{DataChannel, EventSender, Transport, TransportEngine, TransportEvent};
use super::types::{IceCandidate, SdpKind, SessionDescription};

fn rtc_err(e: impl std::fmt::Display) -> CallError {
    CallError::Transport(e.to_string())
}

/// Engine creating real peer connections.
pub struct RtcEngine;

#[async_trait]
impl TransportEngine for RtcEngine {
    async fn open(
        &self,
        ice_servers: &[String],
        events: EventSender,
    ) -> Result<Arc<dyn Transport>, CallError> {
        let mut media = MediaEngine::default();
        media.register_default_codecs().map_err(rtc_err)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media).map_err(rtc_err)?;

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = ice_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await.map_err(rtc_err)?);

        let conn = RtcConnection { pc, events };
        conn.register_handlers();
        Ok(Arc::new(conn))
    }
}

struct RtcConnection {
    pc: Arc<RTCPeerConnection>,
    events: EventSender,
}

impl RtcConnection {
    fn register_handlers(&self) {
        let events = self.events.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let events = events.clone();
                Box::pin(async move {
                    let Some(c) = candidate else { return };
                    match c.to_json() {
                        Ok(init) => {
                            let candidate = IceCandidate {
                                mid: init.sdp_mid.unwrap_or_default(),
                                m_line_index: init.sdp_mline_index.unwrap_or(0),
                                body: init.candidate,
                            };
                            let _ = events
                                .send(TransportEvent::CandidateDiscovered(candidate))
                                .await;
                        }
                        Err(e) => warn!("failed to serialize discovered candidate: {e}"),
                    }
                })
            }));

        let events = self.events.clone();
        self.pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let events = events.clone();
            Box::pin(async move {
                debug!(label = dc.label(), "remote data channel announced");
                register_channel(dc, events);
            })
        }));

        let events = self.events.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let events = events.clone();
                Box::pin(async move {
                    let _ = events
                        .send(TransportEvent::ConnectionStateChanged(state.to_string()))
                        .await;
                })
            }));
    }

    async fn emit_created(
        &self,
        kind: SdpKind,
        desc: RTCSessionDescription,
    ) -> Result<(), CallError> {
        let created = SessionDescription {
            kind,
            body: desc.sdp,
        };
        self.events
            .send(TransportEvent::LocalDescriptionCreated(created))
            .await
            .map_err(|_| CallError::Transport("session event queue closed".into()))
    }
}

fn to_rtc(desc: &SessionDescription) -> Result<RTCSessionDescription, CallError> {
    match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.body.clone()),
        SdpKind::Answer => RTCSessionDescription::answer(desc.body.clone()),
    }
    .map_err(rtc_err)
}

/// Wire a channel's open/message callbacks into the session event queue.
fn register_channel(dc: Arc<RTCDataChannel>, events: EventSender) {
    let handle: Arc<dyn DataChannel> = Arc::new(RtcChannel { dc: dc.clone() });

    let open_events = events.clone();
    dc.on_open(Box::new(move || {
        let events = open_events.clone();
        let handle = handle.clone();
        Box::pin(async move {
            let _ = events.send(TransportEvent::DataChannelOpened(handle)).await;
        })
    }));

    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let events = events.clone();
        Box::pin(async move {
            let _ = events.send(TransportEvent::DataReceived(msg.data)).await;
        })
    }));
}

#[async_trait]
impl Transport for RtcConnection {
    async fn create_offer(&self) -> Result<(), CallError> {
        let offer = self.pc.create_offer(None).await.map_err(rtc_err)?;
        self.emit_created(SdpKind::Offer, offer).await
    }

    async fn create_answer(&self) -> Result<(), CallError> {
        let answer = self.pc.create_answer(None).await.map_err(rtc_err)?;
        self.emit_created(SdpKind::Answer, answer).await
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), CallError> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(rtc_err)?;
        let _ = self.events.send(TransportEvent::DescriptionCommitted).await;
        Ok(())
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), CallError> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(rtc_err)?;
        let _ = self.events.send(TransportEvent::DescriptionCommitted).await;
        Ok(())
    }

    async fn add_candidate(&self, candidate: &IceCandidate) -> Result<(), CallError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.body.clone(),
            sdp_mid: Some(candidate.mid.clone()),
            sdp_mline_index: Some(candidate.m_line_index),
            ..Default::default()
        };
        self.pc.add_ice_candidate(init).await.map_err(rtc_err)
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, CallError> {
        let options = RTCDataChannelInit {
            ordered: Some(false),
            max_retransmits: Some(0),
            ..Default::default()
        };
        let dc = self
            .pc
            .create_data_channel(label, Some(options))
            .await
            .map_err(rtc_err)?;
        register_channel(dc.clone(), self.events.clone());
        Ok(Arc::new(RtcChannel { dc }))
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!("error closing peer connection: {e}");
        }
    }
}

struct RtcChannel {
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for RtcChannel {
    fn label(&self) -> String {
        self.dc.label().to_string()
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send(&self, payload: &[u8]) -> Result<(), CallError> {
        self.dc
            .send(&Bytes::copy_from_slice(payload))
            .await
            .map(|_| ())
            .map_err(rtc_err)
    }
}
