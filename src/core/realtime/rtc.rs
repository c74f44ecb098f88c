//! Peer transport backed by webrtc-rs.
//!
//! One peer connection per session with one audio transceiver and one
//! ordered data channel. The transceiver sends the capture track when the
//! local media supplies one and only receives otherwise. Data channel
//! callbacks and a failed or closed peer connection are forwarded to the
//! session loop as [`TransportEvent`](super::base::TransportEvent)s; outgoing
//! frames go through a writer task so `send_text` never awaits.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;

use super::base::{
    BoxedTransport, LocalMedia, PeerTransport, RealtimeError, RealtimeResult, SessionDescription,
    TransportEventSender, TransportFactory,
};

fn transport_error(context: &str, e: impl std::fmt::Display) -> RealtimeError {
    RealtimeError::TransportError(format!("{context}: {e}"))
}

/// Creates a [`WebRtcTransport`] per session.
#[derive(Debug, Clone)]
pub struct WebRtcTransportFactory {
    channel_label: String,
}

impl WebRtcTransportFactory {
    pub fn new(channel_label: impl Into<String>) -> Self {
        Self {
            channel_label: channel_label.into(),
        }
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        events: TransportEventSender,
        audio: Option<&dyn LocalMedia>,
    ) -> RealtimeResult<BoxedTransport> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| transport_error("Failed to register codecs", e))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| transport_error("Failed to register interceptors", e))?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let peer = Arc::new(
            api.new_peer_connection(RTCConfiguration::default())
                .await
                .map_err(|e| transport_error("Failed to create peer connection", e))?,
        );

        // Remote audio is always accepted; local audio is only sent when the
        // capture source supplies a track.
        match audio.and_then(|media| media.track().map(|track| (media.label(), track))) {
            Some((source, track)) => {
                debug!(source, "Sending local audio");
                let sender = peer
                    .add_track(track)
                    .await
                    .map_err(|e| transport_error("Failed to add audio track", e))?;
                tokio::spawn(async move {
                    let mut rtcp = vec![0u8; 1500];
                    while sender.read(&mut rtcp).await.is_ok() {}
                });
            }
            None => {
                if let Some(media) = audio {
                    debug!(source = media.label(), "Capture source has no track, receiving only");
                }
                peer.add_transceiver_from_kind(
                    RTPCodecType::Audio,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .map_err(|e| transport_error("Failed to add audio transceiver", e))?;
            }
        }

        let data_channel = peer
            .create_data_channel(&self.channel_label, None)
            .await
            .map_err(|e| transport_error("Failed to create data channel", e))?;
        watch_peer_state(&peer, events.clone());
        wire_callbacks(&data_channel, events);

        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_frames(data_channel.clone(), writer_rx));

        Ok(Box::new(WebRtcTransport {
            peer,
            data_channel,
            writer: Some(writer_tx),
        }))
    }
}

/// Closure reason for peer connection states that end the session.
fn peer_closure_reason(state: RTCPeerConnectionState) -> Option<String> {
    match state {
        RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed => {
            Some(format!("peer connection {state}"))
        }
        _ => None,
    }
}

// The data channel close can arrive late or never after an ICE or DTLS failure.
fn watch_peer_state(peer: &Arc<RTCPeerConnection>, events: TransportEventSender) {
    peer.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        debug!(session_id = %events.session_id(), %state, "Peer connection state changed");
        if let Some(reason) = peer_closure_reason(state) {
            warn!(session_id = %events.session_id(), "Closing session: {reason}");
            events.closed(Some(reason));
        }
        Box::pin(async {})
    }));
}

fn wire_callbacks(data_channel: &Arc<RTCDataChannel>, events: TransportEventSender) {
    let on_open = events.clone();
    data_channel.on_open(Box::new(move || {
        info!(session_id = %on_open.session_id(), "Data channel open");
        on_open.opened();
        Box::pin(async {})
    }));

    let on_message = events.clone();
    data_channel.on_message(Box::new(move |message: DataChannelMessage| {
        on_message.message(message.data);
        Box::pin(async {})
    }));

    data_channel.on_close(Box::new(move || {
        info!(session_id = %events.session_id(), "Data channel closed");
        events.closed(Some("data channel closed".to_string()));
        Box::pin(async {})
    }));
}

async fn write_frames(
    data_channel: Arc<RTCDataChannel>,
    mut frames: mpsc::UnboundedReceiver<String>,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = data_channel.send_text(frame).await {
            warn!("Failed to write data channel frame: {e}");
        }
    }
    debug!("Data channel writer finished");
}

/// Live WebRTC session transport.
pub struct WebRtcTransport {
    peer: Arc<RTCPeerConnection>,
    data_channel: Arc<RTCDataChannel>,
    writer: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn create_offer(&mut self) -> RealtimeResult<SessionDescription> {
        let offer = self
            .peer
            .create_offer(None)
            .await
            .map_err(|e| transport_error("Failed to create offer", e))?;

        // Negotiation is one HTTP exchange, so wait for every candidate to be
        // in the local description before handing it out.
        let mut gathered = self.peer.gathering_complete_promise().await;
        self.peer
            .set_local_description(offer)
            .await
            .map_err(|e| transport_error("Failed to set local description", e))?;
        let _ = gathered.recv().await;

        let local = self
            .peer
            .local_description()
            .await
            .ok_or_else(|| RealtimeError::TransportError("No local description".to_string()))?;
        Ok(SessionDescription::offer(local.sdp))
    }

    async fn apply_answer(&mut self, answer: SessionDescription) -> RealtimeResult<()> {
        let answer = RTCSessionDescription::answer(answer.sdp)
            .map_err(|e| transport_error("Invalid remote answer", e))?;
        self.peer
            .set_remote_description(answer)
            .await
            .map_err(|e| transport_error("Failed to set remote description", e))
    }

    fn send_text(&mut self, payload: &str) -> RealtimeResult<()> {
        let writer = self
            .writer
            .as_ref()
            .ok_or_else(|| RealtimeError::TransportError("Transport is closed".to_string()))?;
        writer
            .send(payload.to_string())
            .map_err(|_| RealtimeError::TransportError("Data channel writer stopped".to_string()))
    }

    fn close(&mut self) {
        if self.writer.take().is_none() {
            return;
        }
        let peer = self.peer.clone();
        let data_channel = self.data_channel.clone();
        tokio::spawn(async move {
            if let Err(e) = data_channel.close().await {
                debug!("Data channel close: {e}");
            }
            if let Err(e) = peer.close().await {
                warn!("Failed to close peer connection: {e}");
            }
        });
    }
}
