//! WebRTC peer connections backed by webrtc-rs
//!
//! Only the receiving side is implemented: the phone offers its camera and
//! this end answers. Incoming VP8 RTP is reassembled into frames and exposed
//! as a [`MediaStream`] of [`PixelFormat::Vp8`] frames.

use crate::error::SignalingError;
use crate::peer::{PeerConfig, PeerConnection, PeerConnector, PeerEvent, PeerEvents, PeerState};
use crate::protocol::{IceCandidate, SdpType, SessionDescription};
use async_trait::async_trait;
use camlink_media::{
    vp8_keyframe_size, FrameSink, MediaStream, PixelFormat, StreamSource, VideoFrame, VideoInfo,
};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::io::sample_builder::SampleBuilder;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp::codecs::vp8::Vp8Packet;
use webrtc::track::track_remote::TrackRemote;

/// Packets the sample builder may hold back while waiting for reordering
const MAX_LATE_PACKETS: u16 = 256;

/// RTP clock rate of video payloads
const VIDEO_CLOCK_RATE: u32 = 90_000;

fn peer_error(e: webrtc::Error) -> SignalingError {
    SignalingError::Peer {
        reason: e.to_string(),
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, SignalingError> {
    match desc.kind {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpType::Rollback => {
            return Err(SignalingError::Peer {
                reason: "rollback descriptions are not supported".to_string(),
            })
        }
    }
    .map_err(peer_error)
}

fn from_rtc(desc: RTCSessionDescription) -> Option<SessionDescription> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => return None,
    };
    Some(SessionDescription {
        kind,
        sdp: desc.sdp,
    })
}

fn map_state(state: RTCPeerConnectionState) -> PeerState {
    match state {
        RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => PeerState::New,
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Connected,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
    }
}

/// Creates webrtc-rs peer connections
#[derive(Debug, Default, Clone)]
pub struct WebRtcConnector;

impl WebRtcConnector {
    /// Create a connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(
        &self,
        config: &PeerConfig,
    ) -> Result<(Arc<dyn PeerConnection>, PeerEvents), SignalingError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(peer_error)?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(peer_error)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: config
                .ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(rtc_config).await.map_err(peer_error)?);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let tx = events_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    debug!("ICE gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(PeerEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_m_line_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(e) => warn!("Could not serialise local ICE candidate: {}", e),
                }
            })
        }));

        let tx = events_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            info!("Peer connection state: {}", state);
            let _ = tx.send(PeerEvent::StateChanged(map_state(state)));
            Box::pin(async {})
        }));

        let tx = events_tx;
        let weak_pc = Arc::downgrade(&pc);
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = tx.clone();
            let weak_pc = weak_pc.clone();
            Box::pin(async move {
                let mime = track.codec().capability.mime_type;
                if !mime.eq_ignore_ascii_case(MIME_TYPE_VP8) {
                    warn!("Ignoring remote {} track; only VP8 video is recorded", mime);
                    return;
                }
                if let Some(pc) = weak_pc.upgrade() {
                    request_keyframe(&pc, &track).await;
                }
                tokio::spawn(read_vp8_track(track, weak_pc, tx));
            })
        }));

        let connection: Arc<dyn PeerConnection> = Arc::new(WebRtcPeer { pc });
        Ok((connection, events_rx))
    }
}

async fn request_keyframe(pc: &RTCPeerConnection, track: &TrackRemote) {
    let pli = PictureLossIndication {
        sender_ssrc: 0,
        media_ssrc: track.ssrc(),
    };
    let packets: Vec<Box<dyn webrtc::rtcp::packet::Packet + Send + Sync>> = vec![Box::new(pli)];
    if let Err(e) = pc.write_rtcp(&packets).await {
        debug!("Keyframe request failed: {}", e);
    }
}

/// Reassemble VP8 frames and publish them once the first keyframe shows the size
async fn read_vp8_track(
    track: Arc<TrackRemote>,
    pc: Weak<RTCPeerConnection>,
    events: mpsc::UnboundedSender<PeerEvent>,
) {
    let mut builder = SampleBuilder::new(MAX_LATE_PACKETS, Vp8Packet::default(), VIDEO_CLOCK_RATE);
    let mut sink: Option<FrameSink> = None;
    let mut first_timestamp: u32 = 0;
    let mut size = (0, 0);

    loop {
        let read = match sink.as_mut() {
            Some(active) => {
                let keyframe_requested = active.keyframe_requested();
                tokio::select! {
                    _ = active.stopped() => {
                        debug!("Remote stream stopped locally");
                        return;
                    }
                    _ = keyframe_requested => {
                        // Picture loss indication makes the phone send a keyframe.
                        if let Some(pc) = pc.upgrade() {
                            request_keyframe(&pc, &track).await;
                        }
                        continue;
                    }
                    result = track.read_rtp() => result,
                }
            }
            None => track.read_rtp().await,
        };

        let packet = match read {
            Ok((packet, _)) => packet,
            Err(e) => {
                debug!("Remote track ended: {}", e);
                if let Some(active) = &sink {
                    active.end();
                }
                return;
            }
        };

        builder.push(packet);
        while let Some(sample) = builder.pop() {
            let keyframe_size = vp8_keyframe_size(&sample.data);
            if let Some(found) = keyframe_size {
                size = found;
            }

            // Frames before the first keyframe cannot be decoded.
            if sink.is_none() {
                if keyframe_size.is_none() {
                    continue;
                }
                let info = VideoInfo {
                    width: size.0,
                    height: size.1,
                    framerate: 30,
                    format: PixelFormat::Vp8,
                };
                let (stream, new_sink) = MediaStream::new(StreamSource::Remote, info);
                info!("Remote VP8 video {}x{}", size.0, size.1);
                if events.send(PeerEvent::Track(stream)).is_err() {
                    return;
                }
                sink = Some(new_sink);
                first_timestamp = sample.packet_timestamp;
            }

            let elapsed = sample.packet_timestamp.wrapping_sub(first_timestamp) as u64;
            let timestamp_ms = elapsed * 1000 / VIDEO_CLOCK_RATE as u64;
            let frame = VideoFrame::vp8(
                size.0,
                size.1,
                sample.data,
                timestamp_ms,
                keyframe_size.is_some(),
            );
            if let Some(active) = &sink {
                if !active.send(frame) {
                    return;
                }
            }
        }
    }
}

struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), SignalingError> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(peer_error)
    }

    async fn create_answer(&self) -> Result<SessionDescription, SignalingError> {
        let answer = self.pc.create_answer(None).await.map_err(peer_error)?;
        from_rtc(answer).ok_or_else(|| SignalingError::Peer {
            reason: "answer has no type".to_string(),
        })
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), SignalingError> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(peer_error)
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc.local_description().await.and_then(from_rtc)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), SignalingError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(peer_error)
    }

    async fn close(&self) -> Result<(), SignalingError> {
        self.pc.close().await.map_err(peer_error)
    }
}
