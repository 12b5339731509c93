use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::api::API;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

use crate::error::Result;
use crate::monitor::{ClientMessage, ExamId, StudentId};

/// Opaque-to-the-server negotiation payload carried in `webrtc_signal.signal`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerSignal {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate { candidate: CandidatePayload },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePayload {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

impl From<CandidatePayload> for RTCIceCandidateInit {
    fn from(payload: CandidatePayload) -> Self {
        RTCIceCandidateInit {
            candidate: payload.candidate,
            sdp_mid: payload.sdp_mid,
            sdp_mline_index: payload.sdp_mline_index,
            username_fragment: None,
        }
    }
}

impl From<RTCIceCandidateInit> for CandidatePayload {
    fn from(init: RTCIceCandidateInit) -> Self {
        CandidatePayload {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
        }
    }
}

/// Remote ICE candidates held back until the remote description is applied
#[derive(Debug, Default)]
pub struct CandidateQueue {
    remote_ready: bool,
    pending: Vec<CandidatePayload>,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the candidate back when it can be applied right away
    pub fn push(&mut self, candidate: CandidatePayload) -> Option<CandidatePayload> {
        if self.remote_ready {
            Some(candidate)
        } else {
            self.pending.push(candidate);
            None
        }
    }

    /// Marks the remote description as set and drains everything buffered so far
    pub fn mark_remote_ready(&mut self) -> Vec<CandidatePayload> {
        self.remote_ready = true;
        std::mem::take(&mut self.pending)
    }

    pub fn discard(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.remote_ready = false;
        dropped
    }

    pub fn is_remote_ready(&self) -> bool {
        self.remote_ready
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// A proctor's receive-only connection to one student's camera
pub struct PeerLink {
    student_id: StudentId,
    connection: Arc<RTCPeerConnection>,
    candidates: CandidateQueue,
}

impl PeerLink {
    /// Creates the peer connection and wires local candidates back to the student
    pub async fn new(
        api: &Arc<API>,
        ice_servers: Vec<RTCIceServer>,
        exam_id: &str,
        proctor_id: &str,
        student_id: &str,
        outbound: mpsc::UnboundedSender<ClientMessage>,
    ) -> Result<Self> {
        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };
        let connection = Arc::new(api.new_peer_connection(config).await?);

        // Proctors only watch
        for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
            let init = RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            };
            connection.add_transceiver_from_kind(kind, Some(init)).await?;
        }

        {
            let exam_id = exam_id.to_string();
            let proctor_id = proctor_id.to_string();
            let student_id = student_id.to_string();
            connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let outbound = outbound.clone();
                let exam_id = exam_id.clone();
                let proctor_id = proctor_id.clone();
                let student_id = student_id.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else {
                        return;
                    };
                    let init = match candidate.to_json() {
                        Ok(init) => init,
                        Err(e) => {
                            tracing::warn!(student_id = %student_id, error = %e, "Failed to encode local candidate");
                            return;
                        }
                    };
                    let signal = PeerSignal::Candidate {
                        candidate: init.into(),
                    };
                    match serde_json::to_value(&signal) {
                        Ok(signal) => {
                            let _ = outbound.send(ClientMessage::WebrtcSignal {
                                exam_id,
                                target_id: student_id,
                                from_id: proctor_id,
                                signal,
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to serialize local candidate");
                        }
                    }
                })
            }));
        }

        {
            let student_id = student_id.to_string();
            connection.on_track(Box::new(move |track, _receiver, _transceiver| {
                tracing::info!(
                    student_id = %student_id,
                    kind = %track.kind(),
                    track_id = %track.id(),
                    "Receiving student track"
                );
                Box::pin(async {})
            }));
        }

        {
            let student_id = student_id.to_string();
            connection.on_peer_connection_state_change(Box::new(
                move |state: RTCPeerConnectionState| {
                    tracing::debug!(student_id = %student_id, state = %state, "Peer connection state changed");
                    Box::pin(async {})
                },
            ));
        }

        Ok(Self {
            student_id: student_id.to_string(),
            connection,
            candidates: CandidateQueue::new(),
        })
    }

    pub fn student_id(&self) -> &str {
        &self.student_id
    }

    pub async fn create_offer(&self) -> Result<String> {
        let offer = self.connection.create_offer(None).await?;
        self.connection.set_local_description(offer.clone()).await?;
        Ok(offer.sdp)
    }

    /// Applies the student's answer, then flushes any candidates that arrived first
    pub async fn handle_answer(&mut self, sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp.to_string())?;
        self.connection.set_remote_description(answer).await?;

        for candidate in self.candidates.mark_remote_ready() {
            self.connection.add_ice_candidate(candidate.into()).await?;
        }
        Ok(())
    }

    pub async fn add_ice_candidate(&mut self, candidate: CandidatePayload) -> Result<()> {
        match self.candidates.push(candidate) {
            Some(candidate) => self.connection.add_ice_candidate(candidate.into()).await?,
            None => {
                tracing::debug!(
                    student_id = %self.student_id,
                    queued = self.candidates.len(),
                    "Queued candidate until answer arrives"
                );
            }
        }
        Ok(())
    }

    /// Closes the connection and drops buffered candidates
    pub async fn close(mut self) {
        let dropped = self.candidates.discard();
        if let Err(e) = self.connection.close().await {
            tracing::warn!(student_id = %self.student_id, error = %e, "Error closing peer connection");
        }
        tracing::debug!(
            student_id = %self.student_id,
            dropped_candidates = dropped,
            "Closed peer connection"
        );
    }
}

/// Builds the `webrtc_signal` a proctor sends to one student
pub fn signal_message(
    exam_id: &ExamId,
    proctor_id: &str,
    student_id: &str,
    signal: &PeerSignal,
) -> Result<ClientMessage> {
    Ok(ClientMessage::WebrtcSignal {
        exam_id: exam_id.clone(),
        target_id: student_id.to_string(),
        from_id: proctor_id.to_string(),
        signal: serde_json::to_value(signal)?,
    })
}
