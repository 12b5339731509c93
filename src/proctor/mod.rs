//! Proctor-side peer state: the projection a proctor watches and the
//! receive-only WebRTC connections it holds to individual students.

mod client;
mod peer;
mod webrtc_utils;

pub use client::ProctorPeers;
pub use peer::{signal_message, CandidatePayload, CandidateQueue, PeerLink, PeerSignal};
pub use webrtc_utils::{create_webrtc_api, ice_servers};
