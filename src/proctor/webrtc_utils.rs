use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice_transport::ice_credential_type::RTCIceCredentialType;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;

use crate::config::IceConfig;
use crate::error::Result;

/// API for a watch-only proctor peer.
///
/// Accepts whatever the student's browser offers among the stock codecs.
/// Browsers hide host candidates behind `.local` names, so mDNS runs in
/// query-only mode to resolve them without announcing our own.
pub fn create_webrtc_api() -> Result<Arc<API>> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;

    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

    let mut setting_engine = SettingEngine::default();
    setting_engine.set_ice_multicast_dns_mode(MulticastDnsMode::QueryOnly);

    Ok(Arc::new(
        APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build(),
    ))
}

pub fn ice_servers(config: &IceConfig) -> Vec<RTCIceServer> {
    let mut ice_servers = Vec::new();

    for stun_server in &config.stun_servers {
        ice_servers.push(RTCIceServer {
            urls: vec![stun_server.clone()],
            ..Default::default()
        });
    }

    for turn_server in &config.turn_servers {
        ice_servers.push(RTCIceServer {
            urls: turn_server.urls.clone(),
            username: turn_server.username.clone(),
            credential: turn_server.credential.clone(),
            credential_type: RTCIceCredentialType::Password,
        });
    }

    ice_servers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TurnServer;

    #[test]
    fn test_ice_servers_include_turn_credentials() {
        let config = IceConfig {
            stun_servers: vec!["stun:stun.example.org:3478".to_string()],
            turn_servers: vec![TurnServer {
                urls: vec!["turn:turn.example.org:3478".to_string()],
                username: "proctor".to_string(),
                credential: "secret".to_string(),
            }],
        };

        let servers = ice_servers(&config);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].urls, vec!["stun:stun.example.org:3478".to_string()]);
        assert!(servers[0].username.is_empty());
        assert_eq!(servers[1].username, "proctor");
        assert_eq!(servers[1].credential, "secret");
    }

    #[test]
    fn test_api_builds() {
        assert!(create_webrtc_api().is_ok());
    }
}
