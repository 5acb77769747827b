use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    error::{ConfigErrorKind, Error},
    track::MediaType,
};

const MEET_JIT_SI_HOST: &str = "meet.jit.si";
const DOCKER_DOMAIN: &str = "meet.jitsi";
const DOCKER_SERVICE_URL: &str = "wss://localhost:8443/xmpp-websocket";

/// Log levels understood by the conferencing engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Log,
    #[default]
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info | LogLevel::Log => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// How the signaling session reaches the server, derived from the service URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceTransport {
    /// HTTP long-poll, `http(s)://.../http-bind`.
    Bosh,
    /// `ws(s)://.../xmpp-websocket`.
    WebSocket,
}

/// Internal domain names of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Hosts {
    pub domain: String,
    pub muc: Option<String>,
    pub focus: Option<String>,
    pub anonymousdomain: Option<String>,
}

/// Options for [`crate::engine::Engine::create_connection`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    pub hosts: Hosts,
    pub service_url: String,
    /// Room the connection is routed to. Some deployments need it before connecting.
    pub room_name: Option<String>,
    pub display_name: Option<String>,
    pub enable_window_on_error_handler: bool,
    pub disable_third_party_requests: bool,
    pub requires_room_name: bool,
}

impl ConnectionOptions {
    pub fn transport(&self) -> Result<ServiceTransport, Error> {
        let url = Url::parse(&self.service_url).map_err(|err| {
            Error::new_config(
                format!("service url {} is invalid: {}", self.service_url, err),
                ConfigErrorKind::InvalidUrl,
            )
        })?;
        match url.scheme() {
            "http" | "https" => Ok(ServiceTransport::Bosh),
            "ws" | "wss" => Ok(ServiceTransport::WebSocket),
            other => Err(Error::new_config(
                format!("scheme {} is not supported for service url", other),
                ConfigErrorKind::UnsupportedScheme,
            )),
        }
    }

    /// Service URL with the routing room appended for BOSH connections.
    pub fn effective_service_url(&self) -> Result<Url, Error> {
        let transport = self.transport()?;
        let mut url = Url::parse(&self.service_url)?;
        if transport == ServiceTransport::Bosh {
            if let Some(room) = &self.room_name {
                let has_room = url.query_pairs().any(|(k, _)| k == "room");
                if !has_room {
                    url.query_pairs_mut().append_pair("room", room);
                }
            }
        }
        Ok(url)
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.transport()?;
        if self.hosts.domain.is_empty() {
            return Err(Error::new_config(
                "hosts.domain must not be empty".to_string(),
                ConfigErrorKind::MissingDomain,
            ));
        }
        if self.requires_room_name && self.room_name.is_none() {
            return Err(Error::new_config(
                format!(
                    "{} routes connections by room, a room name must be configured before connecting",
                    self.hosts.domain
                ),
                ConfigErrorKind::MissingRoomName,
            ));
        }
        Ok(())
    }
}

/// Options for [`crate::engine::EngineConnection::init_conference`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConferenceOptions {
    pub open_bridge_channel: bool,
    pub p2p_enabled: bool,
    pub start_audio_muted: bool,
    pub start_video_muted: bool,
    pub password: Option<String>,
}

/// Options for [`crate::engine::Engine::create_local_tracks`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackOptions {
    pub devices: Vec<MediaType>,
    pub camera_device_id: Option<String>,
    pub mic_device_id: Option<String>,
    pub resolution: Option<u32>,
}

impl Default for TrackOptions {
    fn default() -> Self {
        Self {
            devices: vec![MediaType::Audio, MediaType::Video],
            camera_device_id: None,
            mic_device_id: None,
            resolution: None,
        }
    }
}

/// Configuration for [`crate::session::JitsiMeet`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JitsiMeetConfig {
    pub connection: ConnectionOptions,
    pub conference: ConferenceOptions,
    pub log_level: LogLevel,
    /// Instance-level default used when `create_local_tracks` gets no options.
    pub track_options: Option<TrackOptions>,
    /// Upper bound for waiting on a terminal signal. `None` waits forever.
    pub signal_timeout_ms: Option<u64>,
}

impl JitsiMeetConfig {
    /// The public meet.jit.si instance. It routes BOSH sessions by room, so the room is fixed here.
    pub fn meet_jit_si(room: &str) -> Self {
        let host = MEET_JIT_SI_HOST.to_string();
        Self {
            connection: ConnectionOptions {
                hosts: Hosts {
                    domain: host.clone(),
                    muc: Some(format!("conference.{}", host)),
                    focus: None,
                    anonymousdomain: None,
                },
                service_url: format!("https://{}/http-bind", host),
                room_name: Some(room.to_lowercase()),
                display_name: None,
                enable_window_on_error_handler: true,
                disable_third_party_requests: true,
                requires_room_name: true,
            },
            ..Default::default()
        }
    }

    /// A self-hosted docker-jitsi-meet deployment on localhost.
    pub fn docker() -> Self {
        let domain = DOCKER_DOMAIN.to_string();
        Self {
            connection: ConnectionOptions {
                hosts: Hosts {
                    domain: domain.clone(),
                    muc: Some(format!("muc.{}", domain)),
                    focus: Some(format!("focus.{}", domain)),
                    anonymousdomain: Some(format!("guest.{}", domain)),
                },
                service_url: DOCKER_SERVICE_URL.to_string(),
                room_name: None,
                display_name: None,
                enable_window_on_error_handler: true,
                disable_third_party_requests: true,
                requires_room_name: false,
            },
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: JitsiMeetConfig = serde_json::from_str(json)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.connection.validate()
    }

    pub fn signal_timeout(&self) -> Option<Duration> {
        self.signal_timeout_ms.map(Duration::from_millis)
    }

    pub fn apply_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(service_url) = overrides.service_url {
            self.connection.service_url = service_url;
        }
        if let Some(domain) = overrides.domain {
            self.connection.hosts.domain = domain.to_lowercase();
        }
        if let Some(muc) = overrides.muc {
            self.connection.hosts.muc = Some(muc);
        }
        if let Some(focus) = overrides.focus {
            self.connection.hosts.focus = Some(focus);
        }
        if let Some(anonymousdomain) = overrides.anonymousdomain {
            self.connection.hosts.anonymousdomain = Some(anonymousdomain);
        }
        if let Some(room_name) = overrides.room_name {
            self.connection.room_name = Some(room_name.to_lowercase());
        }
        if let Some(display_name) = overrides.display_name {
            self.connection.display_name = Some(display_name);
        }
        if let Some(conference) = overrides.conference {
            self.conference = conference;
        }
        if let Some(log_level) = overrides.log_level {
            self.log_level = log_level;
        }
        if let Some(track_options) = overrides.track_options {
            self.track_options = Some(track_options);
        }
        if let Some(timeout) = overrides.signal_timeout_ms {
            self.signal_timeout_ms = Some(timeout);
        }
        self
    }
}

/// User supplied values layered over a preset. `None` keeps the preset value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    pub service_url: Option<String>,
    pub domain: Option<String>,
    pub muc: Option<String>,
    pub focus: Option<String>,
    pub anonymousdomain: Option<String>,
    pub room_name: Option<String>,
    pub display_name: Option<String>,
    pub conference: Option<ConferenceOptions>,
    pub log_level: Option<LogLevel>,
    pub track_options: Option<TrackOptions>,
    pub signal_timeout_ms: Option<u64>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_meet_jit_si_preset() {
        let config = JitsiMeetConfig::meet_jit_si("TownHall");
        assert_eq!(config.connection.hosts.domain, "meet.jit.si");
        assert_eq!(
            config.connection.hosts.muc.as_deref(),
            Some("conference.meet.jit.si")
        );
        assert_eq!(config.connection.transport().unwrap(), ServiceTransport::Bosh);
        assert_eq!(
            config.connection.effective_service_url().unwrap().as_str(),
            "https://meet.jit.si/http-bind?room=townhall"
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_docker_preset() {
        let config = JitsiMeetConfig::docker();
        assert_eq!(
            config.connection.transport().unwrap(),
            ServiceTransport::WebSocket
        );
        assert_eq!(
            config.connection.hosts.focus.as_deref(),
            Some("focus.meet.jitsi")
        );
        assert_eq!(
            config.connection.effective_service_url().unwrap().as_str(),
            DOCKER_SERVICE_URL
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_websocket_url_ignores_room() {
        let mut config = JitsiMeetConfig::docker();
        config.connection.room_name = Some("lobby".to_string());
        let url = config.connection.effective_service_url().unwrap();
        assert!(url.query().is_none());
    }

    #[test]
    fn test_missing_room_name_is_rejected() {
        let mut config = JitsiMeetConfig::meet_jit_si("TownHall");
        config.connection.room_name = None;
        let err = config.validate().unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::MissingRoomName));
    }

    #[test]
    fn test_unsupported_scheme() {
        let mut config = JitsiMeetConfig::docker();
        config.connection.service_url = "ftp://meet.jitsi/xmpp".to_string();
        let err = config.validate().unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnsupportedScheme));

        config.connection.service_url = "not a url".to_string();
        let err = config.validate().unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::InvalidUrl));
    }

    #[test]
    fn test_apply_overrides() {
        let config = JitsiMeetConfig::docker().apply_overrides(ConfigOverrides {
            domain: Some("Example.ORG".to_string()),
            log_level: Some(LogLevel::Debug),
            room_name: Some("Standup".to_string()),
            ..Default::default()
        });
        assert_eq!(config.connection.hosts.domain, "example.org");
        assert_eq!(config.connection.room_name.as_deref(), Some("standup"));
        assert_eq!(config.log_level, LogLevel::Debug);
        // untouched fields keep the preset
        assert_eq!(config.connection.service_url, DOCKER_SERVICE_URL);
        assert_eq!(config.connection.hosts.muc.as_deref(), Some("muc.meet.jitsi"));
    }

    #[test]
    fn test_from_json_partial() {
        let config = JitsiMeetConfig::from_json(
            r#"{
                "connection": {
                    "hosts": { "domain": "meet.example.com" },
                    "service_url": "wss://meet.example.com/xmpp-websocket"
                },
                "log_level": "error",
                "track_options": { "devices": ["audio"] }
            }"#,
        )
        .unwrap();
        assert_eq!(config.connection.hosts.domain, "meet.example.com");
        assert_eq!(config.log_level, LogLevel::Error);
        assert_eq!(
            config.track_options.as_ref().unwrap().devices,
            vec![MediaType::Audio]
        );
        assert_eq!(config.conference, ConferenceOptions::default());
        assert!(config.signal_timeout().is_none());
    }

    #[test]
    fn test_default_track_options() {
        assert_eq!(
            TrackOptions::default().devices,
            vec![MediaType::Audio, MediaType::Video]
        );
    }
}
