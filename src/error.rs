use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    WebRTCError(#[from] webrtc::Error),
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
    #[error(transparent)]
    UrlError(#[from] url::ParseError),
    #[error(transparent)]
    ConnectionError(#[from] ConnectionError),
    #[error(transparent)]
    ConferenceError(#[from] ConferenceError),
    #[error(transparent)]
    TrackError(#[from] TrackError),
    #[error(transparent)]
    ConfigError(#[from] ConfigError),
}

#[derive(thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
}

#[derive(thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ConferenceError {
    pub kind: ConferenceErrorKind,
    pub message: String,
}

#[derive(thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TrackError {
    pub kind: TrackErrorKind,
    pub message: String,
}

#[derive(thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionErrorKind {
    #[error("connection failed error")]
    ConnectionFailed,
    #[error("wrong state error")]
    WrongState,
    #[error("display name required error")]
    DisplayNameRequired,
    #[error("not connected error")]
    NotConnected,
    #[error("connection timeout error")]
    Timeout,
    #[error("engine unavailable error")]
    EngineUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConferenceErrorKind {
    #[error("conference failed error")]
    ConferenceFailed,
    #[error("connection interrupted error")]
    ConnectionInterrupted,
    #[error("no conference error")]
    NoConference,
    #[error("no room name error")]
    NoRoomName,
    #[error("conference timeout error")]
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TrackErrorKind {
    #[error("track creation failed error")]
    CreationFailed,
    #[error("track already disposed error")]
    AlreadyDisposed,
    #[error("track not attached error")]
    NotAttached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigErrorKind {
    #[error("invalid url error")]
    InvalidUrl,
    #[error("unsupported scheme error")]
    UnsupportedScheme,
    #[error("missing domain error")]
    MissingDomain,
    #[error("missing room name error")]
    MissingRoomName,
}

impl Error {
    pub fn new_connection(message: String, kind: ConnectionErrorKind) -> Error {
        Error::ConnectionError(ConnectionError { kind, message })
    }

    pub fn new_conference(message: String, kind: ConferenceErrorKind) -> Error {
        Error::ConferenceError(ConferenceError { kind, message })
    }

    pub fn new_track(message: String, kind: TrackErrorKind) -> Error {
        Error::TrackError(TrackError { kind, message })
    }

    pub fn new_config(message: String, kind: ConfigErrorKind) -> Error {
        Error::ConfigError(ConfigError { kind, message })
    }

    pub fn connection_kind(&self) -> Option<ConnectionErrorKind> {
        match self {
            Error::ConnectionError(err) => Some(err.kind),
            _ => None,
        }
    }

    pub fn conference_kind(&self) -> Option<ConferenceErrorKind> {
        match self {
            Error::ConferenceError(err) => Some(err.kind),
            _ => None,
        }
    }

    pub fn track_kind(&self) -> Option<TrackErrorKind> {
        match self {
            Error::TrackError(err) => Some(err.kind),
            _ => None,
        }
    }

    pub fn config_kind(&self) -> Option<ConfigErrorKind> {
        match self {
            Error::ConfigError(err) => Some(err.kind),
            _ => None,
        }
    }
}

impl fmt::Debug for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("jitsimeet::ConnectionError");

        builder.field("kind", &self.kind);
        builder.field("message", &self.message);

        builder.finish()
    }
}

impl fmt::Debug for ConferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("jitsimeet::ConferenceError");

        builder.field("kind", &self.kind);
        builder.field("message", &self.message);

        builder.finish()
    }
}

impl fmt::Debug for TrackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("jitsimeet::TrackError");

        builder.field("kind", &self.kind);
        builder.field("message", &self.message);

        builder.finish()
    }
}

impl fmt::Debug for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("jitsimeet::ConfigError");

        builder.field("kind", &self.kind);
        builder.field("message", &self.message);

        builder.finish()
    }
}
