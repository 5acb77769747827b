use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    config::{ConferenceOptions, ConnectionOptions, LogLevel, TrackOptions},
    error::Error,
    event::{Event, Participant},
    track::Track,
};

/// Channel the engine uses to report signals back to the session.
pub type SignalSender = mpsc::UnboundedSender<Event>;
pub type SignalReceiver = mpsc::UnboundedReceiver<Event>;

/// The conferencing engine that does signaling and media negotiation.
#[async_trait]
pub trait Engine: Send + Sync {
    fn set_log_level(&self, level: LogLevel);

    /// Creates an unconnected connection. Connection signals go to `signals`.
    fn create_connection(
        &self,
        options: &ConnectionOptions,
        signals: SignalSender,
    ) -> Result<Arc<dyn EngineConnection>, Error>;

    async fn create_local_tracks(&self, options: &TrackOptions) -> Result<Vec<Track>, Error>;
}

#[async_trait]
pub trait EngineConnection: Send + Sync {
    /// Starts connecting. The outcome arrives as a signal.
    ///
    /// An error means the request never reached the engine.
    async fn connect(&self, display_name: Option<String>) -> Result<(), Error>;

    /// Creates a conference bound to this connection. Conference signals go to `signals`.
    fn init_conference(
        &self,
        name: &str,
        options: &ConferenceOptions,
        signals: SignalSender,
    ) -> Result<Arc<dyn EngineConference>, Error>;

    async fn disconnect(&self) -> Result<(), Error>;
}

#[async_trait]
pub trait EngineConference: Send + Sync {
    fn name(&self) -> String;

    /// Starts joining. The outcome arrives as a signal.
    async fn join(&self, password: Option<String>) -> Result<(), Error>;

    async fn leave(&self) -> Result<(), Error>;

    async fn add_track(&self, track: Track) -> Result<(), Error>;

    async fn remove_track(&self, track_id: &str) -> Result<(), Error>;

    async fn send_text_message(&self, text: &str) -> Result<(), Error>;

    async fn set_display_name(&self, name: &str) -> Result<(), Error>;

    async fn participants(&self) -> Vec<Participant>;

    /// Drops listeners the conference keeps registered on its connection after leaving.
    fn clear_connection_listeners(&self);
}
