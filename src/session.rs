use std::sync::{Arc, Mutex, MutexGuard};

use derivative::Derivative;
use enclose::enc;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    config::{JitsiMeetConfig, TrackOptions},
    engine::{Engine, EngineConference, EngineConnection, SignalReceiver},
    error::{ConferenceErrorKind, ConnectionErrorKind, Error},
    event::{Event, EventBus, EventKind, Listeners, Participant, Subscription},
    track::{MediaType, RemoteTracks, Track},
};

const CONNECT_SIGNALS: [EventKind; 4] = [
    EventKind::ConnectionEstablished,
    EventKind::ConnectionFailed,
    EventKind::WrongState,
    EventKind::DisplayNameRequired,
];

const JOIN_SIGNALS: [EventKind; 3] = [
    EventKind::ConferenceJoined,
    EventKind::ConferenceFailed,
    EventKind::ConnectionInterrupted,
];

const LEAVE_SIGNALS: [EventKind; 2] = [EventKind::ConferenceLeft, EventKind::Kicked];

#[derive(Debug, Default)]
struct SessionState {
    connected: bool,
    joined: bool,
    kicked: bool,
    local_tracks: Vec<Track>,
    remote_tracks: RemoteTracks,
}

impl SessionState {
    /// Updates bookkeeping for a signal. Returns the tracks to release once listeners have seen it.
    fn apply(&mut self, event: &Event) -> Vec<Track> {
        match event {
            Event::ConnectionEstablished { .. } => self.connected = true,
            Event::ConnectionDisconnected { .. } => self.connected = false,
            Event::ConferenceJoined { .. } => {
                self.joined = true;
                self.kicked = false;
            }
            Event::ConferenceLeft { .. } => self.joined = false,
            Event::Kicked { .. } => {
                self.joined = false;
                self.kicked = true;
            }
            Event::TrackAdded { track } => {
                if !track.is_local() {
                    self.remote_tracks.push(track.clone());
                }
            }
            Event::TrackRemoved { track } => {
                if let Some(participant_id) = track.participant_id() {
                    if let Some(removed) = self.remote_tracks.remove(participant_id, &track.id) {
                        return vec![removed];
                    }
                }
            }
            Event::UserLeft { participant } => {
                return self.remote_tracks.take_participant(&participant.id);
            }
            _ => {}
        }
        vec![]
    }
}

fn release_track(track: &Track) {
    for sink in track.detach_all() {
        tracing::trace!("Track {} detached from {}", track.id, sink);
    }
    if let Err(err) = track.dispose() {
        tracing::warn!("failed to dispose track {}: {}", track.id, err);
    }
}

enum Waited {
    Signal(Event),
    TimedOut,
    Closed,
}

#[derive(Derivative)]
#[derivative(Debug)]
struct ActiveConnection {
    #[derivative(Debug = "ignore")]
    connection: Arc<dyn EngineConnection>,
    session_id: String,
    subscriptions: Vec<Subscription>,
    signal_loop: JoinHandle<()>,
}

#[derive(Derivative)]
#[derivative(Debug)]
struct ActiveConference {
    #[derivative(Debug = "ignore")]
    conference: Arc<dyn EngineConference>,
    name: String,
    subscriptions: Vec<Subscription>,
    signal_loop: JoinHandle<()>,
}

fn release_subscriptions(subscriptions: Vec<Subscription>, signal_loop: JoinHandle<()>) {
    for subscription in subscriptions {
        subscription.unsubscribe();
    }
    signal_loop.abort();
}

/// Owns one connection, at most one conference, and the local and remote tracks of a session.
///
/// Every lifecycle operation resolves on the first terminal signal of the engine and never retries.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct JitsiMeet {
    config: JitsiMeetConfig,
    #[derivative(Debug = "ignore")]
    engine: Arc<dyn Engine>,
    bus: EventBus,
    state: Arc<Mutex<SessionState>>,
    connection: Option<ActiveConnection>,
    conference: Option<ActiveConference>,
    connection_listeners: Option<Listeners>,
    conference_listeners: Option<Listeners>,
}

impl JitsiMeet {
    pub fn new(engine: Arc<dyn Engine>, config: JitsiMeetConfig) -> Result<Self, Error> {
        config.validate()?;
        engine.set_log_level(config.log_level);

        tracing::debug!(
            "JitsiMeet is created for {}",
            config.connection.hosts.domain
        );

        Ok(Self {
            config,
            engine,
            bus: EventBus::new(),
            state: Arc::new(Mutex::new(SessionState::default())),
            connection: None,
            conference: None,
            connection_listeners: None,
            conference_listeners: None,
        })
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> &JitsiMeetConfig {
        &self.config
    }

    pub fn event_bus(&self) -> EventBus {
        self.bus.clone()
    }

    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.bus.subscribe(kind, listener)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.connection.as_ref().map(|c| c.session_id.as_str())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some() && self.state().connected
    }

    pub fn is_joined(&self) -> bool {
        self.conference.is_some() && self.state().joined
    }

    pub fn room_name(&self) -> Option<&str> {
        self.conference.as_ref().map(|c| c.name.as_str())
    }

    pub fn local_tracks(&self) -> Vec<Track> {
        self.state().local_tracks.clone()
    }

    pub fn remote_tracks(&self) -> RemoteTracks {
        self.state().remote_tracks.clone()
    }

    fn spawn_signal_loop(&self, label: String, receiver: SignalReceiver) -> JoinHandle<()> {
        let bus = &self.bus;
        let state = &self.state;
        tokio::spawn(enc!((bus, state) async move {
            Self::signal_loop(label, receiver, bus, state).await;
        }))
    }

    async fn signal_loop(
        label: String,
        mut receiver: SignalReceiver,
        bus: EventBus,
        state: Arc<Mutex<SessionState>>,
    ) {
        while let Some(event) = receiver.recv().await {
            tracing::trace!("{} received signal {}", label, event.kind());
            let released = state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .apply(&event);
            bus.emit(&event);
            for track in released.iter() {
                release_track(track);
            }
        }
        tracing::debug!("{} signal loop finished", label);
    }

    async fn wait(&self, receiver: oneshot::Receiver<Event>) -> Waited {
        match self.config.signal_timeout() {
            Some(timeout) => match tokio::time::timeout(timeout, receiver).await {
                Ok(Ok(event)) => Waited::Signal(event),
                Ok(Err(_)) => Waited::Closed,
                Err(_) => Waited::TimedOut,
            },
            None => match receiver.await {
                Ok(event) => Waited::Signal(event),
                Err(_) => Waited::Closed,
            },
        }
    }

    /// Connects and resolves with the session id.
    ///
    /// Listeners passed here are kept and registered again by later calls that pass `None`.
    pub async fn connect(&mut self, listeners: Option<Listeners>) -> Result<String, Error> {
        if let Some(active) = &self.connection {
            tracing::warn!(
                "connect is called while session {} is connected",
                active.session_id
            );
            if listeners.is_some() {
                tracing::warn!(
                    "listeners passed to connect apply from the next connection of session {}",
                    active.session_id
                );
                self.connection_listeners = listeners;
            }
            let waiter = self.bus.wait_for(&CONNECT_SIGNALS);
            active
                .connection
                .connect(self.config.connection.display_name.clone())
                .await?;
            return match self.wait(waiter).await {
                Waited::Signal(Event::ConnectionEstablished { session_id }) => Ok(session_id),
                Waited::Signal(event) => Err(Self::connection_error(event)),
                Waited::TimedOut => Err(Self::connection_timeout()),
                Waited::Closed => Err(Self::connection_closed()),
            };
        }

        let url = self.config.connection.effective_service_url()?;
        if listeners.is_some() {
            self.connection_listeners = listeners;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let connection = self.engine.create_connection(&self.config.connection, tx)?;
        let signal_loop = self.spawn_signal_loop("connection".to_string(), rx);
        let subscriptions = self
            .connection_listeners
            .as_ref()
            .map(|l| l.register(&self.bus))
            .unwrap_or_default();

        tracing::debug!("connecting to {}", url);
        let waiter = self.bus.wait_for(&CONNECT_SIGNALS);
        let result = match connection
            .connect(self.config.connection.display_name.clone())
            .await
        {
            Ok(()) => match self.wait(waiter).await {
                Waited::Signal(Event::ConnectionEstablished { session_id }) => Ok(session_id),
                Waited::Signal(event) => Err(Self::connection_error(event)),
                Waited::TimedOut => Err(Self::connection_timeout()),
                Waited::Closed => Err(Self::connection_closed()),
            },
            Err(err) => Err(err),
        };

        match result {
            Ok(session_id) => {
                tracing::info!("Connection {} is established", session_id);
                self.state().connected = true;
                self.connection = Some(ActiveConnection {
                    connection,
                    session_id: session_id.clone(),
                    subscriptions,
                    signal_loop,
                });
                Ok(session_id)
            }
            Err(err) => {
                tracing::error!("Connection failed: {}", err);
                release_subscriptions(subscriptions, signal_loop);
                // the engine may still hold a half-open session
                if let Err(teardown) = connection.disconnect().await {
                    tracing::debug!("failed to tear down connection: {}", teardown);
                }
                Err(err)
            }
        }
    }

    fn connection_error(event: Event) -> Error {
        match event {
            Event::ConnectionFailed { reason } => {
                Error::new_connection(reason, ConnectionErrorKind::ConnectionFailed)
            }
            Event::WrongState { reason } => {
                Error::new_connection(reason, ConnectionErrorKind::WrongState)
            }
            Event::DisplayNameRequired => Error::new_connection(
                "A display name is required to connect".to_string(),
                ConnectionErrorKind::DisplayNameRequired,
            ),
            other => Error::new_connection(
                format!("Unexpected signal {}", other.kind()),
                ConnectionErrorKind::ConnectionFailed,
            ),
        }
    }

    fn connection_timeout() -> Error {
        Error::new_connection(
            "No connection signal arrived in time".to_string(),
            ConnectionErrorKind::Timeout,
        )
    }

    fn connection_closed() -> Error {
        Error::new_connection(
            "Signal channel closed before the connection settled".to_string(),
            ConnectionErrorKind::EngineUnavailable,
        )
    }

    /// Drops a conference the server kicked us out of.
    fn sync_conference(&mut self) {
        if self.conference.is_none() || !self.state().kicked {
            return;
        }
        if let Some(active) = self.conference.take() {
            tracing::warn!("Conference {} was left by a kick", active.name);
            release_subscriptions(active.subscriptions, active.signal_loop);
        }
        let released = {
            let mut state = self.state();
            state.kicked = false;
            state.joined = false;
            state.remote_tracks.drain()
        };
        released.iter().for_each(release_track);
    }

    /// Joins the room named in the connection config.
    pub async fn join_configured_conference(
        &mut self,
        listeners: Option<Listeners>,
    ) -> Result<bool, Error> {
        let Some(name) = self.config.connection.room_name.clone() else {
            return Err(Error::new_conference(
                "No room name is configured".to_string(),
                ConferenceErrorKind::NoRoomName,
            ));
        };
        self.join_conference(&name, listeners).await
    }

    /// Joins `name` (case-insensitive). Resolves `false` when that room is already joined.
    ///
    /// A different joined room is left first. The argument always wins over a configured room name.
    pub async fn join_conference(
        &mut self,
        name: &str,
        listeners: Option<Listeners>,
    ) -> Result<bool, Error> {
        let name = name.to_lowercase();
        if name.is_empty() {
            return Err(Error::new_conference(
                "Room name must not be empty".to_string(),
                ConferenceErrorKind::NoRoomName,
            ));
        }
        self.sync_conference();

        if self.connection.is_none() {
            return Err(Self::not_connected(&name));
        }

        if let Some(configured) = &self.config.connection.room_name {
            if configured != &name {
                tracing::warn!(
                    "joining {} although the connection is configured for {}",
                    name,
                    configured
                );
            }
        }

        if let Some(active) = &self.conference {
            if active.name == name {
                tracing::debug!("Conference {} is already joined", name);
                return Ok(false);
            }
            tracing::info!("Switching conference from {} to {}", active.name, name);
            self.leave_conference().await?;
        }

        if listeners.is_some() {
            self.conference_listeners = listeners;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let Some(connection) = &self.connection else {
            return Err(Self::not_connected(&name));
        };
        let conference = connection
            .connection
            .init_conference(&name, &self.config.conference, tx)?;
        let signal_loop = self.spawn_signal_loop(format!("conference {}", name), rx);
        let subscriptions = self
            .conference_listeners
            .as_ref()
            .map(|l| l.register(&self.bus))
            .unwrap_or_default();

        let waiter = self.bus.wait_for(&JOIN_SIGNALS);
        let waited = match conference
            .join(self.config.conference.password.clone())
            .await
        {
            Ok(()) => Ok(self.wait(waiter).await),
            Err(err) => Err(err),
        };

        match waited {
            Ok(Waited::Signal(Event::ConferenceJoined { .. })) => {}
            failed => {
                release_subscriptions(subscriptions, signal_loop);
                let err = match failed {
                    Err(err) => err,
                    Ok(Waited::Signal(Event::ConferenceFailed { reason, .. })) => {
                        Error::new_conference(reason, ConferenceErrorKind::ConferenceFailed)
                    }
                    Ok(Waited::Signal(Event::ConnectionInterrupted { room })) => {
                        Error::new_conference(
                            format!("Connection interrupted while joining {}", room),
                            ConferenceErrorKind::ConnectionInterrupted,
                        )
                    }
                    Ok(Waited::TimedOut) => Error::new_conference(
                        format!("No join signal arrived in time for {}", name),
                        ConferenceErrorKind::Timeout,
                    ),
                    Ok(_) => Error::new_conference(
                        format!("Signal channel closed while joining {}", name),
                        ConferenceErrorKind::ConferenceFailed,
                    ),
                };
                tracing::error!("Conference join failed: {}", err);
                // a join that settled late would otherwise leave a member behind
                if let Err(teardown) = conference.leave().await {
                    tracing::debug!("failed to tear down conference {}: {}", name, teardown);
                }
                return Err(err);
            }
        }

        tracing::info!("Conference {} joined", name);
        let local_tracks = {
            let mut state = self.state();
            state.joined = true;
            state.local_tracks.clone()
        };
        self.conference = Some(ActiveConference {
            conference: Arc::clone(&conference),
            name,
            subscriptions,
            signal_loop,
        });
        for track in local_tracks {
            conference.add_track(track).await?;
        }

        Ok(true)
    }

    fn not_connected(name: &str) -> Error {
        Error::new_connection(
            format!("Cannot join {} before connecting", name),
            ConnectionErrorKind::NotConnected,
        )
    }

    /// Leaves the joined conference. Resolves `false` when there is none.
    pub async fn leave_conference(&mut self) -> Result<bool, Error> {
        self.sync_conference();
        let Some(active) = self.conference.take() else {
            return Ok(false);
        };

        let local_tracks = self.state().local_tracks.clone();
        for track in local_tracks.iter() {
            if let Err(err) = active.conference.remove_track(&track.id).await {
                tracing::warn!("failed to unpublish track {}: {}", track.id, err);
            }
        }

        let waiter = self.bus.wait_for(&LEAVE_SIGNALS);
        let waited = match active.conference.leave().await {
            Ok(()) => Ok(self.wait(waiter).await),
            Err(err) => Err(err),
        };

        // The engine keeps a listener on the connection after leaving.
        active.conference.clear_connection_listeners();
        release_subscriptions(active.subscriptions, active.signal_loop);

        let released = {
            let mut state = self.state();
            state.joined = false;
            state.kicked = false;
            state.remote_tracks.drain()
        };
        released.iter().for_each(release_track);

        match waited {
            Ok(Waited::Signal(_)) => {
                tracing::info!("Conference {} left", active.name);
                Ok(true)
            }
            Ok(Waited::TimedOut) => Err(Error::new_conference(
                format!("No leave signal arrived in time for {}", active.name),
                ConferenceErrorKind::Timeout,
            )),
            Ok(Waited::Closed) => Err(Error::new_conference(
                format!("Signal channel closed while leaving {}", active.name),
                ConferenceErrorKind::ConferenceFailed,
            )),
            Err(err) => Err(err),
        }
    }

    /// Creates local tracks. `options` wins over the configured default, which wins over audio and video.
    pub async fn create_local_tracks(
        &mut self,
        options: Option<TrackOptions>,
    ) -> Result<Vec<Track>, Error> {
        self.sync_conference();
        let options = options
            .or_else(|| self.config.track_options.clone())
            .unwrap_or_default();
        let tracks = self.engine.create_local_tracks(&options).await?;
        tracing::debug!("{} local tracks created", tracks.len());

        self.state().local_tracks.extend(tracks.iter().cloned());
        if let Some(active) = &self.conference {
            for track in tracks.iter() {
                active.conference.add_track(track.clone()).await?;
            }
        }

        Ok(tracks)
    }

    /// Mutes or unmutes local tracks of `media_type`.
    pub fn set_local_muted(&self, media_type: MediaType, muted: bool) {
        let tracks: Vec<Track> = self
            .state()
            .local_tracks
            .iter()
            .filter(|t| t.media_type == media_type && t.is_muted() != muted)
            .cloned()
            .collect();
        for track in tracks {
            track.set_muted(muted);
            self.bus.emit(&Event::TrackMuteChanged { track });
        }
    }

    fn joined_conference(&mut self) -> Result<Arc<dyn EngineConference>, Error> {
        self.sync_conference();
        match &self.conference {
            Some(active) => Ok(Arc::clone(&active.conference)),
            None => Err(Error::new_conference(
                "No conference is joined".to_string(),
                ConferenceErrorKind::NoConference,
            )),
        }
    }

    pub async fn send_text_message(&mut self, text: &str) -> Result<(), Error> {
        let conference = self.joined_conference()?;
        conference.send_text_message(text).await
    }

    /// Changes the display name. It applies to the joined conference and to later connections.
    pub async fn set_display_name(&mut self, name: &str) -> Result<(), Error> {
        self.config.connection.display_name = Some(name.to_string());
        self.sync_conference();
        if let Some(active) = &self.conference {
            active.conference.set_display_name(name).await?;
        }
        Ok(())
    }

    pub async fn participants(&mut self) -> Vec<Participant> {
        self.sync_conference();
        match &self.conference {
            Some(active) => active.conference.participants().await,
            None => vec![],
        }
    }

    /// Leaves any joined conference, then tears the connection down.
    pub async fn disconnect(&mut self) -> Result<(), Error> {
        if let Err(err) = self.leave_conference().await {
            tracing::warn!("failed to leave conference before disconnecting: {}", err);
        }
        let Some(active) = self.connection.take() else {
            return Ok(());
        };

        let waiter = self.bus.wait_for(&[EventKind::ConnectionDisconnected]);
        let sent = active.connection.disconnect().await;
        if sent.is_ok() {
            if let Waited::TimedOut = self.wait(waiter).await {
                tracing::warn!(
                    "Connection {} did not report disconnection in time",
                    active.session_id
                );
            }
        }
        release_subscriptions(active.subscriptions, active.signal_loop);
        self.state().connected = false;
        sent?;
        tracing::info!("Connection {} is disconnected", active.session_id);

        Ok(())
    }

    /// Disconnects and releases every local and remote track.
    pub async fn dispose(&mut self) {
        if let Err(err) = self.disconnect().await {
            tracing::warn!("failed to disconnect while disposing: {}", err);
        }
        let released: Vec<Track> = {
            let mut state = self.state();
            let mut tracks: Vec<Track> = state.local_tracks.drain(..).collect();
            tracks.extend(state.remote_tracks.drain());
            tracks
        };
        tracing::info!("Releasing {} tracks", released.len());
        released.iter().for_each(release_track);
        self.bus.clear();
    }
}
