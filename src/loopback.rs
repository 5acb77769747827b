use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::{
    config::{ConferenceOptions, ConnectionOptions, LogLevel, TrackOptions},
    engine::{Engine, EngineConference, EngineConnection, SignalSender},
    error::{ConnectionErrorKind, Error, TrackErrorKind},
    event::{Event, Participant},
    track::{MediaType, Track},
};

/// Behaviour switches of a [`LoopbackServer`].
#[derive(Debug, Clone, Default)]
pub struct LoopbackPolicy {
    /// Every connect attempt fails with this reason.
    pub reject_reason: Option<String>,
    pub require_display_name: bool,
    /// Room name to password. Joining without the password fails.
    pub locked_rooms: HashMap<String, String>,
    /// Terminal signals are swallowed, so callers never hear back.
    pub silent: bool,
    /// Joins are answered with a connection interruption instead of a join.
    pub interrupt_joins: bool,
}

struct Session {
    connected: bool,
    display_name: Option<String>,
    signals: SignalSender,
}

struct Member {
    participant: Participant,
    session_id: String,
    signals: SignalSender,
    tracks: Vec<Track>,
}

#[derive(Default)]
struct Room {
    members: Vec<Member>,
}

impl Room {
    fn member_mut(&mut self, participant_id: &str) -> Option<&mut Member> {
        self.members
            .iter_mut()
            .find(|m| m.participant.id == participant_id)
    }

    fn take_member(&mut self, participant_id: &str) -> Option<Member> {
        let index = self
            .members
            .iter()
            .position(|m| m.participant.id == participant_id)?;
        Some(self.members.remove(index))
    }

    fn broadcast(&self, except: &str, event: impl Fn(&Member) -> Event) {
        for member in self.members.iter().filter(|m| m.participant.id != except) {
            let _ = member.signals.send(event(member));
        }
    }

    /// Tells the remaining members that `member` is gone.
    fn announce_departure(&self, member: &Member) {
        for track in member.tracks.iter() {
            self.broadcast(&member.participant.id, |_| Event::TrackRemoved {
                track: remote_copy(track, &member.participant.id),
            });
        }
        self.broadcast(&member.participant.id, |_| Event::UserLeft {
            participant: member.participant.clone(),
        });
    }
}

fn remote_copy(track: &Track, participant_id: &str) -> Track {
    Track::new_remote(
        track.id.clone(),
        track.media_type,
        participant_id.to_string(),
        track.label.clone(),
    )
}

pub(crate) enum ServerEvent {
    Connect {
        session_id: String,
        display_name: Option<String>,
        signals: SignalSender,
    },
    Disconnect {
        session_id: String,
    },
    Join {
        session_id: String,
        room: String,
        participant_id: String,
        password: Option<String>,
        signals: SignalSender,
    },
    Leave {
        room: String,
        participant_id: String,
    },
    AddTrack {
        room: String,
        participant_id: String,
        track: Track,
    },
    RemoveTrack {
        room: String,
        participant_id: String,
        track_id: String,
    },
    Message {
        room: String,
        participant_id: String,
        text: String,
    },
    DisplayName {
        room: String,
        participant_id: String,
        name: String,
    },
    GetParticipants(String, oneshot::Sender<Vec<Participant>>),
    GetSessions(oneshot::Sender<Vec<String>>),
    Kick {
        room: String,
        participant_id: String,
        reason: Option<String>,
    },
    Interrupt(String),
    UpdatePolicy(LoopbackPolicy),
    Closed,
}

/// In-process signaling server. Sessions connected to the same server see each other in rooms.
#[derive(Debug)]
pub struct LoopbackServer {
    pub id: String,
    server_event_sender: mpsc::UnboundedSender<ServerEvent>,
    policy: Mutex<LoopbackPolicy>,
    closed: AtomicBool,
}

impl LoopbackServer {
    pub fn new() -> Arc<LoopbackServer> {
        Self::with_policy(LoopbackPolicy::default())
    }

    pub fn with_policy(policy: LoopbackPolicy) -> Arc<LoopbackServer> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel::<ServerEvent>();

        let server = LoopbackServer {
            id: id.clone(),
            server_event_sender: tx,
            policy: Mutex::new(policy.clone()),
            closed: AtomicBool::new(false),
        };

        tokio::spawn(async move {
            LoopbackServer::server_event_loop(id, policy, rx).await;
        });

        Arc::new(server)
    }

    /// Applies `update` to the policy. Later requests observe the change.
    pub fn update_policy(&self, update: impl FnOnce(&mut LoopbackPolicy)) {
        let policy = {
            let mut policy = self
                .policy
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            update(&mut policy);
            policy.clone()
        };
        let _ = self
            .server_event_sender
            .send(ServerEvent::UpdatePolicy(policy));
    }

    pub fn set_silent(&self, silent: bool) {
        self.update_policy(|p| p.silent = silent);
    }

    pub fn kick(&self, room: &str, participant_id: &str, reason: Option<String>) {
        let _ = self.server_event_sender.send(ServerEvent::Kick {
            room: room.to_lowercase(),
            participant_id: participant_id.to_string(),
            reason,
        });
    }

    pub fn interrupt(&self, room: &str) {
        let _ = self
            .server_event_sender
            .send(ServerEvent::Interrupt(room.to_lowercase()));
    }

    pub async fn participants(&self, room: &str) -> Vec<Participant> {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .server_event_sender
            .send(ServerEvent::GetParticipants(room.to_lowercase(), tx));
        rx.await.unwrap_or_default()
    }

    /// Ids of the sessions the server holds as connected.
    pub async fn sessions(&self) -> Vec<String> {
        let (tx, rx) = oneshot::channel();
        let _ = self.server_event_sender.send(ServerEvent::GetSessions(tx));
        rx.await.unwrap_or_default()
    }

    pub(crate) fn send(&self, event: ServerEvent) -> Result<(), Error> {
        let closed = || {
            Error::new_connection(
                format!("Loopback server {} is closed", self.id),
                ConnectionErrorKind::EngineUnavailable,
            )
        };
        if self.closed.load(Ordering::SeqCst) {
            return Err(closed());
        }
        self.server_event_sender.send(event).map_err(|_| closed())
    }

    pub(crate) async fn server_event_loop(
        id: String,
        mut policy: LoopbackPolicy,
        mut event_receiver: mpsc::UnboundedReceiver<ServerEvent>,
    ) {
        let mut sessions: HashMap<String, Session> = HashMap::new();
        let mut rooms: HashMap<String, Room> = HashMap::new();

        while let Some(event) = event_receiver.recv().await {
            match event {
                ServerEvent::Connect {
                    session_id,
                    display_name,
                    signals,
                } => {
                    let already = sessions.get(&session_id).map(|s| s.connected);
                    let reply = if already == Some(true) {
                        Event::WrongState {
                            reason: format!("session {} is already connected", session_id),
                        }
                    } else if let Some(reason) = &policy.reject_reason {
                        Event::ConnectionFailed {
                            reason: reason.clone(),
                        }
                    } else if policy.require_display_name && display_name.is_none() {
                        Event::DisplayNameRequired
                    } else {
                        sessions.insert(
                            session_id.clone(),
                            Session {
                                connected: true,
                                display_name,
                                signals: signals.clone(),
                            },
                        );
                        tracing::debug!("Loopback session {} is connected", session_id);
                        Event::ConnectionEstablished {
                            session_id: session_id.clone(),
                        }
                    };
                    if !policy.silent {
                        let _ = signals.send(reply);
                    }
                }
                ServerEvent::Disconnect { session_id } => {
                    for room in rooms.values_mut() {
                        let ids: Vec<String> = room
                            .members
                            .iter()
                            .filter(|m| m.session_id == session_id)
                            .map(|m| m.participant.id.clone())
                            .collect();
                        for participant_id in ids {
                            if let Some(member) = room.take_member(&participant_id) {
                                room.announce_departure(&member);
                            }
                        }
                    }
                    rooms.retain(|_, r| !r.members.is_empty());
                    if let Some(session) = sessions.remove(&session_id) {
                        let _ = session.signals.send(Event::ConnectionDisconnected {
                            reason: None,
                        });
                    }
                }
                ServerEvent::Join {
                    session_id,
                    room,
                    participant_id,
                    password,
                    signals,
                } => {
                    let display_name = match sessions.get(&session_id) {
                        Some(session) if session.connected => session.display_name.clone(),
                        _ => {
                            if !policy.silent {
                                let _ = signals.send(Event::ConferenceFailed {
                                    room,
                                    reason: "conference.connectionError".to_string(),
                                });
                            }
                            continue;
                        }
                    };
                    if policy.interrupt_joins {
                        let _ = signals.send(Event::ConnectionInterrupted { room });
                        continue;
                    }
                    if let Some(expected) = policy.locked_rooms.get(&room) {
                        if password.as_ref() != Some(expected) {
                            if !policy.silent {
                                let reason = match password {
                                    Some(_) => "conference.passwordRequired",
                                    None => "conference.authenticationRequired",
                                };
                                let _ = signals.send(Event::ConferenceFailed {
                                    room,
                                    reason: reason.to_string(),
                                });
                            }
                            continue;
                        }
                    }

                    let r = rooms.entry(room.clone()).or_default();
                    let participant = Participant {
                        id: participant_id.clone(),
                        display_name,
                    };
                    r.broadcast(&participant_id, |_| Event::UserJoined {
                        participant: participant.clone(),
                    });
                    if !policy.silent {
                        let _ = signals.send(Event::ConferenceJoined { room: room.clone() });
                    }
                    for member in r.members.iter() {
                        let _ = signals.send(Event::UserJoined {
                            participant: member.participant.clone(),
                        });
                        for track in member.tracks.iter() {
                            let _ = signals.send(Event::TrackAdded {
                                track: remote_copy(track, &member.participant.id),
                            });
                        }
                    }
                    r.members.push(Member {
                        participant,
                        session_id,
                        signals,
                        tracks: vec![],
                    });
                    tracing::debug!(
                        "Participant {} joined loopback room {}",
                        participant_id,
                        room
                    );
                }
                ServerEvent::Leave {
                    room,
                    participant_id,
                } => {
                    let Some(r) = rooms.get_mut(&room) else {
                        continue;
                    };
                    if let Some(member) = r.take_member(&participant_id) {
                        if !policy.silent {
                            let _ = member
                                .signals
                                .send(Event::ConferenceLeft { room: room.clone() });
                        }
                        r.announce_departure(&member);
                    }
                    if r.members.is_empty() {
                        rooms.remove(&room);
                    }
                }
                ServerEvent::AddTrack {
                    room,
                    participant_id,
                    track,
                } => {
                    let Some(r) = rooms.get_mut(&room) else {
                        continue;
                    };
                    r.broadcast(&participant_id, |_| Event::TrackAdded {
                        track: remote_copy(&track, &participant_id),
                    });
                    if let Some(member) = r.member_mut(&participant_id) {
                        member.tracks.push(track);
                    }
                }
                ServerEvent::RemoveTrack {
                    room,
                    participant_id,
                    track_id,
                } => {
                    let Some(r) = rooms.get_mut(&room) else {
                        continue;
                    };
                    let removed = r.member_mut(&participant_id).and_then(|member| {
                        let index = member.tracks.iter().position(|t| t.id == track_id)?;
                        Some(member.tracks.remove(index))
                    });
                    if let Some(track) = removed {
                        r.broadcast(&participant_id, |_| Event::TrackRemoved {
                            track: remote_copy(&track, &participant_id),
                        });
                    }
                }
                ServerEvent::Message {
                    room,
                    participant_id,
                    text,
                } => {
                    if let Some(r) = rooms.get(&room) {
                        r.broadcast(&participant_id, |_| Event::MessageReceived {
                            participant_id: participant_id.clone(),
                            text: text.clone(),
                        });
                    }
                }
                ServerEvent::DisplayName {
                    room,
                    participant_id,
                    name,
                } => {
                    let Some(r) = rooms.get_mut(&room) else {
                        continue;
                    };
                    if let Some(member) = r.member_mut(&participant_id) {
                        member.participant.display_name = Some(name.clone());
                    }
                    r.broadcast(&participant_id, |_| Event::DisplayNameChanged {
                        participant_id: participant_id.clone(),
                        display_name: name.clone(),
                    });
                }
                ServerEvent::GetParticipants(room, reply_sender) => {
                    let participants = rooms
                        .get(&room)
                        .map(|r| r.members.iter().map(|m| m.participant.clone()).collect())
                        .unwrap_or_default();
                    let _ = reply_sender.send(participants);
                }
                ServerEvent::GetSessions(reply_sender) => {
                    let ids = sessions
                        .iter()
                        .filter(|(_, s)| s.connected)
                        .map(|(id, _)| id.clone())
                        .collect();
                    let _ = reply_sender.send(ids);
                }
                ServerEvent::Kick {
                    room,
                    participant_id,
                    reason,
                } => {
                    let Some(r) = rooms.get_mut(&room) else {
                        continue;
                    };
                    if let Some(member) = r.take_member(&participant_id) {
                        let _ = member.signals.send(Event::Kicked {
                            room: room.clone(),
                            actor: None,
                            reason,
                        });
                        r.announce_departure(&member);
                    }
                    if r.members.is_empty() {
                        rooms.remove(&room);
                    }
                }
                ServerEvent::Interrupt(room) => {
                    if let Some(r) = rooms.get(&room) {
                        r.broadcast("", |_| Event::ConnectionInterrupted { room: room.clone() });
                    }
                }
                ServerEvent::UpdatePolicy(updated) => {
                    policy = updated;
                }
                ServerEvent::Closed => {
                    event_receiver.close();
                    break;
                }
            }
        }
        tracing::info!("Loopback server {} event loop finished", id);
    }

    /// Stops the event loop. Requests sent afterwards fail with `EngineUnavailable`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.server_event_sender.send(ServerEvent::Closed);
    }
}

/// [`Engine`] backed by a [`LoopbackServer`].
#[derive(Debug)]
pub struct LoopbackEngine {
    server: Arc<LoopbackServer>,
    log_level: Mutex<LogLevel>,
}

impl LoopbackEngine {
    pub fn new(server: Arc<LoopbackServer>) -> Self {
        Self {
            server,
            log_level: Mutex::new(LogLevel::default()),
        }
    }

    pub fn server(&self) -> Arc<LoopbackServer> {
        Arc::clone(&self.server)
    }

    pub fn log_level(&self) -> LogLevel {
        *self
            .log_level
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Engine for LoopbackEngine {
    fn set_log_level(&self, level: LogLevel) {
        *self
            .log_level
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = level;
    }

    fn create_connection(
        &self,
        options: &ConnectionOptions,
        signals: SignalSender,
    ) -> Result<Arc<dyn EngineConnection>, Error> {
        let url = options.effective_service_url()?;
        let connection = LoopbackConnection {
            session_id: Uuid::new_v4().to_string(),
            server: Arc::clone(&self.server),
            signals,
            display_name: Mutex::new(options.display_name.clone()),
        };
        tracing::debug!(
            "Loopback connection {} created for {}",
            connection.session_id,
            url
        );
        Ok(Arc::new(connection))
    }

    async fn create_local_tracks(&self, options: &TrackOptions) -> Result<Vec<Track>, Error> {
        if options.devices.is_empty() {
            return Err(Error::new_track(
                "No devices were requested".to_string(),
                TrackErrorKind::CreationFailed,
            ));
        }
        let tracks = options
            .devices
            .iter()
            .map(|media_type| {
                let device_id = match media_type {
                    MediaType::Audio => options.mic_device_id.clone(),
                    MediaType::Video => options.camera_device_id.clone(),
                    MediaType::Desktop => None,
                };
                Track::new_local(*media_type, device_id)
            })
            .collect();
        Ok(tracks)
    }
}

#[derive(Debug)]
pub struct LoopbackConnection {
    pub session_id: String,
    server: Arc<LoopbackServer>,
    signals: SignalSender,
    display_name: Mutex<Option<String>>,
}

#[async_trait]
impl EngineConnection for LoopbackConnection {
    async fn connect(&self, display_name: Option<String>) -> Result<(), Error> {
        let display_name = {
            let mut current = self
                .display_name
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if display_name.is_some() {
                *current = display_name;
            }
            current.clone()
        };
        let event = ServerEvent::Connect {
            session_id: self.session_id.clone(),
            display_name,
            signals: self.signals.clone(),
        };
        self.server.send(event)
    }

    fn init_conference(
        &self,
        name: &str,
        options: &ConferenceOptions,
        signals: SignalSender,
    ) -> Result<Arc<dyn EngineConference>, Error> {
        let participant_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let conference = LoopbackConference {
            room: name.to_lowercase(),
            participant_id,
            session_id: self.session_id.clone(),
            server: Arc::clone(&self.server),
            signals,
            password: options.password.clone(),
        };
        Ok(Arc::new(conference))
    }

    async fn disconnect(&self) -> Result<(), Error> {
        self.server.send(ServerEvent::Disconnect {
            session_id: self.session_id.clone(),
        })
    }
}

#[derive(Debug)]
pub struct LoopbackConference {
    pub room: String,
    pub participant_id: String,
    session_id: String,
    server: Arc<LoopbackServer>,
    signals: SignalSender,
    password: Option<String>,
}

#[async_trait]
impl EngineConference for LoopbackConference {
    fn name(&self) -> String {
        self.room.clone()
    }

    async fn join(&self, password: Option<String>) -> Result<(), Error> {
        let event = ServerEvent::Join {
            session_id: self.session_id.clone(),
            room: self.room.clone(),
            participant_id: self.participant_id.clone(),
            password: password.or_else(|| self.password.clone()),
            signals: self.signals.clone(),
        };
        self.server.send(event)
    }

    async fn leave(&self) -> Result<(), Error> {
        self.server.send(ServerEvent::Leave {
            room: self.room.clone(),
            participant_id: self.participant_id.clone(),
        })
    }

    async fn add_track(&self, track: Track) -> Result<(), Error> {
        self.server.send(ServerEvent::AddTrack {
            room: self.room.clone(),
            participant_id: self.participant_id.clone(),
            track,
        })
    }

    async fn remove_track(&self, track_id: &str) -> Result<(), Error> {
        self.server.send(ServerEvent::RemoveTrack {
            room: self.room.clone(),
            participant_id: self.participant_id.clone(),
            track_id: track_id.to_string(),
        })
    }

    async fn send_text_message(&self, text: &str) -> Result<(), Error> {
        self.server.send(ServerEvent::Message {
            room: self.room.clone(),
            participant_id: self.participant_id.clone(),
            text: text.to_string(),
        })
    }

    async fn set_display_name(&self, name: &str) -> Result<(), Error> {
        self.server.send(ServerEvent::DisplayName {
            room: self.room.clone(),
            participant_id: self.participant_id.clone(),
            name: name.to_string(),
        })
    }

    async fn participants(&self) -> Vec<Participant> {
        self.server
            .participants(&self.room)
            .await
            .into_iter()
            .filter(|p| p.id != self.participant_id)
            .collect()
    }

    fn clear_connection_listeners(&self) {
        tracing::trace!(
            "Loopback conference {} holds no connection listeners",
            self.room
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn connected(
        server: &Arc<LoopbackServer>,
        name: &str,
    ) -> (Arc<dyn EngineConnection>, mpsc::UnboundedReceiver<Event>) {
        let engine = LoopbackEngine::new(Arc::clone(server));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = engine
            .create_connection(&crate::config::JitsiMeetConfig::docker().connection, tx)
            .unwrap();
        connection.connect(Some(name.to_string())).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::ConnectionEstablished { .. }));
        (connection, rx)
    }

    #[tokio::test]
    async fn test_connect_twice_is_wrong_state() {
        let server = LoopbackServer::new();
        let (connection, mut rx) = connected(&server, "alice").await;
        connection.connect(None).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::WrongState { .. }));
    }

    #[tokio::test]
    async fn test_rejected_connection() {
        let server = LoopbackServer::with_policy(LoopbackPolicy {
            reject_reason: Some("connection.otherError".to_string()),
            ..Default::default()
        });
        let engine = LoopbackEngine::new(Arc::clone(&server));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = engine
            .create_connection(&crate::config::JitsiMeetConfig::docker().connection, tx)
            .unwrap();
        connection.connect(None).await.unwrap();
        match rx.recv().await.unwrap() {
            Event::ConnectionFailed { reason } => assert_eq!(reason, "connection.otherError"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_members_see_each_other() {
        let server = LoopbackServer::new();
        let (alice, _alice_rx) = connected(&server, "alice").await;
        let (bob, _bob_rx) = connected(&server, "bob").await;

        let (alice_tx, mut alice_conf) = mpsc::unbounded_channel();
        let alice_room = alice
            .init_conference("Lobby", &ConferenceOptions::default(), alice_tx)
            .unwrap();
        alice_room.join(None).await.unwrap();
        assert!(matches!(
            alice_conf.recv().await.unwrap(),
            Event::ConferenceJoined { .. }
        ));
        let track = Track::new_local(MediaType::Audio, None);
        alice_room.add_track(track.clone()).await.unwrap();

        let (bob_tx, mut bob_conf) = mpsc::unbounded_channel();
        let bob_room = bob
            .init_conference("lobby", &ConferenceOptions::default(), bob_tx)
            .unwrap();
        bob_room.join(None).await.unwrap();
        assert!(matches!(
            bob_conf.recv().await.unwrap(),
            Event::ConferenceJoined { .. }
        ));
        match bob_conf.recv().await.unwrap() {
            Event::UserJoined { participant } => {
                assert_eq!(participant.display_name.as_deref(), Some("alice"))
            }
            other => panic!("unexpected event {:?}", other),
        }
        match bob_conf.recv().await.unwrap() {
            Event::TrackAdded { track: remote } => {
                assert_eq!(remote.id, track.id);
                assert!(!remote.is_local());
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(
            alice_conf.recv().await.unwrap(),
            Event::UserJoined { .. }
        ));
        assert_eq!(bob_room.participants().await.len(), 1);

        alice_room.leave().await.unwrap();
        assert!(matches!(
            alice_conf.recv().await.unwrap(),
            Event::ConferenceLeft { .. }
        ));
        assert!(matches!(
            bob_conf.recv().await.unwrap(),
            Event::TrackRemoved { .. }
        ));
        assert!(matches!(
            bob_conf.recv().await.unwrap(),
            Event::UserLeft { .. }
        ));
    }

    #[tokio::test]
    async fn test_locked_room_requires_password() {
        let server = LoopbackServer::new();
        server.update_policy(|p| {
            p.locked_rooms
                .insert("vault".to_string(), "secret".to_string());
        });
        let (connection, _rx) = connected(&server, "alice").await;

        let (tx, mut conf) = mpsc::unbounded_channel();
        let room = connection
            .init_conference("vault", &ConferenceOptions::default(), tx)
            .unwrap();
        room.join(None).await.unwrap();
        match conf.recv().await.unwrap() {
            Event::ConferenceFailed { reason, .. } => {
                assert_eq!(reason, "conference.authenticationRequired")
            }
            other => panic!("unexpected event {:?}", other),
        }
        room.join(Some("secret".to_string())).await.unwrap();
        assert!(matches!(
            conf.recv().await.unwrap(),
            Event::ConferenceJoined { .. }
        ));
    }

    #[tokio::test]
    async fn test_create_local_tracks() {
        let engine = LoopbackEngine::new(LoopbackServer::new());
        let tracks = engine
            .create_local_tracks(&TrackOptions {
                devices: vec![MediaType::Audio, MediaType::Desktop],
                mic_device_id: Some("mic-1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].label, "mic-1");
        assert_eq!(tracks[1].media_type, MediaType::Desktop);

        let err = engine
            .create_local_tracks(&TrackOptions {
                devices: vec![],
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.track_kind(), Some(TrackErrorKind::CreationFailed));
    }

    #[tokio::test]
    async fn test_interrupted_join() {
        let server = LoopbackServer::with_policy(LoopbackPolicy {
            interrupt_joins: true,
            ..Default::default()
        });
        let (connection, _rx) = connected(&server, "alice").await;
        let (tx, mut conf) = mpsc::unbounded_channel();
        let room = connection
            .init_conference("lobby", &ConferenceOptions::default(), tx)
            .unwrap();
        room.join(None).await.unwrap();
        assert!(matches!(
            conf.recv().await.unwrap(),
            Event::ConnectionInterrupted { .. }
        ));
        assert!(server.participants("lobby").await.is_empty());
    }

    #[tokio::test]
    async fn test_requests_fail_after_close() {
        let server = LoopbackServer::new();
        let (connection, _rx) = connected(&server, "alice").await;
        assert_eq!(server.sessions().await.len(), 1);
        let (tx, _conf) = mpsc::unbounded_channel();
        let room = connection
            .init_conference("lobby", &ConferenceOptions::default(), tx)
            .unwrap();

        server.close();
        let err = room.join(None).await.unwrap_err();
        assert_eq!(
            err.connection_kind(),
            Some(ConnectionErrorKind::EngineUnavailable)
        );
        assert!(room.leave().await.is_err());
        assert!(connection.disconnect().await.is_err());
    }
}
