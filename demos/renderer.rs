use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use jitsimeet::{
    config::{JitsiMeetConfig, TrackOptions},
    error::Error,
    event::{Event, EventKind, Listeners},
    loopback::{LoopbackEngine, LoopbackServer},
    session::JitsiMeet,
    track::{MediaType, Track},
};
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Console stand-in for audio and video elements, keyed by element id.
#[derive(Debug, Default)]
struct Renderer {
    elements: BTreeMap<String, String>,
}

impl Renderer {
    fn show_local_tracks(&mut self, tracks: &[Track]) {
        for (i, track) in tracks.iter().enumerate() {
            let id = match track.media_type {
                MediaType::Video => format!("localVideo{}", i),
                MediaType::Audio => format!("localAudio{}", i),
                MediaType::Desktop => format!("localDesktop{}", i),
            };
            self.append(&id, track);
        }
    }

    fn show_remote_track(&mut self, track: &Track) {
        let Some(participant_id) = track.participant_id() else {
            return;
        };
        let tag = match track.media_type {
            MediaType::Audio => "audio",
            // video and shared screen both render in video elements
            MediaType::Video | MediaType::Desktop => "video",
        };
        let id = format!("{}{}{}", participant_id, tag, track.id);
        self.append(&id, track);
    }

    fn remove_remote_track(&mut self, track: &Track) {
        self.elements.retain(|id, _| !id.ends_with(&track.id));
        tracing::info!("removed elements of track {}", track.id);
    }

    fn user_left(&mut self, participant_id: &str) {
        self.elements.retain(|id, _| !id.starts_with(participant_id));
        tracing::info!("user {} left", participant_id);
    }

    fn append(&mut self, id: &str, track: &Track) {
        if let Err(err) = track.attach(id) {
            tracing::warn!("failed to attach {}: {}", track.id, err);
            return;
        }
        tracing::info!("<{} id='{}'> track label: {}", tag_name(track), id, track.label);
        self.elements.insert(id.to_string(), track.label.clone());
    }
}

fn tag_name(track: &Track) -> &'static str {
    match track.media_type {
        MediaType::Audio => "audio",
        _ => "video",
    }
}

fn renderer_listeners(renderer: &Arc<Mutex<Renderer>>) -> Listeners {
    Listeners::new()
        .on(EventKind::TrackAdded, {
            let renderer = Arc::clone(renderer);
            move |event| {
                if let Event::TrackAdded { track } = event {
                    if let Ok(mut r) = renderer.lock() {
                        r.show_remote_track(track);
                    }
                }
            }
        })
        .on(EventKind::TrackRemoved, {
            let renderer = Arc::clone(renderer);
            move |event| {
                if let Event::TrackRemoved { track } = event {
                    if let Ok(mut r) = renderer.lock() {
                        r.remove_remote_track(track);
                    }
                }
            }
        })
        .on(EventKind::UserLeft, {
            let renderer = Arc::clone(renderer);
            move |event| {
                if let Event::UserLeft { participant } = event {
                    if let Ok(mut r) = renderer.lock() {
                        r.user_left(&participant.id);
                    }
                }
            }
        })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = JitsiMeetConfig::docker();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    config
                        .log_level
                        .as_tracing_level()
                        .to_string()
                        .to_lowercase(),
                )
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let server = LoopbackServer::new();
    let renderer = Arc::new(Mutex::new(Renderer::default()));

    let mut jitsi = JitsiMeet::new(
        Arc::new(LoopbackEngine::new(Arc::clone(&server))),
        config.clone(),
    )?;
    let connection_listeners = Listeners::new()
        .on(EventKind::ConnectionEstablished, |_| {
            tracing::info!("Connection established!")
        })
        .on(EventKind::ConnectionFailed, |_| {
            tracing::error!("Connection failed")
        })
        .on(EventKind::ConnectionDisconnected, |_| {
            tracing::info!("Disconnected")
        });
    let session_id = jitsi.connect(Some(connection_listeners)).await?;
    tracing::info!("session {}", session_id);

    jitsi
        .join_conference("TalentedBlocksGetThis", Some(renderer_listeners(&renderer)))
        .await?;
    let local = jitsi.create_local_tracks(None).await?;
    if let Ok(mut r) = renderer.lock() {
        r.show_local_tracks(&local);
    }

    // a second participant publishing a camera and a screen share
    let mut guest = JitsiMeet::new(Arc::new(LoopbackEngine::new(Arc::clone(&server))), config)?;
    guest.set_display_name("guest").await?;
    guest.connect(None).await?;
    let arrived = jitsi.event_bus().wait_for(&[EventKind::TrackAdded]);
    guest.join_conference("talentedblocksgetthis", None).await?;
    guest
        .create_local_tracks(Some(TrackOptions {
            devices: vec![MediaType::Video, MediaType::Desktop],
            ..Default::default()
        }))
        .await?;
    let _ = arrived.await;

    let left = jitsi.event_bus().wait_for(&[EventKind::UserLeft]);
    guest.dispose().await;
    let _ = left.await;

    if let Ok(r) = renderer.lock() {
        tracing::info!("elements still rendered: {:?}", r.elements.keys());
    }
    jitsi.dispose().await;
    server.close();

    Ok(())
}
