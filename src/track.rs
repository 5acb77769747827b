use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use derivative::Derivative;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use webrtc::{
    api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8},
    media::Sample,
    rtp_transceiver::rtp_codec::RTCRtpCodecCapability,
    track::track_local::track_local_static_sample::TrackLocalStaticSample,
};

use crate::error::{Error, TrackErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Video,
    /// Screen share. Rendered like video.
    Desktop,
}

impl MediaType {
    pub fn codec_capability(&self) -> RTCRtpCodecCapability {
        match self {
            MediaType::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                rtcp_feedback: vec![],
            },
            MediaType::Video | MediaType::Desktop => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: "".to_owned(),
                rtcp_feedback: vec![],
            },
        }
    }
}

#[derive(Debug, Default)]
struct TrackState {
    muted: bool,
    sinks: HashSet<String>,
    disposed: bool,
}

/// A local or remote media track. Clones share the same underlying state.
#[derive(Derivative)]
#[derivative(Clone, Debug)]
pub struct Track {
    pub id: String,
    pub media_type: MediaType,
    pub label: String,
    participant_id: Option<String>,
    #[derivative(Debug = "ignore")]
    sample_track: Option<Arc<TrackLocalStaticSample>>,
    state: Arc<Mutex<TrackState>>,
}

impl Track {
    /// Creates a local track backed by a [`TrackLocalStaticSample`].
    pub fn new_local(media_type: MediaType, device_id: Option<String>) -> Self {
        let id = Uuid::new_v4().to_string();
        let label =
            device_id.unwrap_or_else(|| format!("default {:?}", media_type).to_lowercase());
        let sample_track = TrackLocalStaticSample::new(
            media_type.codec_capability(),
            id.clone(),
            format!("local-{}", id),
        );

        Self {
            id,
            media_type,
            label,
            participant_id: None,
            sample_track: Some(Arc::new(sample_track)),
            state: Arc::new(Mutex::new(TrackState::default())),
        }
    }

    pub fn new_remote(
        id: String,
        media_type: MediaType,
        participant_id: String,
        label: String,
    ) -> Self {
        Self {
            id,
            media_type,
            label,
            participant_id: Some(participant_id),
            sample_track: None,
            state: Arc::new(Mutex::new(TrackState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, TrackState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_local(&self) -> bool {
        self.participant_id.is_none()
    }

    pub fn participant_id(&self) -> Option<&str> {
        self.participant_id.as_deref()
    }

    pub fn sample_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.sample_track.clone()
    }

    pub fn is_muted(&self) -> bool {
        self.state().muted
    }

    pub fn set_muted(&self, muted: bool) {
        self.state().muted = muted;
    }

    pub fn is_disposed(&self) -> bool {
        self.state().disposed
    }

    pub fn sinks(&self) -> Vec<String> {
        self.state().sinks.iter().cloned().collect()
    }

    /// Binds the track to a renderer sink, e.g. an audio or video element id.
    pub fn attach(&self, sink: &str) -> Result<(), Error> {
        let mut state = self.state();
        if state.disposed {
            return Err(Error::new_track(
                format!("Track {} is disposed", self.id),
                TrackErrorKind::AlreadyDisposed,
            ));
        }
        state.sinks.insert(sink.to_string());
        Ok(())
    }

    pub fn detach(&self, sink: &str) -> Result<(), Error> {
        if !self.state().sinks.remove(sink) {
            return Err(Error::new_track(
                format!("Track {} is not attached to {}", self.id, sink),
                TrackErrorKind::NotAttached,
            ));
        }
        Ok(())
    }

    /// Detaches every sink and returns them.
    pub fn detach_all(&self) -> Vec<String> {
        self.state().sinks.drain().collect()
    }

    pub fn dispose(&self) -> Result<(), Error> {
        let mut state = self.state();
        if state.disposed {
            return Err(Error::new_track(
                format!("Track {} is already disposed", self.id),
                TrackErrorKind::AlreadyDisposed,
            ));
        }
        state.sinks.clear();
        state.disposed = true;
        tracing::debug!("Track {} is disposed", self.id);
        Ok(())
    }

    /// Feeds media into a local track. Remote tracks and disposed tracks are rejected.
    pub async fn write_sample(&self, sample: &Sample) -> Result<(), Error> {
        if self.is_disposed() {
            return Err(Error::new_track(
                format!("Track {} is disposed", self.id),
                TrackErrorKind::AlreadyDisposed,
            ));
        }
        match &self.sample_track {
            Some(track) => {
                track.write_sample(sample).await?;
                Ok(())
            }
            None => Err(Error::new_track(
                format!("Track {} is a remote track", self.id),
                TrackErrorKind::NotAttached,
            )),
        }
    }
}

/// Remote tracks grouped by participant, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct RemoteTracks {
    tracks: HashMap<String, Vec<Track>>,
}

impl RemoteTracks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, track: Track) -> usize {
        let participant_id = track.participant_id().unwrap_or_default().to_string();
        let list = self.tracks.entry(participant_id).or_default();
        list.push(track);
        list.len()
    }

    pub fn get(&self, participant_id: &str) -> &[Track] {
        self.tracks
            .get(participant_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn remove(&mut self, participant_id: &str, track_id: &str) -> Option<Track> {
        let list = self.tracks.get_mut(participant_id)?;
        let index = list.iter().position(|t| t.id == track_id)?;
        let track = list.remove(index);
        if list.is_empty() {
            self.tracks.remove(participant_id);
        }
        Some(track)
    }

    pub fn take_participant(&mut self, participant_id: &str) -> Vec<Track> {
        self.tracks.remove(participant_id).unwrap_or_default()
    }

    pub fn drain(&mut self) -> Vec<Track> {
        self.tracks.drain().flat_map(|(_, v)| v).collect()
    }

    pub fn participant_ids(&self) -> Vec<String> {
        self.tracks.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_local_track_codec() {
        let audio = Track::new_local(MediaType::Audio, None);
        let video = Track::new_local(MediaType::Desktop, Some("screen-0".to_string()));
        assert!(audio.is_local());
        assert_eq!(
            audio.sample_track().unwrap().codec().mime_type,
            MIME_TYPE_OPUS
        );
        assert_eq!(
            video.sample_track().unwrap().codec().mime_type,
            MIME_TYPE_VP8
        );
        assert_eq!(video.label, "screen-0");
        assert_eq!(audio.label, "default audio");
    }

    #[test]
    fn test_attach_detach_dispose() {
        let track = Track::new_remote(
            "t1".to_string(),
            MediaType::Video,
            "p1".to_string(),
            "camera".to_string(),
        );
        track.attach("video.userp1").unwrap();
        assert_eq!(track.sinks(), vec!["video.userp1".to_string()]);
        track.detach("video.userp1").unwrap();
        let err = track.detach("video.userp1").unwrap_err();
        assert_eq!(err.track_kind(), Some(TrackErrorKind::NotAttached));

        track.attach("video.userp1").unwrap();
        track.dispose().unwrap();
        assert!(track.is_disposed());
        assert!(track.sinks().is_empty());
        let err = track.dispose().unwrap_err();
        assert_eq!(err.track_kind(), Some(TrackErrorKind::AlreadyDisposed));
        assert!(track.attach("video.userp1").is_err());
    }

    #[test]
    fn test_clones_share_state() {
        let track = Track::new_local(MediaType::Video, None);
        let copied = track.clone();
        copied.set_muted(true);
        copied.dispose().unwrap();
        assert!(track.is_muted());
        assert!(track.is_disposed());
    }

    #[test]
    fn test_remote_tracks_accumulate() {
        let mut tracks = RemoteTracks::new();
        let a = Track::new_remote("a".into(), MediaType::Audio, "p1".into(), "mic".into());
        assert_eq!(tracks.push(a.clone()), 1);
        // same track pushed twice is kept twice
        assert_eq!(tracks.push(a), 2);
        let b = Track::new_remote("b".into(), MediaType::Video, "p2".into(), "cam".into());
        tracks.push(b);
        assert_eq!(tracks.len(), 3);

        assert!(tracks.remove("p2", "b").is_some());
        assert!(tracks.get("p2").is_empty());
        assert!(tracks.remove("p2", "b").is_none());

        let taken = tracks.take_participant("p1");
        assert_eq!(taken.len(), 2);
        assert!(tracks.is_empty());
    }

    #[tokio::test]
    async fn test_write_sample() {
        let local = Track::new_local(MediaType::Audio, None);
        let sample = Sample {
            data: bytes::Bytes::from_static(&[0u8; 160]),
            duration: std::time::Duration::from_millis(20),
            ..Default::default()
        };
        local.write_sample(&sample).await.unwrap();

        let remote = Track::new_remote("r".into(), MediaType::Audio, "p".into(), "mic".into());
        assert!(remote.write_sample(&sample).await.is_err());

        local.dispose().unwrap();
        let err = local.write_sample(&sample).await.unwrap_err();
        assert_eq!(err.track_kind(), Some(TrackErrorKind::AlreadyDisposed));
    }
}
