#![deny(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! # jitsimeet
//! jitsimeet wraps a Jitsi Meet style conferencing engine with a small lifecycle API: connect, join a conference, publish local tracks, leave, disconnect and dispose. Signaling and media negotiation stay inside the engine, this crate only sequences the engine's signals into `Result`s and keeps track bookkeeping.
//!
//! ## Usage
//! ```no_run
//! use std::sync::Arc;
//! use jitsimeet::{config::JitsiMeetConfig, loopback::{LoopbackEngine, LoopbackServer}, session::JitsiMeet};
//!
//! # async fn run() -> Result<(), jitsimeet::error::Error> {
//! let engine = Arc::new(LoopbackEngine::new(LoopbackServer::new()));
//! let mut jitsi = JitsiMeet::new(engine, JitsiMeetConfig::docker())?;
//! let session_id = jitsi.connect(None).await?;
//! jitsi.join_conference("TalentedBlocksGetThis", None).await?;
//! jitsi.create_local_tracks(None).await?;
//! jitsi.dispose().await;
//! # let _ = session_id;
//! # Ok(())
//! # }
//! ```

/// Presets and options for connections, conferences and local tracks.
pub mod config;
/// Traits the conferencing engine implements.
pub mod engine;
pub mod error;
/// Signals, listener registry and subscription handles.
pub mod event;
/// In-process engine. Sessions on the same [`loopback::LoopbackServer`] meet each other in rooms.
pub mod loopback;
/// [`session::JitsiMeet`], the connection and conference lifecycle.
pub mod session;
pub mod track;
