//! **dashcast** turns live or file-based audio/video into MPEG-DASH: inputs
//! are decoded, rescaled once per output resolution, re-encoded into several
//! representations and packed into timed segments described by an MPD
//! manifest.
//!
//! # Pipeline
//!
//! Every stage runs on its own named thread and talks to its neighbours only
//! through slotted ring buffers (frames) and message queues (events):
//!
//! ```text
//! video-decoder ──► [decoded] ──► video-scaler:WxH ──► [scaled] ──► video-encoder:id ──┐
//! audio-decoder ──► [decoded] ─────────────────────────────────────► audio-encoder:id ──┤
//!                                                                                        ├─► manifest
//!                                                                                        └─► retention
//! ```
//!
//! A decoded frame is shared by every scaler and a scaled frame by every
//! encoder of that resolution; each reads it exactly once. Live modes never
//! block the capture side: when downstream is busy the frame is dropped. On
//! demand, producers wait so that nothing is lost.
//!
//! # Example
//!
//! ```rust,ignore
//! use dashcast::core::context::{DashcastConfig, InputSource, VideoRepresentation};
//! use dashcast::core::scheduler::dash_scheduler::DashScheduler;
//!
//! let config = DashcastConfig::builder()
//!     .video_source(InputSource::new("input.yuv").set_resolution(1280, 720).set_framerate(25))
//!     .video_representation(VideoRepresentation::new("hd").set_resolution(1280, 720))
//!     .video_representation(VideoRepresentation::new("sd").set_resolution(640, 360))
//!     .segment_duration_ms(2000)
//!     .out_dir("output")
//!     .build()?;
//!
//! let backend = dashcast::raw::backend(&config);
//! DashScheduler::new(config, backend).start()?.wait()?;
//! ```
//!
//! Decoding, encoding and container writing sit behind the traits of
//! [`core::media_io`]. The [`raw`] module provides uncompressed file-based
//! implementations; enable the `ffmpeg` feature for FFmpeg-backed inputs.

pub mod core;
pub mod error;
pub mod raw;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_io;

pub use crate::core::context::{
    AudioRepresentation, DashcastConfig, DashcastConfigBuilder, InputSource, VideoRepresentation,
};
pub use crate::core::scheduler::dash_scheduler::DashScheduler;
pub use crate::core::sync::BufferMode;
