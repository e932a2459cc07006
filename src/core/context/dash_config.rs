// src/core/context/dash_config.rs - Validated pipeline configuration
//
// `DashcastConfig::builder()` collects sources, representations and DASH
// timing parameters; `build()` applies mode-dependent defaults and rejects
// inconsistent settings before any thread is started.

use crate::core::context::input_source::InputSource;
use crate::core::context::representation::{AudioRepresentation, VideoRepresentation};
use crate::core::frame::Resolution;
use crate::core::segment::{SegmentPlan, AUDIO_FRAME_SIZE};
use crate::core::source_schedule::ScheduledTask;
use crate::core::sync::BufferMode;
use crate::error::ConfigError;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

pub const DEFAULT_SEGMENT_DURATION_MS: u32 = 1000;
pub const DEFAULT_LIVE_TIME_SHIFT_SECS: u32 = 10;
pub const DEFAULT_MIN_BUFFER_TIME: f32 = 1.0;
pub const DEFAULT_MPD_FILENAME: &str = "dashcast.mpd";
pub const DEFAULT_OUT_DIR: &str = "output";
pub const DEFAULT_BUFFER_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
enum TimeShift {
    ModeDefault,
    Disabled,
    Secs(u32),
}

#[derive(Debug, Clone)]
enum SwitchWindow {
    LocalTimes(String, String),
    Millis(i64, i64),
}

/// Immutable, validated configuration shared by every stage.
#[derive(Debug, Clone)]
pub struct DashcastConfig {
    pub mode: BufferMode,
    pub video_source: Option<InputSource>,
    pub audio_source: Option<InputSource>,
    /// Alternative video inputs, index `i` here is source index `i + 1`.
    pub switch_sources: Vec<InputSource>,
    pub schedule: Vec<ScheduledTask>,
    pub video_representations: Vec<VideoRepresentation>,
    pub audio_representations: Vec<AudioRepresentation>,
    pub segment_duration_ms: u32,
    pub fragment_duration_ms: u32,
    pub out_dir: PathBuf,
    pub mpd_filename: String,
    /// Milliseconds added to (positive) or advertised ahead of (negative) the
    /// availability start time.
    pub ast_offset_ms: i32,
    pub time_shift_secs: Option<u32>,
    pub min_buffer_time: f32,
    pub minimum_update_period_secs: Option<u32>,
    pub base_url: Option<String>,
    pub use_dynamic_ast: bool,
    pub gop_size: Option<u32>,
    pub buffer_len: usize,
}

impl DashcastConfig {
    pub fn builder() -> DashcastConfigBuilder {
        DashcastConfigBuilder::default()
    }

    pub fn is_live(&self) -> bool {
        self.mode.is_live()
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.out_dir.join(&self.mpd_filename)
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn video_plan(&self, representation: &VideoRepresentation) -> SegmentPlan {
        SegmentPlan::video(
            representation.framerate,
            self.segment_duration_ms,
            self.fragment_duration_ms,
        )
    }

    pub fn audio_plan(&self, representation: &AudioRepresentation) -> SegmentPlan {
        SegmentPlan::audio(
            representation.sample_rate,
            AUDIO_FRAME_SIZE,
            self.segment_duration_ms,
            self.fragment_duration_ms,
        )
    }

    /// Distinct output resolutions in ascending order, each with the indices
    /// of the video representations that use it.
    pub fn resolution_groups(&self) -> BTreeMap<Resolution, Vec<usize>> {
        let mut groups: BTreeMap<Resolution, Vec<usize>> = BTreeMap::new();
        for (index, representation) in self.video_representations.iter().enumerate() {
            groups.entry(representation.resolution).or_default().push(index);
        }
        groups
    }
}

#[derive(Debug, Clone)]
pub struct DashcastConfigBuilder {
    mode: BufferMode,
    video_source: Option<InputSource>,
    audio_source: Option<InputSource>,
    switch_sources: Vec<(InputSource, SwitchWindow)>,
    video_representations: Vec<VideoRepresentation>,
    audio_representations: Vec<AudioRepresentation>,
    segment_duration_ms: u32,
    fragment_duration_ms: Option<u32>,
    out_dir: PathBuf,
    mpd_filename: String,
    ast_offset_ms: i32,
    time_shift: TimeShift,
    min_buffer_time: f32,
    minimum_update_period_secs: Option<u32>,
    base_url: Option<String>,
    use_dynamic_ast: bool,
    no_loop: bool,
    gop_size: Option<u32>,
    buffer_len: usize,
}

impl Default for DashcastConfigBuilder {
    fn default() -> Self {
        Self {
            mode: BufferMode::OnDemand,
            video_source: None,
            audio_source: None,
            switch_sources: Vec::new(),
            video_representations: Vec::new(),
            audio_representations: Vec::new(),
            segment_duration_ms: DEFAULT_SEGMENT_DURATION_MS,
            fragment_duration_ms: None,
            out_dir: PathBuf::from(DEFAULT_OUT_DIR),
            mpd_filename: DEFAULT_MPD_FILENAME.to_string(),
            ast_offset_ms: 0,
            time_shift: TimeShift::ModeDefault,
            min_buffer_time: DEFAULT_MIN_BUFFER_TIME,
            minimum_update_period_secs: None,
            base_url: None,
            use_dynamic_ast: false,
            no_loop: false,
            gop_size: None,
            buffer_len: DEFAULT_BUFFER_LEN,
        }
    }
}

impl DashcastConfigBuilder {
    pub fn mode(mut self, mode: BufferMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn video_source(mut self, source: impl Into<InputSource>) -> Self {
        self.video_source = Some(source.into());
        self
    }

    pub fn audio_source(mut self, source: impl Into<InputSource>) -> Self {
        self.audio_source = Some(source.into());
        self
    }

    /// Adds an alternative video input active during `[start, end)`, both
    /// given as local `YYYY-MM-DD HH:MM:SS` times.
    pub fn switch_source(mut self, source: impl Into<InputSource>, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.switch_sources
            .push((source.into(), SwitchWindow::LocalTimes(start.into(), end.into())));
        self
    }

    /// Same as [`switch_source`](Self::switch_source) with a window in epoch milliseconds.
    pub fn switch_source_millis(mut self, source: impl Into<InputSource>, start_ms: i64, end_ms: i64) -> Self {
        self.switch_sources
            .push((source.into(), SwitchWindow::Millis(start_ms, end_ms)));
        self
    }

    pub fn video_representation(mut self, representation: VideoRepresentation) -> Self {
        self.video_representations.push(representation);
        self
    }

    pub fn audio_representation(mut self, representation: AudioRepresentation) -> Self {
        self.audio_representations.push(representation);
        self
    }

    pub fn segment_duration_ms(mut self, duration: u32) -> Self {
        self.segment_duration_ms = duration;
        self
    }

    /// Defaults to the segment duration.
    pub fn fragment_duration_ms(mut self, duration: u32) -> Self {
        self.fragment_duration_ms = Some(duration);
        self
    }

    pub fn out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.out_dir = dir.into();
        self
    }

    pub fn mpd_filename(mut self, name: impl Into<String>) -> Self {
        self.mpd_filename = name.into();
        self
    }

    pub fn ast_offset_ms(mut self, offset: i32) -> Self {
        self.ast_offset_ms = offset;
        self
    }

    /// Keeps only the last `secs` seconds of segments on disk.
    /// Live modes default to 10 seconds, on-demand keeps everything.
    pub fn time_shift_secs(mut self, secs: u32) -> Self {
        self.time_shift = if secs == 0 {
            TimeShift::Disabled
        } else {
            TimeShift::Secs(secs)
        };
        self
    }

    pub fn disable_time_shift(mut self) -> Self {
        self.time_shift = TimeShift::Disabled;
        self
    }

    pub fn min_buffer_time(mut self, secs: f32) -> Self {
        self.min_buffer_time = secs;
        self
    }

    pub fn minimum_update_period_secs(mut self, secs: u32) -> Self {
        self.minimum_update_period_secs = Some(secs);
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Re-anchor the availability start time on every segment.
    pub fn dynamic_ast(mut self, enabled: bool) -> Self {
        self.use_dynamic_ast = enabled;
        self
    }

    /// Live media inputs are looped unless this is set.
    pub fn no_loop(mut self, no_loop: bool) -> Self {
        self.no_loop = no_loop;
        self
    }

    pub fn gop_size(mut self, frames: u32) -> Self {
        self.gop_size = Some(frames);
        self
    }

    pub fn buffer_len(mut self, len: usize) -> Self {
        self.buffer_len = len;
        self
    }

    pub fn build(self) -> Result<DashcastConfig, ConfigError> {
        if self.video_source.is_none() && self.audio_source.is_none() {
            return Err(ConfigError::NoSource);
        }
        if self.segment_duration_ms == 0 {
            return Err(ConfigError::ZeroSegmentDuration);
        }
        let fragment_duration_ms = self.fragment_duration_ms.unwrap_or(self.segment_duration_ms);
        if fragment_duration_ms == 0 || fragment_duration_ms > self.segment_duration_ms {
            return Err(ConfigError::FragmentLongerThanSegment {
                fragment_ms: fragment_duration_ms,
                segment_ms: self.segment_duration_ms,
            });
        }
        if self.buffer_len == 0 {
            return Err(ConfigError::ZeroBufferLength);
        }
        if self.video_source.is_none() && !self.video_representations.is_empty() {
            return Err(ConfigError::MissingSource("video"));
        }
        if self.audio_source.is_none() && !self.audio_representations.is_empty() {
            return Err(ConfigError::MissingSource("audio"));
        }

        let mut video_representations = self.video_representations;
        if self.video_source.is_some() && video_representations.is_empty() {
            video_representations.push(VideoRepresentation::new("video"));
        }
        let mut audio_representations = self.audio_representations;
        if self.audio_source.is_some() && audio_representations.is_empty() {
            audio_representations.push(AudioRepresentation::new("audio"));
        }

        let mut ids = HashSet::new();
        for representation in &video_representations {
            representation.validate()?;
            if !ids.insert(representation.id.clone()) {
                return Err(ConfigError::DuplicateRepresentation(representation.id.clone()));
            }
        }
        for representation in &audio_representations {
            representation.validate(AUDIO_FRAME_SIZE)?;
            if !ids.insert(representation.id.clone()) {
                return Err(ConfigError::DuplicateRepresentation(representation.id.clone()));
            }
        }

        let loop_input = self.mode == BufferMode::LiveMedia && !self.no_loop;
        let video_source = self.video_source.map(|s| s.set_loop(loop_input));
        let audio_source = self.audio_source.map(|s| s.set_loop(loop_input));

        let mut switch_sources = Vec::with_capacity(self.switch_sources.len());
        let mut schedule = Vec::with_capacity(self.switch_sources.len());
        for (position, (source, window)) in self.switch_sources.into_iter().enumerate() {
            let source_index = position + 1;
            let task = match window {
                SwitchWindow::LocalTimes(start, end) => {
                    ScheduledTask::from_local_times(source_index, &start, &end)?
                }
                SwitchWindow::Millis(start, end) if end > start => {
                    ScheduledTask::new(source_index, start, end)
                }
                SwitchWindow::Millis(start, end) => {
                    return Err(ConfigError::InvalidSwitchWindow(format!("{start} .. {end}")));
                }
            };
            switch_sources.push(source.set_loop(loop_input));
            schedule.push(task);
        }
        if video_source.is_none() && !switch_sources.is_empty() {
            return Err(ConfigError::MissingSource("video"));
        }

        let time_shift_secs = match self.time_shift {
            TimeShift::ModeDefault if self.mode.is_live() => Some(DEFAULT_LIVE_TIME_SHIFT_SECS),
            TimeShift::ModeDefault | TimeShift::Disabled => None,
            TimeShift::Secs(secs) => Some(secs),
        };

        Ok(DashcastConfig {
            mode: self.mode,
            video_source,
            audio_source,
            switch_sources,
            schedule,
            video_representations,
            audio_representations,
            segment_duration_ms: self.segment_duration_ms,
            fragment_duration_ms,
            out_dir: self.out_dir,
            mpd_filename: self.mpd_filename,
            ast_offset_ms: self.ast_offset_ms,
            time_shift_secs,
            min_buffer_time: self.min_buffer_time,
            minimum_update_period_secs: self.minimum_update_period_secs,
            base_url: self.base_url,
            use_dynamic_ast: self.use_dynamic_ast,
            gop_size: self.gop_size,
            buffer_len: self.buffer_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DashcastConfig::builder()
            .video_source("in.yuv")
            .build()
            .unwrap();
        assert_eq!(config.mode, BufferMode::OnDemand);
        assert_eq!(config.segment_duration_ms, 1000);
        assert_eq!(config.fragment_duration_ms, 1000);
        assert_eq!(config.time_shift_secs, None);
        assert_eq!(config.manifest_path(), PathBuf::from("output/dashcast.mpd"));
        assert_eq!(config.video_representations.len(), 1);
        assert_eq!(config.video_representations[0].framerate, 25);
        assert!(config.audio_representations.is_empty());
        assert!(!config.video_source.unwrap().loop_input);
    }

    #[test]
    fn test_live_defaults() {
        let config = DashcastConfig::builder()
            .mode(BufferMode::LiveMedia)
            .audio_source("in.pcm")
            .build()
            .unwrap();
        assert_eq!(config.time_shift_secs, Some(10));
        assert!(config.audio_source.as_ref().unwrap().loop_input);
        assert_eq!(config.audio_representations[0].sample_rate, 44100);

        let config = DashcastConfig::builder()
            .mode(BufferMode::LiveCamera)
            .video_source("/dev/video0")
            .disable_time_shift()
            .build()
            .unwrap();
        assert_eq!(config.time_shift_secs, None);
    }

    #[test]
    fn test_rejects_inconsistent_settings() {
        assert!(matches!(
            DashcastConfig::builder().build(),
            Err(ConfigError::NoSource)
        ));
        assert!(matches!(
            DashcastConfig::builder()
                .video_source("a")
                .segment_duration_ms(1000)
                .fragment_duration_ms(2000)
                .build(),
            Err(ConfigError::FragmentLongerThanSegment { .. })
        ));
        assert!(matches!(
            DashcastConfig::builder()
                .video_source("a")
                .video_representation(VideoRepresentation::new("v"))
                .video_representation(VideoRepresentation::new("v"))
                .build(),
            Err(ConfigError::DuplicateRepresentation(id)) if id == "v"
        ));
        assert!(matches!(
            DashcastConfig::builder()
                .video_source("a")
                .audio_representation(AudioRepresentation::new("a1"))
                .build(),
            Err(ConfigError::MissingSource("audio"))
        ));
        assert!(matches!(
            DashcastConfig::builder()
                .video_source("a")
                .video_representation(VideoRepresentation::new("v").set_framerate(0))
                .build(),
            Err(ConfigError::InvalidRepresentation { .. })
        ));
    }

    #[test]
    fn test_resolution_groups_and_schedule() {
        let config = DashcastConfig::builder()
            .video_source("main")
            .switch_source_millis("backup", 100, 200)
            .video_representation(VideoRepresentation::new("hd").set_resolution(1280, 720))
            .video_representation(VideoRepresentation::new("sd").set_resolution(640, 360))
            .video_representation(VideoRepresentation::new("sd-low").set_resolution(640, 360).set_bitrate(200_000))
            .build()
            .unwrap();

        let groups = config.resolution_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&Resolution::new(640, 360)], vec![1, 2]);
        assert_eq!(groups[&Resolution::new(1280, 720)], vec![0]);

        assert_eq!(config.switch_sources[0].url, "backup");
        assert_eq!(config.schedule, vec![ScheduledTask::new(1, 100, 200)]);
    }
}
