// src/core/scheduler/dash_scheduler.rs - Pipeline controller
//
// Wires decoders, scalers, encoders, the manifest stage, the retention stage
// and the interactive quit stage together with ring buffers and message
// queues, starts them leaves first and joins them in data-flow order.
//
// Every stage ends its own output when its input ends, so stopping the
// decoders is enough to drain the whole graph.

use crate::core::context::DashcastConfig;
use crate::core::frame::{AudioFrame, Resolution, VideoFrame};
use crate::core::manifest::{ManifestEvent, ManifestWriter};
use crate::core::media_io::{Clock, FrameScaler, FrameSource, MediaBackend};
use crate::core::scheduler::decode_task::{decode_init, DecoderParameter};
use crate::core::scheduler::encode_task::{encode_init, EncoderParameter, EncoderQueues, OutputOpen};
use crate::core::scheduler::manifest_task::{manifest_init, ManifestParameter};
use crate::core::scheduler::quit_task::{quit_init, QuitSource};
use crate::core::scheduler::retention_task::retention_init;
use crate::core::scheduler::scale_task::scale_init;
use crate::core::scheduler::{StageKind, StageState, StageStatus};
use crate::core::segment::AUDIO_FRAME_SIZE;
use crate::core::sync::{BufferMode, MessageQueue, RingBuffer, ShutdownToken};
use crate::error::{Error, OpenError};
use log::{debug, error, info, warn};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub struct Initialization;
pub struct Running;

const STATUS_INIT: usize = 0;
const STATUS_RUN: usize = 1;
const STATUS_END: usize = 2;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

struct Stage {
    kind: StageKind,
    name: String,
    status: StageStatus,
    handle: Option<JoinHandle<crate::error::Result<()>>>,
    result: Option<crate::error::Result<()>>,
}

/// Buffers and queues shared by the stages of one run.
#[derive(Default)]
struct Plumbing {
    video_input: Option<Arc<RingBuffer<VideoFrame>>>,
    scaled: Vec<Arc<RingBuffer<VideoFrame>>>,
    audio_input: Option<Arc<RingBuffer<AudioFrame>>>,
    events: Arc<MessageQueue<ManifestEvent>>,
    deletions: Option<Arc<MessageQueue<PathBuf>>>,
}

impl Plumbing {
    /// Ends every buffer and closes every queue so no stage can stay blocked.
    fn abort(&self) {
        for buffer in self.video_input.iter().chain(self.scaled.iter()) {
            buffer.abort();
        }
        if let Some(buffer) = &self.audio_input {
            buffer.abort();
        }
        self.events.close();
        if let Some(deletions) = &self.deletions {
            deletions.close();
        }
    }
}

/// Runs one DASH encoding pipeline.
///
/// ```rust,ignore
/// let config = DashcastConfig::builder()
///     .video_source(InputSource::new("camera.yuv").set_resolution(640, 480).set_framerate(25))
///     .video_representation(VideoRepresentation::new("v1").set_resolution(320, 240))
///     .build()?;
/// let backend = dashcast::raw::backend(&config);
/// DashScheduler::new(config, backend).start()?.wait()?;
/// ```
pub struct DashScheduler<S> {
    config: Arc<DashcastConfig>,
    backend: Option<MediaBackend>,
    quit_source: Option<Box<dyn QuitSource>>,
    shutdown: ShutdownToken,
    status: Arc<AtomicUsize>,
    stages: Vec<Stage>,
    plumbing: Plumbing,
    state: PhantomData<S>,
}

impl<S> DashScheduler<S> {
    fn into_state<T>(self) -> DashScheduler<T> {
        DashScheduler {
            config: self.config,
            backend: self.backend,
            quit_source: self.quit_source,
            shutdown: self.shutdown,
            status: self.status,
            stages: self.stages,
            plumbing: self.plumbing,
            state: PhantomData,
        }
    }

    /// Token observed by every stage. Cancelling it stops the pipeline.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    pub fn is_ended(&self) -> bool {
        self.status.load(Ordering::Acquire) == STATUS_END
    }
}

impl DashScheduler<Initialization> {
    pub fn new(config: DashcastConfig, backend: MediaBackend) -> Self {
        Self {
            config: Arc::new(config),
            backend: Some(backend),
            quit_source: None,
            shutdown: ShutdownToken::new(),
            status: Arc::new(AtomicUsize::new(STATUS_INIT)),
            stages: Vec::new(),
            plumbing: Plumbing::default(),
            state: PhantomData,
        }
    }

    /// Adds an interactive quit stage fed by `source`.
    pub fn set_quit_source(mut self, source: impl QuitSource + 'static) -> Self {
        self.quit_source = Some(Box::new(source));
        self
    }

    /// Opens every input and scaler, then spawns the stages.
    ///
    /// Open failures are reported here and nothing is left running.
    pub fn start(mut self) -> crate::error::Result<DashScheduler<Running>> {
        let Some(backend) = self.backend.take() else {
            return Err(OpenError::Output {
                id: "pipeline".to_string(),
                reason: "media backend already consumed".to_string(),
            }
            .into());
        };
        let config = self.config.clone();

        std::fs::create_dir_all(&config.out_dir).map_err(OpenError::OutputDirectory)?;

        // Inputs and scalers are opened before any thread exists.
        let video_sources = match &config.video_source {
            Some(primary) => {
                let mut sources = vec![backend.sources.open_video(primary)?];
                for switch in &config.switch_sources {
                    sources.push(backend.sources.open_video(switch)?);
                }
                info!("Video input opened: {} ({} switch sources)", primary.url, config.switch_sources.len());
                sources
            }
            None => Vec::new(),
        };
        let audio_source = match &config.audio_source {
            Some(source) => {
                let opened = backend.sources.open_audio(source)?;
                info!("Audio input opened: {}", source.url);
                Some(opened)
            }
            None => None,
        };
        let mut scalers = Vec::new();
        if !video_sources.is_empty() {
            for (resolution, members) in config.resolution_groups() {
                scalers.push((resolution, members, backend.scalers.create(resolution)?));
            }
        }

        self.status.store(STATUS_RUN, Ordering::Release);
        let spawned = self.spawn_stages(backend, video_sources, audio_source, scalers);
        if let Err(e) = spawned {
            error!("Pipeline start failed: {e}");
            self.shutdown.cancel();
            self.plumbing.abort();
            for stage in self.stages.iter_mut() {
                if let Some(handle) = stage.handle.take() {
                    let _ = handle.join();
                }
            }
            self.status.store(STATUS_END, Ordering::Release);
            return Err(e);
        }

        info!("Pipeline started with {} stages.", self.stages.len());
        Ok(self.into_state())
    }

    fn spawn_stages(
        &mut self,
        backend: MediaBackend,
        video_sources: Vec<Box<dyn FrameSource<VideoFrame>>>,
        audio_source: Option<Box<dyn FrameSource<AudioFrame>>>,
        scalers: Vec<(Resolution, Vec<usize>, Box<dyn FrameScaler>)>,
    ) -> crate::error::Result<()> {
        let config = self.config.clone();
        let MediaBackend {
            sources: _,
            scalers: _,
            outputs,
            manifest,
            clock,
        } = backend;
        let mode = config.mode;
        let buffer_len = config.buffer_len;

        self.plumbing.events = Arc::new(MessageQueue::new());
        if config.is_live() && config.time_shift_secs.is_some() {
            self.plumbing.deletions = Some(Arc::new(MessageQueue::new()));
        }

        // Buffers are fully built before the first thread starts.
        if !video_sources.is_empty() {
            self.plumbing.video_input = Some(Arc::new(RingBuffer::new(
                buffer_len,
                mode,
                scalers.len(),
                VideoFrame::default,
            )));
            for (_, members, _) in &scalers {
                self.plumbing.scaled.push(Arc::new(RingBuffer::new(
                    buffer_len,
                    mode,
                    members.len(),
                    VideoFrame::default,
                )));
            }
        }
        if audio_source.is_some() {
            self.plumbing.audio_input = Some(Arc::new(RingBuffer::new(
                buffer_len,
                mode,
                config.audio_representations.len(),
                AudioFrame::default,
            )));
        }

        // Decoders.
        if let Some(input) = self.plumbing.video_input.clone() {
            let framerate = video_sources[0]
                .framerate()
                .or(config.video_source.as_ref().and_then(|s| s.framerate))
                .or(config.video_representations.first().map(|r| r.framerate))
                .unwrap_or(25)
                .max(1);
            let parameter = DecoderParameter {
                name: "video-decoder".to_string(),
                sources: video_sources,
                schedule: config.schedule.clone(),
                pace: pace(mode, Duration::from_secs(1) / framerate),
            };
            let status = StageStatus::new();
            let handle = decode_init(parameter, input, clock.clone(), self.shutdown.clone(), status.clone());
            self.register(StageKind::Decoder, "video-decoder", status, handle)?;
        }
        if let (Some(source), Some(input)) = (audio_source, self.plumbing.audio_input.clone()) {
            let sample_rate = config
                .audio_source
                .as_ref()
                .and_then(|s| s.sample_rate)
                .or(config.audio_representations.first().map(|r| r.sample_rate))
                .unwrap_or(44100)
                .max(1);
            let parameter = DecoderParameter {
                name: "audio-decoder".to_string(),
                sources: vec![source],
                schedule: Vec::new(),
                pace: pace(
                    mode,
                    Duration::from_secs(AUDIO_FRAME_SIZE as u64) / sample_rate,
                ),
            };
            let status = StageStatus::new();
            let handle = decode_init(parameter, input, clock.clone(), self.shutdown.clone(), status.clone());
            self.register(StageKind::Decoder, "audio-decoder", status, handle)?;
        }

        // Scalers, one per distinct output resolution.
        let mut group_of = vec![0usize; config.video_representations.len()];
        if let Some(input) = self.plumbing.video_input.clone() {
            for (group, (resolution, members, scaler)) in scalers.into_iter().enumerate() {
                for member in members {
                    group_of[member] = group;
                }
                let status = StageStatus::new();
                let output = self.plumbing.scaled[group].clone();
                let handle = scale_init(resolution, scaler, input.clone(), output, status.clone());
                self.register(StageKind::Scaler, &format!("video-scaler:{resolution}"), status, handle)?;
            }
        }

        // Encoders, one per representation.
        if !self.plumbing.scaled.is_empty() {
            for (index, representation) in config.video_representations.iter().enumerate() {
                let name = format!("video-encoder:{}", representation.id);
                let plan = config.video_plan(representation);
                let open: OutputOpen<VideoFrame> = {
                    let outputs = outputs.clone();
                    let representation = representation.clone();
                    let out_dir = config.out_dir.clone();
                    Box::new(move || outputs.open_video(&representation, &plan, &out_dir))
                };
                let status = StageStatus::new();
                let handle = encode_init(
                    self.encoder_parameter(&name, &representation.id, plan),
                    open,
                    self.plumbing.scaled[group_of[index]].clone(),
                    self.encoder_queues(),
                    clock.clone(),
                    self.shutdown.clone(),
                    status.clone(),
                );
                self.register(StageKind::Encoder, &name, status, handle)?;
            }
        }
        if let Some(input) = self.plumbing.audio_input.clone() {
            for representation in &config.audio_representations {
                let name = format!("audio-encoder:{}", representation.id);
                let plan = config.audio_plan(representation);
                let open: OutputOpen<AudioFrame> = {
                    let outputs = outputs.clone();
                    let representation = representation.clone();
                    let out_dir = config.out_dir.clone();
                    Box::new(move || outputs.open_audio(&representation, &plan, &out_dir))
                };
                let status = StageStatus::new();
                let handle = encode_init(
                    self.encoder_parameter(&name, &representation.id, plan),
                    open,
                    input.clone(),
                    self.encoder_queues(),
                    clock.clone(),
                    self.shutdown.clone(),
                    status.clone(),
                );
                self.register(StageKind::Encoder, &name, status, handle)?;
            }
        }

        self.spawn_manifest(manifest, clock)?;

        if let Some(deletions) = self.plumbing.deletions.clone() {
            let status = StageStatus::new();
            let handle = retention_init(deletions, status.clone());
            self.register(StageKind::Retention, "retention", status, handle)?;
        }

        if let Some(source) = self.quit_source.take() {
            let status = StageStatus::new();
            let handle = quit_init(source, self.shutdown.clone(), status.clone());
            self.register(StageKind::Quit, "quit", status, handle)?;
        }
        Ok(())
    }

    fn spawn_manifest(&mut self, writer: Box<dyn ManifestWriter>, clock: Arc<dyn Clock>) -> crate::error::Result<()> {
        let config = &self.config;
        let primary_representation = config
            .video_representations
            .first()
            .filter(|_| config.video_source.is_some())
            .map(|r| r.id.clone())
            .or_else(|| config.audio_representations.first().map(|r| r.id.clone()))
            .unwrap_or_default();
        let video_count = if config.video_source.is_some() {
            config.video_representations.len()
        } else {
            0
        };
        let audio_count = if config.audio_source.is_some() {
            config.audio_representations.len()
        } else {
            0
        };
        let parameter = ManifestParameter {
            live: config.is_live(),
            primary_representation,
            representations: video_count + audio_count,
            ast_offset_ms: config.ast_offset_ms,
            use_dynamic_ast: config.use_dynamic_ast,
        };

        let status = StageStatus::new();
        let handle = manifest_init(
            parameter,
            writer,
            self.plumbing.events.clone(),
            clock,
            self.shutdown.clone(),
            status.clone(),
        );
        self.register(StageKind::Manifest, "manifest", status, handle)
    }

    fn encoder_parameter(&self, name: &str, representation_id: &str, plan: crate::core::segment::SegmentPlan) -> EncoderParameter {
        EncoderParameter {
            name: name.to_string(),
            representation_id: representation_id.to_string(),
            plan,
            out_dir: self.config.out_dir.clone(),
            live: self.config.is_live(),
            time_shift_secs: self.config.time_shift_secs,
            segment_duration_ms: self.config.segment_duration_ms,
        }
    }

    fn encoder_queues(&self) -> EncoderQueues {
        EncoderQueues {
            events: self.plumbing.events.clone(),
            deletions: self.plumbing.deletions.clone(),
        }
    }

    fn register(
        &mut self,
        kind: StageKind,
        name: &str,
        status: StageStatus,
        handle: std::io::Result<JoinHandle<crate::error::Result<()>>>,
    ) -> crate::error::Result<()> {
        let handle = handle.map_err(|source| Error::ThreadSpawn {
            name: name.to_string(),
            source,
        })?;
        debug!("Stage {kind} started: {name}");
        self.stages.push(Stage {
            kind,
            name: name.to_string(),
            status,
            handle: Some(handle),
            result: None,
        });
        Ok(())
    }
}

fn pace(mode: BufferMode, interval: Duration) -> Option<Duration> {
    (mode == BufferMode::LiveMedia).then_some(interval)
}

impl DashScheduler<Running> {
    /// Asks every stage to finish. Returns immediately; use
    /// [`wait`](DashScheduler<Running>::wait) to join.
    pub fn stop(&self) {
        if self.shutdown.cancel() {
            info!("Pipeline stop requested.");
        }
    }

    /// Name, kind and current state of every stage.
    pub fn stage_states(&self) -> Vec<(String, StageKind, StageState)> {
        self.stages
            .iter()
            .map(|stage| (stage.name.clone(), stage.kind, stage.status.get()))
            .collect()
    }

    /// Joins every stage in data-flow order and returns the first failure.
    ///
    /// A panicking stage aborts every buffer so the remaining stages drain.
    pub fn wait(mut self) -> crate::error::Result<()> {
        let mut kinds: Vec<StageKind> = self.stages.iter().map(|s| s.kind).collect();
        kinds.sort();
        kinds.dedup();

        for kind in kinds {
            match kind {
                StageKind::Manifest => self.plumbing.events.close(),
                StageKind::Retention => {
                    if let Some(deletions) = &self.plumbing.deletions {
                        deletions.close();
                    }
                }
                StageKind::Quit => {
                    self.shutdown.cancel();
                }
                _ => {}
            }
            self.join_kind(kind);
        }

        self.plumbing.events.flush();
        if let Some(deletions) = &self.plumbing.deletions {
            deletions.flush();
        }
        self.status.store(STATUS_END, Ordering::Release);

        let mut first_error = None;
        for stage in self.stages.iter_mut() {
            if let Some(Err(e)) = stage.result.take() {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => {
                error!("Pipeline finished with error: {e}");
                Err(e)
            }
            None => {
                info!("Pipeline finished.");
                Ok(())
            }
        }
    }

    /// Blocks until every stage of `kind` has exited, reaping any other stage
    /// that exits meanwhile.
    fn join_kind(&mut self, kind: StageKind) {
        loop {
            let mut pending = false;
            for index in 0..self.stages.len() {
                let finished = match &self.stages[index].handle {
                    Some(handle) => handle.is_finished(),
                    None => continue,
                };
                if finished {
                    self.reap(index);
                } else if self.stages[index].kind == kind {
                    pending = true;
                }
            }
            if !pending {
                return;
            }
            std::thread::sleep(JOIN_POLL_INTERVAL);
        }
    }

    fn reap(&mut self, index: usize) {
        let stage = &mut self.stages[index];
        let Some(handle) = stage.handle.take() else {
            return;
        };
        let result = match handle.join() {
            Ok(Ok(())) => {
                debug!("Stage {} joined: {}", stage.kind, stage.name);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("Stage {} exited with error: {e}", stage.name);
                Err(e)
            }
            Err(_) => {
                error!("Stage {} panicked, aborting the pipeline.", stage.name);
                stage.status.set(StageState::Stopped);
                Err(Error::StagePanicked(stage.name.clone()))
            }
        };
        let panicked = matches!(result, Err(Error::StagePanicked(_)));
        stage.result = Some(result);
        if panicked {
            self.shutdown.cancel();
            self.plumbing.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::{AudioRepresentation, InputSource, VideoRepresentation};

    #[test]
    fn test_pace_only_in_live_media() {
        let interval = Duration::from_millis(40);
        assert_eq!(pace(BufferMode::LiveMedia, interval), Some(interval));
        assert_eq!(pace(BufferMode::LiveCamera, interval), None);
        assert_eq!(pace(BufferMode::OnDemand, interval), None);
    }

    #[test]
    fn test_missing_input_fails_before_spawning() {
        let _ = env_logger::builder().is_test(true).try_init();

        let dir = tempfile::tempdir().unwrap();
        let config = DashcastConfig::builder()
            .video_source(
                InputSource::new(dir.path().join("missing.yuv").display().to_string())
                    .set_resolution(4, 4)
                    .set_framerate(5),
            )
            .audio_source(InputSource::new(dir.path().join("missing.pcm").display().to_string()))
            .video_representation(VideoRepresentation::new("v1").set_resolution(4, 4).set_framerate(5))
            .audio_representation(AudioRepresentation::new("a1"))
            .out_dir(dir.path().join("out"))
            .build()
            .unwrap();
        let backend = crate::raw::backend(&config);

        let result = DashScheduler::new(config, backend).start();
        assert!(matches!(result, Err(Error::Open(_))));
    }
}
