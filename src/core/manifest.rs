// src/core/manifest.rs - Manifest events, state and the MPD writer
//
// Encoders report closed segments and, on demand, their final duration. The
// manifest stage folds those events into a `ManifestState` and hands it to a
// `ManifestWriter`; `MpdWriter` renders a DASH MPD with one SegmentTemplate
// per media type.

use crate::core::context::DashcastConfig;
use crate::core::segment::{SegmentPlan, INIT_TEMPLATE, MEDIA_TEMPLATE};
use crate::error::{ManifestError, Result};
use chrono::{TimeZone, Utc};
use log::{debug, info};
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// Control event sent from encoder stages to the manifest stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestEvent {
    /// A segment file was closed. `timestamp_ms` is the wall clock at the
    /// moment the segment was started.
    SegmentReady {
        representation: String,
        segment_number: u64,
        timestamp_ms: i64,
    },
    /// Total media duration of a representation, sent once at end of stream.
    DurationKnown {
        representation: String,
        duration_ms: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationTiming {
    Static {
        duration_ms: u64,
    },
    Dynamic {
        availability_start_ms: i64,
        start_number: u64,
        last_number: u64,
    },
}

/// Everything the manifest needs beyond the static configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestState {
    pub timing: PresentationTiming,
    /// Wall clock of the event that triggered this regeneration.
    pub generated_at_ms: i64,
}

/// Renders and publishes the presentation manifest.
pub trait ManifestWriter: Send {
    fn regenerate(&mut self, state: &ManifestState) -> Result<()>;

    /// Called for every event the manifest stage receives, before it is acted on.
    fn observe(&mut self, _event: &ManifestEvent) {}
}

/// `PT01H02M03.004S`
pub fn format_presentation_duration(duration_ms: u64) -> String {
    let hours = duration_ms / 3_600_000;
    let minutes = duration_ms % 3_600_000 / 60_000;
    let seconds = duration_ms % 60_000 / 1000;
    let millis = duration_ms % 1000;
    format!("PT{hours:02}H{minutes:02}M{seconds:02}.{millis:03}S")
}

/// `PT00H00M10S`
pub fn format_time_shift(secs: u32) -> String {
    let hours = secs / 3600;
    let minutes = secs % 3600 / 60;
    let seconds = secs % 60;
    format!("PT{hours:02}H{minutes:02}M{seconds:02}S")
}

/// ISO-8601 UTC instant with millisecond precision.
pub fn format_availability_start(epoch_ms: i64) -> String {
    match Utc.timestamp_millis_opt(epoch_ms).single() {
        Some(time) => time.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        None => "1970-01-01T00:00:00.000Z".to_string(),
    }
}

fn rfc6381_codec(codec: &str) -> &str {
    match codec {
        "libx264" | "h264" | "avc" => "avc1.42c01e",
        "libx265" | "hevc" | "h265" => "hev1.1.6.L93.B0",
        "aac" | "libfdk_aac" => "mp4a.40.2",
        "libopus" | "opus" => "opus",
        "mp3" | "libmp3lame" => "mp4a.40.34",
        other => other,
    }
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Writes `<out_dir>/<mpd_filename>` on every regeneration.
pub struct MpdWriter {
    config: Arc<DashcastConfig>,
    path: PathBuf,
    video_plan: Option<SegmentPlan>,
    audio_plan: Option<SegmentPlan>,
}

impl MpdWriter {
    pub fn new(config: Arc<DashcastConfig>) -> Self {
        let video_plan = config
            .video_representations
            .first()
            .map(|r| config.video_plan(r));
        let audio_plan = config
            .audio_representations
            .first()
            .map(|r| config.audio_plan(r));
        Self {
            path: config.manifest_path(),
            config,
            video_plan,
            audio_plan,
        }
    }

    /// Renders the MPD document for `state`.
    pub fn render(&self, state: &ManifestState) -> String {
        let config = &self.config;
        let mut xml = String::new();

        xml.push_str("<?xml version=\"1.0\"?>\n");
        xml.push_str("<MPD xmlns=\"urn:mpeg:dash:schema:mpd:2011\"");
        let start_number = match state.timing {
            PresentationTiming::Static { duration_ms } => {
                let _ = write!(
                    xml,
                    " mediaPresentationDuration=\"{}\"",
                    format_presentation_duration(duration_ms)
                );
                0
            }
            PresentationTiming::Dynamic {
                availability_start_ms,
                start_number,
                ..
            } => {
                let _ = write!(
                    xml,
                    " availabilityStartTime=\"{}\"",
                    format_availability_start(availability_start_ms)
                );
                start_number
            }
        };
        let _ = write!(xml, " minBufferTime=\"PT{:.3}S\"", config.min_buffer_time);
        if let Some(time_shift) = config.time_shift_secs {
            let _ = write!(xml, " timeShiftBufferDepth=\"{}\"", format_time_shift(time_shift));
        }
        let mpd_type = if config.is_live() { "dynamic" } else { "static" };
        let _ = write!(
            xml,
            " type=\"{mpd_type}\" profiles=\"urn:mpeg:dash:profile:full:2011\""
        );
        if let Some(period) = config.minimum_update_period_secs.filter(|p| *p > 0) {
            let _ = write!(xml, " minimumUpdatePeriod=\"PT{period}S\"");
        }
        xml.push_str(">\n");

        xml.push_str(" <ProgramInformation>\n");
        let _ = writeln!(xml, "  <Title>{}</Title>", escape_xml(&config.mpd_filename));
        xml.push_str(" </ProgramInformation>\n");

        if let Some(base_url) = &config.base_url {
            let _ = writeln!(xml, " <BaseURL>{}</BaseURL>", escape_xml(base_url));
        }

        xml.push_str(" <Period start=\"PT0S\" id=\"1\">\n");

        if let Some(plan) = &self.audio_plan {
            xml.push_str("  <AdaptationSet segmentAlignment=\"true\" bitstreamSwitching=\"false\">\n");
            let channels = config
                .audio_representations
                .first()
                .map_or(2, |r| r.channels);
            let _ = writeln!(
                xml,
                "   <AudioChannelConfiguration schemeIdUri=\"urn:mpeg:dash:23003:3:audio_channel_configuration:2011\" value=\"{channels}\"/>"
            );
            self.write_template(&mut xml, plan, start_number);
            for representation in &config.audio_representations {
                let _ = writeln!(
                    xml,
                    "   <Representation id=\"{}\" mimeType=\"audio/mp4\" codecs=\"{}\" audioSamplingRate=\"{}\" startWithSAP=\"1\" bandwidth=\"{}\"/>",
                    escape_xml(&representation.id),
                    rfc6381_codec(&representation.codec),
                    representation.sample_rate,
                    representation.bitrate
                );
            }
            xml.push_str("  </AdaptationSet>\n");
        }

        if let Some(plan) = &self.video_plan {
            xml.push_str("  <AdaptationSet segmentAlignment=\"true\" bitstreamSwitching=\"false\">\n");
            self.write_template(&mut xml, plan, start_number);
            for representation in &config.video_representations {
                let _ = writeln!(
                    xml,
                    "   <Representation id=\"{}\" mimeType=\"video/mp4\" codecs=\"{}\" width=\"{}\" height=\"{}\" frameRate=\"{}\" sar=\"1:1\" startWithSAP=\"1\" bandwidth=\"{}\"/>",
                    escape_xml(&representation.id),
                    rfc6381_codec(&representation.codec),
                    representation.resolution.width,
                    representation.resolution.height,
                    representation.framerate,
                    representation.bitrate
                );
            }
            xml.push_str("  </AdaptationSet>\n");
        }

        xml.push_str(" </Period>\n");
        xml.push_str("</MPD>\n");
        xml
    }

    fn write_template(&self, xml: &mut String, plan: &SegmentPlan, start_number: u64) {
        let _ = write!(
            xml,
            "   <SegmentTemplate timescale=\"{}\" duration=\"{}\" media=\"{MEDIA_TEMPLATE}\" startNumber=\"{start_number}\" initialization=\"{INIT_TEMPLATE}\"",
            plan.timescale, plan.segment_duration
        );
        if self.config.ast_offset_ms < 0 {
            let _ = write!(
                xml,
                " availabilityTimeOffset=\"{}\"",
                -(self.config.ast_offset_ms as f64) / 1000.0
            );
        }
        xml.push_str("/>\n");
    }
}

impl ManifestWriter for MpdWriter {
    fn regenerate(&mut self, state: &ManifestState) -> Result<()> {
        let xml = self.render(state);
        let write_error = |source| ManifestError::Write {
            path: self.path.display().to_string(),
            source,
        };

        // Readers never see a half-written manifest.
        let tmp = self.path.with_extension("mpd.tmp");
        fs::write(&tmp, xml).map_err(write_error)?;
        fs::rename(&tmp, &self.path).map_err(write_error)?;

        match state.timing {
            PresentationTiming::Static { duration_ms } => info!(
                "MPD file generated: {} (duration {})",
                self.path.display(),
                format_presentation_duration(duration_ms)
            ),
            PresentationTiming::Dynamic {
                availability_start_ms,
                start_number,
                last_number,
            } => debug!(
                "MPD file generated: {} (start {} number {start_number}, last {last_number})",
                self.path.display(),
                format_availability_start(availability_start_ms)
            ),
        }
        Ok(())
    }
}
