// src/core/segment.rs - Segment and fragment sizing
//
// Segment and fragment durations are configured in milliseconds, but encoders
// cut on frame counts. The balancer nudges both counts by at most one frame so
// that fragments tile a segment as evenly as possible.

use log::info;
use std::path::{Path, PathBuf};

/// Samples per encoded audio frame.
pub const AUDIO_FRAME_SIZE: u32 = 1024;

/// Outcome of [`balance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Balance {
    pub segment_frames: u32,
    pub fragment_frames: u32,
    /// `segment_frames % fragment_frames` for the chosen pair.
    pub remainder: u32,
}

impl Balance {
    /// Segment length trimmed so that it is a whole number of fragments.
    pub fn tiled_segment_frames(&self) -> u32 {
        if self.remainder < self.segment_frames {
            self.segment_frames - self.remainder
        } else {
            self.segment_frames
        }
    }
}

/// Picks the candidate among `(seg, frag)`, `(seg, frag+1)`, `(seg+1, frag)`
/// and `(seg+1, frag+1)` with the smallest `seg % frag`.
///
/// Ties keep the earlier candidate. Candidates with a zero fragment are never
/// chosen.
pub fn balance(segment_frames: u32, fragment_frames: u32) -> Balance {
    let candidates = [
        (segment_frames, fragment_frames),
        (segment_frames, fragment_frames.saturating_add(1)),
        (segment_frames.saturating_add(1), fragment_frames),
        (segment_frames.saturating_add(1), fragment_frames.saturating_add(1)),
    ];

    let mut best: Option<Balance> = None;
    for (seg, frag) in candidates {
        if frag == 0 {
            continue;
        }
        let remainder = seg % frag;
        if best.map_or(true, |b| remainder < b.remainder) {
            best = Some(Balance {
                segment_frames: seg,
                fragment_frames: frag,
                remainder,
            });
        }
    }

    // (seg, frag + 1) always has a non-zero fragment.
    best.unwrap_or(Balance {
        segment_frames,
        fragment_frames: 1,
        remainder: 0,
    })
}

/// Frame budget of one representation's segments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentPlan {
    /// Encoded frames per segment, always at least 1.
    pub segment_frames: u32,
    /// Encoded frames per fragment, never more than `segment_frames`.
    pub fragment_frames: u32,
    /// Segment duration in the media timescale.
    pub segment_duration: u64,
    /// Ticks per second of `segment_duration`.
    pub timescale: u32,
    /// Duration actually covered by one segment, in milliseconds.
    pub real_segment_duration_ms: u64,
    /// Nominal segment duration requested by configuration.
    pub nominal_segment_duration_ms: u32,
}

impl SegmentPlan {
    pub fn video(framerate: u32, segment_ms: u32, fragment_ms: u32) -> Self {
        let framerate = framerate.max(1);
        let seg = (framerate as f64 * segment_ms as f64 / 1000.0) as u32;
        let frag = (framerate as f64 * fragment_ms as f64 / 1000.0) as u32;
        let plan = Self::from_counts(seg, frag, 1, framerate, segment_ms);
        info!(
            "Video plan: {} frames per segment, {} per fragment, real segment duration {}ms",
            plan.segment_frames, plan.fragment_frames, plan.real_segment_duration_ms
        );
        plan
    }

    pub fn audio(sample_rate: u32, frame_size: u32, segment_ms: u32, fragment_ms: u32) -> Self {
        let sample_rate = sample_rate.max(1);
        let frame_size = frame_size.max(1);
        let frames_per_second = sample_rate as f64 / frame_size as f64;
        let seg = (frames_per_second * segment_ms as f64 / 1000.0) as u32;
        let frag = (frames_per_second * fragment_ms as f64 / 1000.0) as u32;
        let plan = Self::from_counts(seg, frag, frame_size, sample_rate, segment_ms);
        info!(
            "Audio plan: {} frames per segment, {} per fragment, real segment duration {}ms",
            plan.segment_frames, plan.fragment_frames, plan.real_segment_duration_ms
        );
        plan
    }

    fn from_counts(seg: u32, frag: u32, ticks_per_frame: u32, timescale: u32, segment_ms: u32) -> Self {
        let balanced = balance(seg, frag);
        let segment_frames = balanced.tiled_segment_frames().max(1);
        let fragment_frames = balanced.fragment_frames.clamp(1, segment_frames);
        let segment_duration = segment_frames as u64 * ticks_per_frame as u64;

        Self {
            segment_frames,
            fragment_frames,
            segment_duration,
            timescale,
            real_segment_duration_ms: segment_duration * 1000 / timescale as u64,
            nominal_segment_duration_ms: segment_ms,
        }
    }

    /// Milliseconds covered by `frames` encoded frames.
    pub fn frames_to_ms(&self, frames: u64) -> u64 {
        let ticks_per_frame = self.segment_duration / self.segment_frames as u64;
        frames * ticks_per_frame * 1000 / self.timescale as u64
    }
}

/// Media segment file of a representation: `<dir>/<id>_<number>.m4s`.
pub fn segment_path(dir: &Path, representation_id: &str, segment_number: u64) -> PathBuf {
    dir.join(format!("{representation_id}_{segment_number}.m4s"))
}

/// Initialization segment file of a representation: `<dir>/<id>_init.mp4`.
pub fn init_segment_path(dir: &Path, representation_id: &str) -> PathBuf {
    dir.join(format!("{representation_id}_init.mp4"))
}

/// Segment template strings matching [`segment_path`] and [`init_segment_path`].
pub const MEDIA_TEMPLATE: &str = "$RepresentationID$_$Number$.m4s";
pub const INIT_TEMPLATE: &str = "$RepresentationID$_init.mp4";

/// Number of segments kept on disk for a time-shift window of `time_shift_secs`.
pub fn retained_segments(time_shift_secs: u32, segment_ms: u32) -> u64 {
    1000 * time_shift_secs as u64 / segment_ms.max(1) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_prefers_exact_tiling() {
        let b = balance(25, 4);
        assert_eq!((b.segment_frames, b.fragment_frames, b.remainder), (25, 5, 0));
        assert_eq!(b.tiled_segment_frames(), 25);
    }

    #[test]
    fn test_balance_keeps_first_on_tie() {
        // (8, 1), (8, 2) and (9, 1) all divide evenly.
        let b = balance(8, 1);
        assert_eq!((b.segment_frames, b.fragment_frames), (8, 1));

        // 7 % 3 = 1, 7 % 4 = 3, 8 % 3 = 2, 8 % 4 = 0.
        let b = balance(7, 3);
        assert_eq!((b.segment_frames, b.fragment_frames, b.remainder), (8, 4, 0));
    }

    #[test]
    fn test_balance_segment_moves_by_at_most_one() {
        for seg in 1..60 {
            for frag in 1..=seg {
                let b = balance(seg, frag);
                assert!(b.segment_frames == seg || b.segment_frames == seg + 1);
                assert!(b.fragment_frames == frag || b.fragment_frames == frag + 1);
                assert_eq!(b.segment_frames % b.fragment_frames, b.remainder);
                assert!(b.remainder <= seg % frag);
            }
        }
    }

    #[test]
    fn test_balance_skips_zero_fragment() {
        let b = balance(5, 0);
        assert_eq!((b.segment_frames, b.fragment_frames, b.remainder), (5, 1, 0));
    }

    #[test]
    fn test_video_plan_defaults() {
        let plan = SegmentPlan::video(25, 1000, 1000);
        assert_eq!(plan.segment_frames, 25);
        assert_eq!(plan.fragment_frames, 25);
        assert_eq!(plan.real_segment_duration_ms, 1000);
        assert_eq!(plan.frames_to_ms(50), 2000);
    }

    #[test]
    fn test_audio_plan_tiles_fragments() {
        // 44100 / 1024 * 2 = 86 frames, fragments of 43.
        let plan = SegmentPlan::audio(44100, AUDIO_FRAME_SIZE, 2000, 1000);
        assert_eq!(plan.segment_frames % plan.fragment_frames, 0);
        assert_eq!(plan.segment_duration, plan.segment_frames as u64 * 1024);
        assert_eq!(plan.timescale, 44100);
    }

    #[test]
    fn test_segment_names() {
        let dir = Path::new("out");
        assert_eq!(segment_path(dir, "v1", 3), Path::new("out/v1_3.m4s"));
        assert_eq!(init_segment_path(dir, "a1"), Path::new("out/a1_init.mp4"));
        assert_eq!(retained_segments(10, 1000), 10);
        assert_eq!(retained_segments(10, 3000), 3);
    }
}
