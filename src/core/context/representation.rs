use crate::core::frame::Resolution;
use crate::error::ConfigError;

pub const DEFAULT_VIDEO_BITRATE: u32 = 400_000;
pub const DEFAULT_VIDEO_FRAMERATE: u32 = 25;
pub const DEFAULT_VIDEO_WIDTH: u32 = 640;
pub const DEFAULT_VIDEO_HEIGHT: u32 = 480;
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";

pub const DEFAULT_AUDIO_BITRATE: u32 = 192_000;
pub const DEFAULT_AUDIO_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_AUDIO_CHANNELS: u16 = 2;
pub const DEFAULT_AUDIO_CODEC: &str = "aac";

/// One video quality level of the presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRepresentation {
    pub id: String,
    pub resolution: Resolution,
    pub framerate: u32,
    pub bitrate: u32,
    pub codec: String,
}

impl VideoRepresentation {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resolution: Resolution::new(DEFAULT_VIDEO_WIDTH, DEFAULT_VIDEO_HEIGHT),
            framerate: DEFAULT_VIDEO_FRAMERATE,
            bitrate: DEFAULT_VIDEO_BITRATE,
            codec: DEFAULT_VIDEO_CODEC.to_string(),
        }
    }

    pub fn set_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Resolution::new(width, height);
        self
    }

    pub fn set_framerate(mut self, framerate: u32) -> Self {
        self.framerate = framerate;
        self
    }

    pub fn set_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn set_codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = codec.into();
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let reason = if self.id.is_empty() {
            Some("empty id")
        } else if self.framerate == 0 {
            Some("frame rate must be greater than zero")
        } else if self.resolution.width == 0 || self.resolution.height == 0 {
            Some("resolution must be non-zero")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(ConfigError::InvalidRepresentation {
                id: self.id.clone(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// One audio quality level of the presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioRepresentation {
    pub id: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: u32,
    pub codec: String,
}

impl AudioRepresentation {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sample_rate: DEFAULT_AUDIO_SAMPLE_RATE,
            channels: DEFAULT_AUDIO_CHANNELS,
            bitrate: DEFAULT_AUDIO_BITRATE,
            codec: DEFAULT_AUDIO_CODEC.to_string(),
        }
    }

    pub fn set_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn set_channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn set_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    pub fn set_codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = codec.into();
        self
    }

    pub(crate) fn validate(&self, frame_size: u32) -> Result<(), ConfigError> {
        let reason = if self.id.is_empty() {
            Some("empty id".to_string())
        } else if self.sample_rate < frame_size {
            Some(format!("sample rate must be at least {frame_size}Hz"))
        } else if self.channels == 0 {
            Some("channel count must be greater than zero".to_string())
        } else {
            None
        };
        match reason {
            Some(reason) => Err(ConfigError::InvalidRepresentation {
                id: self.id.clone(),
                reason,
            }),
            None => Ok(()),
        }
    }
}
