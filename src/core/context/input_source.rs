use crate::core::frame::Resolution;

/// Where a decoder reads from, plus the hints raw inputs need to be parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSource {
    pub url: String,
    /// Demuxer or device format name, e.g. `rawvideo`, `v4l2`.
    pub format: Option<String>,
    pub resolution: Option<Resolution>,
    pub framerate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    /// Restart the input from the beginning when it ends (live media only).
    pub loop_input: bool,
}

impl InputSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            format: None,
            resolution: None,
            framerate: None,
            sample_rate: None,
            channels: None,
            loop_input: false,
        }
    }

    pub fn set_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn set_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Some(Resolution::new(width, height));
        self
    }

    pub fn set_framerate(mut self, framerate: u32) -> Self {
        self.framerate = Some(framerate);
        self
    }

    pub fn set_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn set_channels(mut self, channels: u16) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn set_loop(mut self, loop_input: bool) -> Self {
        self.loop_input = loop_input;
        self
    }
}

impl From<&str> for InputSource {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for InputSource {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}
