use bytes::Bytes;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub(crate) fn chroma(self) -> (usize, usize) {
        (self.width.div_ceil(2) as usize, self.height.div_ceil(2) as usize)
    }

    /// Bytes in a planar YUV 4:2:0 picture of this size.
    pub fn yuv420_len(self) -> usize {
        let (cw, ch) = self.chroma();
        self.width as usize * self.height as usize + 2 * cw * ch
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Raw picture carried through the video ring buffers.
///
/// `data` holds planar YUV 4:2:0: the luma plane followed by the two chroma
/// planes, each tightly packed.
#[derive(Debug, Clone, Default)]
pub struct VideoFrame {
    pub resolution: Resolution,
    pub data: Vec<u8>,
    /// Presentation index in frames since the start of the stream.
    pub pts: i64,
    /// Input the picture was decoded from.
    pub source_index: usize,
}

impl VideoFrame {
    pub fn with_resolution(resolution: Resolution) -> Self {
        Self {
            resolution,
            data: vec![0; resolution.yuv420_len()],
            pts: 0,
            source_index: 0,
        }
    }

    /// Resizes the picture buffer, keeping its allocation when possible.
    pub fn reshape(&mut self, resolution: Resolution) {
        self.resolution = resolution;
        self.data.resize(resolution.yuv420_len(), 0);
    }

    pub fn planes(&self) -> (&[u8], &[u8], &[u8]) {
        let luma = self.resolution.width as usize * self.resolution.height as usize;
        let (cw, ch) = self.resolution.chroma();
        let (y, rest) = self.data.split_at(luma.min(self.data.len()));
        let (u, v) = rest.split_at((cw * ch).min(rest.len()));
        (y, u, v)
    }

    pub fn planes_mut(&mut self) -> (&mut [u8], &mut [u8], &mut [u8]) {
        let luma = self.resolution.width as usize * self.resolution.height as usize;
        let (cw, ch) = self.resolution.chroma();
        let len = self.data.len();
        let (y, rest) = self.data.split_at_mut(luma.min(len));
        let chroma = (cw * ch).min(rest.len());
        let (u, v) = rest.split_at_mut(chroma);
        (y, u, v)
    }
}

/// Block of interleaved signed 16-bit PCM carried through the audio buffer.
#[derive(Debug, Clone, Default)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
    /// Index of the first sample since the start of the stream.
    pub pts: i64,
}

impl AudioFrame {
    /// Samples per channel.
    pub fn sample_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// One compressed access unit produced by an encoder.
#[derive(Debug, Clone, Default)]
pub struct EncodedUnit {
    pub data: Bytes,
    pub pts: i64,
    pub dts: i64,
    pub duration: i64,
    pub is_keyframe: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuv420_layout() {
        let mut frame = VideoFrame::with_resolution(Resolution::new(4, 2));
        assert_eq!(frame.data.len(), 8 + 2 + 2);
        {
            let (y, u, v) = frame.planes_mut();
            assert_eq!((y.len(), u.len(), v.len()), (8, 2, 2));
            u.fill(1);
            v.fill(2);
        }
        let (_, u, v) = frame.planes();
        assert_eq!(u, &[1, 1]);
        assert_eq!(v, &[2, 2]);

        // Odd sizes round the chroma planes up.
        assert_eq!(Resolution::new(3, 3).yuv420_len(), 9 + 2 * 4);
        frame.reshape(Resolution::new(2, 2));
        assert_eq!(frame.data.len(), 6);
        assert_eq!(frame.resolution.to_string(), "2x2");
    }

    #[test]
    fn test_planes_mut_on_short_buffer() {
        let mut frame = VideoFrame {
            resolution: Resolution::new(4, 4),
            data: vec![0; 10],
            ..VideoFrame::default()
        };
        let (y, u, v) = frame.planes_mut();
        assert_eq!((y.len(), u.len(), v.len()), (10, 0, 0));
        y.fill(9);
        assert!(frame.data.iter().all(|&b| b == 9));
    }

    #[test]
    fn test_audio_sample_count() {
        let frame = AudioFrame {
            sample_rate: 48000,
            channels: 2,
            samples: vec![0; 2048],
            pts: 0,
        };
        assert_eq!(frame.sample_count(), 1024);
        assert_eq!(AudioFrame::default().sample_count(), 0);
    }
}
