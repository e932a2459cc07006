use crate::core::frame::{Resolution, VideoFrame};
use crate::core::media_io::{FrameScaler, ScalerFactory};
use crate::error::{CodecError, OpenError, Result};

/// Nearest-neighbour YUV 4:2:0 resampler. Copies when the sizes match.
pub struct NearestScaler {
    target: Resolution,
    // Source column per target column, rebuilt when the input size changes.
    luma_columns: Vec<usize>,
    chroma_columns: Vec<usize>,
    source: Resolution,
}

impl NearestScaler {
    pub fn new(target: Resolution) -> Self {
        Self {
            target,
            luma_columns: Vec::new(),
            chroma_columns: Vec::new(),
            source: Resolution::default(),
        }
    }

    fn prepare(&mut self, source: Resolution) {
        if source == self.source && !self.luma_columns.is_empty() {
            return;
        }
        self.source = source;
        self.luma_columns = index_map(source.width as usize, self.target.width as usize);
        let (src_cw, _) = source.chroma();
        let (dst_cw, _) = self.target.chroma();
        self.chroma_columns = index_map(src_cw, dst_cw);
    }
}

fn index_map(from: usize, to: usize) -> Vec<usize> {
    (0..to).map(|i| (i * from / to.max(1)).min(from.saturating_sub(1))).collect()
}

fn resample_plane(src: &[u8], src_width: usize, src_height: usize, dst: &mut [u8], dst_height: usize, columns: &[usize]) {
    let dst_width = columns.len();
    if src_width == 0 || src_height == 0 || dst_width == 0 {
        return;
    }
    for (y, row) in dst.chunks_exact_mut(dst_width).take(dst_height).enumerate() {
        let src_row = &src[(y * src_height / dst_height.max(1)).min(src_height - 1) * src_width..];
        for (pixel, &x) in row.iter_mut().zip(columns) {
            *pixel = src_row[x];
        }
    }
}

impl FrameScaler for NearestScaler {
    fn scale(&mut self, input: &VideoFrame, output: &mut VideoFrame) -> Result<()> {
        if input.data.len() != input.resolution.yuv420_len() {
            return Err(CodecError::Scale(format!(
                "{} byte picture does not match {}",
                input.data.len(),
                input.resolution
            ))
            .into());
        }

        output.reshape(self.target);
        if input.resolution == self.target {
            output.data.copy_from_slice(&input.data);
            return Ok(());
        }

        self.prepare(input.resolution);
        let (src_cw, src_ch) = input.resolution.chroma();
        let (_, dst_ch) = self.target.chroma();
        let (sy, su, sv) = input.planes();
        let (dy, du, dv) = output.planes_mut();

        let width = input.resolution.width as usize;
        let height = input.resolution.height as usize;
        resample_plane(sy, width, height, dy, self.target.height as usize, &self.luma_columns);
        resample_plane(su, src_cw, src_ch, du, dst_ch, &self.chroma_columns);
        resample_plane(sv, src_cw, src_ch, dv, dst_ch, &self.chroma_columns);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NearestScalerFactory;

impl ScalerFactory for NearestScalerFactory {
    fn create(&self, target: Resolution) -> Result<Box<dyn FrameScaler>> {
        if target.width == 0 || target.height == 0 {
            return Err(OpenError::Scaler {
                width: target.width,
                height: target.height,
                reason: "empty target".to_string(),
            }
            .into());
        }
        Ok(Box::new(NearestScaler::new(target)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downscale_by_two() {
        let mut input = VideoFrame::with_resolution(Resolution::new(4, 4));
        {
            let (y, u, v) = input.planes_mut();
            for (i, pixel) in y.iter_mut().enumerate() {
                *pixel = i as u8;
            }
            u.fill(100);
            v.fill(200);
        }

        let mut scaler = NearestScalerFactory.create(Resolution::new(2, 2)).unwrap();
        let mut output = VideoFrame::default();
        scaler.scale(&input, &mut output).unwrap();

        assert_eq!(output.resolution, Resolution::new(2, 2));
        let (y, u, v) = output.planes();
        assert_eq!(y, &[0, 2, 8, 10]);
        assert_eq!(u, &[100]);
        assert_eq!(v, &[200]);
    }

    #[test]
    fn test_same_size_copies() {
        let mut input = VideoFrame::with_resolution(Resolution::new(2, 2));
        input.data.fill(7);
        let mut scaler = NearestScaler::new(Resolution::new(2, 2));
        let mut output = VideoFrame::default();
        scaler.scale(&input, &mut output).unwrap();
        assert_eq!(output.data, input.data);
    }

    #[test]
    fn test_upscale_odd_size() {
        let mut input = VideoFrame::with_resolution(Resolution::new(2, 2));
        input.data.fill(9);
        let mut scaler = NearestScaler::new(Resolution::new(5, 3));
        let mut output = VideoFrame::default();
        scaler.scale(&input, &mut output).unwrap();
        assert_eq!(output.data.len(), Resolution::new(5, 3).yuv420_len());
        assert!(output.data.iter().all(|b| *b == 9));
    }

    #[test]
    fn test_empty_target_is_rejected() {
        assert!(NearestScalerFactory.create(Resolution::new(0, 2)).is_err());
    }
}
