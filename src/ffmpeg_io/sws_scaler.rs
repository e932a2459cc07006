use crate::core::frame::{Resolution, VideoFrame};
use crate::core::media_io::{FrameScaler, ScalerFactory};
use crate::error::{CodecError, OpenError, Result};
use crate::ffmpeg_io::{copy_planes_in, copy_planes_out};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling;

/// Bicubic libswscale resize of YUV 4:2:0 pictures to one target size.
pub struct SwsScaler {
    target: Resolution,
    // Rebuilt when the input size changes, e.g. after a source switch.
    context: Option<(Resolution, scaling::Context)>,
    input: ffmpeg::frame::Video,
    output: ffmpeg::frame::Video,
}

// SAFETY: the scaling context and frames are owned exclusively by this scaler
// and only used from the scaler thread it is moved into.
unsafe impl Send for SwsScaler {}

impl SwsScaler {
    pub fn new(target: Resolution) -> Self {
        Self {
            target,
            context: None,
            input: ffmpeg::frame::Video::empty(),
            output: ffmpeg::frame::Video::empty(),
        }
    }

    fn prepare(&mut self, source: Resolution) -> Result<()> {
        if matches!(&self.context, Some((current, _)) if *current == source) {
            return Ok(());
        }
        let context = scaling::Context::get(
            Pixel::YUV420P,
            source.width,
            source.height,
            Pixel::YUV420P,
            self.target.width,
            self.target.height,
            scaling::Flags::BICUBIC,
        )
        .map_err(|e| CodecError::Scale(format!("{source} -> {}: {e}", self.target)))?;
        self.input = ffmpeg::frame::Video::new(Pixel::YUV420P, source.width, source.height);
        self.output = ffmpeg::frame::Video::new(Pixel::YUV420P, self.target.width, self.target.height);
        self.context = Some((source, context));
        Ok(())
    }
}

impl FrameScaler for SwsScaler {
    fn scale(&mut self, input: &VideoFrame, output: &mut VideoFrame) -> Result<()> {
        if input.data.len() != input.resolution.yuv420_len() {
            return Err(CodecError::Scale(format!(
                "{} byte picture does not match {}",
                input.data.len(),
                input.resolution
            ))
            .into());
        }
        self.prepare(input.resolution)?;
        let Some((_, context)) = self.context.as_mut() else {
            return Err(CodecError::Scale("scaler not initialized".to_string()).into());
        };

        copy_planes_in(input, &mut self.input);
        context
            .run(&self.input, &mut self.output)
            .map_err(|e| CodecError::Scale(e.to_string()))?;

        output.reshape(self.target);
        copy_planes_out(&self.output, output);
        output.pts = input.pts;
        output.source_index = input.source_index;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SwsScalerFactory;

impl ScalerFactory for SwsScalerFactory {
    fn create(&self, target: Resolution) -> Result<Box<dyn FrameScaler>> {
        if target.width == 0 || target.height == 0 {
            return Err(OpenError::Scaler {
                width: target.width,
                height: target.height,
                reason: "empty target".to_string(),
            }
            .into());
        }
        ffmpeg::init().map_err(|e| OpenError::Scaler {
            width: target.width,
            height: target.height,
            reason: e.to_string(),
        })?;
        Ok(Box::new(SwsScaler::new(target)))
    }
}
