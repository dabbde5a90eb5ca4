//! Local file backend using FFmpeg.
//!
//! Decodes the best video stream in-memory and converts to packed RGB24.
//! End of file surfaces as a read error; the capture loop rewinds.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use std::path::Path;

use super::{CaptureBackend, CapturedImage};

pub(crate) struct FfmpegFileSource {
    path: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    fps: Option<f64>,
    eof_sent: bool,
}

impl FfmpegFileSource {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let path_str = path.display().to_string();
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open file input '{}' with ffmpeg", path_str))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let rate = input_stream.avg_frame_rate();
        let fps = (rate.denominator() != 0 && rate.numerator() > 0).then(|| f64::from(rate));

        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!("FfmpegFileSource: opened {} (fps={:?})", path_str, fps);

        Ok(Self {
            path: path_str,
            input,
            stream_index,
            decoder,
            scaler,
            fps,
            eof_sent: false,
        })
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<CapturedImage> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        frame_to_image(&rgb_frame)
    }
}

impl CaptureBackend for FfmpegFileSource {
    fn read_frame(&mut self) -> Result<CapturedImage> {
        let mut decoded = ffmpeg::frame::Video::empty();
        let stream_index = self.stream_index;

        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded);
            }

            let next = self
                .input
                .packets()
                .find(|(stream, _)| stream.index() == stream_index)
                .map(|(_, packet)| packet);

            match next {
                Some(packet) => {
                    self.decoder
                        .send_packet(&packet)
                        .context("send packet to ffmpeg decoder")?;
                }
                None if !self.eof_sent => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.eof_sent = true;
                }
                None => anyhow::bail!("{} reached end of file", self.path),
            }
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.input
            .seek(0, ..)
            .with_context(|| format!("seek {} to start", self.path))?;
        self.decoder.flush();
        self.eof_sent = false;
        Ok(())
    }

    fn reported_fps(&self) -> Option<f64> {
        self.fps
    }

    fn resolution(&self) -> (u32, u32) {
        (self.decoder.width(), self.decoder.height())
    }
}

fn frame_to_image(frame: &ffmpeg::frame::Video) -> Result<CapturedImage> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok(CapturedImage {
            width,
            height,
            data: data
                .get(..row_bytes * height as usize)
                .context("ffmpeg frame is shorter than its dimensions")?
                .to_vec(),
        });
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok(CapturedImage {
        width,
        height,
        data: pixels,
    })
}
