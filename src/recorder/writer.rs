//! Incident video writers.
//!
//! - `MjpegAviWriter`: RIFF/AVI container with one Motion-JPEG stream and an
//!   `idx1` index. No external tools needed.
//! - `FfmpegMp4Writer`: pipes raw RGB24 into an `ffmpeg` child process and
//!   produces H.264 MP4 with the index at the front (`+faststart`).
//!
//! Both only write what they are given; naming, hashing and cleanup belong to
//! the recorder.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::frame::Frame;

/// Encoder selection in configuration.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EncoderKind {
    #[default]
    MjpegAvi,
    FfmpegMp4,
}

impl EncoderKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim() {
            "mjpeg-avi" => Ok(Self::MjpegAvi),
            "ffmpeg-mp4" => Ok(Self::FfmpegMp4),
            other => Err(anyhow!("unknown encoder '{}'", other)),
        }
    }

    pub fn build(self) -> Box<dyn IncidentWriter> {
        match self {
            Self::MjpegAvi => Box::new(MjpegAviWriter::default()),
            Self::FfmpegMp4 => Box::new(FfmpegMp4Writer::default()),
        }
    }
}

pub trait IncidentWriter: Send + Sync {
    /// File extension without the dot.
    fn extension(&self) -> &'static str;

    /// Encode `frames` at `fps` into `path`. Returns the number of frames
    /// written; frames whose resolution differs from the first are skipped.
    fn write(&self, frames: &[Frame], fps: u32, path: &Path) -> Result<usize>;
}

/// Frames matching the first frame's resolution.
fn uniform_frames(frames: &[Frame]) -> Result<(u32, u32, Vec<&Frame>)> {
    let first = frames
        .first()
        .ok_or_else(|| anyhow!("no frames to encode"))?;
    let (width, height) = first.resolution();
    let kept: Vec<&Frame> = frames
        .iter()
        .filter(|f| f.resolution() == (width, height))
        .collect();
    let skipped = frames.len() - kept.len();
    if skipped > 0 {
        log::warn!(
            "skipping {} frame(s) that do not match {}x{}",
            skipped,
            width,
            height
        );
    }
    Ok((width, height, kept))
}

// ----------------------------------------------------------------------------
// Motion-JPEG in AVI
// ----------------------------------------------------------------------------

const AVIF_HASINDEX: u32 = 0x10;
const AVIIF_KEYFRAME: u32 = 0x10;
const AVIH_LEN: u32 = 56;
const STRH_LEN: u32 = 56;
const STRF_LEN: u32 = 40;

#[derive(Clone, Debug)]
pub struct MjpegAviWriter {
    /// JPEG quality, 1..=100.
    pub quality: u8,
}

impl Default for MjpegAviWriter {
    fn default() -> Self {
        Self { quality: 85 }
    }
}

impl MjpegAviWriter {
    fn encode_jpeg(&self, frame: &Frame) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        {
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
                &mut out,
                self.quality.clamp(1, 100),
            );
            encoder
                .encode(
                    frame.pixels(),
                    frame.width,
                    frame.height,
                    image::ExtendedColorType::Rgb8,
                )
                .with_context(|| format!("jpeg-encode frame #{}", frame.sequence))?;
        }
        Ok(out)
    }
}

impl IncidentWriter for MjpegAviWriter {
    fn extension(&self) -> &'static str {
        "avi"
    }

    fn write(&self, frames: &[Frame], fps: u32, path: &Path) -> Result<usize> {
        if fps == 0 {
            return Err(anyhow!("fps must be > 0"));
        }
        let (width, height, frames) = uniform_frames(frames)?;
        let jpegs = frames
            .iter()
            .map(|frame| self.encode_jpeg(frame))
            .collect::<Result<Vec<_>>>()?;
        let layout = AviLayout::plan(&jpegs.iter().map(Vec::len).collect::<Vec<_>>())?;

        let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut out = BufWriter::new(file);
        write_avi(&mut out, &layout, width, height, fps, &jpegs)
            .with_context(|| format!("write {}", path.display()))?;
        out.into_inner()
            .map_err(|e| anyhow!("flush {}: {}", path.display(), e.error()))?
            .sync_all()
            .with_context(|| format!("sync {}", path.display()))?;
        Ok(jpegs.len())
    }
}

/// RIFF payload ceiling. AVI 1.0 readers without OpenDML support commonly
/// stop at 1 GiB.
const MAX_RIFF_LEN: u64 = 1 << 30;

/// Chunk sizes and `idx1` offsets for an AVI 1.0 file, all range-checked.
#[derive(Debug, PartialEq, Eq)]
struct AviLayout {
    riff: u32,
    hdrl: u32,
    strl: u32,
    movi: u32,
    idx1: u32,
    frames: u32,
    max_frame: u32,
    /// Payload size of each `00dc` chunk.
    sizes: Vec<u32>,
    /// Offset of each `00dc` chunk from the `movi` fourcc.
    offsets: Vec<u32>,
}

impl AviLayout {
    fn plan(chunk_lens: &[usize]) -> Result<Self> {
        let strl = 4 + (8 + u64::from(STRH_LEN)) + (8 + u64::from(STRF_LEN));
        let hdrl = 4 + (8 + u64::from(AVIH_LEN)) + (8 + strl);

        let mut sizes = Vec::with_capacity(chunk_lens.len());
        let mut offsets = Vec::with_capacity(chunk_lens.len());
        let mut movi: u64 = 4;
        for &len in chunk_lens {
            offsets.push(movi);
            sizes.push(u64::try_from(len)?);
            movi = movi.saturating_add(8).saturating_add(padded(len)?);
        }
        let idx1 = u64::try_from(chunk_lens.len())?.saturating_mul(16);
        // Saturated sums still exceed the ceiling and are refused below.
        let riff = (4 + (8 + hdrl) + 8 + 8)
            .saturating_add(movi)
            .saturating_add(idx1);
        if riff > MAX_RIFF_LEN {
            return Err(anyhow!(
                "{} frames need {} bytes, over the {} byte AVI limit; \
                 use the ffmpeg-mp4 encoder for incidents this long",
                chunk_lens.len(),
                riff,
                MAX_RIFF_LEN
            ));
        }

        let max_frame = sizes.iter().copied().max().unwrap_or(0);
        Ok(Self {
            riff: to_u32(riff)?,
            hdrl: to_u32(hdrl)?,
            strl: to_u32(strl)?,
            movi: to_u32(movi)?,
            idx1: to_u32(idx1)?,
            frames: to_u32(u64::try_from(chunk_lens.len())?)?,
            max_frame: to_u32(max_frame)?,
            sizes: sizes.into_iter().map(to_u32).collect::<Result<_>>()?,
            offsets: offsets.into_iter().map(to_u32).collect::<Result<_>>()?,
        })
    }
}

fn to_u32(value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{} does not fit an AVI size field", value))
}

/// Chunk payloads are padded to an even length.
fn padded(len: usize) -> Result<u64> {
    let len = u64::try_from(len)?;
    len.checked_add(len & 1)
        .ok_or_else(|| anyhow!("chunk of {} bytes is too large", len))
}

fn write_avi<W: Write>(
    out: &mut W,
    layout: &AviLayout,
    width: u32,
    height: u32,
    fps: u32,
    jpegs: &[Vec<u8>],
) -> std::io::Result<()> {
    let frame_count = layout.frames;
    let max_frame = layout.max_frame;

    out.write_all(b"RIFF")?;
    out.write_all(&layout.riff.to_le_bytes())?;
    out.write_all(b"AVI ")?;

    // hdrl
    out.write_all(b"LIST")?;
    out.write_all(&layout.hdrl.to_le_bytes())?;
    out.write_all(b"hdrl")?;

    out.write_all(b"avih")?;
    out.write_all(&AVIH_LEN.to_le_bytes())?;
    for value in [
        1_000_000 / fps,               // microseconds per frame
        max_frame.saturating_mul(fps), // max bytes per second
        0,                             // padding granularity
        AVIF_HASINDEX,
        frame_count,
        0, // initial frames
        1, // streams
        max_frame,
        width,
        height,
        0,
        0,
        0,
        0,
    ] {
        out.write_all(&value.to_le_bytes())?;
    }

    out.write_all(b"LIST")?;
    out.write_all(&layout.strl.to_le_bytes())?;
    out.write_all(b"strl")?;

    out.write_all(b"strh")?;
    out.write_all(&STRH_LEN.to_le_bytes())?;
    out.write_all(b"vids")?;
    out.write_all(b"MJPG")?;
    out.write_all(&0u32.to_le_bytes())?; // flags
    out.write_all(&0u16.to_le_bytes())?; // priority
    out.write_all(&0u16.to_le_bytes())?; // language
    for value in [0u32, 1, fps, 0, frame_count, max_frame, u32::MAX, 0] {
        // initial frames, scale, rate, start, length, buffer size, quality, sample size
        out.write_all(&value.to_le_bytes())?;
    }
    for value in [0u16, 0, width as u16, height as u16] {
        out.write_all(&value.to_le_bytes())?;
    }

    out.write_all(b"strf")?;
    out.write_all(&STRF_LEN.to_le_bytes())?;
    out.write_all(&STRF_LEN.to_le_bytes())?; // biSize
    out.write_all(&width.to_le_bytes())?;
    out.write_all(&height.to_le_bytes())?;
    out.write_all(&1u16.to_le_bytes())?; // planes
    out.write_all(&24u16.to_le_bytes())?; // bit count
    out.write_all(b"MJPG")?;
    out.write_all(&width.saturating_mul(height).saturating_mul(3).to_le_bytes())?;
    for _ in 0..4 {
        out.write_all(&0u32.to_le_bytes())?;
    }

    // movi
    out.write_all(b"LIST")?;
    out.write_all(&layout.movi.to_le_bytes())?;
    out.write_all(b"movi")?;
    for (jpeg, size) in jpegs.iter().zip(&layout.sizes) {
        out.write_all(b"00dc")?;
        out.write_all(&size.to_le_bytes())?;
        out.write_all(jpeg)?;
        if jpeg.len() & 1 == 1 {
            out.write_all(&[0])?;
        }
    }

    // idx1, offsets relative to the `movi` fourcc
    out.write_all(b"idx1")?;
    out.write_all(&layout.idx1.to_le_bytes())?;
    for (size, offset) in layout.sizes.iter().zip(&layout.offsets) {
        out.write_all(b"00dc")?;
        out.write_all(&AVIIF_KEYFRAME.to_le_bytes())?;
        out.write_all(&offset.to_le_bytes())?;
        out.write_all(&size.to_le_bytes())?;
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// H.264 MP4 via the ffmpeg binary
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct FfmpegMp4Writer {
    pub ffmpeg: PathBuf,
}

impl Default for FfmpegMp4Writer {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }
}

impl IncidentWriter for FfmpegMp4Writer {
    fn extension(&self) -> &'static str {
        "mp4"
    }

    fn write(&self, frames: &[Frame], fps: u32, path: &Path) -> Result<usize> {
        if fps == 0 {
            return Err(anyhow!("fps must be > 0"));
        }
        let (width, height, frames) = uniform_frames(frames)?;
        let output = path
            .to_str()
            .ok_or_else(|| anyhow!("output path {} is not UTF-8", path.display()))?;

        let mut child = Command::new(&self.ffmpeg)
            .args(["-y", "-loglevel", "error", "-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &format!("{}x{}", width, height)])
            .args(["-r", &fps.to_string()])
            .args(["-i", "-"])
            .args(["-c:v", "libx264", "-pix_fmt", "yuv420p"])
            .args(["-movflags", "+faststart", "-f", "mp4", output])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn {}", self.ffmpeg.display()))?;

        // ffmpeg blocks once its stderr pipe fills, so drain it alongside stdin.
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("ffmpeg stderr unavailable"))?;
        let drain = std::thread::Builder::new()
            .name("ffmpeg-stderr".into())
            .spawn(move || {
                let mut captured = Vec::new();
                let _ = stderr.read_to_end(&mut captured);
                captured
            })
            .context("spawn ffmpeg stderr reader")?;

        let write_result = {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("ffmpeg stdin unavailable"))?;
            frames
                .iter()
                .try_for_each(|frame| stdin.write_all(frame.pixels()))
        };

        let status = child.wait().context("wait for ffmpeg")?;
        let captured = drain.join().unwrap_or_default();
        if !status.success() {
            return Err(anyhow!(
                "ffmpeg exited with {}: {}",
                status,
                stderr_tail(&captured)
            ));
        }
        write_result.context("pipe frames to ffmpeg")?;
        Ok(frames.len())
    }
}

/// Last few lines of ffmpeg's diagnostics.
fn stderr_tail(captured: &[u8]) -> String {
    const KEEP: usize = 20;
    let text = String::from_utf8_lossy(captured);
    let lines: Vec<&str> = text.trim().lines().collect();
    lines[lines.len().saturating_sub(KEEP)..].join("\n")
}
