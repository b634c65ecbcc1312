//! Motion-JPEG AVI writer.
//!
//! Layout written:
//!
//! ```text
//! RIFF 'AVI '
//!   LIST 'hdrl'
//!     'avih'  main header
//!     LIST 'strl'
//!       'strh'  video stream header ('vids' / 'MJPG')
//!       'strf'  BITMAPINFOHEADER
//!   LIST 'movi'
//!     '00dc'  one JPEG per frame (padded to even length)
//!   'idx1'    one keyframe entry per frame
//! ```
//!
//! Frame counts, buffer sizes, and the RIFF/movi lengths are unknown until the
//! stream ends; they are written as zero and patched in `finish()`.
//!
//! Plain AVI sizes are 32-bit. A frame whose chunk and index entry would push
//! the file past `u32::MAX` bytes is refused, so a full recording ends with an
//! error instead of wrapped headers.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;

use super::VideoSink;
use crate::frame::Frame;

const AVIF_HASINDEX: u32 = 0x10;
const AVIIF_KEYFRAME: u32 = 0x10;
const MAIN_HEADER_LEN: u32 = 56;
const STREAM_HEADER_LEN: u32 = 56;
const BITMAP_INFO_LEN: u32 = 40;

struct IndexEntry {
    /// Offset of the chunk header from the 'movi' fourcc.
    offset: u32,
    size: u32,
}

/// Offsets of header fields that are patched once the stream ends.
struct PatchPoints {
    riff_size: u64,
    total_frames: u64,
    main_buffer_size: u64,
    stream_length: u64,
    stream_buffer_size: u64,
    movi_size: u64,
    movi_fourcc: u64,
}

pub struct AviMjpegWriter<W: Write + Seek> {
    out: W,
    width: u32,
    height: u32,
    quality: u8,
    patch: PatchPoints,
    index: Vec<IndexEntry>,
    max_chunk: u32,
    finished: bool,
}

impl AviMjpegWriter<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(
        path: P,
        width: u32,
        height: u32,
        fps: u32,
        quality: u8,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("create video output {}", path.display()))?;
        Self::new(BufWriter::new(file), width, height, fps, quality)
    }
}

impl<W: Write + Seek> AviMjpegWriter<W> {
    pub fn new(mut out: W, width: u32, height: u32, fps: u32, quality: u8) -> Result<Self> {
        if width == 0 || height == 0 || fps == 0 {
            return Err(anyhow!(
                "video output needs non-zero size and fps (got {}x{} @ {})",
                width,
                height,
                fps
            ));
        }
        let patch = write_headers(&mut out, width, height, fps)?;
        Ok(Self {
            out,
            width,
            height,
            quality: quality.clamp(1, 100),
            patch,
            index: Vec::new(),
            max_chunk: 0,
            finished: false,
        })
    }

    pub fn frames_written(&self) -> usize {
        self.index.len()
    }

    /// Append one frame as a JPEG chunk.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.finished {
            return Err(anyhow!("video output already closed"));
        }
        if frame.dimensions() != (self.width, self.height) {
            return Err(anyhow!(
                "frame {}x{} does not match video output {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            ));
        }
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.quality)
            .encode_image(frame.image())
            .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;

        let chunk_pos = self.out.stream_position()?;
        let size = u32::try_from(jpeg.len()).context("jpeg frame too large")?;
        let chunk_end = chunk_pos + 8 + u64::from(size) + u64::from(size % 2);
        let index_len = (self.index.len() as u64 + 1) * 16;
        // RIFF size = everything after the 8-byte RIFF header, idx1 included.
        if chunk_end + index_len > u64::from(u32::MAX) {
            return Err(anyhow!(
                "video output reached the 4 GiB AVI limit after {} frames",
                self.index.len()
            ));
        }
        let offset = u32::try_from(chunk_pos - self.patch.movi_fourcc)
            .context("movi offset exceeds AVI limit")?;
        self.out.write_all(b"00dc")?;
        write_u32(&mut self.out, size)?;
        self.out.write_all(&jpeg)?;
        if size % 2 == 1 {
            self.out.write_all(&[0])?;
        }
        self.index.push(IndexEntry { offset, size });
        self.max_chunk = self.max_chunk.max(size);
        Ok(())
    }

    /// Write the index and patch the header counters. Idempotent.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let movi_end = self.out.stream_position()?;
        let index_len =
            u32::try_from(self.index.len() * 16).context("idx1 exceeds AVI limit")?;
        self.out.write_all(b"idx1")?;
        write_u32(&mut self.out, index_len)?;
        for entry in &self.index {
            self.out.write_all(b"00dc")?;
            write_u32(&mut self.out, AVIIF_KEYFRAME)?;
            write_u32(&mut self.out, entry.offset)?;
            write_u32(&mut self.out, entry.size)?;
        }
        let file_end = self.out.stream_position()?;

        let frames = u32::try_from(self.index.len()).context("frame count exceeds AVI limit")?;
        let riff_size = u32::try_from(file_end - 8).context("RIFF size exceeds AVI limit")?;
        let movi_size = u32::try_from(movi_end - self.patch.movi_fourcc)
            .context("movi size exceeds AVI limit")?;
        let patches = [
            (self.patch.riff_size, riff_size),
            (self.patch.total_frames, frames),
            (self.patch.main_buffer_size, self.max_chunk),
            (self.patch.stream_length, frames),
            (self.patch.stream_buffer_size, self.max_chunk),
            (self.patch.movi_size, movi_size),
        ];
        for (pos, value) in patches {
            self.out.seek(SeekFrom::Start(pos))?;
            write_u32(&mut self.out, value)?;
        }
        self.out.seek(SeekFrom::Start(file_end))?;
        self.out.flush()?;
        Ok(())
    }

    /// Finish and hand back the underlying writer.
    pub fn into_inner(mut self) -> Result<W> {
        self.finish()?;
        Ok(self.out)
    }
}

impl<W: Write + Seek> VideoSink for AviMjpegWriter<W> {
    fn append(&mut self, frame: &Frame) -> Result<()> {
        self.write_frame(frame)
    }

    fn close(&mut self) -> Result<()> {
        let first_close = !self.finished;
        self.finish()?;
        if first_close {
            log::info!("video output closed after {} frames", self.index.len());
        }
        Ok(())
    }
}

fn write_headers<W: Write + Seek>(
    out: &mut W,
    width: u32,
    height: u32,
    fps: u32,
) -> Result<PatchPoints> {
    let strl_len = 4 + (8 + STREAM_HEADER_LEN) + (8 + BITMAP_INFO_LEN);
    let hdrl_len = 4 + (8 + MAIN_HEADER_LEN) + (8 + strl_len);

    out.write_all(b"RIFF")?;
    let riff_size = out.stream_position()?;
    write_u32(out, 0)?;
    out.write_all(b"AVI ")?;

    out.write_all(b"LIST")?;
    write_u32(out, hdrl_len)?;
    out.write_all(b"hdrl")?;

    // avih
    out.write_all(b"avih")?;
    write_u32(out, MAIN_HEADER_LEN)?;
    write_u32(out, 1_000_000 / fps)?; // dwMicroSecPerFrame
    write_u32(out, 0)?; // dwMaxBytesPerSec
    write_u32(out, 0)?; // dwPaddingGranularity
    write_u32(out, AVIF_HASINDEX)?;
    let total_frames = out.stream_position()?;
    write_u32(out, 0)?; // dwTotalFrames
    write_u32(out, 0)?; // dwInitialFrames
    write_u32(out, 1)?; // dwStreams
    let main_buffer_size = out.stream_position()?;
    write_u32(out, 0)?; // dwSuggestedBufferSize
    write_u32(out, width)?;
    write_u32(out, height)?;
    for _ in 0..4 {
        write_u32(out, 0)?; // dwReserved
    }

    out.write_all(b"LIST")?;
    write_u32(out, strl_len)?;
    out.write_all(b"strl")?;

    // strh
    out.write_all(b"strh")?;
    write_u32(out, STREAM_HEADER_LEN)?;
    out.write_all(b"vids")?;
    out.write_all(b"MJPG")?;
    write_u32(out, 0)?; // dwFlags
    write_u16(out, 0)?; // wPriority
    write_u16(out, 0)?; // wLanguage
    write_u32(out, 0)?; // dwInitialFrames
    write_u32(out, 1)?; // dwScale
    write_u32(out, fps)?; // dwRate
    write_u32(out, 0)?; // dwStart
    let stream_length = out.stream_position()?;
    write_u32(out, 0)?; // dwLength
    let stream_buffer_size = out.stream_position()?;
    write_u32(out, 0)?; // dwSuggestedBufferSize
    write_u32(out, u32::MAX)?; // dwQuality (driver default)
    write_u32(out, 0)?; // dwSampleSize
    write_u16(out, 0)?; // rcFrame
    write_u16(out, 0)?;
    write_u16(out, width.min(u16::MAX as u32) as u16)?;
    write_u16(out, height.min(u16::MAX as u32) as u16)?;

    // strf
    out.write_all(b"strf")?;
    write_u32(out, BITMAP_INFO_LEN)?;
    write_u32(out, BITMAP_INFO_LEN)?; // biSize
    write_u32(out, width)?;
    write_u32(out, height)?;
    write_u16(out, 1)?; // biPlanes
    write_u16(out, 24)?; // biBitCount
    out.write_all(b"MJPG")?;
    write_u32(out, width.saturating_mul(height).saturating_mul(3))?;
    for _ in 0..4 {
        write_u32(out, 0)?; // pels per meter, colors used/important
    }

    out.write_all(b"LIST")?;
    let movi_size = out.stream_position()?;
    write_u32(out, 0)?;
    let movi_fourcc = out.stream_position()?;
    out.write_all(b"movi")?;

    Ok(PatchPoints {
        riff_size,
        total_frames,
        main_buffer_size,
        stream_length,
        stream_buffer_size,
        movi_size,
        movi_fourcc,
    })
}

fn write_u32<W: Write>(out: &mut W, value: u32) -> std::io::Result<()> {
    out.write_all(&value.to_le_bytes())
}

fn write_u16<W: Write>(out: &mut W, value: u16) -> std::io::Result<()> {
    out.write_all(&value.to_le_bytes())
}
