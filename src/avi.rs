//! AVI 1.0 (RIFF) container writer for captured frames.
//!
//! Frames are stored as they come off the camera: MJPEG frames as-is and
//! packed YUYV/GREY frames with any stride padding removed. A segment is
//! closed and the next one opened once it would grow past the RIFF-friendly
//! limit, so long raw recordings remain playable.

use crate::output::next_free_path;
use crate::traits::{FourCC, Format, Frame};
use bytes::{BufMut, BytesMut};
use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Segment size at which a new file is started.
pub const DEFAULT_SEGMENT_LIMIT: u64 = 1 << 30;

/// Everything before the first frame chunk.
const HEADER_LEN: usize = 224;
/// `'hdrl'` + `avih` chunk + `strl` list.
const HDRL_SIZE: u32 = 192;
/// `'strl'` + `strh` chunk + `strf` chunk.
const STRL_SIZE: u32 = 116;
const AVIH_SIZE: u32 = 56;
const STRH_SIZE: u32 = 56;
const STRF_SIZE: u32 = 40;
const INDEX_ENTRY_LEN: u64 = 16;
const CHUNK_ID: &[u8; 4] = b"00dc";

const AVIF_HASINDEX: u32 = 0x10;
const AVIIF_KEYFRAME: u32 = 0x10;
/// `dwRate / dwScale` gives frames per second with millihertz precision.
const RATE_SCALE: u32 = 1000;

/// Destination for recorded frames.
pub trait FrameSink {
    /// Append one frame.
    fn write_frame(&mut self, frame: &Frame) -> io::Result<()>;

    /// Flush and close; returns every file produced. Calling it again is a
    /// no-op returning an empty list.
    fn finish(&mut self) -> io::Result<Vec<PathBuf>>;
}

/// Per-stream constants written into every segment header.
#[derive(Debug, Clone)]
struct StreamInfo {
    width: u32,
    height: u32,
    handler: [u8; 4],
    bit_count: u16,
    image_size: u32,
    micros_per_frame: u32,
    rate: u32,
    /// `(visible row bytes, stride)` for packed formats.
    rows: Option<(usize, usize)>,
}

impl StreamInfo {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn new(format: &Format, fps: f64) -> io::Result<Self> {
        let (handler, bit_count) = match format.fourcc {
            FourCC::YUYV => (*b"YUY2", 16u16),
            FourCC::MJPG => (*b"MJPG", 24),
            FourCC::GREY => (*b"Y800", 8),
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{other} frames cannot be stored in AVI"),
                ))
            }
        };
        if !fps.is_finite() || fps <= 0.0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid frame rate {fps}"),
            ));
        }

        let image_size =
            u64::from(format.width) * u64::from(format.height) * u64::from(bit_count) / 8;
        let rows = format.fourcc.bytes_per_pixel().map(|bpp| {
            let row = format.width as usize * bpp as usize;
            (row, (format.stride as usize).max(row))
        });

        Ok(Self {
            width: format.width,
            height: format.height,
            handler,
            bit_count,
            image_size: u32::try_from(image_size).unwrap_or(u32::MAX),
            micros_per_frame: (1_000_000.0 / fps).round() as u32,
            rate: (fps * f64::from(RATE_SCALE)).round() as u32,
            rows,
        })
    }

    /// Frame bytes as stored in the file.
    fn frame_bytes<'a>(&self, frame: &'a Frame) -> Cow<'a, [u8]> {
        let payload = frame.payload();
        match self.rows {
            Some((row, stride)) if stride > row => Cow::Owned(
                payload
                    .chunks(stride)
                    .take(self.height as usize)
                    .flat_map(|line| line.iter().take(row).copied())
                    .collect(),
            ),
            _ => Cow::Borrowed(payload),
        }
    }

    fn header(&self, totals: &Totals) -> BytesMut {
        let width = self.width;
        let height = self.height;
        let mut buf = BytesMut::with_capacity(HEADER_LEN);

        buf.put_slice(b"RIFF");
        buf.put_u32_le(totals.riff_size);
        buf.put_slice(b"AVI ");

        buf.put_slice(b"LIST");
        buf.put_u32_le(HDRL_SIZE);
        buf.put_slice(b"hdrl");

        buf.put_slice(b"avih");
        buf.put_u32_le(AVIH_SIZE);
        buf.put_u32_le(self.micros_per_frame);
        buf.put_u32_le(totals.max_bytes_per_sec(self.rate));
        buf.put_u32_le(0); // padding granularity
        buf.put_u32_le(AVIF_HASINDEX);
        buf.put_u32_le(totals.frames);
        buf.put_u32_le(0); // initial frames
        buf.put_u32_le(1); // streams
        buf.put_u32_le(totals.max_chunk);
        buf.put_u32_le(width);
        buf.put_u32_le(height);
        buf.put_bytes(0, 16);

        buf.put_slice(b"LIST");
        buf.put_u32_le(STRL_SIZE);
        buf.put_slice(b"strl");

        buf.put_slice(b"strh");
        buf.put_u32_le(STRH_SIZE);
        buf.put_slice(b"vids");
        buf.put_slice(&self.handler);
        buf.put_u32_le(0); // flags
        buf.put_u16_le(0); // priority
        buf.put_u16_le(0); // language
        buf.put_u32_le(0); // initial frames
        buf.put_u32_le(RATE_SCALE);
        buf.put_u32_le(self.rate);
        buf.put_u32_le(0); // start
        buf.put_u32_le(totals.frames);
        buf.put_u32_le(totals.max_chunk);
        buf.put_u32_le(u32::MAX); // default quality
        buf.put_u32_le(0); // sample size
        buf.put_u16_le(0);
        buf.put_u16_le(0);
        buf.put_u16_le(u16::try_from(width).unwrap_or(u16::MAX));
        buf.put_u16_le(u16::try_from(height).unwrap_or(u16::MAX));

        buf.put_slice(b"strf");
        buf.put_u32_le(STRF_SIZE);
        buf.put_u32_le(STRF_SIZE);
        buf.put_i32_le(i32::try_from(width).unwrap_or(i32::MAX));
        buf.put_i32_le(i32::try_from(height).unwrap_or(i32::MAX));
        buf.put_u16_le(1); // planes
        buf.put_u16_le(self.bit_count);
        buf.put_slice(&self.handler);
        buf.put_u32_le(self.image_size);
        buf.put_bytes(0, 16);

        buf.put_slice(b"LIST");
        buf.put_u32_le(totals.movi_size);
        buf.put_slice(b"movi");

        debug_assert_eq!(buf.len(), HEADER_LEN);
        buf
    }
}

/// Header fields only known once a segment is complete.
#[derive(Debug, Default)]
struct Totals {
    riff_size: u32,
    movi_size: u32,
    frames: u32,
    max_chunk: u32,
}

impl Totals {
    fn max_bytes_per_sec(&self, rate: u32) -> u32 {
        let per_sec = u64::from(self.max_chunk) * u64::from(rate) / u64::from(RATE_SCALE);
        u32::try_from(per_sec).unwrap_or(u32::MAX)
    }
}

/// One open `.avi` file.
struct Segment {
    path: PathBuf,
    file: BufWriter<File>,
    index: BytesMut,
    /// `'movi'` plus every chunk written so far.
    movi_size: u64,
    frames: u32,
    max_chunk: u32,
}

impl Segment {
    fn create(path: PathBuf, info: &StreamInfo) -> io::Result<Self> {
        let mut file = BufWriter::new(File::create(&path)?);
        file.write_all(&info.header(&Totals::default()))?;
        debug!(path = %path.display(), "AVI segment opened");
        Ok(Self {
            path,
            file,
            index: BytesMut::new(),
            movi_size: 4,
            frames: 0,
            max_chunk: 0,
        })
    }

    /// Bytes on disk once the index is appended.
    fn projected_len(&self) -> u64 {
        (HEADER_LEN as u64 - 4) + self.movi_size + 8 + self.index.len() as u64
    }

    fn push(&mut self, data: &[u8]) -> io::Result<()> {
        let len = u32::try_from(data.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
        let offset = u32::try_from(self.movi_size)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "segment too large"))?;
        let padded = len % 2 == 1;

        let mut head = BytesMut::with_capacity(8);
        head.put_slice(CHUNK_ID);
        head.put_u32_le(len);
        self.file.write_all(&head)?;
        self.file.write_all(data)?;
        if padded {
            self.file.write_all(&[0])?;
        }

        self.index.put_slice(CHUNK_ID);
        self.index.put_u32_le(AVIIF_KEYFRAME);
        self.index.put_u32_le(offset);
        self.index.put_u32_le(len);

        self.movi_size += 8 + u64::from(len) + u64::from(padded);
        self.frames += 1;
        self.max_chunk = self.max_chunk.max(len);
        Ok(())
    }

    fn close(mut self, info: &StreamInfo) -> io::Result<PathBuf> {
        let too_large = || io::Error::new(io::ErrorKind::InvalidData, "segment too large");
        let index_len = u32::try_from(self.index.len()).map_err(|_| too_large())?;

        let mut tail = BytesMut::with_capacity(8 + self.index.len());
        tail.put_slice(b"idx1");
        tail.put_u32_le(index_len);
        tail.extend_from_slice(&self.index);
        self.file.write_all(&tail)?;

        let riff_size = u32::try_from(self.projected_len() - 8).map_err(|_| too_large())?;
        let totals = Totals {
            riff_size,
            movi_size: u32::try_from(self.movi_size).map_err(|_| too_large())?,
            frames: self.frames,
            max_chunk: self.max_chunk,
        };
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&info.header(&totals))?;
        self.file.flush()?;

        info!(path = %self.path.display(), frames = self.frames, "AVI segment closed");
        Ok(self.path)
    }
}

/// Writes frames into one or more AVI segments.
pub struct AviWriter {
    base: PathBuf,
    info: StreamInfo,
    segment_limit: u64,
    current: Option<Segment>,
    completed: Vec<PathBuf>,
    frames_written: u64,
}

impl AviWriter {
    /// Create `path` for frames of `format` played back at `fps`.
    pub fn create(path: &Path, format: &Format, fps: f64) -> io::Result<Self> {
        let info = StreamInfo::new(format, fps)?;
        let segment = Segment::create(path.to_path_buf(), &info)?;
        info!(
            path = %path.display(),
            width = format.width,
            height = format.height,
            fourcc = %format.fourcc,
            fps,
            "recording to AVI"
        );
        Ok(Self {
            base: path.to_path_buf(),
            info,
            segment_limit: DEFAULT_SEGMENT_LIMIT,
            current: Some(segment),
            completed: Vec::new(),
            frames_written: 0,
        })
    }

    /// Override the size at which a new segment is started.
    #[must_use]
    pub fn with_segment_limit(mut self, bytes: u64) -> Self {
        self.segment_limit = bytes;
        self
    }

    fn roll_over(&mut self) -> io::Result<()> {
        if let Some(full) = self.current.take() {
            self.completed.push(full.close(&self.info)?);
        }
        let next = next_free_path(&self.base);
        info!(path = %next.display(), "starting next AVI segment");
        self.current = Some(Segment::create(next, &self.info)?);
        Ok(())
    }
}

impl FrameSink for AviWriter {
    fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        let data = self.info.frame_bytes(frame);
        let growth = 8 + data.len() as u64 + INDEX_ENTRY_LEN + 1;

        let needs_new_segment = match &self.current {
            None => return Err(io::Error::new(io::ErrorKind::BrokenPipe, "writer finished")),
            Some(segment) => {
                segment.frames > 0 && segment.projected_len() + growth > self.segment_limit
            }
        };
        if needs_new_segment {
            self.roll_over()?;
        }

        if let Some(segment) = self.current.as_mut() {
            segment.push(&data)?;
            self.frames_written += 1;
        }
        Ok(())
    }

    fn finish(&mut self) -> io::Result<Vec<PathBuf>> {
        if let Some(segment) = self.current.take() {
            self.completed.push(segment.close(&self.info)?);
            info!(
                frames = self.frames_written,
                segments = self.completed.len(),
                "AVI recording closed"
            );
        }
        Ok(std::mem::take(&mut self.completed))
    }
}

impl Drop for AviWriter {
    fn drop(&mut self) {
        if let Some(segment) = self.current.take() {
            if let Err(err) = segment.close(&self.info) {
                warn!(%err, "failed to close AVI segment");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::FrameMetadata;
    use std::time::Duration;

    fn frame(data: Vec<u8>, sequence: u32) -> Frame {
        Frame {
            data,
            metadata: FrameMetadata {
                sequence,
                timestamp: Duration::ZERO,
                bytes_used: 0,
            },
        }
    }

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        let mut word = [0u8; 4];
        word.copy_from_slice(&bytes[offset..offset + 4]);
        u32::from_le_bytes(word)
    }

    #[test]
    fn test_header_layout_and_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("clip.avi");
        let format = Format::new(4, 2, FourCC::YUYV);

        let mut writer = AviWriter::create(&path, &format, 20.0).expect("create");
        for seq in 0..3 {
            writer.write_frame(&frame(vec![seq as u8; 16], seq)).expect("write");
        }
        let files = writer.finish().expect("finish");
        assert_eq!(files, vec![path.clone()]);

        let bytes = std::fs::read(&path).expect("read back");
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(u32_at(&bytes, 4) as usize, bytes.len() - 8);
        assert_eq!(&bytes[8..12], b"AVI ");
        assert_eq!(u32_at(&bytes, 48), 3); // avih total frames
        assert_eq!(&bytes[112..116], b"YUY2"); // strh handler
        assert_eq!(u32_at(&bytes, 128), 1000); // scale
        assert_eq!(u32_at(&bytes, 132), 20_000); // rate
        assert_eq!(&bytes[220..224], b"movi");
        assert_eq!(u32_at(&bytes, 216), 4 + 3 * 24);

        let idx1 = HEADER_LEN + 3 * 24;
        assert_eq!(&bytes[idx1..idx1 + 4], b"idx1");
        assert_eq!(u32_at(&bytes, idx1 + 4), 48);
        // Second entry points at the second chunk, relative to 'movi'.
        assert_eq!(u32_at(&bytes, idx1 + 8 + 16 + 8), 4 + 24);
        assert_eq!(&bytes[HEADER_LEN + 24..HEADER_LEN + 28], b"00dc");
        assert_eq!(bytes[HEADER_LEN + 32], 1);
    }

    #[test]
    fn test_odd_chunks_are_padded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("grey.avi");
        let format = Format::new(3, 1, FourCC::GREY);

        let mut writer = AviWriter::create(&path, &format, 10.0).expect("create");
        writer.write_frame(&frame(vec![7, 8, 9], 0)).expect("write");
        writer.write_frame(&frame(vec![1, 2, 3], 1)).expect("write");
        writer.finish().expect("finish");

        let bytes = std::fs::read(&path).expect("read back");
        assert_eq!(u32_at(&bytes, 216), 4 + 2 * 12);
        assert_eq!(&bytes[HEADER_LEN + 12..HEADER_LEN + 16], b"00dc");
        let idx1 = HEADER_LEN + 24;
        assert_eq!(&bytes[idx1..idx1 + 4], b"idx1");
        assert_eq!(u32_at(&bytes, idx1 + 8 + 12), 3);
    }

    #[test]
    fn test_stride_padding_is_removed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("padded.avi");
        let mut format = Format::new(2, 2, FourCC::GREY);
        format.stride = 4;

        let mut writer = AviWriter::create(&path, &format, 10.0).expect("create");
        writer
            .write_frame(&frame(vec![1, 2, 0xEE, 0xEE, 3, 4, 0xEE, 0xEE], 0))
            .expect("write");
        writer.finish().expect("finish");

        let bytes = std::fs::read(&path).expect("read back");
        assert_eq!(u32_at(&bytes, HEADER_LEN + 4), 4);
        assert_eq!(&bytes[HEADER_LEN + 8..HEADER_LEN + 12], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_segments_roll_over_to_free_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("long.avi");
        let format = Format::new(4, 2, FourCC::YUYV);

        let mut writer = AviWriter::create(&path, &format, 30.0)
            .expect("create")
            .with_segment_limit(300);
        for seq in 0..3 {
            writer.write_frame(&frame(vec![0; 16], seq)).expect("write");
        }
        assert_eq!(writer.frames_written, 3);

        let files = writer.finish().expect("finish");
        assert_eq!(
            files,
            vec![
                path.clone(),
                dir.path().join("long_1.avi"),
                dir.path().join("long_2.avi"),
            ]
        );
        for file in &files {
            let bytes = std::fs::read(file).expect("read back");
            assert_eq!(u32_at(&bytes, 48), 1);
            assert_eq!(u32_at(&bytes, 4) as usize, bytes.len() - 8);
        }
    }

    #[test]
    fn test_finish_twice_and_write_after_finish() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("once.avi");
        let mut writer =
            AviWriter::create(&path, &Format::new(4, 2, FourCC::MJPG), 5.0).expect("create");

        assert_eq!(writer.finish().expect("finish").len(), 1);
        assert!(writer.finish().expect("second finish").is_empty());
        assert!(writer.write_frame(&frame(vec![0; 4], 0)).is_err());
    }

    #[test]
    fn test_rejects_unsupported_input() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rgb.avi");
        let err = AviWriter::create(&path, &Format::new(4, 2, FourCC::RGB3), 20.0)
            .err()
            .expect("RGB3 is not storable");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(!path.exists());

        assert!(AviWriter::create(&path, &Format::new(4, 2, FourCC::MJPG), 0.0).is_err());
    }
}
