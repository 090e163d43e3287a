use std::path::Path;
use std::time::Duration;

use ffmpeg_next::Rational;

use crate::shared::frame::Frame;

/// Geometry and nominal rate of a decoded video stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VideoStreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Decodes video frames via ffmpeg-next into RGBA [`Frame`]s stamped with
/// their presentation time relative to the stream start.
pub struct FfmpegFrameReader {
    input_ctx: Option<ffmpeg_next::format::context::Input>,
    video_stream_index: usize,
    time_base: Rational,
    start_time: i64,
    info: Option<VideoStreamInfo>,
}

// Safety: FfmpegFrameReader is only used from a single thread at a time.
// The raw pointers inside ffmpeg types are not shared across threads.
unsafe impl Send for FfmpegFrameReader {}

impl FfmpegFrameReader {
    pub fn new() -> Self {
        Self {
            input_ctx: None,
            video_stream_index: 0,
            time_base: Rational(1, 1),
            start_time: 0,
            info: None,
        }
    }

    pub fn open(&mut self, path: &Path) -> Result<VideoStreamInfo, Box<dyn std::error::Error>> {
        ffmpeg_next::init()?;

        let ictx = ffmpeg_next::format::input(path)?;

        let stream = ictx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or("No video stream found")?;

        let video_stream_index = stream.index();
        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = codec_ctx.decoder().video()?;

        let rate = stream.avg_frame_rate();
        let fps = if rate.denominator() != 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            0.0
        };

        let info = VideoStreamInfo {
            width: decoder.width(),
            height: decoder.height(),
            fps,
        };

        self.video_stream_index = video_stream_index;
        self.time_base = stream.time_base();
        // AV_NOPTS_VALUE is i64::MIN
        self.start_time = stream.start_time().max(0);
        self.info = Some(info);
        self.input_ctx = Some(ictx);

        Ok(info)
    }

    pub fn info(&self) -> Option<VideoStreamInfo> {
        self.info
    }

    pub fn frames(
        &mut self,
    ) -> Box<dyn Iterator<Item = Result<Frame, Box<dyn std::error::Error>>> + '_> {
        match self.frame_iter() {
            Ok(iter) => Box::new(iter),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }

    pub fn close(&mut self) {
        self.input_ctx = None;
        self.info = None;
    }

    fn frame_iter(&mut self) -> Result<FrameIter<'_>, Box<dyn std::error::Error>> {
        let fps = self.info.map(|i| i.fps).unwrap_or(0.0);
        let ictx = self
            .input_ctx
            .as_mut()
            .ok_or("FfmpegFrameReader: not opened")?;

        let parameters = ictx
            .stream(self.video_stream_index)
            .ok_or("video stream disappeared")?
            .parameters();
        let decoder = ffmpeg_next::codec::context::Context::from_parameters(parameters)?
            .decoder()
            .video()?;

        let width = decoder.width();
        let height = decoder.height();

        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg_next::format::Pixel::RGBA,
            width,
            height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )?;

        Ok(FrameIter {
            ictx,
            decoder,
            scaler,
            width,
            height,
            video_stream_index: self.video_stream_index,
            clock: StreamClock {
                time_base: self.time_base,
                start_time: self.start_time,
                fps,
            },
            frame_index: 0,
            flushing: false,
            done: false,
        })
    }
}

impl Default for FfmpegFrameReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts stream timestamps to offsets from the stream start.
#[derive(Clone, Copy, Debug)]
struct StreamClock {
    time_base: Rational,
    start_time: i64,
    fps: f64,
}

impl StreamClock {
    fn pts(&self, timestamp: Option<i64>, frame_index: usize) -> Duration {
        match timestamp {
            Some(ts) if self.time_base.denominator() != 0 => {
                let ticks = ts.saturating_sub(self.start_time).max(0) as f64;
                Duration::from_secs_f64(
                    ticks * self.time_base.numerator() as f64
                        / self.time_base.denominator() as f64,
                )
            }
            _ if self.fps > 0.0 => Duration::from_secs_f64(frame_index as f64 / self.fps),
            _ => Duration::ZERO,
        }
    }
}

/// Decodes lazily, one frame per `next`.
struct FrameIter<'a> {
    ictx: &'a mut ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    width: u32,
    height: u32,
    video_stream_index: usize,
    clock: StreamClock,
    frame_index: usize,
    flushing: bool,
    done: bool,
}

impl FrameIter<'_> {
    fn try_receive(&mut self) -> Option<Result<Frame, Box<dyn std::error::Error>>> {
        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_ok() {
            let mut rgba_frame = ffmpeg_next::util::frame::video::Video::empty();
            if let Err(e) = self.scaler.run(&decoded, &mut rgba_frame) {
                return Some(Err(Box::new(e)));
            }

            let pixels = extract_rgba_pixels(&rgba_frame, self.width, self.height);
            let pts = self.clock.pts(decoded.timestamp(), self.frame_index);
            self.frame_index += 1;
            Some(Ok(Frame::new(pixels, self.width, self.height, 4, pts)))
        } else {
            None
        }
    }
}

impl Iterator for FrameIter<'_> {
    type Item = Result<Frame, Box<dyn std::error::Error>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if let Some(result) = self.try_receive() {
            return Some(result);
        }

        if self.flushing {
            self.done = true;
            return None;
        }

        loop {
            let Some((stream, packet)) = self.ictx.packets().next() else {
                let _ = self.decoder.send_eof();
                self.flushing = true;
                if let Some(result) = self.try_receive() {
                    return Some(result);
                }
                self.done = true;
                return None;
            };

            if stream.index() != self.video_stream_index {
                continue;
            }

            if self.decoder.send_packet(&packet).is_err() {
                continue;
            }

            if let Some(result) = self.try_receive() {
                return Some(result);
            }
        }
    }
}

/// Copies an RGBA ffmpeg frame into a tightly packed buffer, dropping row
/// padding.
fn extract_rgba_pixels(
    rgba_frame: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let stride = rgba_frame.stride(0);
    let data = rgba_frame.data(0);
    let row_bytes = width as usize * 4;

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let row_start = row * stride;
        pixels.extend_from_slice(&data[row_start..row_start + row_bytes]);
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::domain::muxing_writer::{MuxingWriter, WriterConfig};
    use crate::recording::infrastructure::ffmpeg_muxing_writer::FfmpegMuxingWriter;
    use crate::shared::sample_buffer::SampleBuffer;
    use std::path::PathBuf;

    fn create_test_video(dir: &Path, num_frames: u64, width: u32, height: u32) -> PathBuf {
        let path = dir.join("input.mp4");
        let mut writer = FfmpegMuxingWriter::new();
        writer.open(&path, &WriterConfig::new(None)).unwrap();
        for i in 0..num_frames {
            let value = ((i * 40) % 256) as u8;
            let data = vec![value; (width * height * 3) as usize];
            let frame = Frame::new(data, width, height, 3, Duration::from_millis(i * 40));
            writer.append(&SampleBuffer::Video(frame)).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn test_open_returns_stream_info() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_test_video(dir.path(), 5, 160, 120);

        let mut reader = FfmpegFrameReader::new();
        let info = reader.open(&path).unwrap();
        assert_eq!((info.width, info.height), (160, 120));
        assert_eq!(reader.info(), Some(info));
    }

    #[test]
    fn test_open_nonexistent_raises() {
        let mut reader = FfmpegFrameReader::new();
        assert!(reader.open(Path::new("/nonexistent/test.mp4")).is_err());
    }

    #[test]
    fn test_frames_yields_every_frame_as_rgba() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_test_video(dir.path(), 5, 160, 120);

        let mut reader = FfmpegFrameReader::new();
        reader.open(&path).unwrap();

        let frames: Vec<Frame> = reader.frames().map(|f| f.unwrap()).collect();
        assert_eq!(frames.len(), 5);
        for frame in &frames {
            assert_eq!(frame.channels(), 4);
            assert_eq!(frame.data().len(), 160 * 120 * 4);
        }
    }

    #[test]
    fn test_frame_timestamps_increase_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_test_video(dir.path(), 5, 64, 48);

        let mut reader = FfmpegFrameReader::new();
        reader.open(&path).unwrap();

        let pts: Vec<Duration> = reader.frames().map(|f| f.unwrap().pts()).collect();
        assert!(pts[0] < Duration::from_millis(20));
        assert!(pts.windows(2).all(|w| w[0] < w[1]));
        assert!(pts[4] >= Duration::from_millis(140));
    }

    #[test]
    fn test_frames_without_open_returns_error() {
        let mut reader = FfmpegFrameReader::new();
        let result = reader.frames().next().unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn test_clock_falls_back_to_frame_rate() {
        let clock = StreamClock {
            time_base: Rational(1, 1000),
            start_time: 0,
            fps: 25.0,
        };
        assert_eq!(clock.pts(None, 50), Duration::from_secs(2));
        assert_eq!(clock.pts(Some(1500), 0), Duration::from_millis(1500));
    }

    #[test]
    fn test_clock_rebases_on_start_time() {
        let clock = StreamClock {
            time_base: Rational(1, 90_000),
            start_time: 9_000,
            fps: 0.0,
        };
        assert_eq!(clock.pts(Some(9_000), 0), Duration::ZERO);
        assert_eq!(clock.pts(Some(99_000), 0), Duration::from_secs(1));
        assert_eq!(clock.pts(Some(0), 0), Duration::ZERO);
    }

    #[test]
    fn test_close_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_test_video(dir.path(), 1, 64, 48);

        let mut reader = FfmpegFrameReader::new();
        reader.open(&path).unwrap();
        reader.close();
        reader.close();
        assert!(reader.info().is_none());
    }
}
