use std::path::{Path, PathBuf};
use std::time::Duration;

use ffmpeg_next::format::context::Output as OutputContext;
use ffmpeg_next::format::sample::Type as SampleLayout;
use ffmpeg_next::Rational;

use crate::recording::domain::muxing_writer::{AppendError, MuxingWriter, WriterConfig};
use crate::shared::frame::Frame;
use crate::shared::sample_buffer::{AudioFormat, AudioSample, SampleBuffer};

const VIDEO_TIME_BASE: Rational = Rational(1, 1000);
const FALLBACK_AUDIO_FRAME_SIZE: usize = 1024;

fn planar_f32() -> ffmpeg_next::format::Sample {
    ffmpeg_next::format::Sample::F32(SampleLayout::Planar)
}

fn channel_layout(channels: u16) -> Option<ffmpeg_next::ChannelLayout> {
    match channels {
        1 => Some(ffmpeg_next::ChannelLayout::MONO),
        2 => Some(ffmpeg_next::ChannelLayout::STEREO),
        _ => None,
    }
}

struct VideoTrack {
    encoder: ffmpeg_next::codec::encoder::video::Encoder,
    scaler: ffmpeg_next::software::scaling::Context,
    stream_index: usize,
    width: u32,
    height: u32,
    channels: u8,
    last_pts: Option<i64>,
}

struct AudioTrack {
    encoder: ffmpeg_next::codec::encoder::audio::Encoder,
    stream_index: usize,
    format: AudioFormat,
    layout: ffmpeg_next::ChannelLayout,
    frame_size: usize,
    /// Samples waiting for a full encoder frame, one buffer per channel.
    pending: Vec<Vec<f32>>,
    next_pts: Option<i64>,
}

/// Container whose tracks are set up; header already written.
struct Muxer {
    octx: OutputContext,
    video: VideoTrack,
    audio: Option<AudioTrack>,
    origin: Duration,
}

/// Writes an MPEG-4 file with one MPEG-4 Part 2 video track and an optional
/// AAC audio track via ffmpeg-next.
///
/// Track setup waits for the first video frame, whose dimensions fix the
/// encoder size and whose timestamp becomes time zero. Audio that arrives
/// before it is dropped. A failed container write invalidates the writer.
pub struct FfmpegMuxingWriter {
    destination: Option<PathBuf>,
    config: Option<WriterConfig>,
    /// Opened container awaiting its first video frame.
    pending: Option<OutputContext>,
    muxer: Option<Muxer>,
    invalidated: bool,
    finished: bool,
}

// Safety: FfmpegMuxingWriter is only used from a single thread at a time.
// The raw pointers inside ffmpeg types are not shared across threads.
unsafe impl Send for FfmpegMuxingWriter {}

impl FfmpegMuxingWriter {
    pub fn new() -> Self {
        Self {
            destination: None,
            config: None,
            pending: None,
            muxer: None,
            invalidated: false,
            finished: false,
        }
    }

    fn set_up_tracks(&mut self, first: &Frame) -> Result<(), Box<dyn std::error::Error>> {
        let mut octx = self.pending.take().ok_or("FfmpegMuxingWriter: not opened")?;
        let config = self.config.ok_or("FfmpegMuxingWriter: not opened")?;

        let global_header = octx
            .format()
            .flags()
            .contains(ffmpeg_next::format::Flags::GLOBAL_HEADER);

        let video = open_video_track(&mut octx, first, &config, global_header)?;
        let audio = match config.audio {
            Some(format) => Some(open_audio_track(&mut octx, format, &config, global_header)?),
            None => None,
        };

        octx.write_header()?;

        log::debug!(
            "Muxer ready: {}x{} video{}",
            video.width,
            video.height,
            if audio.is_some() { " + AAC audio" } else { "" }
        );

        self.muxer = Some(Muxer {
            octx,
            video,
            audio,
            origin: first.pts(),
        });
        Ok(())
    }

    fn invalidate(&mut self, reason: String) -> AppendError {
        self.invalidated = true;
        AppendError::WriterInvalidated(reason)
    }

    fn append_video(&mut self, frame: &Frame) -> Result<(), AppendError> {
        if self.muxer.is_none() {
            if let Err(e) = self.set_up_tracks(frame) {
                return Err(self.invalidate(format!("track setup failed: {e}")));
            }
        }
        let Some(muxer) = self.muxer.as_mut() else {
            return Err(AppendError::Transient("FfmpegMuxingWriter: not opened".into()));
        };
        let result = muxer.write_video(frame);
        self.classify(result)
    }

    fn append_audio(&mut self, sample: &AudioSample) -> Result<(), AppendError> {
        let Some(muxer) = self.muxer.as_mut() else {
            log::trace!("Dropping audio at {:?} before the first video frame", sample.pts());
            return Ok(());
        };
        let result = muxer.write_audio(sample);
        self.classify(result)
    }

    fn classify(&mut self, result: Result<(), WriteFailure>) -> Result<(), AppendError> {
        match result {
            Ok(()) => Ok(()),
            Err(WriteFailure::Sample(reason)) => Err(AppendError::Transient(reason)),
            Err(WriteFailure::Container(reason)) => Err(self.invalidate(reason)),
        }
    }
}

impl Default for FfmpegMuxingWriter {
    fn default() -> Self {
        Self::new()
    }
}

enum WriteFailure {
    /// This sample could not be encoded.
    Sample(String),
    /// The container rejected a write; the file is unusable.
    Container(String),
}

fn open_video_track(
    octx: &mut OutputContext,
    first: &Frame,
    config: &WriterConfig,
    global_header: bool,
) -> Result<VideoTrack, Box<dyn std::error::Error>> {
    let (width, height) = (first.width(), first.height());
    let source_format = match first.channels() {
        3 => ffmpeg_next::format::Pixel::RGB24,
        4 => ffmpeg_next::format::Pixel::RGBA,
        n => return Err(format!("unsupported channel count {n}").into()),
    };

    // Use MPEG4 as a widely compatible encoder
    let codec = ffmpeg_next::encoder::find(ffmpeg_next::codec::Id::MPEG4)
        .ok_or("MPEG4 encoder not found")?;
    let mut ost = octx.add_stream(Some(codec))?;
    let stream_index = ost.index();

    let mut encoder_ctx = ffmpeg_next::codec::context::Context::new_with_codec(codec)
        .encoder()
        .video()?;
    encoder_ctx.set_width(width);
    encoder_ctx.set_height(height);
    encoder_ctx.set_format(ffmpeg_next::format::Pixel::YUV420P);
    encoder_ctx.set_time_base(VIDEO_TIME_BASE);
    encoder_ctx.set_bit_rate(config.video_bit_rate);
    if global_header {
        encoder_ctx.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
    }

    let encoder = encoder_ctx.open_with(ffmpeg_next::Dictionary::new())?;
    ost.set_parameters(&encoder);

    let scaler = ffmpeg_next::software::scaling::Context::get(
        source_format,
        width,
        height,
        ffmpeg_next::format::Pixel::YUV420P,
        width,
        height,
        ffmpeg_next::software::scaling::Flags::BILINEAR,
    )?;

    Ok(VideoTrack {
        encoder,
        scaler,
        stream_index,
        width,
        height,
        channels: first.channels(),
        last_pts: None,
    })
}

fn open_audio_track(
    octx: &mut OutputContext,
    format: AudioFormat,
    config: &WriterConfig,
    global_header: bool,
) -> Result<AudioTrack, Box<dyn std::error::Error>> {
    let layout = channel_layout(format.channels)
        .ok_or_else(|| format!("unsupported audio channel count {}", format.channels))?;

    let aac_codec = ffmpeg_next::encoder::find(ffmpeg_next::codec::Id::AAC)
        .ok_or("AAC encoder not found")?;
    let mut ost = octx.add_stream(Some(aac_codec))?;
    let stream_index = ost.index();

    let mut encoder_ctx = ffmpeg_next::codec::context::Context::new_with_codec(aac_codec)
        .encoder()
        .audio()?;
    encoder_ctx.set_rate(format.sample_rate as i32);
    encoder_ctx.set_channel_layout(layout);
    encoder_ctx.set_format(planar_f32());
    encoder_ctx.set_bit_rate(config.audio_bit_rate);
    encoder_ctx.set_time_base(Rational(1, format.sample_rate as i32));
    if global_header {
        encoder_ctx.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
    }

    let encoder = encoder_ctx.open_as(aac_codec)?;
    ost.set_parameters(&encoder);

    let frame_size = match encoder.frame_size() as usize {
        0 => FALLBACK_AUDIO_FRAME_SIZE,
        n => n,
    };

    Ok(AudioTrack {
        encoder,
        stream_index,
        format,
        layout,
        frame_size,
        pending: vec![Vec::new(); format.channels as usize],
        next_pts: None,
    })
}

/// Moves every ready packet from `encoder` into the container.
fn drain_packets(
    encoder: &mut ffmpeg_next::encoder::Encoder,
    octx: &mut OutputContext,
    stream_index: usize,
    encoder_time_base: Rational,
) -> Result<(), WriteFailure> {
    let stream_time_base = octx
        .stream(stream_index)
        .map(|s| s.time_base())
        .ok_or_else(|| WriteFailure::Container(format!("stream {stream_index} missing")))?;
    let mut encoded = ffmpeg_next::Packet::empty();
    while encoder.receive_packet(&mut encoded).is_ok() {
        encoded.set_stream(stream_index);
        encoded.rescale_ts(encoder_time_base, stream_time_base);
        encoded
            .write_interleaved(octx)
            .map_err(|e| WriteFailure::Container(format!("container write failed: {e}")))?;
    }
    Ok(())
}

impl Muxer {
    fn write_video(&mut self, frame: &Frame) -> Result<(), WriteFailure> {
        let track = &mut self.video;
        if (frame.width(), frame.height(), frame.channels())
            != (track.width, track.height, track.channels)
        {
            return Err(WriteFailure::Sample(format!(
                "frame layout {}x{}x{} differs from the track's {}x{}x{}",
                frame.width(),
                frame.height(),
                frame.channels(),
                track.width,
                track.height,
                track.channels
            )));
        }

        let source_format = if track.channels == 4 {
            ffmpeg_next::format::Pixel::RGBA
        } else {
            ffmpeg_next::format::Pixel::RGB24
        };
        let mut src_frame =
            ffmpeg_next::util::frame::video::Video::new(source_format, track.width, track.height);

        // Copy pixel data, respecting stride
        let row_bytes = track.width as usize * track.channels as usize;
        let stride = src_frame.stride(0);
        let data = src_frame.data_mut(0);
        for (row, src_row) in frame.data().chunks_exact(row_bytes).enumerate() {
            let dst_start = row * stride;
            data[dst_start..dst_start + row_bytes].copy_from_slice(src_row);
        }

        let mut yuv_frame = ffmpeg_next::util::frame::video::Video::empty();
        track
            .scaler
            .run(&src_frame, &mut yuv_frame)
            .map_err(|e| WriteFailure::Sample(format!("pixel conversion failed: {e}")))?;

        // Encoder timestamps must strictly increase.
        let mut pts = frame.pts().saturating_sub(self.origin).as_millis() as i64;
        if let Some(last) = track.last_pts {
            pts = pts.max(last + 1);
        }
        track.last_pts = Some(pts);
        yuv_frame.set_pts(Some(pts));

        track
            .encoder
            .send_frame(&yuv_frame)
            .map_err(|e| WriteFailure::Sample(format!("video encode failed: {e}")))?;
        drain_packets(
            &mut track.encoder,
            &mut self.octx,
            track.stream_index,
            VIDEO_TIME_BASE,
        )
    }

    fn write_audio(&mut self, sample: &AudioSample) -> Result<(), WriteFailure> {
        let Some(track) = self.audio.as_mut() else {
            return Err(WriteFailure::Sample("recording has no audio track".into()));
        };
        if sample.format() != track.format {
            return Err(WriteFailure::Sample(format!(
                "audio format {:?} differs from the track's {:?}",
                sample.format(),
                track.format
            )));
        }
        if sample.pts() < self.origin {
            log::trace!("Dropping audio at {:?} before time zero", sample.pts());
            return Ok(());
        }

        if track.next_pts.is_none() {
            let offset = (sample.pts() - self.origin).as_secs_f64();
            track.next_pts = Some((offset * track.format.sample_rate as f64).round() as i64);
        }

        let channels = track.pending.len();
        for frame in sample.samples().chunks_exact(channels) {
            for (plane, value) in track.pending.iter_mut().zip(frame) {
                plane.push(*value);
            }
        }

        while track.pending[0].len() >= track.frame_size {
            let n = track.frame_size;
            encode_audio_frame(track, &mut self.octx, n)?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(track) = self.audio.as_mut() {
            let remaining = track.pending[0].len();
            if remaining > 0 {
                encode_audio_frame(track, &mut self.octx, remaining).map_err(failure_message)?;
            }
            track.encoder.send_eof()?;
            let time_base = Rational(1, track.format.sample_rate as i32);
            drain_packets(&mut track.encoder, &mut self.octx, track.stream_index, time_base)
                .map_err(failure_message)?;
        }

        self.video.encoder.send_eof()?;
        drain_packets(
            &mut self.video.encoder,
            &mut self.octx,
            self.video.stream_index,
            VIDEO_TIME_BASE,
        )
        .map_err(failure_message)?;

        self.octx.write_trailer()?;
        Ok(())
    }
}

fn failure_message(failure: WriteFailure) -> Box<dyn std::error::Error> {
    match failure {
        WriteFailure::Sample(reason) | WriteFailure::Container(reason) => reason.into(),
    }
}

/// Encodes the first `n` pending samples of every channel as one frame.
fn encode_audio_frame(
    track: &mut AudioTrack,
    octx: &mut OutputContext,
    n: usize,
) -> Result<(), WriteFailure> {
    let mut frame = ffmpeg_next::util::frame::audio::Audio::new(planar_f32(), n, track.layout);
    frame.set_rate(track.format.sample_rate);
    let pts = track.next_pts.unwrap_or(0);
    frame.set_pts(Some(pts));

    for (ch, plane) in track.pending.iter_mut().enumerate() {
        let samples: Vec<f32> = plane.drain(..n).collect();
        let bytes: &[u8] = bytemuck::cast_slice(&samples);
        frame.data_mut(ch)[..bytes.len()].copy_from_slice(bytes);
    }
    track.next_pts = Some(pts + n as i64);

    track
        .encoder
        .send_frame(&frame)
        .map_err(|e| WriteFailure::Sample(format!("audio encode failed: {e}")))?;
    let time_base = Rational(1, track.format.sample_rate as i32);
    drain_packets(&mut track.encoder, octx, track.stream_index, time_base)
}

impl MuxingWriter for FfmpegMuxingWriter {
    fn open(
        &mut self,
        destination: &Path,
        config: &WriterConfig,
    ) -> Result<(), Box<dyn std::error::Error>> {
        ffmpeg_next::init()?;

        if let Some(format) = config.audio {
            channel_layout(format.channels)
                .ok_or_else(|| format!("unsupported audio channel count {}", format.channels))?;
        }

        let octx = ffmpeg_next::format::output(destination)?;

        self.destination = Some(destination.to_path_buf());
        self.config = Some(*config);
        self.pending = Some(octx);
        self.muxer = None;
        self.invalidated = false;
        self.finished = false;
        Ok(())
    }

    fn append(&mut self, sample: &SampleBuffer) -> Result<(), AppendError> {
        if self.invalidated {
            return Err(AppendError::WriterInvalidated(
                "writer already invalidated".into(),
            ));
        }
        if self.pending.is_none() && self.muxer.is_none() {
            return Err(AppendError::Transient("FfmpegMuxingWriter: not opened".into()));
        }
        match sample {
            SampleBuffer::Video(frame) => self.append_video(frame),
            SampleBuffer::Audio(audio) => self.append_audio(audio),
        }
    }

    fn finalize(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if self.finished {
            return Ok(());
        }
        if let Some(muxer) = self.muxer.take() {
            self.finished = true;
            return muxer.finish();
        }
        if let Some(octx) = self.pending.take() {
            self.finished = true;
            drop(octx);
            if let Some(path) = self.destination.as_ref() {
                let _ = std::fs::remove_file(path);
            }
            return Err("no video frames were recorded".into());
        }
        Err("FfmpegMuxingWriter: not opened".into())
    }
}
