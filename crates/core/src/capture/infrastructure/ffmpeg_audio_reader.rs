use std::ops::ControlFlow;
use std::path::Path;
use std::time::Duration;

use crate::shared::sample_buffer::{AudioFormat, AudioSample};

/// Decodes the audio track of a media file into interleaved f32 chunks.
///
/// Sources with more than two channels are downmixed to stereo.
pub struct FfmpegAudioReader {
    chunk_frames: usize,
}

impl FfmpegAudioReader {
    pub fn new(chunk_frames: usize) -> Self {
        Self {
            chunk_frames: chunk_frames.max(1),
        }
    }

    /// Returns the format chunks will be delivered in, or `None` if the file
    /// has no audio track.
    pub fn probe(&self, path: &Path) -> Result<Option<AudioFormat>, Box<dyn std::error::Error>> {
        ffmpeg_next::init()?;

        let ictx = ffmpeg_next::format::input(path)?;

        let audio_stream = match ictx.streams().best(ffmpeg_next::media::Type::Audio) {
            Some(stream) => stream,
            None => return Ok(None),
        };

        let codec_ctx =
            ffmpeg_next::codec::context::Context::from_parameters(audio_stream.parameters())?;
        let decoder = codec_ctx.decoder().audio()?;

        Ok(Some(output_format(decoder.rate(), decoder.channels() as u16)))
    }

    /// Decodes the whole track, handing each chunk to `on_chunk` in order.
    /// Decoding stops early when `on_chunk` returns `Break`.
    pub fn read_chunks(
        &self,
        path: &Path,
        mut on_chunk: impl FnMut(AudioSample) -> ControlFlow<()>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        ffmpeg_next::init()?;

        let mut ictx = ffmpeg_next::format::input(path)?;

        let audio_stream = match ictx.streams().best(ffmpeg_next::media::Type::Audio) {
            Some(stream) => stream,
            None => return Ok(()),
        };

        let audio_stream_index = audio_stream.index();
        let codec_ctx =
            ffmpeg_next::codec::context::Context::from_parameters(audio_stream.parameters())?;
        let mut decoder = codec_ctx.decoder().audio()?;

        let format = output_format(decoder.rate(), decoder.channels() as u16);
        let layout = if format.channels == 1 {
            ffmpeg_next::ChannelLayout::MONO
        } else {
            ffmpeg_next::ChannelLayout::STEREO
        };

        let mut resampler = ffmpeg_next::software::resampling::Context::get(
            decoder.format(),
            decoder.channel_layout(),
            decoder.rate(),
            ffmpeg_next::format::Sample::F32(ffmpeg_next::format::sample::Type::Packed),
            layout,
            format.sample_rate,
        )?;

        let mut chunker = Chunker::new(format, self.chunk_frames);
        let mut decoded_frame = ffmpeg_next::util::frame::audio::Audio::empty();
        let mut resampled_frame = ffmpeg_next::util::frame::audio::Audio::empty();

        for (stream, packet) in ictx.packets() {
            if stream.index() != audio_stream_index {
                continue;
            }

            decoder.send_packet(&packet)?;

            while decoder.receive_frame(&mut decoded_frame).is_ok() {
                resampler.run(&decoded_frame, &mut resampled_frame)?;
                if chunker.push(&resampled_frame, &mut on_chunk).is_break() {
                    return Ok(());
                }
            }
        }

        // Flush the decoder
        decoder.send_eof()?;
        while decoder.receive_frame(&mut decoded_frame).is_ok() {
            resampler.run(&decoded_frame, &mut resampled_frame)?;
            if chunker.push(&resampled_frame, &mut on_chunk).is_break() {
                return Ok(());
            }
        }

        // Flush the resampler (may have buffered samples)
        if let Ok(Some(delay)) = resampler.flush(&mut resampled_frame) {
            if delay.output > 0 && chunker.push(&resampled_frame, &mut on_chunk).is_break() {
                return Ok(());
            }
        }

        chunker.finish(&mut on_chunk);
        Ok(())
    }
}

impl Default for FfmpegAudioReader {
    fn default() -> Self {
        Self::new(crate::shared::constants::AUDIO_CHUNK_FRAMES)
    }
}

fn output_format(sample_rate: u32, source_channels: u16) -> AudioFormat {
    AudioFormat {
        sample_rate,
        channels: source_channels.clamp(1, 2),
    }
}

/// Regroups resampled frames into fixed-size chunks with running timestamps.
struct Chunker {
    format: AudioFormat,
    chunk_len: usize,
    buffer: Vec<f32>,
    emitted_frames: u64,
}

impl Chunker {
    fn new(format: AudioFormat, chunk_frames: usize) -> Self {
        Self {
            format,
            chunk_len: chunk_frames * format.channels as usize,
            buffer: Vec::new(),
            emitted_frames: 0,
        }
    }

    fn push(
        &mut self,
        frame: &ffmpeg_next::util::frame::audio::Audio,
        on_chunk: &mut impl FnMut(AudioSample) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        let value_count = frame.samples() * self.format.channels as usize;
        if value_count == 0 {
            return ControlFlow::Continue(());
        }
        let bytes = &frame.data(0)[..value_count * std::mem::size_of::<f32>()];
        self.extend(&bytemuck::pod_collect_to_vec::<u8, f32>(bytes), on_chunk)
    }

    fn extend(
        &mut self,
        values: &[f32],
        on_chunk: &mut impl FnMut(AudioSample) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        self.buffer.extend_from_slice(values);
        while self.buffer.len() >= self.chunk_len {
            let chunk: Vec<f32> = self.buffer.drain(..self.chunk_len).collect();
            if self.emit(chunk, on_chunk).is_break() {
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn finish(&mut self, on_chunk: &mut impl FnMut(AudioSample) -> ControlFlow<()>) {
        let channels = self.format.channels as usize;
        let whole = self.buffer.len() - self.buffer.len() % channels;
        if whole > 0 {
            let chunk: Vec<f32> = self.buffer.drain(..whole).collect();
            let _ = self.emit(chunk, on_chunk);
        }
    }

    fn emit(
        &mut self,
        chunk: Vec<f32>,
        on_chunk: &mut impl FnMut(AudioSample) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        let pts = Duration::from_nanos(
            self.emitted_frames * 1_000_000_000 / self.format.sample_rate.max(1) as u64,
        );
        let sample = AudioSample::new(chunk, self.format, pts);
        self.emitted_frames += sample.frame_count() as u64;
        on_chunk(sample)
    }
}
