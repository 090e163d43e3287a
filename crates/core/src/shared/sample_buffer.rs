use std::sync::Arc;
use std::time::Duration;

use super::frame::Frame;

/// Sample rate and channel count of an audio stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// A chunk of interleaved PCM samples normalized to [-1.0, 1.0].
#[derive(Clone, Debug)]
pub struct AudioSample {
    samples: Arc<[f32]>,
    format: AudioFormat,
    pts: Duration,
}

impl AudioSample {
    pub fn new(samples: Vec<f32>, format: AudioFormat, pts: Duration) -> Self {
        debug_assert!(format.channels > 0, "audio needs at least one channel");
        Self {
            samples: samples.into(),
            format,
            pts,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn pts(&self) -> Duration {
        self.pts
    }

    /// Samples per channel.
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.format.channels.max(1) as usize
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frame_count() as f64 / self.format.sample_rate.max(1) as f64)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// One timestamped media sample headed for the muxer.
#[derive(Clone, Debug)]
pub enum SampleBuffer {
    Video(Frame),
    Audio(AudioSample),
}

impl SampleBuffer {
    pub fn track_kind(&self) -> TrackKind {
        match self {
            SampleBuffer::Video(_) => TrackKind::Video,
            SampleBuffer::Audio(_) => TrackKind::Audio,
        }
    }

    pub fn pts(&self) -> Duration {
        match self {
            SampleBuffer::Video(frame) => frame.pts(),
            SampleBuffer::Audio(audio) => audio.pts(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEREO_48K: AudioFormat = AudioFormat {
        sample_rate: 48_000,
        channels: 2,
    };

    #[test]
    fn test_frame_count_divides_by_channels() {
        let sample = AudioSample::new(vec![0.0; 2048], STEREO_48K, Duration::ZERO);
        assert_eq!(sample.frame_count(), 1024);
    }

    #[test]
    fn test_duration_from_frames() {
        let sample = AudioSample::new(vec![0.0; 96_000], STEREO_48K, Duration::ZERO);
        assert_eq!(sample.duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_sample_buffer_kind_and_pts() {
        let pts = Duration::from_millis(33);
        let video = SampleBuffer::Video(Frame::new(vec![0; 3], 1, 1, 3, pts));
        let audio = SampleBuffer::Audio(AudioSample::new(vec![0.0; 2], STEREO_48K, pts));
        assert_eq!(video.track_kind(), TrackKind::Video);
        assert_eq!(audio.track_kind(), TrackKind::Audio);
        assert_eq!(video.pts(), pts);
        assert_eq!(audio.pts(), pts);
    }
}
