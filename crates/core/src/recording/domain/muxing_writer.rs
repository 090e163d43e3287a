use std::path::Path;

use thiserror::Error;

use crate::shared::constants::{DEFAULT_AUDIO_BIT_RATE, DEFAULT_VIDEO_BIT_RATE};
use crate::shared::sample_buffer::{AudioFormat, SampleBuffer};

/// Track layout and encoder settings for one output file.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WriterConfig {
    /// Audio track format, or `None` for a video-only file.
    pub audio: Option<AudioFormat>,
    pub video_bit_rate: usize,
    pub audio_bit_rate: usize,
}

impl WriterConfig {
    pub fn new(audio: Option<AudioFormat>) -> Self {
        Self {
            audio,
            video_bit_rate: DEFAULT_VIDEO_BIT_RATE,
            audio_bit_rate: DEFAULT_AUDIO_BIT_RATE,
        }
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }
}

#[derive(Debug, Error)]
pub enum AppendError {
    /// The sample was dropped; the writer remains usable.
    #[error("sample dropped: {0}")]
    Transient(String),
    /// The writer can accept no further samples.
    #[error("writer invalidated: {0}")]
    WriterInvalidated(String),
}

/// Interleaves video and audio samples into one container file.
///
/// `open` is called once, `append` any number of times in arrival order per
/// track, and `finalize` once to flush encoders and write the trailer.
pub trait MuxingWriter: Send {
    fn open(
        &mut self,
        destination: &Path,
        config: &WriterConfig,
    ) -> Result<(), Box<dyn std::error::Error>>;

    fn append(&mut self, sample: &SampleBuffer) -> Result<(), AppendError>;

    fn finalize(&mut self) -> Result<(), Box<dyn std::error::Error>>;
}

/// Builds a fresh writer for each recording session.
pub type WriterFactory = Box<dyn Fn() -> Box<dyn MuxingWriter> + Send + Sync>;
