use std::sync::Weak;

use thiserror::Error;

use crate::detection::domain::metadata_face::{MetadataFace, OutputRectTransform};
use crate::shared::frame::Frame;
use crate::shared::sample_buffer::{AudioFormat, AudioSample};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture source could not be opened: {0}")]
    Open(String),
    #[error("face detection is unavailable: {0}")]
    DetectionUnavailable(String),
    #[error("no sample sink is connected")]
    NotConnected,
}

/// Receives the three sample streams a capture source produces.
///
/// Each method is called from the source's own delivery thread. Calls for
/// one stream arrive in order; the streams are not ordered against each other.
pub trait SampleSink: Send + Sync {
    fn on_video_sample(&self, frame: Frame);
    fn on_audio_sample(&self, sample: AudioSample);
    fn on_face_detection_event(&self, faces: &[MetadataFace]);
}

/// Produces video, audio and face metadata for the pipeline.
pub trait CaptureSource: OutputRectTransform + Send + Sync {
    fn start_running(&self) -> Result<(), CaptureError>;

    fn stop_running(&self);

    /// Starts emitting face-detection events. Calling it again is a no-op.
    fn enable_face_detection(&self) -> Result<(), CaptureError>;

    /// Audio track layout, or `None` when the source has no audio.
    fn audio_format(&self) -> Option<AudioFormat>;

    /// Registers the sink that receives samples. Held weakly so the sink's
    /// owner can also own the source.
    fn connect(&self, sink: Weak<dyn SampleSink>);
}
