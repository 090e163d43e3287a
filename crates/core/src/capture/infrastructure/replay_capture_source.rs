use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::capture::domain::capture_source::{CaptureError, CaptureSource, SampleSink};
use crate::capture::infrastructure::detection_script::DetectionScript;
use crate::capture::infrastructure::ffmpeg_audio_reader::FfmpegAudioReader;
use crate::capture::infrastructure::ffmpeg_frame_reader::{FfmpegFrameReader, VideoStreamInfo};
use crate::detection::domain::metadata_face::{
    MetadataFace, NormalizedRectTransform, OutputRectTransform,
};
use crate::shared::face_region::FaceRegion;
use crate::shared::sample_buffer::AudioFormat;

#[derive(Clone, Debug, Default)]
pub struct ReplayOptions {
    /// Sleep between samples so delivery follows their timestamps.
    pub realtime: bool,
    /// Flip face metadata horizontally before mapping it to pixels.
    pub mirror_metadata: bool,
    pub detection_script: Option<DetectionScript>,
}

struct Replay {
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl Replay {
    fn is_finished(&self) -> bool {
        self.workers.iter().all(JoinHandle::is_finished)
    }

    fn join(self) {
        let current = thread::current().id();
        for worker in self.workers {
            // A sink may stop the source from inside a delivery callback.
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                log::error!("Replay worker panicked");
            }
        }
    }
}

/// Plays a media file through a [`SampleSink`] as if it came from a camera.
///
/// Video and audio are decoded and delivered on separate threads. Face
/// events come from an optional [`DetectionScript`] and are delivered on the
/// video thread just before the first frame at or after their time, once
/// face detection has been enabled.
pub struct ReplayCaptureSource {
    path: PathBuf,
    info: VideoStreamInfo,
    audio: Option<AudioFormat>,
    transform: NormalizedRectTransform,
    realtime: bool,
    script: Option<Arc<DetectionScript>>,
    sink: Mutex<Option<Weak<dyn SampleSink>>>,
    detection_enabled: Arc<AtomicBool>,
    replay: Mutex<Option<Replay>>,
}

impl ReplayCaptureSource {
    pub fn open(path: &Path, options: ReplayOptions) -> Result<Self, CaptureError> {
        let mut reader = FfmpegFrameReader::new();
        let info = reader
            .open(path)
            .map_err(|e| CaptureError::Open(format!("{}: {e}", path.display())))?;
        reader.close();

        let audio = FfmpegAudioReader::default()
            .probe(path)
            .map_err(|e| CaptureError::Open(format!("{}: {e}", path.display())))?;

        log::info!(
            "Replay source {}: {}x{} @ {:.2} fps, audio: {}",
            path.display(),
            info.width,
            info.height,
            info.fps,
            match audio {
                Some(f) => format!("{} Hz x{}", f.sample_rate, f.channels),
                None => "none".to_string(),
            }
        );

        Ok(Self {
            path: path.to_path_buf(),
            info,
            audio,
            transform: NormalizedRectTransform::new(info.width, info.height)
                .mirrored(options.mirror_metadata),
            realtime: options.realtime,
            script: options.detection_script.map(Arc::new),
            sink: Mutex::new(None),
            detection_enabled: Arc::new(AtomicBool::new(false)),
            replay: Mutex::new(None),
        })
    }

    pub fn video_info(&self) -> VideoStreamInfo {
        self.info
    }

    pub fn is_face_detection_enabled(&self) -> bool {
        self.detection_enabled.load(Ordering::Acquire)
    }

    /// Blocks until both delivery threads have run out of samples.
    pub fn wait_until_finished(&self) {
        let replay = self
            .replay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(replay) = replay {
            replay.join();
        }
    }

    fn spawn_video(
        &self,
        sink: Weak<dyn SampleSink>,
        stop: Arc<AtomicBool>,
        clock: Option<Instant>,
    ) -> JoinHandle<()> {
        let path = self.path.clone();
        let script = self.script.clone();
        let detection_enabled = Arc::clone(&self.detection_enabled);
        thread::spawn(move || {
            let mut reader = FfmpegFrameReader::new();
            if let Err(e) = reader.open(&path) {
                log::error!("Video replay could not reopen {}: {e}", path.display());
                return;
            }
            let mut cursor = script.as_deref().map(DetectionScript::cursor);
            let mut delivered = 0usize;

            for result in reader.frames() {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                let frame = match result {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::warn!("Skipping undecodable frame: {e}");
                        continue;
                    }
                };
                wait_for(clock, frame.pts());
                let Some(sink) = sink.upgrade() else {
                    break;
                };

                if let Some(cursor) = cursor.as_mut() {
                    for event in cursor.advance(frame.pts()) {
                        if detection_enabled.load(Ordering::Acquire) {
                            let faces: Vec<MetadataFace> =
                                event.faces.iter().copied().map(Into::into).collect();
                            sink.on_face_detection_event(&faces);
                        }
                    }
                }

                sink.on_video_sample(frame);
                delivered += 1;
            }
            log::info!("Video replay finished after {delivered} frame(s)");
        })
    }

    fn spawn_audio(
        &self,
        sink: Weak<dyn SampleSink>,
        stop: Arc<AtomicBool>,
        clock: Option<Instant>,
    ) -> JoinHandle<()> {
        let path = self.path.clone();
        thread::spawn(move || {
            let mut delivered = 0usize;
            let result = FfmpegAudioReader::default().read_chunks(&path, |chunk| {
                if stop.load(Ordering::Acquire) {
                    return ControlFlow::Break(());
                }
                wait_for(clock, chunk.pts());
                let Some(sink) = sink.upgrade() else {
                    return ControlFlow::Break(());
                };
                sink.on_audio_sample(chunk);
                delivered += 1;
                ControlFlow::Continue(())
            });
            match result {
                Ok(()) => log::info!("Audio replay finished after {delivered} chunk(s)"),
                Err(e) => log::error!("Audio replay failed: {e}"),
            }
        })
    }
}

fn wait_for(clock: Option<Instant>, pts: Duration) {
    if let Some(start) = clock {
        let due = start + pts;
        let now = Instant::now();
        if due > now {
            thread::sleep(due - now);
        }
    }
}

impl OutputRectTransform for ReplayCaptureSource {
    fn to_output_rect(&self, face: &MetadataFace) -> Option<FaceRegion> {
        self.transform.to_output_rect(face)
    }
}

impl CaptureSource for ReplayCaptureSource {
    fn start_running(&self) -> Result<(), CaptureError> {
        let mut replay = self.replay.lock().unwrap_or_else(PoisonError::into_inner);
        if replay.as_ref().is_some_and(|r| !r.is_finished()) {
            return Ok(());
        }
        if let Some(previous) = replay.take() {
            previous.join();
        }

        let sink = self
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(CaptureError::NotConnected)?;

        let stop = Arc::new(AtomicBool::new(false));
        let clock = self.realtime.then(Instant::now);
        let mut workers = vec![self.spawn_video(sink.clone(), Arc::clone(&stop), clock)];
        if self.audio.is_some() {
            workers.push(self.spawn_audio(sink, Arc::clone(&stop), clock));
        }

        log::info!("Replay of {} started", self.path.display());
        *replay = Some(Replay { stop, workers });
        Ok(())
    }

    fn stop_running(&self) {
        let replay = self
            .replay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(replay) = replay {
            replay.stop.store(true, Ordering::Release);
            replay.join();
            log::info!("Replay of {} stopped", self.path.display());
        }
    }

    fn enable_face_detection(&self) -> Result<(), CaptureError> {
        if self.script.is_none() {
            return Err(CaptureError::DetectionUnavailable(
                "no detection script was provided".into(),
            ));
        }
        if !self.detection_enabled.swap(true, Ordering::AcqRel) {
            log::info!("Face detection enabled");
        }
        Ok(())
    }

    fn audio_format(&self) -> Option<AudioFormat> {
        self.audio
    }

    fn connect(&self, sink: Weak<dyn SampleSink>) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }
}
