use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, TryLockError, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::capture::domain::capture_source::{CaptureSource, SampleSink};
use crate::detection::domain::face_region_tracker::FaceRegionTracker;
use crate::detection::domain::metadata_face::MetadataFace;
use crate::effects::domain::effect_variant::{EffectParams, EffectVariant, Filter};
use crate::pipeline::control_queue::ControlQueue;
use crate::pipeline::pipeline_logger::{
    PipelineLogger, METRIC_DROPPED_FRAMES, METRIC_FACES, STAGE_APPEND, STAGE_EFFECT, STAGE_RENDER,
};
use crate::recording::domain::muxing_writer::WriterFactory;
use crate::recording::domain::recording_controller::{
    RecorderConfig, RecordingController, RecordingPhase, StopOutcome,
};
use crate::recording::domain::recording_error::RecordingError;
use crate::recording::domain::recording_session::RecordingSession;
use crate::rendering::domain::image_renderer::{ImageRenderer, PreviewImage};
use crate::shared::event_bus::{EventBus, PipelineEvent};
use crate::shared::face_region::FaceRegion;
use crate::shared::frame::Frame;
use crate::shared::sample_buffer::{AudioSample, SampleBuffer};
use crate::shared::session_state::{SessionState, SessionStateStore};
use crate::shared::settings::PipelineSettings;

/// Startup configuration for a [`CapturePipeline`].
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    pub initial_effect: EffectVariant,
    pub effect_params: EffectParams,
    pub mirrored: bool,
    pub recorder: RecorderConfig,
}

impl PipelineConfig {
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            initial_effect: settings.initial_effect,
            effect_params: EffectParams {
                pixellate_cell_size: settings.pixellate_cell_size,
            },
            mirrored: settings.mirrored,
            recorder: RecorderConfig {
                directory: settings.recording_dir(),
                extension: settings.container_extension.clone(),
                video_bit_rate: settings.video_bit_rate,
            },
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_settings(&PipelineSettings::default())
    }
}

struct ActiveEffect {
    variant: EffectVariant,
    filter: Filter,
}

fn ms(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

/// Connects a capture source to the effect, render and recording stages
/// and exposes the control surface to the presentation layer.
///
/// Video frames flow tracker → effect → render → recorder → preview on the
/// capture source's video thread. A frame that arrives while the previous
/// one is still in flight is dropped. Audio goes straight to the recorder.
/// Capture and detection control runs on a serial control thread so
/// callers never block on the capture source.
pub struct CapturePipeline {
    source: Arc<dyn CaptureSource>,
    renderer: Arc<dyn ImageRenderer>,
    tracker: Arc<FaceRegionTracker>,
    effect: RwLock<ActiveEffect>,
    effect_params: EffectParams,
    detection_armed: Arc<AtomicBool>,
    events: Arc<EventBus>,
    state: Arc<SessionStateStore>,
    recorder: RecordingController,
    preview: RwLock<Option<PreviewImage>>,
    video_gate: Mutex<()>,
    processed: AtomicUsize,
    logger: Mutex<Box<dyn PipelineLogger>>,
    control: ControlQueue,
}

impl CapturePipeline {
    /// Builds the pipeline and connects it to `source` as its sample sink.
    pub fn new(
        source: Arc<dyn CaptureSource>,
        renderer: Arc<dyn ImageRenderer>,
        writer_factory: WriterFactory,
        config: PipelineConfig,
        logger: Box<dyn PipelineLogger>,
    ) -> Arc<Self> {
        let events = Arc::new(EventBus::new());
        let state = Arc::new(SessionStateStore::new(
            SessionState {
                is_recording: false,
                is_mirrored: config.mirrored,
            },
            Arc::clone(&events),
        ));
        let recorder =
            RecordingController::new(Arc::clone(&state), writer_factory, config.recorder);

        log::info!(
            "Capture pipeline using the {} renderer, effect {:?}",
            renderer.backend_name(),
            config.initial_effect
        );

        let pipeline = Arc::new(Self {
            source,
            renderer,
            tracker: Arc::new(FaceRegionTracker::new()),
            effect: RwLock::new(ActiveEffect {
                variant: config.initial_effect,
                filter: config.initial_effect.filter(config.effect_params),
            }),
            effect_params: config.effect_params,
            detection_armed: Arc::new(AtomicBool::new(false)),
            events,
            state,
            recorder,
            preview: RwLock::new(None),
            video_gate: Mutex::new(()),
            processed: AtomicUsize::new(0),
            logger: Mutex::new(logger),
            control: ControlQueue::new("facetrack-control"),
        });

        let sink: Weak<dyn SampleSink> = Arc::downgrade(&pipeline) as Weak<dyn SampleSink>;
        pipeline.source.connect(sink);
        if config.initial_effect.requires_face_detection() {
            pipeline.arm_face_detection();
        }
        pipeline
    }

    // ── Observation ──

    /// Subscribes to state-change and preview notifications.
    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn change_count(&self) -> u64 {
        self.state.change_count()
    }

    /// The most recently rendered frame, if any.
    pub fn preview(&self) -> Option<PreviewImage> {
        self.preview
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn face_regions(&self) -> Arc<[FaceRegion]> {
        self.tracker.current()
    }

    pub fn recording_phase(&self) -> RecordingPhase {
        self.recorder.phase()
    }

    pub fn frames_processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    // ── Effects ──

    pub fn effect(&self) -> EffectVariant {
        self.effect
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .variant
    }

    /// Swaps the active effect. The next frame uses it.
    pub fn set_effect(&self, variant: EffectVariant) {
        {
            let mut effect = self.effect.write().unwrap_or_else(PoisonError::into_inner);
            *effect = ActiveEffect {
                variant,
                filter: variant.filter(self.effect_params),
            };
        }
        log::info!("Effect set to {variant:?}");
        if variant.requires_face_detection() {
            self.arm_face_detection();
        }
    }

    /// Asks the source for face events once. A failed request leaves the
    /// effect running without faces and is retried on the next selection.
    fn arm_face_detection(&self) {
        if self.detection_armed.swap(true, Ordering::AcqRel) {
            return;
        }
        let source = Arc::clone(&self.source);
        let armed = Arc::clone(&self.detection_armed);
        self.control.submit(move || {
            if let Err(e) = source.enable_face_detection() {
                log::warn!("Face detection unavailable, continuing without faces: {e}");
                armed.store(false, Ordering::Release);
            }
        });
    }

    fn current_filter(&self) -> Filter {
        Arc::clone(
            &self
                .effect
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .filter,
        )
    }

    pub fn set_mirrored(&self, mirrored: bool) {
        self.state.update(|s| s.is_mirrored = mirrored);
    }

    pub fn toggle_mirrored(&self) -> bool {
        self.state.update(|s| s.is_mirrored = !s.is_mirrored).is_mirrored
    }

    // ── Capture control ──

    pub fn start_capture(&self) {
        let source = Arc::clone(&self.source);
        self.control.submit(move || {
            if let Err(e) = source.start_running() {
                log::error!("Could not start capture: {e}");
            }
        });
    }

    /// Stops the source and forgets its last face regions. An active
    /// recording keeps running.
    pub fn stop_capture(&self) {
        let source = Arc::clone(&self.source);
        let tracker = Arc::clone(&self.tracker);
        self.control.submit(move || {
            source.stop_running();
            tracker.clear();
        });
    }

    /// Blocks until every control request issued so far has been handled.
    pub fn sync_control(&self) {
        self.control.barrier();
    }

    // ── Recording control ──

    pub fn start_recording(&self) -> Result<RecordingSession, RecordingError> {
        self.recorder.start(self.source.audio_format())
    }

    /// See [`RecordingController::stop`].
    pub fn stop_recording<F>(&self, completion: F) -> StopOutcome
    where
        F: FnOnce(Result<PathBuf, RecordingError>) + Send + 'static,
    {
        self.recorder.stop(completion)
    }

    pub fn log_summary(&self) {
        self.logger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .summary();
    }

    // ── Video path ──

    fn process_video(&self, frame: Frame) {
        let pts = frame.pts();
        let regions = self.tracker.current();
        let filter = self.current_filter();
        let mirrored = self.state.get().is_mirrored;

        let started = Instant::now();
        let image = filter(&frame, &regions[..]).mirrored(mirrored);
        let effect_ms = ms(started.elapsed());

        let started = Instant::now();
        let output = match self.renderer.render(&image) {
            Ok(output) => output,
            Err(e) => {
                log::warn!("Dropping frame at {pts:?}: {e}");
                self.log_metric(METRIC_DROPPED_FRAMES, 1.0);
                return;
            }
        };
        let render_ms = ms(started.elapsed());

        let started = Instant::now();
        self.recorder.append(&SampleBuffer::Video(output.frame));
        let append_ms = ms(started.elapsed());

        *self.preview.write().unwrap_or_else(PoisonError::into_inner) = Some(output.preview);
        self.events.publish(PipelineEvent::PreviewUpdated { pts });

        let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        let mut logger = self.logger.lock().unwrap_or_else(PoisonError::into_inner);
        logger.timing(STAGE_EFFECT, effect_ms);
        logger.timing(STAGE_RENDER, render_ms);
        logger.timing(STAGE_APPEND, append_ms);
        logger.metric(METRIC_FACES, regions.len() as f64);
        logger.frame_processed(processed);
    }

    fn log_metric(&self, name: &str, value: f64) {
        self.logger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .metric(name, value);
    }
}

impl SampleSink for CapturePipeline {
    fn on_video_sample(&self, frame: Frame) {
        let _in_flight = match self.video_gate.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                log::trace!("Frame at {:?} dropped: previous frame in flight", frame.pts());
                self.log_metric(METRIC_DROPPED_FRAMES, 1.0);
                return;
            }
        };
        self.process_video(frame);
    }

    fn on_audio_sample(&self, sample: AudioSample) {
        self.recorder.append(&SampleBuffer::Audio(sample));
    }

    fn on_face_detection_event(&self, faces: &[MetadataFace]) {
        let tracked = self.tracker.update(faces, &*self.source);
        log::trace!("Tracking {tracked} face region(s)");
    }
}
