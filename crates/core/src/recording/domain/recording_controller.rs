use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use uuid::Uuid;

use crate::shared::constants::{DEFAULT_CONTAINER_EXTENSION, DEFAULT_VIDEO_BIT_RATE};
use crate::shared::sample_buffer::{AudioFormat, SampleBuffer, TrackKind};
use crate::shared::session_state::SessionStateStore;

use super::muxing_writer::{AppendError, MuxingWriter, WriterConfig, WriterFactory};
use super::recording_error::RecordingError;
use super::recording_session::RecordingSession;

/// Where and how recordings are written.
#[derive(Clone, Debug, PartialEq)]
pub struct RecorderConfig {
    pub directory: PathBuf,
    pub extension: String,
    pub video_bit_rate: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            directory: std::env::temp_dir(),
            extension: DEFAULT_CONTAINER_EXTENSION.to_string(),
            video_bit_rate: DEFAULT_VIDEO_BIT_RATE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// Finalization of this session is under way; the completion will fire.
    Stopping(Uuid),
    NothingToStop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordingPhase {
    Idle,
    Starting,
    Active,
    Stopping,
    Failed,
}

struct WriterSlot {
    writer: Box<dyn MuxingWriter>,
    finalized: bool,
    video_samples: u64,
    audio_samples: u64,
}

type SharedWriter = Arc<Mutex<WriterSlot>>;

type Completion = Box<dyn FnOnce(Result<PathBuf, RecordingError>) + Send>;

enum Phase {
    Idle,
    /// A stop requested while the writer is still opening is parked here.
    Starting {
        session: RecordingSession,
        pending_stop: Option<Completion>,
    },
    Active {
        session: RecordingSession,
        writer: SharedWriter,
    },
    Stopping(RecordingSession),
    Failed {
        session: RecordingSession,
        writer: SharedWriter,
        reason: String,
    },
}

impl Phase {
    fn kind(&self) -> RecordingPhase {
        match self {
            Phase::Idle => RecordingPhase::Idle,
            Phase::Starting { .. } => RecordingPhase::Starting,
            Phase::Active { .. } => RecordingPhase::Active,
            Phase::Stopping(_) => RecordingPhase::Stopping,
            Phase::Failed { .. } => RecordingPhase::Failed,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Finalizes a writer at most once. Returns the number of video samples
/// written on success.
fn finalize_writer(writer: &SharedWriter) -> Result<u64, (u64, String)> {
    let mut slot = lock(writer);
    let frames = slot.video_samples;
    if slot.finalized {
        return Err((frames, "writer already finalized".into()));
    }
    slot.finalized = true;
    log::debug!(
        "Finalizing writer after {} video / {} audio sample(s)",
        slot.video_samples,
        slot.audio_samples
    );
    slot.writer
        .finalize()
        .map(|()| frames)
        .map_err(|e| (frames, e.to_string()))
}

/// Recording state machine: `Idle → Starting → Active → Stopping → Idle`,
/// with `Active → Failed` when the writer invalidates itself.
///
/// At most one session exists at a time. `is_recording` in the shared
/// session state is flipped under the phase lock, so it is true exactly
/// while a session is `Active`. Lock order is phase, then session state.
pub struct RecordingController {
    phase: Arc<Mutex<Phase>>,
    state: Arc<SessionStateStore>,
    writer_factory: WriterFactory,
    config: RecorderConfig,
}

impl RecordingController {
    pub fn new(
        state: Arc<SessionStateStore>,
        writer_factory: WriterFactory,
        config: RecorderConfig,
    ) -> Self {
        Self {
            phase: Arc::new(Mutex::new(Phase::Idle)),
            state,
            writer_factory,
            config,
        }
    }

    pub fn phase(&self) -> RecordingPhase {
        lock(&self.phase).kind()
    }

    /// Opens a new session. The writer is opened without holding the phase
    /// lock; concurrent starts see `Starting` and are rejected.
    pub fn start(&self, audio: Option<AudioFormat>) -> Result<RecordingSession, RecordingError> {
        let session = {
            let mut phase = lock(&self.phase);
            match phase.kind() {
                RecordingPhase::Idle => {}
                RecordingPhase::Failed => {
                    if let Phase::Failed {
                        session,
                        writer,
                        reason,
                    } = std::mem::replace(&mut *phase, Phase::Idle)
                    {
                        log::warn!(
                            "Discarding failed recording {} ({reason})",
                            session.destination.display()
                        );
                        discard_writer(writer);
                    }
                }
                RecordingPhase::Starting | RecordingPhase::Active | RecordingPhase::Stopping => {
                    return Err(RecordingError::AlreadyRecording);
                }
            }
            let session = RecordingSession::allocate(
                &self.config.directory,
                &self.config.extension,
                audio.is_some(),
            );
            *phase = Phase::Starting {
                session: session.clone(),
                pending_stop: None,
            };
            session
        };

        let writer_config = WriterConfig {
            video_bit_rate: self.config.video_bit_rate,
            ..WriterConfig::new(audio)
        };
        let opened = self.open_writer(&session, &writer_config);

        let mut phase = lock(&self.phase);
        let pending_stop = match std::mem::replace(&mut *phase, Phase::Idle) {
            Phase::Starting { pending_stop, .. } => pending_stop,
            _ => None,
        };
        match opened {
            Ok(writer) => {
                let writer = Arc::new(Mutex::new(WriterSlot {
                    writer,
                    finalized: false,
                    video_samples: 0,
                    audio_samples: 0,
                }));
                if let Some(completion) = pending_stop {
                    log::info!("Recording {} stopped while starting", session.id);
                    *phase = Phase::Stopping(session.clone());
                    drop(phase);
                    self.finalize_in_background(session.clone(), writer, None, completion);
                    return Ok(session);
                }
                *phase = Phase::Active {
                    session: session.clone(),
                    writer,
                };
                self.state.update(|s| s.is_recording = true);
                log::info!(
                    "Recording {} started ({})",
                    session.id,
                    session.destination.display()
                );
                Ok(session)
            }
            Err(reason) => {
                drop(phase);
                log::error!("Could not start recording: {reason}");
                let error = RecordingError::Open {
                    destination: session.destination,
                    reason,
                };
                if let Some(completion) = pending_stop {
                    completion(Err(error.clone()));
                }
                Err(error)
            }
        }
    }

    fn open_writer(
        &self,
        session: &RecordingSession,
        config: &WriterConfig,
    ) -> Result<Box<dyn MuxingWriter>, String> {
        std::fs::create_dir_all(&self.config.directory).map_err(|e| e.to_string())?;
        let mut writer = (self.writer_factory)();
        writer
            .open(&session.destination, config)
            .map_err(|e| e.to_string())?;
        Ok(writer)
    }

    /// Appends a sample to the active session. Samples arriving in any other
    /// phase are dropped.
    pub fn append(&self, sample: &SampleBuffer) {
        let (session_id, writer) = match &*lock(&self.phase) {
            Phase::Active { session, writer } => (session.id, Arc::clone(writer)),
            _ => return,
        };

        let result = {
            let mut slot = lock(&writer);
            if slot.finalized {
                return;
            }
            let result = slot.writer.append(sample);
            if result.is_ok() {
                match sample.track_kind() {
                    TrackKind::Video => slot.video_samples += 1,
                    TrackKind::Audio => slot.audio_samples += 1,
                }
            }
            result
        };

        match result {
            Ok(()) => {}
            Err(AppendError::Transient(reason)) => {
                log::warn!(
                    "Dropped {:?} sample at {:?}: {reason}",
                    sample.track_kind(),
                    sample.pts()
                );
            }
            Err(AppendError::WriterInvalidated(reason)) => self.fail(session_id, reason),
        }
    }

    fn fail(&self, session_id: Uuid, reason: String) {
        let mut phase = lock(&self.phase);
        let is_current = matches!(&*phase, Phase::Active { session, .. } if session.id == session_id);
        if !is_current {
            return;
        }
        if let Phase::Active { session, writer } = std::mem::replace(&mut *phase, Phase::Idle) {
            log::error!("Recording {} failed: {reason}", session.id);
            *phase = Phase::Failed {
                session,
                writer,
                reason,
            };
            self.state.update(|s| s.is_recording = false);
        }
    }

    /// Finalizes the current session on a background thread and reports the
    /// destination (or failure) through `completion` after `is_recording`
    /// has been cleared. A stop during `Starting` is held until the writer
    /// has opened. `completion` is never called when there is nothing to
    /// stop.
    pub fn stop<F>(&self, completion: F) -> StopOutcome
    where
        F: FnOnce(Result<PathBuf, RecordingError>) + Send + 'static,
    {
        let mut phase = lock(&self.phase);
        let (session, writer, failure) = match std::mem::replace(&mut *phase, Phase::Idle) {
            Phase::Active { session, writer } => (session, writer, None),
            Phase::Failed {
                session,
                writer,
                reason,
            } => (session, writer, Some(reason)),
            Phase::Starting {
                session,
                pending_stop: None,
            } => {
                let id = session.id;
                log::debug!("Stop requested while recording {id} is starting");
                *phase = Phase::Starting {
                    session,
                    pending_stop: Some(Box::new(completion)),
                };
                return StopOutcome::Stopping(id);
            }
            other => {
                *phase = other;
                log::debug!("Stop requested with no active recording");
                return StopOutcome::NothingToStop;
            }
        };
        let id = session.id;
        *phase = Phase::Stopping(session.clone());
        drop(phase);

        self.finalize_in_background(session, writer, failure, Box::new(completion));
        StopOutcome::Stopping(id)
    }

    fn finalize_in_background(
        &self,
        session: RecordingSession,
        writer: SharedWriter,
        failure: Option<String>,
        completion: Completion,
    ) {
        let phase = Arc::clone(&self.phase);
        let state = Arc::clone(&self.state);
        thread::spawn(move || {
            let finalized = finalize_writer(&writer);
            let result = match (failure, finalized) {
                (Some(reason), _) => Err(RecordingError::WriterFailed(reason)),
                (None, Ok(frames)) => {
                    log::info!(
                        "Recording {} finished with {frames} video frame(s): {}",
                        session.id,
                        session.destination.display()
                    );
                    Ok(session.destination.clone())
                }
                (None, Err((0, reason))) => {
                    log::error!("Recording {} is empty: {reason}", session.id);
                    Err(RecordingError::EmptyRecording)
                }
                (None, Err((_, reason))) => {
                    log::error!("Recording {} failed to finalize: {reason}", session.id);
                    Err(RecordingError::Finalize(reason))
                }
            };
            {
                let mut phase = lock(&phase);
                *phase = Phase::Idle;
                if state.get().is_recording {
                    state.update(|s| s.is_recording = false);
                }
            }
            completion(result);
        });
    }
}

fn discard_writer(writer: SharedWriter) {
    thread::spawn(move || {
        if let Err((_, reason)) = finalize_writer(&writer) {
            log::debug!("Failed writer did not finalize cleanly: {reason}");
        }
    });
}
