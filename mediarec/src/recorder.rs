//! Recording sessions
//!
//! [`MediaRecorder`] owns at most one session at a time. Starting a session
//! opens the output file, creates one worker per track and returns; capture
//! code then pushes frames and PCM without blocking. Stopping drains every
//! worker, finalizes the container and reports what was written.

use crate::config::RecorderConfig;
use crate::event::{EventSender, RecorderEvent};
use crate::worker::{Worker, WorkerMessage, WorkerReport};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use mediarec_core::{Fmp4Writer, RecorderError, RecorderResult, SharedMuxer, TrackRole};
use mediarec_media::{
    AudioSource, DefaultEncoderFactory, EncoderFactory, RawAudioChunk, RawFrame, SampleMixer,
    Track, TrackEncoder, TrackStats,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Final state of one track
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSummary {
    /// Track role
    pub role: TrackRole,
    /// Whether the track made it into the container
    pub registered: bool,
    /// Counters
    pub stats: TrackStats,
}

/// Result of a finished recording
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOutput {
    /// Session identifier
    pub session_id: Uuid,
    /// Output file
    pub path: PathBuf,
    /// Tracks in the container
    pub track_count: usize,
    /// Per-track outcome
    pub tracks: Vec<TrackSummary>,
    /// When the session started
    pub started_at: DateTime<Utc>,
    /// Wall-clock length of the session
    pub duration: Duration,
}

impl RecordingOutput {
    /// Whether the output file is present on disk
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Summary for one role
    pub fn track(&self, role: TrackRole) -> Option<&TrackSummary> {
        self.tracks.iter().find(|t| t.role == role)
    }
}

struct Session {
    id: Uuid,
    path: PathBuf,
    config: RecorderConfig,
    muxer: SharedMuxer,
    senders: HashMap<TrackRole, mpsc::UnboundedSender<WorkerMessage>>,
    workers: Vec<(TrackRole, JoinHandle<WorkerReport>)>,
    started_at: DateTime<Utc>,
    aborted: Arc<AtomicBool>,
}

impl Session {
    fn route(&self, role: TrackRole, message: WorkerMessage) {
        if self.aborted.load(Ordering::SeqCst) {
            debug!("Recording aborted; dropping {} input", role);
            return;
        }
        match self.senders.get(&role) {
            Some(tx) => {
                if tx.send(message).is_err() {
                    debug!("{} worker gone; input dropped", role);
                }
            }
            None => debug!("{} not recorded; input dropped", role),
        }
    }
}

/// Multi-track recorder writing one fragmented MP4 per session
pub struct MediaRecorder {
    factory: Arc<dyn EncoderFactory>,
    events: EventSender,
    session: Mutex<Option<Session>>,
    last_output: Mutex<Option<RecordingOutput>>,
}

impl Default for MediaRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MediaRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaRecorder")
            .field("factory", &self.factory)
            .field("recording", &self.is_recording())
            .finish()
    }
}

impl MediaRecorder {
    /// Create a recorder using the built-in encoders
    pub fn new() -> Self {
        Self::with_factory(Arc::new(DefaultEncoderFactory))
    }

    /// Create a recorder with a custom encoder factory
    pub fn with_factory(factory: Arc<dyn EncoderFactory>) -> Self {
        Self {
            factory,
            events: EventSender::new(),
            session: Mutex::new(None),
            last_output: Mutex::new(None),
        }
    }

    /// Subscribe to recorder events
    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.events.subscribe()
    }

    /// Whether a session is running
    pub fn is_recording(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Output path of the running session, or of the last finished one
    pub fn output_path(&self) -> Option<PathBuf> {
        if let Some(session) = self.session.lock().as_ref() {
            return Some(session.path.clone());
        }
        self.last_output.lock().as_ref().map(|o| o.path.clone())
    }

    /// Result of the last successful session
    pub fn last_output(&self) -> Option<RecordingOutput> {
        self.last_output.lock().clone()
    }

    /// Start recording into `output_path`.
    ///
    /// Returns once the file is open and the workers are running. The
    /// encoders are configured lazily from the first unit each track sees.
    pub async fn start(
        &self,
        output_path: impl AsRef<Path>,
        config: RecorderConfig,
    ) -> RecorderResult<()> {
        let path = output_path.as_ref().to_path_buf();
        config.validate()?;

        let active = self
            .session
            .lock()
            .as_ref()
            .map(|s| s.path.display().to_string());
        if let Some(path) = active {
            return Err(RecorderError::SessionAlreadyActive { path });
        }

        // Create encoders before touching the file so a missing video codec
        // leaves nothing behind
        let targets = config.encoder_targets();
        let mut encoders = Vec::new();
        for role in config.roles() {
            match self.factory.create(role, &targets) {
                Ok(backend) => encoders.push((
                    role,
                    TrackEncoder::new(role, backend).with_drain_timeout(config.drain_timeout()),
                )),
                Err(e) => {
                    let e = e.into_recorder_error(role);
                    if e.is_fatal() {
                        error!("❌ Cannot record {}: {}", role, e);
                        return Err(e);
                    }
                    warn!("⚠️ Recording without {} track: {}", role, e);
                    self.events.emit(RecorderEvent::TrackFailed {
                        role,
                        error: e.to_string(),
                        recoverable: true,
                    });
                }
            }
        }
        if encoders.is_empty() {
            return Err(RecorderError::Configuration {
                reason: "no track could be created".to_string(),
            });
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let writer_path = path.clone();
        let fragment = config.fragment_duration();
        let writer = tokio::task::spawn_blocking(move || Fmp4Writer::create(&writer_path, fragment))
            .await
            .map_err(|e| blocking_task_failed("open output", e))??;

        let mut slot = self.session.lock();
        if let Some(active) = slot.as_ref() {
            return Err(RecorderError::SessionAlreadyActive {
                path: active.path.display().to_string(),
            });
        }

        let roles: Vec<TrackRole> = encoders.iter().map(|(role, _)| *role).collect();
        let muxer = SharedMuxer::new(Box::new(writer), roles.iter().copied(), config.pre_start);
        let aborted = Arc::new(AtomicBool::new(false));
        let mut senders = HashMap::new();
        let mut workers = Vec::new();

        for (role, encoder) in encoders {
            let (tx, rx) = mpsc::unbounded_channel();
            let mixer = (role == TrackRole::MixedAudio).then(|| SampleMixer::new(config.mix_policy));
            let worker = Worker::new(
                Track::new(role, encoder, muxer.clone()),
                mixer,
                muxer.clone(),
                self.events.clone(),
                aborted.clone(),
            );
            let handle = tokio::task::spawn_blocking(move || worker.run(rx));
            senders.insert(role, tx);
            workers.push((role, handle));
        }

        let id = Uuid::new_v4();
        info!(
            "🔴 Recording {} started: {} ({})",
            id,
            path.display(),
            roles
                .iter()
                .map(|r| r.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        *slot = Some(Session {
            id,
            path,
            config,
            muxer,
            senders,
            workers,
            started_at: Utc::now(),
            aborted,
        });
        Ok(())
    }

    /// Hand a video frame to the video worker.
    ///
    /// Dropped, releasing its buffer, when idle or when video is not recorded.
    pub fn push_video_frame(&self, frame: RawFrame) {
        match self.session.lock().as_ref() {
            Some(session) => session.route(TrackRole::Video, WorkerMessage::Frame(frame)),
            None => debug!("Not recording; frame dropped"),
        }
    }

    /// Hand a PCM chunk to the worker for its source, or to the mixer
    pub fn push_audio(&self, chunk: RawAudioChunk) {
        let guard = self.session.lock();
        let Some(session) = guard.as_ref() else {
            debug!("Not recording; audio dropped");
            return;
        };
        let role = if session.config.mix_audio {
            TrackRole::MixedAudio
        } else {
            match chunk.source {
                AudioSource::Mic => TrackRole::MicAudio,
                AudioSource::Speaker => TrackRole::SpeakerAudio,
            }
        };
        session.route(role, WorkerMessage::Audio(chunk));
    }

    /// Stop the session and finalize the file.
    ///
    /// Every worker is drained within the shutdown timeout; the session is
    /// torn down even if some of them do not finish. A fatal track failure
    /// discards the file and returns that failure.
    pub async fn stop(&self) -> RecorderResult<RecordingOutput> {
        let session = self
            .session
            .lock()
            .take()
            .ok_or(RecorderError::NoActiveSession)?;
        info!("⏹️ Stopping recording {}", session.id);

        let Session {
            id,
            path,
            config,
            muxer,
            senders,
            workers,
            started_at,
            ..
        } = session;

        for tx in senders.values() {
            let _ = tx.send(WorkerMessage::Finish);
        }
        drop(senders);

        let timeout = config.shutdown_timeout();
        let reports: Vec<WorkerReport> = join_all(workers.into_iter().map(|(role, handle)| async move {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(report)) => Some(report),
                Ok(Err(e)) => {
                    error!("{} worker panicked: {}", role, e);
                    None
                }
                Err(_) => {
                    let e = RecorderError::Timeout {
                        operation: format!("{} worker shutdown", role),
                        duration: timeout,
                    };
                    warn!("{}", e);
                    None
                }
            }
        }))
        .await
        .into_iter()
        .flatten()
        .collect();

        let mut tracks = Vec::with_capacity(reports.len());
        let mut fatal = None;
        for report in reports {
            if let Some(e) = report.error {
                if e.is_fatal() && fatal.is_none() {
                    fatal = Some(e);
                }
            }
            tracks.push(TrackSummary {
                role: report.role,
                registered: report.registered,
                stats: report.stats,
            });
        }

        if let Some(e) = fatal {
            let abandoner = muxer.clone();
            let abandoned = tokio::task::spawn_blocking(move || abandoner.abandon())
                .await
                .unwrap_or_else(|join| Err(blocking_task_failed("abandon", join)));
            if let Err(release) = abandoned {
                error!("Failed to close aborted recording: {}", release);
            }
            if let Err(remove) = tokio::fs::remove_file(&path).await {
                warn!("Failed to remove partial recording {}: {}", path.display(), remove);
            }
            self.events.emit(RecorderEvent::Stopped {
                path,
                success: false,
            });
            return Err(e);
        }

        let finalizer = muxer.clone();
        let finalized = tokio::task::spawn_blocking(move || finalizer.finalize())
            .await
            .unwrap_or_else(|join| Err(blocking_task_failed("finalize", join)));
        match finalized {
            Ok(()) => {}
            Err(e @ RecorderError::ResourceRelease { .. }) => {
                error!("Recording {} finalized with a release error: {}", id, e);
            }
            Err(e) => {
                error!("❌ Failed to finalize recording {}: {}", id, e);
                self.events.emit(RecorderEvent::Stopped {
                    path,
                    success: false,
                });
                return Err(e);
            }
        }

        let output = RecordingOutput {
            session_id: id,
            path: path.clone(),
            track_count: muxer.track_count(),
            tracks,
            started_at,
            duration: (Utc::now() - started_at).to_std().unwrap_or_default(),
        };
        info!(
            "✅ Recording {} finished: {} tracks in {}",
            id,
            output.track_count,
            path.display()
        );

        *self.last_output.lock() = Some(output.clone());
        self.events.emit(RecorderEvent::Stopped {
            path,
            success: true,
        });
        Ok(output)
    }
}

fn blocking_task_failed(operation: &str, e: JoinError) -> RecorderError {
    RecorderError::ResourceRelease {
        resource: format!("{} task", operation),
        reason: e.to_string(),
    }
}
