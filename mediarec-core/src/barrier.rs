//! Mux start barrier and the shared muxer
//!
//! Encoders report their output format at unpredictable times. The container
//! can only be started once every expected track is known, and must be started
//! exactly once. [`MuxStartBarrier`] tracks expected vs. registered roles and
//! [`SharedMuxer`] serializes registration, start and sample writes across
//! worker threads behind one lock.

use crate::container::{ContainerWriter, WriterState};
use crate::error::{RecorderError, RecorderResult};
use crate::track::{EncodedSample, TrackFormat, TrackIndex, TrackRole};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What happens to samples produced before the container starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PreStartPolicy {
    /// Discard them
    #[default]
    Drop,
    /// Hold up to `max_samples` per track, oldest dropped first, flushed on start
    #[serde(rename_all = "camelCase")]
    Buffer {
        /// Per-track capacity
        max_samples: usize,
    },
}

/// Gate for the single container start
#[derive(Debug, Default)]
pub struct MuxStartBarrier {
    expected: BTreeSet<TrackRole>,
    withdrawn: BTreeSet<TrackRole>,
    registered: BTreeMap<TrackRole, TrackIndex>,
    started: bool,
}

impl MuxStartBarrier {
    /// Create a barrier waiting for `expected` roles
    pub fn new(expected: impl IntoIterator<Item = TrackRole>) -> Self {
        Self {
            expected: expected.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Register a role's output format with the writer.
    ///
    /// Fails for roles that are not expected, already registered or withdrawn,
    /// and after the container started.
    pub fn register_track(
        &mut self,
        writer: &mut dyn ContainerWriter,
        role: TrackRole,
        format: &TrackFormat,
    ) -> RecorderResult<TrackIndex> {
        if self.started {
            return Err(RecorderError::muxer_state(
                "registration before start",
                format!("{} registered after start", role),
            ));
        }
        if !self.expected.contains(&role) || self.withdrawn.contains(&role) {
            return Err(RecorderError::muxer_state(
                "expected track role",
                format!("unexpected {} track", role),
            ));
        }
        if self.registered.contains_key(&role) {
            return Err(RecorderError::muxer_state(
                "single registration",
                format!("repeated {} track", role),
            ));
        }

        let index = writer.add_track(format)?;
        self.registered.insert(role, index);
        info!(
            "🎞️ Registered {} track {} ({}), {}/{} known",
            role,
            index,
            format.codec().name(),
            self.registered.len(),
            self.expected.len() - self.withdrawn.len()
        );
        Ok(index)
    }

    /// Stop waiting for a role that will never register.
    ///
    /// Returns false if the role is not expected or already registered.
    pub fn withdraw(&mut self, role: TrackRole) -> bool {
        if !self.expected.contains(&role) || self.registered.contains_key(&role) {
            return false;
        }
        let inserted = self.withdrawn.insert(role);
        if inserted {
            warn!("Withdrew {} track from the container", role);
        }
        inserted
    }

    /// Every expected, non-withdrawn role is registered
    pub fn ready(&self) -> bool {
        self.expected
            .iter()
            .filter(|role| !self.withdrawn.contains(role))
            .all(|role| self.registered.contains_key(role))
    }

    /// Start the writer the first time the barrier is ready.
    ///
    /// Returns true only for the call that performed the start.
    pub fn try_start(&mut self, writer: &mut dyn ContainerWriter) -> RecorderResult<bool> {
        if self.started || !self.ready() {
            return Ok(false);
        }
        writer.start()?;
        self.started = true;
        Ok(true)
    }

    /// Whether the writer was started
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Container index of a registered role
    pub fn index_of(&self, role: TrackRole) -> Option<TrackIndex> {
        self.registered.get(&role).copied()
    }

    /// Expected roles not yet registered or withdrawn
    pub fn pending_roles(&self) -> Vec<TrackRole> {
        self.expected
            .iter()
            .filter(|role| !self.withdrawn.contains(role) && !self.registered.contains_key(role))
            .copied()
            .collect()
    }

    /// Roles the barrier was created with
    pub fn expected(&self) -> impl Iterator<Item = TrackRole> + '_ {
        self.expected.iter().copied()
    }
}

/// Outcome of one sample write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Written to the container
    Written,
    /// Held until the container starts
    Buffered,
    /// Discarded because the container has not started
    Dropped,
}

/// Result of a track registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// Index assigned by the writer
    pub index: TrackIndex,
    /// This registration started the container
    pub started: bool,
}

struct MuxerInner {
    barrier: MuxStartBarrier,
    writer: Box<dyn ContainerWriter>,
    policy: PreStartPolicy,
    held: BTreeMap<TrackIndex, VecDeque<EncodedSample>>,
    finalized: bool,
}

impl MuxerInner {
    fn start_if_ready(&mut self) -> RecorderResult<bool> {
        if !self.barrier.try_start(self.writer.as_mut())? {
            return Ok(false);
        }
        let held = std::mem::take(&mut self.held);
        let mut flushed = 0;
        for (index, queue) in held {
            for sample in queue {
                self.writer.write_sample(index, sample)?;
                flushed += 1;
            }
        }
        if flushed > 0 {
            debug!("Flushed {} samples held before start", flushed);
        }
        Ok(true)
    }
}

/// Barrier and writer behind a single lock, shared by all track workers
#[derive(Clone)]
pub struct SharedMuxer {
    inner: Arc<Mutex<MuxerInner>>,
}

impl SharedMuxer {
    /// Wrap a writer; `expected` are the roles that must register before start
    pub fn new(
        writer: Box<dyn ContainerWriter>,
        expected: impl IntoIterator<Item = TrackRole>,
        policy: PreStartPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MuxerInner {
                barrier: MuxStartBarrier::new(expected),
                writer,
                policy,
                held: BTreeMap::new(),
                finalized: false,
            })),
        }
    }

    /// Register a role and start the container if it was the last one missing
    pub fn register(&self, role: TrackRole, format: &TrackFormat) -> RecorderResult<Registration> {
        let mut inner = self.inner.lock();
        let MuxerInner { barrier, writer, .. } = &mut *inner;
        let index = barrier.register_track(writer.as_mut(), role, format)?;
        let started = inner.start_if_ready()?;
        if started {
            info!("🚀 Muxer started after {} registered", role);
        }
        Ok(Registration { index, started })
    }

    /// Withdraw a role; returns true if this started the container
    pub fn withdraw(&self, role: TrackRole) -> RecorderResult<bool> {
        let mut inner = self.inner.lock();
        if !inner.barrier.withdraw(role) || inner.finalized {
            return Ok(false);
        }
        let started = inner.start_if_ready()?;
        if started {
            info!("🚀 Muxer started after {} was withdrawn", role);
        }
        Ok(started)
    }

    /// Write a sample, or drop/buffer it if the container has not started
    pub fn write(&self, index: TrackIndex, sample: EncodedSample) -> RecorderResult<WriteOutcome> {
        let mut inner = self.inner.lock();
        if inner.barrier.is_started() {
            inner.writer.write_sample(index, sample)?;
            return Ok(WriteOutcome::Written);
        }

        match inner.policy {
            PreStartPolicy::Drop => Ok(WriteOutcome::Dropped),
            PreStartPolicy::Buffer { max_samples } => {
                let queue = inner.held.entry(index).or_default();
                queue.push_back(sample);
                if queue.len() > max_samples {
                    queue.pop_front();
                    warn!("Pre-start buffer for track {} full; dropped oldest", index);
                }
                Ok(WriteOutcome::Buffered)
            }
        }
    }

    /// Whether the container started
    pub fn is_started(&self) -> bool {
        self.inner.lock().barrier.is_started()
    }

    /// Container index of a registered role
    pub fn index_of(&self, role: TrackRole) -> Option<TrackIndex> {
        self.inner.lock().barrier.index_of(role)
    }

    /// Tracks added to the writer
    pub fn track_count(&self) -> usize {
        self.inner.lock().writer.track_count()
    }

    /// Writer lifecycle state
    pub fn writer_state(&self) -> WriterState {
        self.inner.lock().writer.state()
    }

    /// Finish the container.
    ///
    /// Roles that never registered are withdrawn, the container is started
    /// if it was not (so an empty session still yields a well-formed file),
    /// then stopped and released. Release failures are returned after the
    /// writer is closed. Idempotent.
    pub fn finalize(&self) -> RecorderResult<()> {
        let mut inner = self.inner.lock();
        if inner.finalized {
            return Ok(());
        }
        inner.finalized = true;

        let pending = inner.barrier.pending_roles();
        for role in pending {
            inner.barrier.withdraw(role);
        }
        let stopped = match inner.start_if_ready() {
            Ok(_) => inner.writer.stop(),
            Err(e) => Err(e),
        };
        let released = inner.writer.release();

        if let Err(e) = &stopped {
            error!("Failed to finalize container: {}", e);
        }
        stopped?;
        released.map_err(|e| match e {
            RecorderError::ResourceRelease { .. } => e,
            other => RecorderError::ResourceRelease {
                resource: "container".to_string(),
                reason: other.to_string(),
            },
        })
    }

    /// Close the writer without finalizing, used when the session aborts
    pub fn abandon(&self) -> RecorderResult<()> {
        let mut inner = self.inner.lock();
        if inner.finalized {
            return Ok(());
        }
        inner.finalized = true;
        inner.held.clear();
        warn!("Abandoning container; output is incomplete");
        inner.writer.release()
    }
}

impl std::fmt::Debug for SharedMuxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SharedMuxer")
            .field("barrier", &inner.barrier)
            .field("writer_state", &inner.writer.state())
            .field("policy", &inner.policy)
            .finish()
    }
}
