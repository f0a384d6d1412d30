//! Guided multi-angle enrollment.
//!
//! `Idle -> Capturing(angle, count) -> Complete`, driven one capture at a
//! time by the operator. Every network call goes through [`EnrollmentApi`]
//! and [`SnapshotSource`]; the controller only owns the session bookkeeping.

use crate::api::{BackendError, EnrollmentApi, SnapshotSource};
use crate::types::{Angle, CaptureProgress, EnrollmentSession, SessionId};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnrollError {
    #[error("subject name is empty")]
    EmptyName,
    #[error("an enrollment session is already active")]
    SessionActive,
    #[error("no active enrollment session")]
    NoActiveSession,
    #[error("a capture is already in flight")]
    CaptureInFlight,
    #[error("session was abandoned before the request settled")]
    Abandoned,
    #[error("failed to start session: {0}")]
    Start(BackendError),
    #[error("snapshot failed: {0}")]
    Snapshot(BackendError),
    #[error("capture rejected: {0}")]
    Submit(BackendError),
    #[error("failed to finish session: {0}")]
    Finish(BackendError),
}

impl EnrollError {
    /// True for errors raised locally, before anything reached the network.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EnrollError::EmptyName
                | EnrollError::SessionActive
                | EnrollError::NoActiveSession
                | EnrollError::CaptureInFlight
        )
    }
}

/// Observable controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentState {
    Idle,
    Capturing {
        angle_index: usize,
        angle: Angle,
        count: u8,
    },
    Complete,
}

/// Result of one `capture_once` call that reached the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Accepted; `count` captures now recorded for `angle`.
    Counted { angle: Angle, count: u8 },
    /// Fourth capture for the previous angle; prompting for `next`.
    AngleAdvanced { next: Angle },
    /// All angles captured and the session finished.
    Completed,
    /// The controller was reset while the request was in flight.
    Discarded,
}

enum Phase {
    Idle,
    Active(EnrollmentSession),
    Complete,
}

struct Inner {
    phase: Phase,
    /// Single-flight flag covering `start` and `capture_once`.
    busy: bool,
    /// Bumped by `reset`; requests that settle under an older epoch are dropped.
    epoch: u64,
}

/// Drives one enrollment session at a time.
pub struct EnrollmentController {
    api: Arc<dyn EnrollmentApi>,
    snapshots: Arc<dyn SnapshotSource>,
    inner: Mutex<Inner>,
}

/// Releases the busy flag however the owning request exits, including when
/// its future is dropped mid-flight.
struct BusyGuard<'a> {
    controller: &'a EnrollmentController,
    epoch: u64,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.controller.lock();
        if inner.epoch == self.epoch {
            inner.busy = false;
        }
    }
}

impl EnrollmentController {
    pub fn new(api: Arc<dyn EnrollmentApi>, snapshots: Arc<dyn SnapshotSource>) -> Self {
        Self {
            api,
            snapshots,
            inner: Mutex::new(Inner {
                phase: Phase::Idle,
                busy: false,
                epoch: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> EnrollmentState {
        match &self.lock().phase {
            Phase::Idle => EnrollmentState::Idle,
            Phase::Active(session) => EnrollmentState::Capturing {
                angle_index: session.angle_index(),
                angle: session.current_angle(),
                count: session.captures(),
            },
            Phase::Complete => EnrollmentState::Complete,
        }
    }

    /// A start or capture request is outstanding.
    pub fn is_busy(&self) -> bool {
        self.lock().busy
    }

    pub fn session_id(&self) -> Option<SessionId> {
        match &self.lock().phase {
            Phase::Active(session) => Some(session.session_id.clone()),
            _ => None,
        }
    }

    pub fn subject(&self) -> Option<String> {
        match &self.lock().phase {
            Phase::Active(session) => Some(session.subject.clone()),
            _ => None,
        }
    }

    /// Open a new server-side session for `name`.
    ///
    /// Allowed from `Idle` or `Complete`. Issues exactly one start call.
    pub async fn start(&self, name: &str) -> Result<SessionId, EnrollError> {
        if name.trim().is_empty() {
            return Err(EnrollError::EmptyName);
        }

        let epoch = {
            let mut inner = self.lock();
            if inner.busy {
                return Err(EnrollError::CaptureInFlight);
            }
            if matches!(inner.phase, Phase::Active(_)) {
                return Err(EnrollError::SessionActive);
            }
            inner.busy = true;
            inner.epoch
        };
        let _busy = BusyGuard {
            controller: self,
            epoch,
        };

        let started = self.api.start_session(name).await.map_err(|e| {
            tracing::warn!(error = %e, "enroll: start failed");
            EnrollError::Start(e)
        })?;

        let mut inner = self.lock();
        if inner.epoch != epoch {
            tracing::warn!(session = %started.session_id, "enroll: reset during start; dropping session");
            return Err(EnrollError::Abandoned);
        }
        let session_id = started.session_id.clone();
        tracing::info!(
            session = %session_id,
            person_id = ?started.person_id,
            subject = name,
            "enroll: session started"
        );
        inner.phase = Phase::Active(EnrollmentSession::new(started, name));
        Ok(session_id)
    }

    /// Take one snapshot and submit it for the current angle.
    ///
    /// A failure leaves angle and count untouched; the operator retries by
    /// calling again. An overlapping call fails with
    /// [`EnrollError::CaptureInFlight`] without touching the network.
    pub async fn capture_once(&self) -> Result<CaptureOutcome, EnrollError> {
        let (epoch, session_id, angle, finish_only) = {
            let mut inner = self.lock();
            let (session_id, angle, finish_only) = match &inner.phase {
                Phase::Active(session) => (
                    session.session_id.clone(),
                    session.current_angle(),
                    session.awaiting_finish(),
                ),
                _ => return Err(EnrollError::NoActiveSession),
            };
            if inner.busy {
                return Err(EnrollError::CaptureInFlight);
            }
            inner.busy = true;
            (inner.epoch, session_id, angle, finish_only)
        };
        let _busy = BusyGuard {
            controller: self,
            epoch,
        };

        if finish_only {
            tracing::info!(session = %session_id, "enroll: retrying finish");
        } else {
            let snapshot = self.snapshots.snapshot().await.map_err(|e| {
                tracing::warn!(error = %e, angle = %angle, "enroll: snapshot failed");
                EnrollError::Snapshot(e)
            })?;
            let image = snapshot.to_data_url();
            self.api
                .submit_capture(&session_id, angle, &image)
                .await
                .map_err(|e| {
                    tracing::warn!(error = %e, angle = %angle, "enroll: capture not accepted");
                    EnrollError::Submit(e)
                })?;

            let (progress, count) = {
                let mut inner = self.lock();
                if inner.epoch != epoch {
                    tracing::debug!(session = %session_id, "enroll: capture settled after reset");
                    return Ok(CaptureOutcome::Discarded);
                }
                let Phase::Active(session) = &mut inner.phase else {
                    return Ok(CaptureOutcome::Discarded);
                };
                (session.record_capture(), session.captures())
            };

            match progress {
                CaptureProgress::Counted => {
                    tracing::debug!(session = %session_id, angle = %angle, count, "enroll: capture accepted");
                    return Ok(CaptureOutcome::Counted { angle, count });
                }
                CaptureProgress::AngleAdvanced(next) => {
                    tracing::info!(session = %session_id, done = %angle, next = %next, "enroll: angle complete");
                    return Ok(CaptureOutcome::AngleAdvanced { next });
                }
                CaptureProgress::AllAnglesCaptured => {}
            }
        }

        self.api.finish_session(&session_id).await.map_err(|e| {
            tracing::warn!(error = %e, session = %session_id, "enroll: finish failed");
            EnrollError::Finish(e)
        })?;

        let mut inner = self.lock();
        if inner.epoch != epoch {
            return Ok(CaptureOutcome::Discarded);
        }
        inner.phase = Phase::Complete;
        tracing::info!(session = %session_id, "enroll: session complete");
        Ok(CaptureOutcome::Completed)
    }

    /// Abandon the current session locally and return to `Idle`.
    ///
    /// There is no cancel endpoint; any request still in flight settles
    /// against the old epoch and is discarded.
    pub fn reset(&self) {
        let mut inner = self.lock();
        if let Phase::Active(session) = &inner.phase {
            tracing::info!(session = %session.session_id, "enroll: session abandoned");
        }
        inner.phase = Phase::Idle;
        inner.busy = false;
        inner.epoch += 1;
    }
}
