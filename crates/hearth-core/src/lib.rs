//! hearth-core — Client-side coordination for the Hearth home-security appliance.
//!
//! Owns the guided enrollment state machine and the live detection feed.
//! All backend access goes through the traits in [`api`]; this crate does
//! no I/O of its own.

pub mod active;
pub mod api;
pub mod enrollment;
pub mod feed;
pub mod sync;
pub mod types;

pub use active::ActiveSubjectsPoller;
pub use api::{
    ActiveSource, BackendError, EnrollmentApi, EventSource, PushChannel, PushConnector,
    SnapshotSource,
};
pub use enrollment::{CaptureOutcome, EnrollError, EnrollmentController, EnrollmentState};
pub use feed::EventFeed;
pub use sync::{ChannelStatus, EventStreamSynchronizer, FeedState, SyncConfig, SyncError};
pub use types::{
    ActiveSubject, Angle, DetectionEvent, EnrollmentSession, Person, SessionId, Snapshot,
    StartedSession, CAPTURES_PER_ANGLE,
};
