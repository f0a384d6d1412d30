//! Collaborator seams onto the appliance.
//!
//! The controllers in this crate only talk to the backend through these
//! traits. `hearth-client` implements them over HTTP and WebSocket; tests
//! implement them with in-memory fakes.

use crate::types::{
    ActiveSubject, Angle, DetectionEvent, SessionId, Snapshot, StartedSession,
};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("backend returned status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("backend rejected request: {0}")]
    Rejected(String),
    #[error("push channel closed")]
    ChannelClosed,
}

/// Server-side enrollment session calls.
#[async_trait]
pub trait EnrollmentApi: Send + Sync {
    async fn start_session(&self, name: &str) -> Result<StartedSession, BackendError>;

    /// Submit one still for `angle`. `image` is a `data:` URL.
    async fn submit_capture(
        &self,
        session_id: &SessionId,
        angle: Angle,
        image: &str,
    ) -> Result<(), BackendError>;

    async fn finish_session(&self, session_id: &SessionId) -> Result<(), BackendError>;
}

/// Captures one still image on demand.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(&self) -> Result<Snapshot, BackendError>;
}

/// One-shot historical fetch used to bootstrap the feed.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn recent_events(&self) -> Result<Vec<DetectionEvent>, BackendError>;
}

/// Currently visible subjects.
#[async_trait]
pub trait ActiveSource: Send + Sync {
    async fn active_subjects(&self) -> Result<Vec<ActiveSubject>, BackendError>;
}

/// Opens the persistent push subscription.
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn PushChannel>, BackendError>;
}

/// An open push subscription delivering one JSON event per message.
#[async_trait]
pub trait PushChannel: Send {
    /// Next text message. `None` once the channel has closed.
    ///
    /// Must be cancel-safe: it is raced against the heartbeat timer.
    async fn next_message(&mut self) -> Option<Result<String, BackendError>>;

    async fn send_probe(&mut self, payload: &str) -> Result<(), BackendError>;

    fn is_open(&self) -> bool;

    async fn close(&mut self);
}
