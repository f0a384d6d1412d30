use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Captures the appliance expects for each angle before it moves on.
pub const CAPTURES_PER_ANGLE: u8 = 4;

/// Head pose requested during enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Angle {
    Left,
    Right,
    Up,
    Down,
    Center,
}

impl Angle {
    /// Fixed prompt order. The server walks the same sequence; it is not negotiated.
    pub const SEQUENCE: [Angle; 5] = [
        Angle::Left,
        Angle::Right,
        Angle::Up,
        Angle::Down,
        Angle::Center,
    ];

    /// Wire token ("left", "right", ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Angle::Left => "left",
            Angle::Right => "right",
            Angle::Up => "up",
            Angle::Down => "down",
            Angle::Center => "center",
        }
    }
}

impl fmt::Display for Angle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Total accepted captures that complete a session (4 per angle x 5 angles).
pub const CAPTURES_PER_SESSION: usize = CAPTURES_PER_ANGLE as usize * Angle::SEQUENCE.len();

/// Opaque enrollment session token issued by the appliance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Response to `POST /enroll/start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartedSession {
    pub session_id: SessionId,
    /// Row id of the subject the appliance created for this session.
    #[serde(default)]
    pub person_id: Option<i64>,
}

/// What a single accepted capture did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureProgress {
    /// Count incremented; still on the same angle.
    Counted,
    /// The angle is done and the session moved to `next`.
    AngleAdvanced(Angle),
    /// Last capture of the last angle; the session must now be finished.
    AllAnglesCaptured,
}

/// Client-side view of a server-tracked enrollment attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentSession {
    pub session_id: SessionId,
    pub subject: String,
    pub person_id: Option<i64>,
    angle_index: usize,
    captures: u8,
}

impl EnrollmentSession {
    pub fn new(started: StartedSession, subject: impl Into<String>) -> Self {
        Self {
            session_id: started.session_id,
            subject: subject.into(),
            person_id: started.person_id,
            angle_index: 0,
            captures: 0,
        }
    }

    /// Index into [`Angle::SEQUENCE`], always in `0..5`.
    pub fn angle_index(&self) -> usize {
        self.angle_index
    }

    pub fn current_angle(&self) -> Angle {
        Angle::SEQUENCE[self.angle_index]
    }

    /// Accepted captures for the current angle, always in `0..=4`.
    pub fn captures(&self) -> u8 {
        self.captures
    }

    /// All 20 captures were accepted but the finish call has not succeeded yet.
    pub fn awaiting_finish(&self) -> bool {
        self.angle_index + 1 == Angle::SEQUENCE.len() && self.captures >= CAPTURES_PER_ANGLE
    }

    /// Credit one accepted capture.
    ///
    /// The count resets to zero whenever the angle advances; on the last angle
    /// it stays at 4 so a failed finish can be retried without re-capturing.
    pub fn record_capture(&mut self) -> CaptureProgress {
        if self.awaiting_finish() {
            return CaptureProgress::AllAnglesCaptured;
        }
        self.captures += 1;
        if self.captures < CAPTURES_PER_ANGLE {
            return CaptureProgress::Counted;
        }
        if self.angle_index + 1 < Angle::SEQUENCE.len() {
            self.angle_index += 1;
            self.captures = 0;
            CaptureProgress::AngleAdvanced(self.current_angle())
        } else {
            CaptureProgress::AllAnglesCaptured
        }
    }
}

/// One detection pushed by the appliance. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// Server-assigned; the only dedup key for the feed.
    pub id: i64,
    pub timestamp: String,
    pub label: String,
    pub camera: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<String>,
}

/// A subject the appliance currently sees (`GET /active`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSubject {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    pub first_seen: String,
    #[serde(default)]
    pub left_at: Option<String>,
}

/// An enrolled subject (`GET /people`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: i64,
    pub name: String,
}

/// One still image from the camera, as served by `GET /snapshot`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl Snapshot {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
        }
    }

    /// Encode as `data:<mime>;base64,<payload>`, the form `/enroll/capture` decodes.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.content_type,
            STANDARD.encode(&self.bytes)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> EnrollmentSession {
        EnrollmentSession::new(
            StartedSession {
                session_id: "s1".into(),
                person_id: Some(7),
            },
            "Justin",
        )
    }

    #[test]
    fn test_angle_wire_tokens() {
        let json = serde_json::to_string(&Angle::SEQUENCE).unwrap();
        assert_eq!(json, r#"["left","right","up","down","center"]"#);
        assert_eq!(Angle::Center.to_string(), "center");
    }

    #[test]
    fn test_record_capture_advances_after_four() {
        let mut s = session();
        for expected in 1..4 {
            assert_eq!(s.record_capture(), CaptureProgress::Counted);
            assert_eq!(s.captures(), expected);
        }
        assert_eq!(s.record_capture(), CaptureProgress::AngleAdvanced(Angle::Right));
        assert_eq!(s.angle_index(), 1);
        assert_eq!(s.captures(), 0);
    }

    #[test]
    fn test_record_capture_twenty_completes() {
        let mut s = session();
        let mut progress = Vec::new();
        for _ in 0..CAPTURES_PER_SESSION {
            assert!(s.angle_index() < Angle::SEQUENCE.len());
            assert!(s.captures() <= CAPTURES_PER_ANGLE);
            progress.push(s.record_capture());
        }
        assert_eq!(progress.last(), Some(&CaptureProgress::AllAnglesCaptured));
        assert_eq!(
            progress
                .iter()
                .filter(|p| **p == CaptureProgress::AllAnglesCaptured)
                .count(),
            1
        );
        assert!(s.awaiting_finish());
        assert_eq!(s.current_angle(), Angle::Center);
        assert_eq!(s.captures(), CAPTURES_PER_ANGLE);
    }

    #[test]
    fn test_record_capture_saturates_when_awaiting_finish() {
        let mut s = session();
        for _ in 0..CAPTURES_PER_SESSION {
            s.record_capture();
        }
        assert_eq!(s.record_capture(), CaptureProgress::AllAnglesCaptured);
        assert_eq!(s.captures(), CAPTURES_PER_ANGLE);
    }

    #[test]
    fn test_event_optional_fields() {
        let raw = r#"{"id":3,"timestamp":"2024-05-01T10:00:00Z","label":"Unknown",
            "camera":"Front Door","confidence":null,"snapshot_path":"snaps/1.jpg","extra":1}"#;
        let event: DetectionEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.id, 3);
        assert_eq!(event.confidence, None);
        assert_eq!(event.person, None);
        assert_eq!(event.snapshot_path.as_deref(), Some("snaps/1.jpg"));
    }

    #[test]
    fn test_event_missing_required_field() {
        let raw = r#"{"id":3,"label":"Unknown","camera":"Front Door"}"#;
        assert!(serde_json::from_str::<DetectionEvent>(raw).is_err());
    }

    #[test]
    fn test_started_session_without_person_id() {
        let started: StartedSession = serde_json::from_str(r#"{"session_id":"abc"}"#).unwrap();
        assert_eq!(started.session_id.as_str(), "abc");
        assert_eq!(started.person_id, None);
    }

    #[test]
    fn test_snapshot_data_url() {
        let snap = Snapshot::new(vec![0xff, 0xd8, 0xff], "image/jpeg");
        assert_eq!(snap.to_data_url(), "data:image/jpeg;base64,/9j/");
    }
}
