//! Terminal formatting for events and subjects.

use chrono::{DateTime, Local, NaiveDateTime};
use hearth_core::types::{ActiveSubject, DetectionEvent};
use std::collections::HashSet;

const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Local time for RFC 3339 stamps; naive stamps are shown as written;
/// anything else is passed through.
pub fn timestamp(raw: &str) -> String {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return t.with_timezone(&Local).format(DISPLAY_FORMAT).to_string();
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(raw, format) {
            return t.format(DISPLAY_FORMAT).to_string();
        }
    }
    raw.to_string()
}

pub fn event_line(event: &DetectionEvent) -> String {
    let confidence = match event.confidence {
        Some(c) if c > 0.0 => format!(" ({c:.2})"),
        _ => String::new(),
    };
    format!(
        "[{}] {}{}  {}",
        event.camera,
        event.label,
        confidence,
        timestamp(&event.timestamp)
    )
}

/// Entries of a newest-first feed whose ids are not in `printed`, oldest
/// first. A watch wake-up can cover several pushes at once.
pub fn unprinted<'a>(
    printed: &HashSet<i64>,
    feed: &'a [DetectionEvent],
) -> Vec<&'a DetectionEvent> {
    feed.iter().rev().filter(|e| !printed.contains(&e.id)).collect()
}

pub fn subject_line(subject: &ActiveSubject) -> String {
    format!("{} seen at {}", subject.name, timestamp(&subject.first_seen))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naive_timestamp_kept() {
        assert_eq!(timestamp("2024-05-01T10:00:00.123456"), "2024-05-01 10:00:00");
        assert_eq!(timestamp("2024-05-01 10:00:00"), "2024-05-01 10:00:00");
    }

    #[test]
    fn test_unparsable_timestamp_passthrough() {
        assert_eq!(timestamp("yesterday"), "yesterday");
    }

    fn event(id: i64) -> DetectionEvent {
        DetectionEvent {
            id,
            timestamp: "soon".into(),
            label: "Justin".into(),
            camera: "Front Door".into(),
            confidence: Some(0.8234),
            person: Some("Justin".into()),
            snapshot_path: None,
        }
    }

    fn ids(events: Vec<&DetectionEvent>) -> Vec<i64> {
        events.into_iter().map(|e| e.id).collect()
    }

    #[test]
    fn test_unprinted_covers_coalesced_pushes() {
        let printed: HashSet<i64> = [2, 1].into_iter().collect();
        let feed = vec![event(5), event(7), event(2), event(1)];
        assert_eq!(ids(unprinted(&printed, &feed)), vec![7, 5]);
    }

    #[test]
    fn test_unprinted_skips_repushed_ids() {
        let printed: HashSet<i64> = [5, 2].into_iter().collect();
        let feed = vec![event(5), event(7), event(2)];
        assert_eq!(ids(unprinted(&printed, &feed)), vec![7]);
        let all: HashSet<i64> = feed.iter().map(|e| e.id).collect();
        assert!(unprinted(&all, &feed).is_empty());
    }

    #[test]
    fn test_event_line_confidence() {
        let mut event = event(1);
        assert_eq!(event_line(&event), "[Front Door] Justin (0.82)  soon");
        event.confidence = None;
        assert_eq!(event_line(&event), "[Front Door] Justin  soon");
    }
}
