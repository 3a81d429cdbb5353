//! Derived fields attached to change payloads before delivery.

use serde_json::{Value, json};
use tracing::warn;

use rollcall_db::{ChangeEvent, ChangeKind, DataBackendRef, Record};
use rollcall_security::fields;
use rollcall_security::permission::tables;

pub mod columns {
    pub const IS_NEW: &str = "is_new";
    pub const IS_FULL: &str = "is_full";
    pub const ENROLLMENT_PERCENTAGE: &str = "enrollment_percentage";
    pub const SESSION: &str = "session";
    pub const SESSION_ID: &str = "session_id";
    pub const CURRENT_ENROLLMENT: &str = "current_enrollment";
    pub const MAX_CAPACITY: &str = "max_capacity";
    pub const TITLE: &str = "title";
    pub const START_DATE: &str = "start_date";
}

/// Percentage filled (integer, rounded down) and whether the session is full.
///
/// A non-positive capacity counts as full.
#[must_use]
pub fn capacity_summary(record: &Record) -> Option<(i64, bool)> {
    let max = record.get_i64(columns::MAX_CAPACITY)?;
    let current = record.get_i64(columns::CURRENT_ENROLLMENT).unwrap_or(0);
    if max <= 0 {
        return Some((100, true));
    }
    Some((current.saturating_mul(100) / max, current >= max))
}

fn add_capacity_fields(record: &mut Record) {
    if let Some((percentage, full)) = capacity_summary(record) {
        record.set(columns::ENROLLMENT_PERCENTAGE, percentage);
        record.set(columns::IS_FULL, full);
    }
}

fn session_summary(session: &Record) -> Value {
    let (percentage, full) = capacity_summary(session).unzip();
    json!({
        (fields::ID): session.get(fields::ID),
        (columns::TITLE): session.get(columns::TITLE),
        (columns::START_DATE): session.get(columns::START_DATE),
        (fields::LOCATION_ID): session.get(fields::LOCATION_ID),
        (columns::CURRENT_ENROLLMENT): session.get(columns::CURRENT_ENROLLMENT),
        (columns::MAX_CAPACITY): session.get(columns::MAX_CAPACITY),
        (columns::ENROLLMENT_PERCENTAGE): percentage,
        (columns::IS_FULL): full,
    })
}

/// Attaches derived fields to change payloads.
///
/// Enrollment events need the parent session's descriptive fields, which
/// costs one read per event. That read is the only backend call made while
/// dispatching.
#[derive(Clone)]
pub struct PayloadEnricher {
    backend: DataBackendRef,
}

impl std::fmt::Debug for PayloadEnricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadEnricher").finish_non_exhaustive()
    }
}

impl PayloadEnricher {
    #[must_use]
    pub fn new(backend: DataBackendRef) -> Self {
        Self { backend }
    }

    /// Deletes pass through untouched. A failed side read leaves the event
    /// without the `session` object.
    pub async fn enrich(&self, mut event: ChangeEvent) -> ChangeEvent {
        if event.kind == ChangeKind::Delete {
            return event;
        }
        let is_new = event.kind == ChangeKind::Insert;
        let Some(record) = event.new.as_mut() else {
            return event;
        };
        record.set(columns::IS_NEW, is_new);

        match event.table.as_str() {
            tables::SESSIONS => add_capacity_fields(record),
            tables::ENROLLMENTS => {
                if let Some(session) = self.parent_session(record).await {
                    record.set(columns::SESSION, session);
                }
            }
            _ => {}
        }
        event
    }

    async fn parent_session(&self, enrollment: &Record) -> Option<Value> {
        let session_id = enrollment.get_uuid(columns::SESSION_ID)?;
        match self.backend.find_by_id(tables::SESSIONS, session_id).await {
            Ok(Some(session)) => Some(session_summary(&session)),
            Ok(None) => {
                warn!(%session_id, "parent session not found; delivering enrollment un-enriched");
                None
            }
            Err(error) => {
                warn!(%session_id, %error, "session lookup failed; delivering enrollment un-enriched");
                None
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn capacity_rounds_down() {
        let rec = Record::new()
            .with(columns::CURRENT_ENROLLMENT, 2)
            .with(columns::MAX_CAPACITY, 3);
        assert_eq!(capacity_summary(&rec), Some((66, false)));

        let full = Record::new()
            .with(columns::CURRENT_ENROLLMENT, 4)
            .with(columns::MAX_CAPACITY, 4);
        assert_eq!(capacity_summary(&full), Some((100, true)));
    }

    #[test]
    fn zero_capacity_is_full() {
        let rec = Record::new().with(columns::MAX_CAPACITY, 0);
        assert_eq!(capacity_summary(&rec), Some((100, true)));
    }

    #[test]
    fn missing_capacity_adds_nothing() {
        let mut rec = Record::new().with(columns::CURRENT_ENROLLMENT, 2);
        add_capacity_fields(&mut rec);
        assert!(!rec.contains(columns::IS_FULL));
    }
}
