//! The data backend capability consumed by the core.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use rollcall_security::FieldEq;

use crate::condition::Condition;
use crate::error::BackendError;
use crate::query::Query;
use crate::record::Record;

/// Type alias for a shared backend handle.
pub type DataBackendRef = Arc<dyn DataBackend>;

/// Atomic counter update, optionally guarded.
///
/// The guard is evaluated by the backend in the same step as the write, so
/// two concurrent increments against a ceiling cannot both pass it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementSpec {
    pub field: String,
    pub delta: i64,
    /// Reject when the new value would exceed this column's value.
    pub ceiling_field: Option<String>,
    /// Reject when the new value would drop below this bound.
    pub floor: Option<i64>,
}

impl IncrementSpec {
    #[must_use]
    pub fn by(field: &str, delta: i64) -> Self {
        Self {
            field: field.to_owned(),
            delta,
            ceiling_field: None,
            floor: None,
        }
    }

    #[must_use]
    pub fn not_above(mut self, ceiling_field: &str) -> Self {
        self.ceiling_field = Some(ceiling_field.to_owned());
        self
    }

    #[must_use]
    pub fn not_below(mut self, floor: i64) -> Self {
        self.floor = Some(floor);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IncrementOutcome {
    Applied { value: i64 },
    /// The guard rejected the update; the row is unchanged.
    GuardRejected { current: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row change delivered on a subscription channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    /// Row after the change (absent for deletes).
    pub new: Option<Record>,
    /// Row before the change (absent for inserts).
    pub old: Option<Record>,
    pub committed_at: DateTime<Utc>,
}

impl ChangeEvent {
    /// The row the change is about: `new` when present, otherwise `old`.
    #[must_use]
    pub fn record(&self) -> Option<&Record> {
        self.new.as_ref().or(self.old.as_ref())
    }
}

/// Liveness reported by a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ChannelStatus {
    Connected,
    Closed,
    Errored(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Status(ChannelStatus),
    Change(ChangeEvent),
}

/// Receiving end of a change-stream subscription.
///
/// A channel whose sender side is gone reports [`ChannelStatus::Closed`].
#[derive(Debug)]
pub struct ChangeChannel {
    rx: mpsc::UnboundedReceiver<ChannelMessage>,
    closed_reported: bool,
}

impl ChangeChannel {
    #[must_use]
    pub fn new(rx: mpsc::UnboundedReceiver<ChannelMessage>) -> Self {
        Self {
            rx,
            closed_reported: false,
        }
    }

    /// Create a connected pair; the sender side belongs to the backend.
    #[must_use]
    pub fn pair() -> (mpsc::UnboundedSender<ChannelMessage>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx))
    }

    /// Next message. Yields `Status(Closed)` once when the backend side
    /// disappears, then `None`.
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        match self.rx.recv().await {
            Some(msg) => Some(msg),
            None if !self.closed_reported => {
                self.closed_reported = true;
                Some(ChannelMessage::Status(ChannelStatus::Closed))
            }
            None => None,
        }
    }
}

#[async_trait]
pub trait DataBackend: Send + Sync {
    /// Rows matching the query, honoring its ordering and limit.
    async fn select(&self, query: &Query) -> Result<Vec<Record>, BackendError>;

    /// Insert one row. A missing `id` is assigned by the backend.
    async fn insert(&self, table: &str, record: Record) -> Result<Record, BackendError>;

    /// Insert several rows in one round trip; all or none are written.
    async fn insert_many(
        &self,
        table: &str,
        records: Vec<Record>,
    ) -> Result<Vec<Record>, BackendError>;

    /// Apply `patch` to every row matching the query; returns the updated rows.
    async fn update(&self, query: &Query, patch: Record) -> Result<Vec<Record>, BackendError>;

    /// Delete every row matching the query; returns the number removed.
    async fn delete(&self, query: &Query) -> Result<u64, BackendError>;

    /// Atomically add `spec.delta` to a numeric column of row `id`.
    async fn increment(
        &self,
        table: &str,
        id: Uuid,
        spec: &IncrementSpec,
    ) -> Result<IncrementOutcome, BackendError>;

    /// Open a change stream for `table`, optionally filtered server-side.
    ///
    /// The first message on a healthy channel is `Status(Connected)`.
    async fn subscribe(
        &self,
        table: &str,
        filter: Option<FieldEq>,
    ) -> Result<ChangeChannel, BackendError>;

    /// Whether `subscribe` honors its filter argument.
    fn supports_server_filter(&self) -> bool;

    /// Cheap liveness check.
    async fn ping(&self) -> Result<(), BackendError>;

    async fn find_by_id(&self, table: &str, id: Uuid) -> Result<Option<Record>, BackendError> {
        let query = Query::table(table)
            .filter(Condition::eq_uuid(rollcall_security::fields::ID, id))
            .limit(1);
        Ok(self.select(&query).await?.into_iter().next())
    }

    async fn delete_by_id(&self, table: &str, id: Uuid) -> Result<u64, BackendError> {
        let query =
            Query::table(table).filter(Condition::eq_uuid(rollcall_security::fields::ID, id));
        self.delete(&query).await
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropped_sender_reports_closed_once() {
        let (tx, mut channel) = ChangeChannel::pair();
        tx.send(ChannelMessage::Status(ChannelStatus::Connected))
            .unwrap();
        drop(tx);

        assert_eq!(
            channel.recv().await,
            Some(ChannelMessage::Status(ChannelStatus::Connected))
        );
        assert_eq!(
            channel.recv().await,
            Some(ChannelMessage::Status(ChannelStatus::Closed))
        );
        assert_eq!(channel.recv().await, None);
    }

    #[test]
    fn increment_spec_builder() {
        let spec = IncrementSpec::by("current_enrollment", 1).not_above("max_capacity");
        assert_eq!(spec.ceiling_field.as_deref(), Some("max_capacity"));
        assert_eq!(spec.floor, None);
    }
}
