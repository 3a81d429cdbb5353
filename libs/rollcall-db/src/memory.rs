//! In-process [`DataBackend`] for tests and the development server.
//!
//! Each table is a vector of rows behind its own lock. Every write (including
//! the guarded increment) happens under that lock, which gives the row-level
//! atomicity a real store provides for conditional updates. Change events are
//! fanned out to subscribers after the lock is released.
//!
//! Fault injection hooks let tests simulate connect failures, dropped
//! channels and an unreachable store.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use rollcall_security::{FieldEq, fields};

use crate::backend::{
    ChangeChannel, ChangeEvent, ChangeKind, ChannelMessage, ChannelStatus, DataBackend,
    IncrementOutcome, IncrementSpec,
};
use crate::error::BackendError;
use crate::query::{Direction, Query};
use crate::record::Record;

type Table = Arc<Mutex<Vec<Record>>>;

struct Subscriber {
    table: String,
    filter: Option<FieldEq>,
    tx: mpsc::UnboundedSender<ChannelMessage>,
}

/// Snapshot of how many times each backend operation was invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub select: u64,
    pub insert: u64,
    pub update: u64,
    pub delete: u64,
    pub increment: u64,
    pub subscribe: u64,
}

impl CallCounts {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.select + self.insert + self.update + self.delete + self.increment + self.subscribe
    }

    #[must_use]
    pub fn writes(&self) -> u64 {
        self.insert + self.update + self.delete + self.increment
    }
}

#[derive(Default)]
struct Counters {
    select: AtomicU64,
    insert: AtomicU64,
    update: AtomicU64,
    delete: AtomicU64,
    increment: AtomicU64,
    subscribe: AtomicU64,
}

#[derive(Default)]
struct Inner {
    tables: DashMap<String, Table>,
    subscribers: Mutex<Vec<Subscriber>>,
    counters: Counters,
    unavailable: AtomicBool,
    server_filtering: AtomicBool,
    failing_subscribes: AtomicU32,
    subscribe_latency: Mutex<Duration>,
    failing_tables: Mutex<HashSet<String>>,
}

/// Shared, cloneable in-memory store. Clones observe the same data.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("tables", &self.inner.tables.len())
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl MemoryBackend {
    /// Store with server-side subscription filtering enabled.
    #[must_use]
    pub fn new() -> Self {
        let backend = Self::default();
        backend.set_server_filtering(true);
        backend
    }

    /// Toggle whether `subscribe` honors its filter argument.
    pub fn set_server_filtering(&self, enabled: bool) {
        self.inner.server_filtering.store(enabled, Ordering::SeqCst);
    }

    /// While set, every operation fails with [`BackendError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next `n` subscribe calls fail.
    pub fn fail_next_subscribes(&self, n: u32) {
        self.inner.failing_subscribes.store(n, Ordering::SeqCst);
    }

    /// Delay every subscribe call by `latency` before it connects.
    pub fn set_subscribe_latency(&self, latency: Duration) {
        *self.inner.subscribe_latency.lock() = latency;
    }

    /// Make every write to `table` fail until [`Self::clear_table_failures`].
    pub fn fail_writes_to(&self, table: &str) {
        self.inner.failing_tables.lock().insert(table.to_owned());
    }

    pub fn clear_table_failures(&self) {
        self.inner.failing_tables.lock().clear();
    }

    /// Push `status` to every open channel, then disconnect them all.
    pub fn drop_channels(&self, status: &ChannelStatus) {
        let dropped: Vec<Subscriber> = std::mem::take(&mut *self.inner.subscribers.lock());
        tracing::debug!(count = dropped.len(), ?status, "dropping subscription channels");
        for sub in dropped {
            let _ = sub.tx.send(ChannelMessage::Status(status.clone()));
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut subs = self.inner.subscribers.lock();
        subs.retain(|s| !s.tx.is_closed());
        subs.len()
    }

    #[must_use]
    pub fn calls(&self) -> CallCounts {
        let c = &self.inner.counters;
        CallCounts {
            select: c.select.load(Ordering::SeqCst),
            insert: c.insert.load(Ordering::SeqCst),
            update: c.update.load(Ordering::SeqCst),
            delete: c.delete.load(Ordering::SeqCst),
            increment: c.increment.load(Ordering::SeqCst),
            subscribe: c.subscribe.load(Ordering::SeqCst),
        }
    }

    /// Current contents of `table`, in insertion order.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.inner
            .tables
            .get(table)
            .map(|t| t.lock().clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn table_len(&self, table: &str) -> usize {
        self.inner.tables.get(table).map_or(0, |t| t.lock().len())
    }

    /// Insert rows directly, bypassing counters and change events.
    pub fn seed(&self, table: &str, records: impl IntoIterator<Item = Record>) {
        let t = self.table(table);
        let mut rows = t.lock();
        for mut record in records {
            if record.id().is_none() {
                record.set_uuid(fields::ID, Uuid::new_v4());
            }
            rows.push(record);
        }
    }

    fn table(&self, name: &str) -> Table {
        self.inner
            .tables
            .entry(name.to_owned())
            .or_default()
            .value()
            .clone()
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("store unreachable".to_owned()));
        }
        Ok(())
    }

    fn check_writable(&self, table: &str) -> Result<(), BackendError> {
        self.check_available()?;
        if self.inner.failing_tables.lock().contains(table) {
            return Err(BackendError::Unavailable(format!(
                "writes to '{table}' are failing"
            )));
        }
        Ok(())
    }

    fn publish(&self, events: Vec<ChangeEvent>) {
        if events.is_empty() {
            return;
        }
        let server_filtering = self.inner.server_filtering.load(Ordering::SeqCst);
        let mut subs = self.inner.subscribers.lock();
        subs.retain(|s| !s.tx.is_closed());
        for event in events {
            for sub in subs.iter().filter(|s| s.table == event.table) {
                if server_filtering && !passes_filter(sub.filter.as_ref(), &event) {
                    continue;
                }
                let _ = sub.tx.send(ChannelMessage::Change(event.clone()));
            }
        }
    }
}

fn passes_filter(filter: Option<&FieldEq>, event: &ChangeEvent) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    event
        .record()
        .and_then(|r| r.get_uuid(&filter.field))
        .is_some_and(|v| v == filter.value)
}

fn change(table: &str, kind: ChangeKind, new: Option<Record>, old: Option<Record>) -> ChangeEvent {
    ChangeEvent {
        table: table.to_owned(),
        kind,
        new,
        old,
        committed_at: Utc::now(),
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (None, None) => CmpOrdering::Equal,
        (None, Some(_)) => CmpOrdering::Less,
        (Some(_), None) => CmpOrdering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(CmpOrdering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

fn ids_of(rows: &[Record]) -> HashSet<Uuid> {
    rows.iter().filter_map(Record::id).collect()
}

fn prepare_insert(taken: &HashSet<Uuid>, mut record: Record) -> Result<Record, BackendError> {
    match record.id() {
        Some(id) if taken.contains(&id) => {
            return Err(BackendError::Conflict(format!("duplicate id {id}")));
        }
        Some(_) => {}
        None if record.contains(fields::ID) => {
            return Err(BackendError::InvalidRecord("id is not a uuid".to_owned()));
        }
        None => record.set_uuid(fields::ID, Uuid::new_v4()),
    }
    Ok(record)
}

#[async_trait]
impl DataBackend for MemoryBackend {
    async fn select(&self, query: &Query) -> Result<Vec<Record>, BackendError> {
        self.inner.counters.select.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let table = self.table(query.table_name());
        let mut rows: Vec<Record> = table
            .lock()
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        if let Some(order) = query.ordering() {
            rows.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.field), b.get(&order.field));
                match order.direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            });
        }
        if let Some(limit) = query.row_limit() {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, record: Record) -> Result<Record, BackendError> {
        self.inner.counters.insert.fetch_add(1, Ordering::SeqCst);
        self.check_writable(table)?;
        let t = self.table(table);
        let stored = {
            let mut rows = t.lock();
            let record = prepare_insert(&ids_of(&rows), record)?;
            rows.push(record.clone());
            record
        };
        self.publish(vec![change(table, ChangeKind::Insert, Some(stored.clone()), None)]);
        Ok(stored)
    }

    async fn insert_many(
        &self,
        table: &str,
        records: Vec<Record>,
    ) -> Result<Vec<Record>, BackendError> {
        self.inner.counters.insert.fetch_add(1, Ordering::SeqCst);
        self.check_writable(table)?;
        let t = self.table(table);
        let stored = {
            let mut rows = t.lock();
            let mut taken = ids_of(&rows);
            let mut staged: Vec<Record> = Vec::with_capacity(records.len());
            for record in records {
                let record = prepare_insert(&taken, record)?;
                taken.extend(record.id());
                staged.push(record);
            }
            rows.extend(staged.iter().cloned());
            staged
        };
        self.publish(
            stored
                .iter()
                .map(|r| change(table, ChangeKind::Insert, Some(r.clone()), None))
                .collect(),
        );
        Ok(stored)
    }

    async fn update(&self, query: &Query, patch: Record) -> Result<Vec<Record>, BackendError> {
        self.inner.counters.update.fetch_add(1, Ordering::SeqCst);
        self.check_writable(query.table_name())?;
        let table = query.table_name();
        let t = self.table(table);
        let mut events = Vec::new();
        let updated = {
            let mut rows = t.lock();
            let mut updated = Vec::new();
            for row in rows.iter_mut().filter(|r| query.matches(r)) {
                let old = row.clone();
                row.merge(&patch);
                updated.push(row.clone());
                events.push(change(table, ChangeKind::Update, Some(row.clone()), Some(old)));
            }
            updated
        };
        self.publish(events);
        Ok(updated)
    }

    async fn delete(&self, query: &Query) -> Result<u64, BackendError> {
        self.inner.counters.delete.fetch_add(1, Ordering::SeqCst);
        self.check_writable(query.table_name())?;
        let table = query.table_name();
        let t = self.table(table);
        let removed: Vec<Record> = {
            let mut rows = t.lock();
            let (gone, kept): (Vec<Record>, Vec<Record>) =
                rows.drain(..).partition(|r| query.matches(r));
            *rows = kept;
            gone
        };
        let count = removed.len() as u64;
        self.publish(
            removed
                .into_iter()
                .map(|r| change(table, ChangeKind::Delete, None, Some(r)))
                .collect(),
        );
        Ok(count)
    }

    async fn increment(
        &self,
        table: &str,
        id: Uuid,
        spec: &IncrementSpec,
    ) -> Result<IncrementOutcome, BackendError> {
        self.inner.counters.increment.fetch_add(1, Ordering::SeqCst);
        self.check_writable(table)?;
        let t = self.table(table);
        let (outcome, event) = {
            let mut rows = t.lock();
            let row = rows
                .iter_mut()
                .find(|r| r.id() == Some(id))
                .ok_or_else(|| BackendError::NotFound {
                    table: table.to_owned(),
                    id,
                })?;
            let current = row.get_i64(&spec.field).unwrap_or(0);
            let next = current.checked_add(spec.delta).ok_or_else(|| {
                BackendError::InvalidRecord(format!("'{}' would overflow", spec.field))
            })?;
            if let Some(ceiling_field) = &spec.ceiling_field {
                let ceiling = row.get_i64(ceiling_field).ok_or_else(|| {
                    BackendError::InvalidRecord(format!("'{ceiling_field}' is not numeric"))
                })?;
                if next > ceiling {
                    return Ok(IncrementOutcome::GuardRejected { current });
                }
            }
            if spec.floor.is_some_and(|floor| next < floor) {
                return Ok(IncrementOutcome::GuardRejected { current });
            }
            let old = row.clone();
            row.set(&spec.field, next);
            (
                IncrementOutcome::Applied { value: next },
                change(table, ChangeKind::Update, Some(row.clone()), Some(old)),
            )
        };
        self.publish(vec![event]);
        Ok(outcome)
    }

    async fn subscribe(
        &self,
        table: &str,
        filter: Option<FieldEq>,
    ) -> Result<ChangeChannel, BackendError> {
        self.inner.counters.subscribe.fetch_add(1, Ordering::SeqCst);
        let latency = *self.inner.subscribe_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.check_available()?;
        let failed = self
            .inner
            .failing_subscribes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(BackendError::Unavailable(format!(
                "subscribe to '{table}' refused"
            )));
        }
        let (tx, channel) = ChangeChannel::pair();
        let _ = tx.send(ChannelMessage::Status(ChannelStatus::Connected));
        self.inner.subscribers.lock().push(Subscriber {
            table: table.to_owned(),
            filter,
            tx,
        });
        Ok(channel)
    }

    fn supports_server_filter(&self) -> bool {
        self.inner.server_filtering.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.check_available()
    }
}
