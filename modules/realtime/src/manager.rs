//! Subscription registry and per-subscription connection drivers.
//!
//! Every subscription owns one driver task. The task holds the channel,
//! filters and enriches events, invokes the callback, and on `closed` or
//! `errored` reconnects after `min(base * 2^attempts, cap)`. The attempt
//! counter resets when the backend reports `connected` again. Once
//! `max_reconnect_attempts` consecutive reconnects have failed, the error
//! handler runs and the subscription leaves the registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};
use uuid::Uuid;

use rollcall_db::{ChangeChannel, ChangeEvent, ChannelMessage, ChannelStatus, DataBackendRef};
use rollcall_security::CallerContext;

use crate::backoff::{backoff_delay, jitter};
use crate::config::RealtimeConfig;
use crate::enrich::PayloadEnricher;
use crate::error::RealtimeError;
use crate::filter::{server_filter_for, should_deliver};

pub type ChangeCallback = Arc<dyn Fn(ChangeEvent) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(RealtimeError) + Send + Sync>;

/// What to watch and where to send it.
#[derive(Clone)]
pub struct SubscriptionConfig {
    caller: CallerContext,
    table: String,
    on_change: ChangeCallback,
    on_error: Option<ErrorCallback>,
}

impl SubscriptionConfig {
    #[must_use]
    pub fn new<F>(caller: CallerContext, table: &str, on_change: F) -> Self
    where
        F: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        Self {
            caller,
            table: table.to_owned(),
            on_change: Arc::new(on_change),
            on_error: None,
        }
    }

    /// Called once if the subscription is dropped for good.
    #[must_use]
    pub fn with_error_handler<F>(mut self, on_error: F) -> Self
    where
        F: Fn(RealtimeError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }
}

impl std::fmt::Debug for SubscriptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionConfig")
            .field("caller", &self.caller)
            .field("table", &self.table)
            .field("has_error_handler", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    /// Channel opened; waiting for the backend to confirm.
    Connecting,
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionSnapshot {
    pub id: Uuid,
    pub table: String,
    pub status: LinkStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub delivered: u64,
    pub filtered: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RealtimeStats {
    pub active: usize,
    pub connected: usize,
    pub reconnecting: usize,
    pub delivered: u64,
    pub filtered: u64,
    pub exhausted: u64,
}

#[derive(Debug)]
struct LinkState {
    status: LinkStatus,
    attempts: u32,
    last_error: Option<String>,
    last_connected_at: Option<DateTime<Utc>>,
    delivered: u64,
    filtered: u64,
}

impl LinkState {
    fn new() -> Self {
        Self {
            status: LinkStatus::Connecting,
            attempts: 0,
            last_error: None,
            last_connected_at: None,
            delivered: 0,
            filtered: 0,
        }
    }
}

#[derive(Debug)]
enum Command {
    Resubscribe { delay: Duration },
}

struct Entry {
    table: String,
    state: Arc<Mutex<LinkState>>,
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<Command>,
}

impl Entry {
    fn snapshot(&self, id: Uuid) -> SubscriptionSnapshot {
        let state = self.state.lock();
        SubscriptionSnapshot {
            id,
            table: self.table.clone(),
            status: state.status,
            attempts: state.attempts,
            last_error: state.last_error.clone(),
            last_connected_at: state.last_connected_at,
            delivered: state.delivered,
            filtered: state.filtered,
        }
    }
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    filtered: AtomicU64,
    exhausted: AtomicU64,
}

struct Inner {
    backend: DataBackendRef,
    enricher: PayloadEnricher,
    config: RealtimeConfig,
    registry: DashMap<Uuid, Entry>,
    counters: Counters,
    root: CancellationToken,
}

/// Registry of live change subscriptions.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("config", &self.inner.config)
            .field("active", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

impl SubscriptionManager {
    #[must_use]
    pub fn new(backend: DataBackendRef, config: RealtimeConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                enricher: PayloadEnricher::new(backend.clone()),
                backend,
                config,
                registry: DashMap::new(),
                counters: Counters::default(),
                root: CancellationToken::new(),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    /// Open a channel and start delivering events.
    ///
    /// A failed first connect does not fail the call; it is the first
    /// failure of the reconnect cycle.
    ///
    /// # Errors
    /// [`RealtimeError::InvalidSubscription`] for an empty table name, or
    /// [`RealtimeError::ShutDown`] once [`Self::shutdown`] has run.
    pub async fn subscribe(&self, config: SubscriptionConfig) -> Result<Uuid, RealtimeError> {
        if config.table.is_empty() {
            return Err(RealtimeError::InvalidSubscription(
                "table name is empty".to_owned(),
            ));
        }
        if self.inner.root.is_cancelled() {
            return Err(RealtimeError::ShutDown);
        }

        let id = Uuid::new_v4();
        let state = Arc::new(Mutex::new(LinkState::new()));
        let cancel = self.inner.root.child_token();
        let (tx, rx) = mpsc::unbounded_channel();

        let driver = Driver {
            id,
            inner: self.inner.clone(),
            caller: config.caller,
            table: config.table.clone(),
            on_change: config.on_change,
            on_error: config.on_error,
            state: state.clone(),
            cancel: cancel.clone(),
            commands: rx,
        };
        let first = driver.connect().await;

        self.inner.registry.insert(
            id,
            Entry {
                table: config.table.clone(),
                state,
                cancel,
                commands: tx,
            },
        );
        // shutdown() may have swept the registry while we were connecting.
        if self.inner.root.is_cancelled() {
            self.remove(id);
            return Err(RealtimeError::ShutDown);
        }
        info!(subscription_id = %id, table = %config.table, role = driver.caller.role().as_str(), "subscribed");

        let span = info_span!("subscription", subscription_id = %id, table = %config.table);
        tokio::spawn(driver.run(first).instrument(span));
        Ok(id)
    }

    /// Stop a subscription. Unknown or already-removed ids are a no-op.
    pub fn unsubscribe(&self, id: Uuid) {
        self.remove(id);
    }

    fn remove(&self, id: Uuid) -> bool {
        match self.inner.registry.remove(&id) {
            Some((_, entry)) => {
                entry.cancel.cancel();
                info!(subscription_id = %id, "unsubscribed");
                true
            }
            None => {
                trace!(subscription_id = %id, "unsubscribe for unknown id ignored");
                false
            }
        }
    }

    /// Stop every subscription; returns how many were removed.
    #[must_use = "the count of removed subscriptions is usually logged"]
    pub fn unsubscribe_all(&self) -> usize {
        let ids: Vec<Uuid> = self.inner.registry.iter().map(|e| *e.key()).collect();
        let removed = ids.into_iter().filter(|id| self.remove(*id)).count();
        if removed > 0 {
            info!(removed, "all subscriptions removed");
        }
        removed
    }

    /// Re-establish every registered subscription, each after its own random
    /// delay up to `reconnect_jitter`.
    ///
    /// Returns how many subscriptions were asked to reconnect.
    #[must_use = "the count of resubscribing subscriptions is usually logged"]
    pub fn reconnect_all(&self) -> usize {
        let max = self.inner.config.reconnect_jitter;
        let mut requested = 0;
        for entry in &self.inner.registry {
            let delay = jitter(max);
            if entry.commands.send(Command::Resubscribe { delay }).is_ok() {
                requested += 1;
            }
        }
        info!(requested, "reconnect sweep requested");
        requested
    }

    /// Cancel every subscription and refuse new ones.
    #[must_use = "the count of removed subscriptions is usually logged"]
    pub fn shutdown(&self) -> usize {
        self.inner.root.cancel();
        self.unsubscribe_all()
    }

    #[must_use]
    pub fn subscription_status(&self, id: Uuid) -> Option<SubscriptionSnapshot> {
        self.inner.registry.get(&id).map(|e| e.snapshot(id))
    }

    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionSnapshot> {
        self.inner
            .registry
            .iter()
            .map(|e| e.snapshot(*e.key()))
            .collect()
    }

    #[must_use]
    pub fn stats(&self) -> RealtimeStats {
        let mut stats = RealtimeStats {
            delivered: self.inner.counters.delivered.load(Ordering::Relaxed),
            filtered: self.inner.counters.filtered.load(Ordering::Relaxed),
            exhausted: self.inner.counters.exhausted.load(Ordering::Relaxed),
            ..RealtimeStats::default()
        };
        for entry in &self.inner.registry {
            stats.active += 1;
            match entry.state.lock().status {
                LinkStatus::Connected => stats.connected += 1,
                LinkStatus::Reconnecting => stats.reconnecting += 1,
                LinkStatus::Connecting => {}
            }
        }
        stats
    }
}

enum PumpExit {
    Stop,
    Lost(String),
    Resubscribe(Duration),
}

struct Driver {
    id: Uuid,
    inner: Arc<Inner>,
    caller: CallerContext,
    table: String,
    on_change: ChangeCallback,
    on_error: Option<ErrorCallback>,
    state: Arc<Mutex<LinkState>>,
    cancel: CancellationToken,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Driver {
    async fn run(mut self, first: Result<ChangeChannel, String>) {
        let mut link = first;
        loop {
            let reason = match link {
                Ok(channel) => match self.pump(channel).await {
                    PumpExit::Stop => break,
                    PumpExit::Lost(reason) => reason,
                    PumpExit::Resubscribe(delay) => {
                        debug!(delay_ms = delay.as_millis(), "resubscribing");
                        if !self.pause(delay).await {
                            break;
                        }
                        link = self.connect().await;
                        continue;
                    }
                },
                Err(reason) => reason,
            };

            let Some(delay) = self.record_failure(&reason) else {
                self.give_up(reason);
                break;
            };
            if !self.pause(delay).await {
                break;
            }
            link = self.connect().await;
        }
        debug!("subscription driver stopped");
    }

    async fn connect(&self) -> Result<ChangeChannel, String> {
        let filter = if self.inner.backend.supports_server_filter() {
            server_filter_for(&self.caller, &self.table)
        } else {
            None
        };
        match self.inner.backend.subscribe(&self.table, filter).await {
            Ok(channel) => {
                self.state.lock().status = LinkStatus::Connecting;
                Ok(channel)
            }
            Err(error) => {
                warn!(%error, "subscribe failed");
                Err(error.to_string())
            }
        }
    }

    async fn pump(&mut self, mut channel: ChangeChannel) -> PumpExit {
        // Sweep requests queued while reconnecting are already satisfied.
        while self.commands.try_recv().is_ok() {}

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return PumpExit::Stop,
                command = self.commands.recv() => match command {
                    Some(Command::Resubscribe { delay }) => return PumpExit::Resubscribe(delay),
                    None => return PumpExit::Stop,
                },
                message = channel.recv() => match message {
                    Some(ChannelMessage::Status(ChannelStatus::Connected)) => self.mark_connected(),
                    Some(ChannelMessage::Status(ChannelStatus::Errored(reason))) => {
                        return PumpExit::Lost(reason);
                    }
                    Some(ChannelMessage::Status(ChannelStatus::Closed)) | None => {
                        return PumpExit::Lost("channel closed".to_owned());
                    }
                    Some(ChannelMessage::Change(event)) => self.dispatch(event).await,
                },
            }
        }
    }

    fn mark_connected(&self) {
        let mut state = self.state.lock();
        if state.attempts > 0 {
            info!(after_attempts = state.attempts, "subscription reconnected");
        }
        state.status = LinkStatus::Connected;
        state.attempts = 0;
        state.last_connected_at = Some(Utc::now());
    }

    async fn dispatch(&self, event: ChangeEvent) {
        if !should_deliver(&event, &self.caller) {
            self.state.lock().filtered += 1;
            self.inner.counters.filtered.fetch_add(1, Ordering::Relaxed);
            trace!(kind = ?event.kind, "event not visible to caller");
            return;
        }
        let event = self.inner.enricher.enrich(event).await;
        if self.cancel.is_cancelled() {
            return;
        }
        self.state.lock().delivered += 1;
        self.inner.counters.delivered.fetch_add(1, Ordering::Relaxed);
        (self.on_change)(event);
    }

    /// Count a failure; `None` once the attempt budget is spent.
    fn record_failure(&self, reason: &str) -> Option<Duration> {
        let config = &self.inner.config;
        let mut state = self.state.lock();
        state.last_error = Some(reason.to_owned());
        if state.attempts >= config.max_reconnect_attempts {
            return None;
        }
        let delay = backoff_delay(config.base_delay, config.max_delay, state.attempts);
        state.attempts += 1;
        state.status = LinkStatus::Reconnecting;
        warn!(
            attempt = state.attempts,
            max_attempts = config.max_reconnect_attempts,
            delay_ms = delay.as_millis(),
            reason,
            "subscription lost; scheduling reconnect"
        );
        Some(delay)
    }

    fn give_up(&self, last_error: String) {
        let attempts = self.state.lock().attempts;
        // An unsubscribe racing with exhaustion wins; the handler is not called.
        if self.inner.registry.remove(&self.id).is_none() {
            return;
        }
        self.inner.counters.exhausted.fetch_add(1, Ordering::Relaxed);
        error!(attempts, last_error = %last_error, "reconnect attempts exhausted; subscription dropped");
        if let Some(on_error) = &self.on_error {
            on_error(RealtimeError::ReconnectExhausted {
                id: self.id,
                attempts,
                last_error,
            });
        }
    }

    /// Sleep unless cancelled first; `false` means stop.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}
