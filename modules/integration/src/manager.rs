//! Composition root: wires the secure backend, orchestrator and
//! subscription manager from one [`CoreConfig`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use serde::Serialize;
use tracing::{info, warn};

use rollcall_db::{DataBackendRef, SecureBackend};
use rollcall_realtime::SubscriptionManager;
use rollcall_workflow::{Orchestrator, WorkflowService};

use crate::config::CoreConfig;
use crate::error::IntegrationError;
use crate::health::{ComponentHealth, HealthReport, HealthStatus};

pub const BACKEND: &str = "backend";
pub const TRANSACTIONS: &str = "transactions";
pub const REALTIME: &str = "realtime";

static CORE: ArcSwapOption<IntegrationManager> = ArcSwapOption::const_empty();

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownSummary {
    pub rolled_back: usize,
    pub unsubscribed: usize,
}

pub struct IntegrationManager {
    config: CoreConfig,
    backend: DataBackendRef,
    db: SecureBackend,
    workflows: WorkflowService,
    subscriptions: SubscriptionManager,
    started: Instant,
}

impl std::fmt::Debug for IntegrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationManager")
            .field("config", &self.config)
            .field("uptime", &self.started.elapsed())
            .finish_non_exhaustive()
    }
}

impl IntegrationManager {
    /// Build every component from `config` against `backend`.
    ///
    /// # Errors
    /// Returns [`IntegrationError::InvalidConfig`] if `config` fails validation.
    pub fn new(config: CoreConfig, backend: DataBackendRef) -> Result<Self, IntegrationError> {
        config.validate()?;
        let db = SecureBackend::new(backend.clone(), Arc::new(config.access_matrix()));
        let orchestrator = Orchestrator::new(db.clone()).with_chunk_size(config.batch.chunk_size);
        let workflows = WorkflowService::new(orchestrator, config.workflow.clone());
        let subscriptions = SubscriptionManager::new(backend.clone(), config.realtime.clone());
        Ok(Self {
            config,
            backend,
            db,
            workflows,
            subscriptions,
            started: Instant::now(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Access-scoped data handle.
    #[must_use]
    pub fn db(&self) -> &SecureBackend {
        &self.db
    }

    #[must_use]
    pub fn workflows(&self) -> &WorkflowService {
        &self.workflows
    }

    #[must_use]
    pub fn orchestrator(&self) -> &Orchestrator {
        self.workflows.orchestrator()
    }

    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub async fn health_check(&self) -> HealthReport {
        let components = vec![
            self.backend_health().await,
            self.transaction_health(),
            self.realtime_health(),
        ];
        let report = HealthReport::new(components, self.started.elapsed().as_secs());
        if report.status != HealthStatus::Healthy {
            warn!(status = ?report.status, "core health degraded");
        }
        report
    }

    async fn backend_health(&self) -> ComponentHealth {
        let started = Instant::now();
        let outcome = self.backend.ping().await;
        let component = ComponentHealth::healthy(BACKEND).with_latency_ms(millis(started.elapsed()));
        match outcome {
            Ok(()) => component,
            Err(err) => component.with_status(HealthStatus::Error, err.to_string()),
        }
    }

    fn transaction_health(&self) -> ComponentHealth {
        let stats = self.orchestrator().stats();
        let component = ComponentHealth::healthy(TRANSACTIONS);
        if stats.partially_rolled_back > 0 {
            component.with_status(
                HealthStatus::Degraded,
                format!(
                    "{} transaction(s) partially rolled back and need remediation",
                    stats.partially_rolled_back
                ),
            )
        } else {
            component.with_status(HealthStatus::Healthy, format!("{} active", stats.active))
        }
    }

    fn realtime_health(&self) -> ComponentHealth {
        let stats = self.subscriptions.stats();
        let component = ComponentHealth::healthy(REALTIME);
        if stats.reconnecting > 0 {
            component.with_status(
                HealthStatus::Degraded,
                format!("{} of {} subscription(s) reconnecting", stats.reconnecting, stats.active),
            )
        } else {
            component.with_status(
                HealthStatus::Healthy,
                format!("{} subscription(s)", stats.active),
            )
        }
    }

    /// Roll back every running transaction, then drop every subscription.
    pub async fn shutdown(&self) -> ShutdownSummary {
        let rolled_back = self.orchestrator().emergency_rollback_all().await.len();
        let unsubscribed = self.subscriptions.shutdown();
        info!(rolled_back, unsubscribed, "core shut down");
        ShutdownSummary {
            rolled_back,
            unsubscribed,
        }
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Build the process-wide core.
///
/// # Errors
/// [`IntegrationError::AlreadyInitialized`] if a core is already installed,
/// or any error from [`IntegrationManager::new`].
pub fn init(
    config: CoreConfig,
    backend: DataBackendRef,
) -> Result<Arc<IntegrationManager>, IntegrationError> {
    if CORE.load().is_some() {
        return Err(IntegrationError::AlreadyInitialized);
    }
    let manager = Arc::new(IntegrationManager::new(config, backend)?);
    let previous = CORE.compare_and_swap(&None::<Arc<IntegrationManager>>, Some(manager.clone()));
    if previous.is_some() {
        return Err(IntegrationError::AlreadyInitialized);
    }
    info!("core initialized");
    Ok(manager)
}

/// The process-wide core, if initialized.
#[must_use]
pub fn get() -> Option<Arc<IntegrationManager>> {
    CORE.load_full()
}

/// Like [`get`], as an error when absent.
///
/// # Errors
/// [`IntegrationError::NotInitialized`] before [`init`] or after [`shutdown`].
pub fn require() -> Result<Arc<IntegrationManager>, IntegrationError> {
    get().ok_or(IntegrationError::NotInitialized)
}

/// Uninstall the process-wide core and shut it down. A no-op when nothing is
/// installed.
pub async fn shutdown() -> Option<ShutdownSummary> {
    let core = CORE.swap(None)?;
    Some(core.shutdown().await)
}
