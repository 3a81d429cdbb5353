#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use rollcall_db::{BackendError, ChannelStatus, MemoryBackend};
use rollcall_integration::manager::{BACKEND, REALTIME, TRANSACTIONS};
use rollcall_integration::{CoreConfig, HealthStatus, IntegrationManager};
use rollcall_realtime::{RealtimeConfig, SubscriptionConfig};
use rollcall_security::permission::tables;
use rollcall_security::{CallerContext, Operation, Role};
use rollcall_workflow::{StepError, TransactionDefinition, TransactionStatus, TransactionStep};

fn build(config: CoreConfig) -> (MemoryBackend, IntegrationManager) {
    let db = MemoryBackend::new();
    let manager = IntegrationManager::new(config, Arc::new(db.clone())).unwrap();
    (db, manager)
}

fn admin() -> CallerContext {
    CallerContext::new(Role::Admin, Uuid::new_v4())
}

#[tokio::test]
async fn fresh_core_is_healthy() {
    let (_db, core) = build(CoreConfig::default());
    let report = core.health_check().await;

    assert_eq!(report.status, HealthStatus::Healthy);
    let names: Vec<&str> = report.components.iter().map(|c| c.name).collect();
    assert_eq!(names, vec![BACKEND, TRANSACTIONS, REALTIME]);
    assert!(report.component(BACKEND).unwrap().latency_ms.is_some());
}

#[tokio::test]
async fn unreachable_backend_is_an_error() {
    let (db, core) = build(CoreConfig::default());
    db.set_unavailable(true);

    let report = core.health_check().await;
    assert_eq!(report.status, HealthStatus::Error);
    let backend = report.component(BACKEND).unwrap();
    assert_eq!(backend.status, HealthStatus::Error);
    assert!(backend.message.is_some());
}

#[tokio::test]
async fn partial_rollback_degrades_transactions() {
    let (_db, core) = build(CoreConfig::default());
    let def = TransactionDefinition::new("doomed", tables::SESSIONS, Operation::Insert)
        .step(
            TransactionStep::new("reserve", |_| async { Ok(Value::Null) }).with_compensation(
                |_, _| async {
                    Err(StepError::Backend(BackendError::Unavailable(
                        "store offline".to_owned(),
                    )))
                },
            ),
        )
        .step(TransactionStep::new("confirm", |_| async {
            Err(StepError::precondition("session closed"))
        }));

    let result = core.orchestrator().execute(&admin(), def).await.unwrap();
    assert_eq!(result.status, TransactionStatus::PartiallyRolledBack);

    let report = core.health_check().await;
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(
        report.component(TRANSACTIONS).unwrap().status,
        HealthStatus::Degraded
    );
}

#[tokio::test(start_paused = true)]
async fn reconnecting_subscription_degrades_realtime() {
    let config = CoreConfig {
        realtime: RealtimeConfig {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            ..RealtimeConfig::fast()
        },
        ..CoreConfig::default()
    };
    let (db, core) = build(config);
    let id = core
        .subscriptions()
        .subscribe(SubscriptionConfig::new(admin(), tables::SESSIONS, |_| {}))
        .await
        .unwrap();

    db.fail_next_subscribes(10);
    db.drop_channels(&ChannelStatus::Closed);
    for _ in 0..100 {
        if core.subscriptions().stats().reconnecting > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let report = core.health_check().await;
    assert_eq!(report.component(REALTIME).unwrap().status, HealthStatus::Degraded);
    assert!(core.subscriptions().subscription_status(id).is_some());
}

#[tokio::test]
async fn shutdown_drops_subscriptions() {
    let (_db, core) = build(CoreConfig::default());
    for _ in 0..2 {
        core.subscriptions()
            .subscribe(SubscriptionConfig::new(admin(), tables::ENROLLMENTS, |_| {}))
            .await
            .unwrap();
    }

    let summary = core.shutdown().await;
    assert_eq!(summary.rolled_back, 0);
    assert_eq!(summary.unsubscribed, 2);
    assert_eq!(core.subscriptions().stats().active, 0);
}

#[test]
fn invalid_config_is_refused() {
    let mut config = CoreConfig::default();
    config.batch.chunk_size = 0;
    let err = IntegrationManager::new(config, Arc::new(MemoryBackend::new())).unwrap_err();
    assert!(err.to_string().contains("chunk_size"));
}
