#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use rollcall_db::MemoryBackend;
use rollcall_integration::{CoreConfig, IntegrationError};

// The core is process-wide, so the whole lifecycle runs in one test.
#[tokio::test]
async fn init_get_shutdown_cycle() {
    assert!(rollcall_integration::get().is_none());
    assert!(matches!(
        rollcall_integration::require(),
        Err(IntegrationError::NotInitialized)
    ));
    assert!(rollcall_integration::shutdown().await.is_none());

    let core = rollcall_integration::init(CoreConfig::default(), Arc::new(MemoryBackend::new()))
        .unwrap();
    let again = rollcall_integration::init(CoreConfig::default(), Arc::new(MemoryBackend::new()));
    assert!(matches!(again, Err(IntegrationError::AlreadyInitialized)));
    assert!(Arc::ptr_eq(&core, &rollcall_integration::get().unwrap()));

    let summary = rollcall_integration::shutdown().await.unwrap();
    assert_eq!(summary.unsubscribed, 0);
    assert!(rollcall_integration::get().is_none());

    // A fresh core can be installed after shutdown.
    rollcall_integration::init(CoreConfig::default(), Arc::new(MemoryBackend::new())).unwrap();
    rollcall_integration::shutdown().await.unwrap();
}
