//! Data backend capability and the access-scoped query filter.
//!
//! The remote store is consumed through the [`DataBackend`] trait: scoped row
//! reads and writes, a conditional increment, and a change-stream subscribe
//! primitive. There is no multi-statement transaction primitive; workflows
//! needing atomicity build it from compensating steps.
//!
//! [`secure`] wraps any backend so that every read is restricted to rows the
//! caller may see and every write is authorized locally before dispatch.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod backend;
pub mod batch;
pub mod condition;
pub mod error;
#[cfg(feature = "memory")]
pub mod memory;
pub mod query;
pub mod record;
pub mod secure;

pub use backend::{
    ChangeChannel, ChangeEvent, ChangeKind, ChannelMessage, ChannelStatus, DataBackend,
    DataBackendRef, IncrementOutcome, IncrementSpec,
};
pub use batch::{BatchError, BatchOutcome, BatchProgress, insert_batch};
pub use condition::{Condition, build_scope_condition};
pub use error::BackendError;
#[cfg(feature = "memory")]
pub use memory::MemoryBackend;
pub use query::{Direction, OrderBy, Query};
pub use record::Record;
pub use secure::{ScopeError, SecureBackend};
