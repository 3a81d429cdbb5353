//! Access-scoped query layer.
//!
//! Reads are restricted to rows the caller may see by writing the caller's
//! scope predicate into the query's scope slot. Writes are authorized locally
//! against the policy engine before anything is dispatched to the backend.
//!
//! ```rust,ignore
//! use rollcall_db::secure::{SecureBackend, SecureQueryExt};
//!
//! let sessions = Query::table("sessions")
//!     .secure()               // SecureQuery<Unscoped>
//!     .scope_with(&ctx)       // SecureQuery<Scoped>
//!     .all(&secure_backend)   // only scoped queries execute
//!     .await?;
//! ```

mod authorize;
mod error;
mod secure_backend;
mod select;

pub use authorize::authorize;
pub use error::ScopeError;
pub use secure_backend::SecureBackend;
pub use select::{Scoped, SecureQuery, SecureQueryExt, Unscoped, scope};
