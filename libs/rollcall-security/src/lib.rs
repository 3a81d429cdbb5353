#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
pub mod context;
pub mod fields;
pub mod permission;
pub mod policy_engine;
pub mod predicate;
pub mod role;

pub use context::CallerContext;
pub use permission::{AccessDenied, AccessMatrix, AccessRule, Operation};
pub use policy_engine::{PolicyEngine, PolicyEngineRef};
pub use predicate::{FieldEq, ScopePredicate, build_scope_predicate};
pub use role::{Role, RoleCategory, UnknownRole};
