//! Error taxonomy shared by every Rollcall core component.
//!
//! Components keep their own `thiserror` enums; each one classifies itself
//! into an [`ErrorKind`] so that callers at the UI boundary can render the
//! exact failure category without matching on component-specific types.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod catalog;
pub mod kind;

pub use catalog::ErrDef;
pub use kind::{ErrorKind, HasErrorKind};
