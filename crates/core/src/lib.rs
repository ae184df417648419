//! `tillguard-core`: identifiers and the error model shared by every crate.
//!
//! Pure domain primitives; no storage, network or UI concerns.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::UserId;
