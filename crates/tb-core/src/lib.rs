//! tagboard/crates/tb-core/src/lib.rs
//!
//! The central domain types and interface definitions for Tagboard.

pub mod config;
pub mod error;
pub mod models;
pub mod outcome;
pub mod permission;
pub mod traits;
pub mod validate;

// Re-exporting for easier access in other crates
pub use config::CoreConfig;
pub use error::*;
pub use models::*;
pub use outcome::{Outcome, StatusCode};
pub use permission::Permission;
pub use traits::*;
