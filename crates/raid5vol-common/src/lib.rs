//! raid5vol Common - Shared types and utilities
//!
//! This crate provides the error definitions, configuration structures and
//! small shared types used by every raid5vol component.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
