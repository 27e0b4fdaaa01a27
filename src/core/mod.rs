//! Core infrastructure.
//!
//! - [`config`] - Configuration parsing and validation
//! - [`merge`] - Layered configuration precedence
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod merge;
