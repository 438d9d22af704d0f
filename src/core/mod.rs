//! Core infrastructure.
//!
//! - [`config`] - Configuration parsing and validation
//! - [`error`] - Error types shared by every layer

pub mod config;
pub mod error;
