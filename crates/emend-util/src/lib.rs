//! Shared utilities for emend.
//!
//! This crate provides common utilities used across the emend workspace:
//! - Logging setup with tracing
//! - Path utilities

pub mod log;
pub mod path;
