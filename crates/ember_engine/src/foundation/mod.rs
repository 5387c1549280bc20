//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the engine:
//! - Math types and projection helpers
//! - Handle arenas for GPU-side resources
//! - Time management
//! - Logging setup

pub mod math;
pub mod collections;
pub mod time;
pub mod logging;
