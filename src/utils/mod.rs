//! # Utility Modules
//!
//! Supporting utilities for logging, timing, load sampling, and metrics.
//!
//! This module provides reusable utilities used throughout the transit
//! implementation.
//!
//! ## Components
//! - **Cpu**: Best-effort load sampling for heartbeats and gossip
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Time**: Epoch-millis timestamp utilities for timeout and expiry checks

pub mod cpu;
pub mod logging;
pub mod metrics;
pub mod time;

// Re-export public types for advanced users
pub use cpu::CpuMonitor;
pub use metrics::{global_metrics, Metrics, MetricsSnapshot};
