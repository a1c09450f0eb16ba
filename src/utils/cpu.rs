//! Cpu load sampling for heartbeats and gossip rounds.

use std::fs;

/// Best-effort cpu utilisation in percent.
///
/// Reads the 1-minute load average scaled by core count where procfs is
/// available and reports 0 elsewhere. Descriptor cpu fields only need
/// coarse comparability between nodes, not accounting precision.
#[derive(Debug)]
pub struct CpuMonitor {
    cores: usize,
}

impl CpuMonitor {
    pub fn new() -> Self {
        Self {
            cores: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }

    /// Current utilisation, clamped to 0..=100.
    pub fn sample(&self) -> u8 {
        let load = match fs::read_to_string("/proc/loadavg") {
            Ok(content) => content
                .split_whitespace()
                .next()
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0),
            Err(_) => return 0,
        };
        ((load / self.cores as f64) * 100.0).clamp(0.0, 100.0) as u8
    }
}

impl Default for CpuMonitor {
    fn default() -> Self {
        Self::new()
    }
}
