//! System resource detection and adaptive tuning.
//!
//! Detects available RAM and CPU cores, then computes tuning parameters
//! that adapt editor behavior to the host machine: how large a scratch
//! store may grow before spilling to disk, how many worker threads serve
//! long-running jobs, and the streaming read chunk size. Stateless: each
//! call to `ResourceManager::auto_tune()` re-probes the system.

use sysinfo::{MemoryRefreshKind, RefreshKind, System};

// ── Constants ───────────────────────────────────────────────────────

const KB: usize = 1024;
const MB: usize = 1024 * 1024;
const GB: u64 = 1024 * 1024 * 1024;

/// Scratch spool floor (256 KB).
const SPOOL_MIN: usize = 256 * KB;

/// Scratch spool ceiling (64 MB).
const SPOOL_MAX: usize = 64 * MB;

/// Fraction of available memory one scratch store may occupy in RAM.
const SPOOL_FRACTION: f64 = 0.01;

// ── SystemResources ─────────────────────────────────────────────────

/// Snapshot of detected hardware resources.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total physical RAM in bytes.
    pub total_memory_bytes: u64,
    /// Available (re-usable) RAM in bytes.
    pub available_memory_bytes: u64,
    /// Logical CPU count.
    pub cpu_count: usize,
}

impl SystemResources {
    /// Probe the current system for RAM and CPU information.
    pub fn detect() -> Self {
        let mut sys = System::new_with_specifics(
            RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
        );
        sys.refresh_memory();

        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            total_memory_bytes: sys.total_memory(),
            available_memory_bytes: sys.available_memory(),
            cpu_count,
        }
    }
}

// ── TuningProfile ───────────────────────────────────────────────────

/// Adaptive parameters computed from system resources.
#[derive(Debug, Clone)]
pub struct TuningProfile {
    /// Bytes a scratch store keeps in memory before spilling to disk.
    pub spool_threshold: usize,
    /// Upper bound on concurrently live worker threads.
    pub worker_cap: usize,
    /// Chunk size for streaming reads with progress callbacks.
    pub read_chunk: usize,
}

impl TuningProfile {
    /// Compute a tuning profile from detected resources.
    ///
    /// Heuristics:
    /// - `spool_threshold`: `clamp(available * 0.01, 256 KB, 64 MB)`.
    /// - `worker_cap`: RAM < 2 GB -> 2, else `clamp(cpu, 2, 8)`.
    /// - `read_chunk`: RAM < 2 GB -> 4 KB, else 64 KB.
    pub fn from_resources(res: &SystemResources) -> Self {
        let raw_spool = (res.available_memory_bytes as f64 * SPOOL_FRACTION) as usize;
        let spool_threshold = raw_spool.clamp(SPOOL_MIN, SPOOL_MAX);

        let worker_cap = if res.total_memory_bytes < 2 * GB {
            2
        } else {
            res.cpu_count.clamp(2, 8)
        };

        let read_chunk = if res.total_memory_bytes < 2 * GB {
            4 * KB
        } else {
            64 * KB
        };

        Self {
            spool_threshold,
            worker_cap,
            read_chunk,
        }
    }
}

impl Default for TuningProfile {
    /// Conservative defaults suitable for tests and unknown environments.
    fn default() -> Self {
        Self {
            spool_threshold: MB,
            worker_cap: 2,
            read_chunk: 4 * KB,
        }
    }
}

// ── ResourceManager ─────────────────────────────────────────────────

/// Stateless utility: detect system resources and compute tuning profile.
pub struct ResourceManager;

impl ResourceManager {
    /// Probe the system and return an adaptive tuning profile.
    pub fn auto_tune() -> TuningProfile {
        let resources = SystemResources::detect();
        TuningProfile::from_resources(&resources)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: build `SystemResources` with explicit values (bypasses detection).
    fn make_resources(total_gb: f64, available_gb: f64, cpus: usize) -> SystemResources {
        SystemResources {
            total_memory_bytes: (total_gb * GB as f64) as u64,
            available_memory_bytes: (available_gb * GB as f64) as u64,
            cpu_count: cpus,
        }
    }

    #[test]
    fn test_detection_reports_something() {
        let res = SystemResources::detect();
        assert!(res.total_memory_bytes > 0, "total memory must be positive");
        assert!(res.cpu_count >= 1, "cpu count must be at least 1");
    }

    #[test]
    fn test_low_memory_profile() {
        let res = make_resources(1.0, 0.25, 4);
        let profile = TuningProfile::from_resources(&res);

        assert_eq!(profile.worker_cap, 2);
        assert_eq!(profile.read_chunk, 4 * KB);
        // 1% of 256 MB is ~2.5 MB, above the floor.
        assert!(profile.spool_threshold >= SPOOL_MIN);
    }

    #[test]
    fn test_spool_threshold_bounded() {
        let res = make_resources(512.0, 256.0, 32);
        let profile = TuningProfile::from_resources(&res);

        assert_eq!(profile.spool_threshold, SPOOL_MAX);
        assert_eq!(profile.worker_cap, 8);
        assert_eq!(profile.read_chunk, 64 * KB);
    }

    #[test]
    fn test_spool_threshold_floor() {
        let res = make_resources(4.0, 0.01, 2);
        let profile = TuningProfile::from_resources(&res);

        assert_eq!(profile.spool_threshold, SPOOL_MIN);
    }

    #[test]
    fn test_default_profile() {
        let profile = TuningProfile::default();

        assert_eq!(profile.spool_threshold, MB);
        assert_eq!(profile.worker_cap, 2);
        assert_eq!(profile.read_chunk, 4 * KB);
    }
}
