use std::fmt;
use std::sync::Arc;

use crate::config::MemoryConfig;
use crate::error::{OvlError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub total: u64,
    pub free: u64,
}

/// Source of system memory figures for the low-memory guard.
pub trait MemorySource: Send + Sync {
    /// `None` when the figures cannot be obtained; the guard then lets the
    /// allocation through.
    fn snapshot(&self) -> Option<MemorySnapshot>;
}

/// Reads total and free RAM with `sysinfo(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysinfoSource;

impl MemorySource for SysinfoSource {
    #[cfg(target_os = "linux")]
    fn snapshot(&self) -> Option<MemorySnapshot> {
        // SAFETY: sysinfo only writes into the struct we hand it.
        let mut info: libc::sysinfo = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::sysinfo(&mut info) };
        if rc != 0 {
            return None;
        }
        let unit = u64::from(info.mem_unit.max(1));
        Some(MemorySnapshot {
            total: (info.totalram as u64).saturating_mul(unit),
            free: (info.freeram as u64).saturating_mul(unit),
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn snapshot(&self) -> Option<MemorySnapshot> {
        None
    }
}

/// Policy check consulted before a new inode record is allocated.
#[derive(Clone)]
pub struct MemoryGuard {
    enabled: bool,
    min_free_percent: u8,
    source: Arc<dyn MemorySource>,
}

impl MemoryGuard {
    pub fn new(enabled: bool, min_free_percent: u8, source: Arc<dyn MemorySource>) -> Self {
        MemoryGuard {
            enabled,
            min_free_percent,
            source,
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, 0, Arc::new(SysinfoSource))
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(
            config.get_low_memory_guard(),
            config.get_min_free_percent(),
            Arc::new(SysinfoSource),
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fail with `OutOfMemory` when free memory is below the configured share
    /// of total memory.
    pub fn check(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let Some(snapshot) = self.source.snapshot() else {
            return Ok(());
        };
        if snapshot.total == 0 {
            return Ok(());
        }
        let threshold = snapshot.total / 100 * u64::from(self.min_free_percent);
        if snapshot.free < threshold {
            tracing::warn!(
                "Low-memory guard tripped: {} bytes free of {} (minimum {}%)",
                snapshot.free,
                snapshot.total,
                self.min_free_percent
            );
            return Err(OvlError::OutOfMemory(format!(
                "free memory {} below {}% of {}",
                snapshot.free, self.min_free_percent, snapshot.total
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for MemoryGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryGuard")
            .field("enabled", &self.enabled)
            .field("min_free_percent", &self.min_free_percent)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(Option<MemorySnapshot>);

    impl MemorySource for FixedSource {
        fn snapshot(&self) -> Option<MemorySnapshot> {
            self.0
        }
    }

    fn guard(enabled: bool, free: u64) -> MemoryGuard {
        MemoryGuard::new(
            enabled,
            10,
            Arc::new(FixedSource(Some(MemorySnapshot { total: 1000, free }))),
        )
    }

    #[test]
    fn test_guard_trips_below_threshold() {
        assert!(guard(true, 200).check().is_ok());
        assert!(guard(true, 100).check().is_ok());
        assert!(matches!(
            guard(true, 99).check(),
            Err(OvlError::OutOfMemory(_))
        ));
    }

    #[test]
    fn test_disabled_guard_never_trips() {
        assert!(guard(false, 0).check().is_ok());
        assert!(!MemoryGuard::disabled().is_enabled());
    }

    #[test]
    fn test_unknown_memory_lets_allocation_through() {
        let guard = MemoryGuard::new(true, 10, Arc::new(FixedSource(None)));
        assert!(guard.check().is_ok());
    }
}
