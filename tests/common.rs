use std::env;
use std::path::PathBuf;

use ovlstore::{InodeRegistry, StoreConfig};
use parking_lot::{const_mutex, Mutex, MutexGuard};
use tempfile::TempDir;

// Tests in one binary share the process environment.
static ENV_LOCK: Mutex<()> = const_mutex(());

/// Isolated config directory, exported through `OVLSTORE_CONFIG_DIR` for as
/// long as the context lives.
#[allow(dead_code)]
pub struct TestConfigContext {
    pub temp_dir: TempDir,
    pub config_dir: PathBuf,
    _env: MutexGuard<'static, ()>,
}

impl Default for TestConfigContext {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(dead_code)]
impl TestConfigContext {
    pub fn new() -> Self {
        let env_guard = ENV_LOCK.lock();
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_dir = temp_dir.path().join("config");

        env::set_var(
            "OVLSTORE_CONFIG_DIR",
            config_dir.to_string_lossy().to_string(),
        );

        Self {
            temp_dir,
            config_dir,
            _env: env_guard,
        }
    }
}

impl Drop for TestConfigContext {
    fn drop(&mut self) {
        env::remove_var("OVLSTORE_CONFIG_DIR");
    }
}

/// Scratch directory for state files.
#[allow(dead_code)]
pub struct StateDir {
    pub temp_dir: TempDir,
}

#[allow(dead_code)]
impl StateDir {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }
}

/// Defaults with the low-memory guard off, so tests never depend on the
/// host's free memory.
#[allow(dead_code)]
pub fn test_config() -> StoreConfig {
    let mut config = StoreConfig::default();
    config.memory.low_memory_guard = Some(false);
    config
}

/// A registry holding just the root directory.
#[allow(dead_code)]
pub fn rooted_registry() -> InodeRegistry {
    let mut registry = InodeRegistry::from_config(&test_config());
    registry.ensure_root().expect("Failed to create root");
    registry
}
