//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - Isolated primary and fallback tier roots
//! - A scratch directory for staging upload payloads
//!
//! # Usage
//!
//! ```ignore
//! use casket_config::testing::TestEnvironment;
//!
//! let env = TestEnvironment::new()?;
//! let source = env.stage_payload("photo.png", b"pixels")?;
//! // env.primary, env.fallback are fully isolated per test
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use casket_store::StoreOptions;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique tier roots
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Isolated primary tier root
    pub primary: PathBuf,
    /// Isolated fallback tier root
    pub fallback: PathBuf,
    /// Staging area for upload payloads
    pub scratch: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let primary = root.join("primary");
        let fallback = root.join("archive");
        let scratch = root.join("scratch");

        std::fs::create_dir_all(&primary)?;
        std::fs::create_dir_all(&fallback)?;
        std::fs::create_dir_all(&scratch)?;

        Ok(Self {
            _temp_dir: temp_dir,
            primary,
            fallback,
            scratch,
            test_id,
        })
    }

    /// Write a payload file into the scratch area and return its path.
    pub fn stage_payload(&self, name: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.scratch.join(name);
        std::fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Store options pointed at this environment's tiers.
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions::new(&self.primary, &self.fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environments_are_isolated() {
        let a = TestEnvironment::new().unwrap();
        let b = TestEnvironment::new().unwrap();
        assert_ne!(a.primary, b.primary);
        assert_ne!(a.test_id, b.test_id);
    }

    #[test]
    fn test_stage_payload() {
        let env = TestEnvironment::new().unwrap();
        let path = env.stage_payload("x.txt", b"abc").unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"abc");
    }
}
