//! Test harness - tempdir environments and log capture.

use std::path::{Path, PathBuf};
use std::sync::Once;

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use tempfile::TempDir;

/// A scratch directory scoped to one test.
#[derive(Debug)]
pub struct TestEnv {
    temp_dir: TempDir,
    test_name: String,
}

impl TestEnv {
    pub fn new(test_name: &str) -> Self {
        let temp_dir = tempfile::tempdir().expect("failed to create temp dir");
        Self {
            temp_dir,
            test_name: test_name.to_string(),
        }
    }

    pub fn tempdir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// Creates a small file under the tempdir and returns its path.
    pub fn create_file(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, b"lofio test data").expect("failed to create test file");
        path
    }

    /// A random sibling name, for scratch renames.
    pub fn random_name(&self, prefix: &str) -> PathBuf {
        let suffix: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(10)
            .map(char::from)
            .collect();
        self.temp_dir.path().join(format!("{prefix}-{suffix}"))
    }
}

/// Installs a fmt subscriber filtered by `RUST_LOG`, once per process.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(EnvFilter::from_default_env())
            .init();
    });
}
