//! Background rename driver for race tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Continuously renames a file back and forth between two sibling names
/// on a background thread, simulating a hostile concurrent renamer.
#[derive(Debug)]
pub struct RenameStorm {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<u64>>,
}

impl RenameStorm {
    /// Starts flipping whichever of `first`/`second` exists to the other.
    pub fn start(first: PathBuf, second: PathBuf) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let thread = std::thread::spawn(move || {
            let mut renames = 0u64;
            while !stop_flag.load(Ordering::Relaxed) {
                // Whichever direction fails (the entry is at the other
                // name, or the target was unlinked mid-storm) is fine;
                // the point is sustained directory churn.
                if std::fs::rename(&first, &second).is_ok() {
                    renames += 1;
                }
                if std::fs::rename(&second, &first).is_ok() {
                    renames += 1;
                }
            }
            renames
        });
        Self {
            stop,
            thread: Some(thread),
        }
    }

    /// Stops the storm and returns how many renames it performed.
    pub fn stop(mut self) -> u64 {
        self.stop.store(true, Ordering::Relaxed);
        self.thread
            .take()
            .map(|t| t.join().unwrap_or(0))
            .unwrap_or(0)
    }
}

impl Drop for RenameStorm {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::TestEnv;

    #[test]
    fn test_storm_renames_and_stops() {
        let env = TestEnv::new("storm");
        let a = env.create_file("a");
        let b = env.tempdir().join("b");

        let storm = RenameStorm::start(a.clone(), b.clone());
        std::thread::sleep(std::time::Duration::from_millis(50));
        let renames = storm.stop();

        assert!(renames > 0);
        assert!(a.exists() || b.exists());
    }
}
