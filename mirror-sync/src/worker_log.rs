//! Per-worker log files: `<log_dir>/package_status_<worker>.log`.
//!
//! Each line is also forwarded to the process logger, so the file is a
//! per-worker slice of the main log that results can point at.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use crate::error::{io_err, SyncError};

#[derive(Debug, Clone)]
pub struct WorkerLog {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl WorkerLog {
    pub fn path_for(log_dir: &Path, worker: usize) -> PathBuf {
        log_dir.join(format!("package_status_{worker}.log"))
    }

    /// Open (append) the log for `worker`, creating `log_dir` if needed.
    pub fn open(log_dir: &Path, worker: usize) -> Result<Self, SyncError> {
        std::fs::create_dir_all(log_dir).map_err(|e| io_err(log_dir, e))?;
        let path = Self::path_for(log_dir, worker);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self, message: &str) {
        tracing::info!("{message}");
        self.write("INFO", message);
    }

    pub fn error(&self, message: &str) {
        tracing::error!("{message}");
        self.write("ERROR", message);
    }

    fn write(&self, level: &str, message: &str) {
        let stamp = Utc::now().format("%Y-%m-%d %H:%M:%S");
        let mut file = lock_file(&self.file);
        // A failed log write must not fail the task it describes.
        let _ = writeln!(file, "{stamp} {level} {message}");
    }
}

fn lock_file(file: &Mutex<File>) -> MutexGuard<'_, File> {
    file.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lines_append_to_worker_file() {
        let dir = TempDir::new().expect("dir");
        let log = WorkerLog::open(&dir.path().join("logs"), 2).expect("open");
        log.info("processing busybox");
        log.error("sync failed");

        let text = std::fs::read_to_string(log.path()).expect("read");
        assert!(log.path().ends_with("package_status_2.log"));
        assert!(text.contains("INFO processing busybox"));
        assert!(text.contains("ERROR sync failed"));
    }
}
