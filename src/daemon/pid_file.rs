// PID file management
//
// Written after the process detaches, removed on terminate, and consulted at
// startup to refuse a second instance.

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Daemon PID file
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Write current process PID to file
    pub fn write(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let pid = std::process::id();
        fs::write(&self.path, pid.to_string())
            .with_context(|| format!("Failed to write PID file: {}", self.path.display()))?;
        info!(pid = pid, path = %self.path.display(), "Daemon PID file written");
        Ok(())
    }

    /// Remove PID file (called on shutdown)
    pub fn cleanup(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove PID file: {}", self.path.display()))?;
            info!(path = %self.path.display(), "Daemon PID file removed");
        }
        Ok(())
    }

    /// Check if the recorded process is alive
    ///
    /// Returns true if:
    /// - PID file exists
    /// - PID can be parsed
    /// - Process with that PID exists
    pub fn is_running(&self) -> bool {
        if !self.path.exists() {
            return false;
        }

        match self.read() {
            Ok(pid) => process_exists(pid),
            Err(_) => false,
        }
    }

    /// Read PID from file
    pub fn read(&self) -> Result<u32> {
        let pid_str = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read PID file: {}", self.path.display()))?;
        pid_str
            .trim()
            .parse()
            .with_context(|| format!("Invalid PID in file: {}", pid_str))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// kill(pid, 0) checks existence without sending a signal
///
/// EPERM means the process exists but belongs to another user.
fn process_exists(pid: u32) -> bool {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => matches!(
            kill(Pid::from_raw(raw), None),
            Ok(()) | Err(Errno::EPERM)
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pid_file_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("run/chinta.pid");
        let pid_file = PidFile::new(&path);

        pid_file.write().unwrap();
        assert!(path.exists());

        assert_eq!(pid_file.read().unwrap(), std::process::id());
        assert!(pid_file.is_running());

        pid_file.cleanup().unwrap();
        assert!(!path.exists());
        assert!(!pid_file.is_running());

        // Cleanup of a missing file is fine
        pid_file.cleanup().unwrap();
    }

    #[test]
    fn test_garbage_pid_is_not_running() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("chinta.pid");
        fs::write(&path, "not-a-pid").unwrap();

        let pid_file = PidFile::new(&path);
        assert!(pid_file.read().is_err());
        assert!(!pid_file.is_running());
    }

    #[test]
    fn test_process_exists() {
        assert!(process_exists(std::process::id()));
        assert!(!process_exists(0));
        assert!(!process_exists(999_999_999));
    }

    #[test]
    fn test_other_users_process_counts_as_running() {
        // init is always alive; unprivileged callers get EPERM for it
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("chinta.pid");
        fs::write(&path, "1").unwrap();

        assert!(process_exists(1));
        assert!(PidFile::new(&path).is_running());
    }
}
