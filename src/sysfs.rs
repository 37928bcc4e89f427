//! Root-relative access to sysfs and debugfs nodes

use crate::errors::{FanControlError, Result};
use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

/// Abstraction over the sysfs filesystem root.
/// `/` in production, redirectable to a temp directory for testing.
#[derive(Debug, Clone)]
pub struct SysfsRoot {
    root: PathBuf,
}

impl SysfsRoot {
    /// Create a SysfsRoot pointing at a custom directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a path relative to this root.
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    /// Read a node, trimming whitespace.
    pub fn read(&self, relative: impl AsRef<Path>) -> Result<String> {
        let path = self.path(relative);
        std::fs::read_to_string(&path)
            .map(|s| s.trim().to_string())
            .map_err(|e| FanControlError::SysfsRead { path, source: e })
    }

    /// Read a node, returning None if it doesn't exist or can't be read by this user.
    pub fn read_optional(&self, relative: impl AsRef<Path>) -> Result<Option<String>> {
        let path = self.path(relative);
        match std::fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => Ok(None),
            Err(e) => Err(FanControlError::SysfsRead { path, source: e }),
        }
    }

    /// Read a node and parse it.
    pub fn read_parse<T: std::str::FromStr>(&self, relative: impl AsRef<Path>) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        let relative = relative.as_ref();
        let value = self.read(relative)?;
        value.parse::<T>().map_err(|e| FanControlError::Parse {
            path: self.path(relative),
            detail: format!("failed to parse '{}': {}", value, e),
        })
    }

    /// Write a value to a node.
    pub fn write(&self, relative: impl AsRef<Path>, value: &str) -> Result<()> {
        let path = self.path(relative);
        std::fs::write(&path, value).map_err(|e| FanControlError::SysfsWrite { path, source: e })
    }

    /// Read one byte at `offset` of a register-file node such as the EC `io` file.
    pub fn read_byte_at(&self, relative: impl AsRef<Path>, offset: u8) -> Result<u8> {
        let path = self.path(relative);
        let mut buf = [0u8; 1];
        OpenOptions::new()
            .read(true)
            .open(&path)
            .and_then(|file| file.read_exact_at(&mut buf, u64::from(offset)))
            .map_err(|e| FanControlError::SysfsRead { path, source: e })?;
        Ok(buf[0])
    }

    /// Write one byte at `offset` of a register-file node.
    pub fn write_byte_at(&self, relative: impl AsRef<Path>, offset: u8, value: u8) -> Result<()> {
        let path = self.path(relative);
        OpenOptions::new()
            .write(true)
            .open(&path)
            .and_then(|file| file.write_all_at(&[value], u64::from(offset)))
            .map_err(|e| FanControlError::SysfsWrite { path, source: e })
    }

    /// List entries in a directory, sorted by name.
    pub fn list_dir(&self, relative: impl AsRef<Path>) -> Result<Vec<String>> {
        let path = self.path(relative);
        let entries = std::fs::read_dir(&path).map_err(|e| FanControlError::SysfsRead {
            path: path.clone(),
            source: e,
        })?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| FanControlError::SysfsRead {
                path: path.clone(),
                source: e,
            })?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Check if a path exists relative to this root.
    pub fn exists(&self, relative: impl AsRef<Path>) -> bool {
        self.path(relative).exists()
    }
}

/// Run blocking node I/O on tokio's blocking pool.
///
/// EC and sysfs transactions can stall in the kernel. Off the executor, a
/// stalled one only parks a pool thread and the caller's timeouts still fire.
pub async fn unblock<T, F>(op: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op).await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_read_parse_trims() {
        let tmp = tempfile::tempdir().unwrap();
        let sysfs = SysfsRoot::new(tmp.path());

        fs::create_dir_all(tmp.path().join("sys/class/hwmon/hwmon0")).unwrap();
        fs::write(tmp.path().join("sys/class/hwmon/hwmon0/temp1_input"), "54000\n").unwrap();

        assert_eq!(sysfs.read("sys/class/hwmon/hwmon0/temp1_input").unwrap(), "54000");
        assert_eq!(
            sysfs.read_parse::<i32>("sys/class/hwmon/hwmon0/temp1_input").unwrap(),
            54000
        );
    }

    #[test]
    fn test_read_parse_reports_garbage() {
        let tmp = tempfile::tempdir().unwrap();
        let sysfs = SysfsRoot::new(tmp.path());
        fs::write(tmp.path().join("value"), "hot\n").unwrap();

        let err = sysfs.read_parse::<i32>("value").unwrap_err();
        assert!(matches!(err, FanControlError::Parse { .. }));
    }

    #[test]
    fn test_read_optional_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let sysfs = SysfsRoot::new(tmp.path());

        assert_eq!(sysfs.read_optional("sys/nonexistent").unwrap(), None);
    }

    #[test]
    fn test_register_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let sysfs = SysfsRoot::new(tmp.path());
        fs::write(tmp.path().join("io"), vec![0u8; 256]).unwrap();

        sysfs.write_byte_at("io", 0x2C, 55).unwrap();
        assert_eq!(sysfs.read_byte_at("io", 0x2C).unwrap(), 55);
        assert_eq!(sysfs.read_byte_at("io", 0x2D).unwrap(), 0);
        assert_eq!(fs::metadata(tmp.path().join("io")).unwrap().len(), 256);
    }

    #[tokio::test]
    async fn test_unblock_runs_off_the_executor() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("pwm1"), "0\n").unwrap();
        let sysfs = SysfsRoot::new(tmp.path());

        let writer = sysfs.clone();
        unblock(move || writer.write("pwm1", "128")).await.unwrap();
        let value = unblock(move || sysfs.read("pwm1")).await.unwrap();
        assert_eq!(value, "128");
    }

    #[tokio::test]
    async fn test_unblock_reports_panicked_task() {
        let err = unblock(|| -> Result<()> { panic!("ec driver went away") })
            .await
            .unwrap_err();
        assert!(matches!(err, FanControlError::BlockingTask(_)));
    }

    #[test]
    fn test_list_dir_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        let sysfs = SysfsRoot::new(tmp.path());

        fs::create_dir_all(tmp.path().join("sys/class/hwmon/hwmon1")).unwrap();
        fs::create_dir_all(tmp.path().join("sys/class/hwmon/hwmon0")).unwrap();

        let entries = sysfs.list_dir("sys/class/hwmon").unwrap();
        assert_eq!(entries, vec!["hwmon0", "hwmon1"]);
    }
}
