//! Local file store with a byte quota.
//!
//! Everything lives flat under one directory. File names arriving off the
//! wire are untrusted and must not escape the store root.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

pub struct Store {
    root: PathBuf,
    quota: u64,
    used: u64,
}

impl Store {
    /// Open (creating if needed) the store rooted at `root` with a quota of
    /// `quota_mb` megabytes. Existing files count against the quota.
    pub fn open<P: AsRef<Path>>(root: P, quota_mb: u64) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let mut store = Self {
            root,
            quota: quota_mb * 1024 * 1024,
            used: 0,
        };
        store.used = store.scan()?;
        Ok(store)
    }

    fn scan(&self) -> Result<u64> {
        let mut total = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    fn entry_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\\')
        {
            bail!("invalid file name {name:?}");
        }
        Ok(self.root.join(name))
    }

    /// Write `bytes` under `name`, enforcing the quota. Overwriting an
    /// existing file frees its old size first.
    pub fn save(&mut self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.entry_path(name)?;
        let previous = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

        let needed = self.used.saturating_sub(previous) + bytes.len() as u64;
        if needed > self.quota {
            bail!(
                "storage quota exceeded: {} of {} bytes used, {} more needed",
                self.used,
                self.quota,
                bytes.len()
            );
        }

        fs::write(&path, bytes)?;
        self.used = needed;
        Ok(path)
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.entry_path(name)?;
        Ok(fs::read(path)?)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entry_path(name).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Stored file names and sizes.
    pub fn list(&self) -> Result<Vec<(String, u64)>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push((
                    entry.file_name().to_string_lossy().into_owned(),
                    entry.metadata()?.len(),
                ));
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn quota(&self) -> u64 {
        self.quota
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn scratch_dir() -> PathBuf {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!(
            "filehub-store-test-{}-{}",
            std::process::id(),
            n
        ))
    }

    #[test]
    fn test_save_read_and_quota_accounting() {
        let mut store = Store::open(scratch_dir(), 1).unwrap();

        store.save("a.txt", b"hello").unwrap();
        assert_eq!(store.used(), 5);
        assert_eq!(store.read("a.txt").unwrap(), b"hello");

        // Overwrite frees the old size.
        store.save("a.txt", b"hi").unwrap();
        assert_eq!(store.used(), 2);
        assert!(store.contains("a.txt"));
    }

    #[test]
    fn test_quota_exceeded_rejected() {
        let mut store = Store::open(scratch_dir(), 0).unwrap();
        assert!(store.save("big.bin", b"x").is_err());
        assert!(!store.contains("big.bin"));
    }

    #[test]
    fn test_rejects_escaping_names() {
        let mut store = Store::open(scratch_dir(), 1).unwrap();
        for name in ["../evil", "a/b", "a\\b", "..", ""] {
            assert!(store.save(name, b"x").is_err(), "accepted {name:?}");
        }
    }

    #[test]
    fn test_existing_files_count_against_quota() {
        let dir = scratch_dir();
        {
            let mut store = Store::open(&dir, 1).unwrap();
            store.save("a.txt", b"12345").unwrap();
        }
        let store = Store::open(&dir, 1).unwrap();
        assert_eq!(store.used(), 5);
        assert_eq!(store.list().unwrap(), vec![("a.txt".to_string(), 5)]);
    }
}
