//! Pre-change file snapshots
//!
//! One directory per run, keyed by the run's transaction id; one file per
//! backed-up path, named by its base filename. Two different paths sharing a
//! base filename collide inside the same run directory: the later copy wins
//! and a warning is logged.

use crate::transport::Transport;
use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Copies files aside before adapters mutate them
#[derive(Debug)]
pub struct BackupManager {
    run_dir: PathBuf,
    /// backup file name -> original path, for collision warnings
    taken: Mutex<HashMap<String, PathBuf>>,
}

impl BackupManager {
    /// Backups for one run under `root/<run_key>`
    pub fn new(root: impl AsRef<Path>, run_key: &str) -> Self {
        Self {
            run_dir: root.as_ref().join(run_key),
            taken: Mutex::new(HashMap::new()),
        }
    }

    /// Directory holding this run's backups
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Back up `path` on the target.
    ///
    /// Returns `Ok(None)` when the file did not exist (nothing to back up),
    /// which is not an error. A failed copy is an error.
    pub fn backup(&self, transport: &dyn Transport, path: &Path) -> Result<Option<PathBuf>> {
        if !transport.exists(path)? {
            log::debug!("No backup needed, {} does not exist", path.display());
            return Ok(None);
        }

        let Some(file_name) = path.file_name() else {
            bail!("Cannot back up path without a file name: {}", path.display());
        };
        let file_name = file_name.to_string_lossy().to_string();
        let dest = self.run_dir.join(&file_name);

        {
            let mut taken = match self.taken.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(previous) = taken.insert(file_name, path.to_path_buf())
                && previous != path
            {
                log::warn!(
                    "Backup name collision: {} overwrites the backup of {} in {}",
                    path.display(),
                    previous.display(),
                    self.run_dir.display()
                );
            }
        }

        transport
            .create_dir_all(&self.run_dir)
            .context("Failed to create backup directory")?;
        transport
            .copy_file(path, &dest)
            .with_context(|| format!("Failed to back up {}", path.display()))?;

        log::debug!("Backed up {} to {}", path.display(), dest.display());
        Ok(Some(dest))
    }

    /// Copy a backup back over its original location
    pub fn restore(transport: &dyn Transport, backup: &Path, target: &Path) -> Result<()> {
        transport
            .copy_file(backup, target)
            .with_context(|| format!("Failed to restore {} from backup", target.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalTransport;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_backup_missing_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let backups = BackupManager::new(dir.path().join("backups"), "tx-1");

        let result = backups
            .backup(&LocalTransport, &dir.path().join("missing.conf"))
            .unwrap();
        assert!(result.is_none());
        assert!(!backups.run_dir().exists());
    }

    #[test]
    fn test_backup_copies_into_run_dir() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("app.conf");
        fs::write(&file, "old").unwrap();

        let backups = BackupManager::new(dir.path().join("backups"), "tx-1");
        let path = backups.backup(&LocalTransport, &file).unwrap().unwrap();

        assert_eq!(path, dir.path().join("backups/tx-1/app.conf"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "old");
    }

    #[test]
    fn test_restore_overwrites_target() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("app.conf");
        fs::write(&file, "old").unwrap();

        let backups = BackupManager::new(dir.path().join("backups"), "tx-1");
        let path = backups.backup(&LocalTransport, &file).unwrap().unwrap();
        fs::write(&file, "new").unwrap();

        BackupManager::restore(&LocalTransport, &path, &file).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "old");
    }

    #[test]
    fn test_same_base_name_collides() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a/config");
        let b = dir.path().join("b/config");
        fs::create_dir_all(a.parent().unwrap()).unwrap();
        fs::create_dir_all(b.parent().unwrap()).unwrap();
        fs::write(&a, "first").unwrap();
        fs::write(&b, "second").unwrap();

        let backups = BackupManager::new(dir.path().join("backups"), "tx-1");
        let pa = backups.backup(&LocalTransport, &a).unwrap().unwrap();
        let pb = backups.backup(&LocalTransport, &b).unwrap().unwrap();

        assert_eq!(pa, pb);
        assert_eq!(fs::read_to_string(&pb).unwrap(), "second");
    }
}
