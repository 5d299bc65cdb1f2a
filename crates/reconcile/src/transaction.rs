//! Durable run history and out-of-process rollback
//!
//! After every (non dry-run) run a [`Transaction`] listing each change in
//! application order is appended to a JSON history file. A later
//! `rollback <id>` reads the record back from disk, not from any live engine,
//! and undoes the changes in reverse order against the current system.

use crate::backup::BackupManager;
use crate::context::System;
use crate::error::{Error, Result};
use crate::rollback::RollbackReport;
use crate::types::{Action, Change};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Outcome of a recorded run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Success,
    Failed,
    RolledBack,
}

/// One change inside a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionChange {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    pub target: String,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_state: Option<String>,
}

impl TransactionChange {
    pub fn from_change(resource_type: &str, name: &str, change: Change) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            name: name.to_string(),
            target: change.target,
            action: change.action,
            backup_path: change.backup_path,
            prev_state: change.prev_state,
        }
    }
}

/// A durable record of one run's changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub status: TransactionStatus,
    #[serde(default)]
    pub changes: Vec<TransactionChange>,
    /// Set on records produced by `rollback <id>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_of: Option<String>,
}

impl Transaction {
    pub fn new(id: impl Into<String>, status: TransactionStatus) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            status,
            changes: Vec::new(),
            rollback_of: None,
        }
    }
}

/// Generate a transaction id from the current time
///
/// Also used as the backup directory key for the run.
pub fn new_transaction_id() -> String {
    Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

/// Append-only JSON history file (one array, newest last)
#[derive(Debug, Clone)]
pub struct TransactionStore {
    path: PathBuf,
}

impl TransactionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every transaction, oldest first. A missing file is an empty history.
    pub fn load(&self) -> Result<Vec<Transaction>> {
        if !self.path.exists() {
            log::debug!("History file {} does not exist yet", self.path.display());
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content).map_err(|e| Error::History {
            path: self.path.clone(),
            message: format!("invalid history file: {e}"),
        })
    }

    /// Append a transaction to the history
    pub fn append(&self, transaction: &Transaction) -> Result<()> {
        let mut all = self.load()?;
        all.push(transaction.clone());

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        // Write next to the file and rename so a crash never truncates history
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&all)?)?;
        fs::rename(&tmp, &self.path)?;

        log::debug!(
            "Recorded transaction {} ({} changes) in {}",
            transaction.id,
            transaction.changes.len(),
            self.path.display()
        );
        Ok(())
    }

    pub fn find(&self, id: &str) -> Result<Transaction> {
        self.load()?
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::TransactionNotFound(id.to_string()))
    }
}

/// How a recorded change can be undone without the original adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UndoKind {
    FileLike,
    PackageLike,
    Manual,
}

impl UndoKind {
    fn of(resource_type: &str) -> Self {
        match resource_type {
            "file" | "template" | "symlink" | "directory" | "copy" => Self::FileLike,
            "package" => Self::PackageLike,
            _ => Self::Manual,
        }
    }
}

/// Reads history and replays undo for a past run
pub struct TransactionManager {
    store: TransactionStore,
}

impl TransactionManager {
    pub fn new(store: TransactionStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &TransactionStore {
        &self.store
    }

    /// History, newest first
    pub fn list(&self, limit: Option<usize>) -> Result<Vec<Transaction>> {
        let mut all = self.store.load()?;
        all.reverse();
        if let Some(limit) = limit {
            all.truncate(limit);
        }
        Ok(all)
    }

    /// Undo the changes of transaction `id` in reverse order.
    ///
    /// The sweep is best effort; the returned report lists what could not be
    /// undone. A new `rolled_back` transaction referencing `id` is appended.
    pub fn rollback(&self, id: &str, system: &System) -> Result<RollbackReport> {
        let history = self.store.load()?;
        let transaction = history
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::TransactionNotFound(id.to_string()))?;

        if transaction.rollback_of.is_some()
            || history.iter().any(|t| t.rollback_of.as_deref() == Some(id))
        {
            return Err(Error::AlreadyRolledBack(id.to_string()));
        }

        if transaction.status == TransactionStatus::Failed {
            log::warn!(
                "Transaction {} failed; its changes were already rolled back in-process where possible",
                id
            );
        }

        let mut report = RollbackReport::default();
        let mut undone = Transaction::new(new_transaction_id(), TransactionStatus::RolledBack);
        undone.rollback_of = Some(id.to_string());

        for change in transaction.changes.iter().rev() {
            let label = format!("{}:{}", change.resource_type, change.name);
            match undo_change(change, system) {
                Ok(true) => {
                    log::info!("Undid {} ({} {})", label, change.action, change.target);
                    report.reverted.push(label);
                    undone.changes.push(change.clone());
                }
                Ok(false) => {
                    log::warn!(
                        "Manual action required to undo {} ({} {})",
                        label,
                        change.action,
                        change.target
                    );
                    report.skipped.push(label);
                }
                Err(e) => {
                    log::error!("Could not undo {}: {:#}", label, e);
                    report.failed.push((label, format!("{e:#}")));
                }
            }
        }

        self.store.append(&undone)?;
        Ok(report)
    }
}

/// Undo one change. `Ok(false)` means there is no automatic inverse.
fn undo_change(change: &TransactionChange, system: &System) -> anyhow::Result<bool> {
    let transport = system.transport.as_ref();
    match UndoKind::of(&change.resource_type) {
        UndoKind::FileLike => {
            let target = Path::new(&change.target);
            match (&change.backup_path, change.action) {
                (Some(backup), _) => {
                    BackupManager::restore(transport, backup, target)?;
                    Ok(true)
                }
                (None, Action::Created) => {
                    if transport.exists(target)? {
                        transport.remove_path(target)?;
                    }
                    Ok(true)
                }
                (None, _) => Ok(false),
            }
        }
        UndoKind::PackageLike => {
            let packages = system.require_packages()?;
            match change.action {
                Action::Installed => {
                    packages.remove(transport, &change.target)?;
                    Ok(true)
                }
                Action::Removed | Action::Uninstalled => {
                    packages.install(transport, &change.target)?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
        UndoKind::Manual => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PackageBackend;
    use crate::transport::{LocalTransport, Transport};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn change(
        resource_type: &str,
        target: &str,
        action: Action,
        backup: Option<PathBuf>,
    ) -> TransactionChange {
        TransactionChange {
            resource_type: resource_type.into(),
            name: target.into(),
            target: target.into(),
            action,
            backup_path: backup,
            prev_state: None,
        }
    }

    #[derive(Default)]
    struct RecordingPackages {
        calls: Mutex<Vec<String>>,
    }

    impl PackageBackend for RecordingPackages {
        fn name(&self) -> &str {
            "fake"
        }
        fn is_installed(&self, _t: &dyn Transport, _p: &str) -> anyhow::Result<bool> {
            Ok(false)
        }
        fn install(&self, _t: &dyn Transport, p: &str) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(format!("install {p}"));
            Ok(())
        }
        fn remove(&self, _t: &dyn Transport, p: &str) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(format!("remove {p}"));
            Ok(())
        }
    }

    #[test]
    fn test_store_append_and_find() {
        let dir = TempDir::new().unwrap();
        let store = TransactionStore::new(dir.path().join("history.json"));
        assert!(store.load().unwrap().is_empty());

        let mut tx = Transaction::new("tx-1", TransactionStatus::Success);
        tx.changes.push(change("file", "/etc/motd", Action::Created, None));
        store.append(&tx).unwrap();
        store
            .append(&Transaction::new("tx-2", TransactionStatus::Failed))
            .unwrap();

        let all = store.load().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].id, "tx-2");
        assert_eq!(store.find("tx-1").unwrap(), tx);
        assert!(matches!(store.find("nope"), Err(Error::TransactionNotFound(_))));
    }

    #[test]
    fn test_record_shape() {
        let mut tx = Transaction::new("tx-1", TransactionStatus::Failed);
        tx.changes.push(change(
            "file",
            "/etc/app.conf",
            Action::Modified,
            Some(PathBuf::from("/var/backups/tx-1/app.conf")),
        ));
        let json = serde_json::to_value(&tx).unwrap();

        assert_eq!(json["status"], "failed");
        assert_eq!(json["changes"][0]["type"], "file");
        assert_eq!(json["changes"][0]["action"], "modified");
        assert_eq!(json["changes"][0]["backup_path"], "/var/backups/tx-1/app.conf");
        assert!(json.get("rollback_of").is_none());
    }

    #[test]
    fn test_rollback_restores_and_deletes_files() {
        let dir = TempDir::new().unwrap();
        let modified = dir.path().join("app.conf");
        let created = dir.path().join("new.conf");
        let backup = dir.path().join("backups/tx-1/app.conf");
        fs::create_dir_all(backup.parent().unwrap()).unwrap();
        fs::write(&backup, "original").unwrap();
        fs::write(&modified, "changed").unwrap();
        fs::write(&created, "fresh").unwrap();

        let store = TransactionStore::new(dir.path().join("history.json"));
        let mut tx = Transaction::new("tx-1", TransactionStatus::Success);
        tx.changes.push(change(
            "file",
            modified.to_str().unwrap(),
            Action::Modified,
            Some(backup.clone()),
        ));
        tx.changes.push(change("file", created.to_str().unwrap(), Action::Created, None));
        tx.changes.push(change("command", "make install", Action::Executed, None));
        store.append(&tx).unwrap();

        let manager = TransactionManager::new(store);
        let system = System::new(Arc::new(LocalTransport));
        let report = manager.rollback("tx-1", &system).unwrap();

        assert_eq!(fs::read_to_string(&modified).unwrap(), "original");
        assert!(!created.exists());
        assert_eq!(report.reverted.len(), 2);
        assert_eq!(report.skipped, ["command:make install"]);
        assert!(report.is_complete());

        let history = manager.list(None).unwrap();
        assert_eq!(history[0].status, TransactionStatus::RolledBack);
        assert_eq!(history[0].rollback_of.as_deref(), Some("tx-1"));
    }

    #[test]
    fn test_rollback_inverts_packages_in_reverse() {
        let dir = TempDir::new().unwrap();
        let store = TransactionStore::new(dir.path().join("history.json"));
        let mut tx = Transaction::new("tx-1", TransactionStatus::Success);
        tx.changes.push(change("package", "nginx", Action::Installed, None));
        tx.changes.push(change("package", "apache2", Action::Removed, None));
        store.append(&tx).unwrap();

        let packages = Arc::new(RecordingPackages::default());
        let system = System::new(Arc::new(LocalTransport)).with_packages(packages.clone());
        TransactionManager::new(store).rollback("tx-1", &system).unwrap();

        assert_eq!(
            packages.calls.lock().unwrap().as_slice(),
            ["install apache2", "remove nginx"]
        );
    }

    #[test]
    fn test_rollback_twice_is_refused() {
        let dir = TempDir::new().unwrap();
        let store = TransactionStore::new(dir.path().join("history.json"));
        store
            .append(&Transaction::new("tx-1", TransactionStatus::Success))
            .unwrap();

        let manager = TransactionManager::new(store);
        let system = System::new(Arc::new(LocalTransport));
        manager.rollback("tx-1", &system).unwrap();

        let err = manager.rollback("tx-1", &system).unwrap_err();
        assert!(matches!(err, Error::AlreadyRolledBack(ref id) if id == "tx-1"));
    }

    #[test]
    fn test_package_rollback_without_backend_fails_per_change() {
        let dir = TempDir::new().unwrap();
        let store = TransactionStore::new(dir.path().join("history.json"));
        let mut tx = Transaction::new("tx-1", TransactionStatus::Success);
        tx.changes.push(change("package", "nginx", Action::Installed, None));
        store.append(&tx).unwrap();

        let report = TransactionManager::new(store)
            .rollback("tx-1", &System::new(Arc::new(LocalTransport)))
            .unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(!report.is_complete());
    }
}
