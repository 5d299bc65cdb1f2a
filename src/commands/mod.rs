pub mod apply;
pub mod history;

use crate::paths::StatePaths;
use crate::providers::Providers;
use anyhow::{Context as _, Result};
use reconcile::{BackupManager, LocalTransport, System, Transport};
use std::sync::Arc;

/// The machine a command runs against, with its detected providers
pub struct Target {
    pub system: System,
    pub providers: Providers,
}

impl Target {
    /// Probe the local machine.
    ///
    /// `backup_key` enables backups under `<state>/backups/<key>`.
    pub fn local(paths: &StatePaths, backup_key: Option<&str>) -> Self {
        let transport: Arc<dyn Transport> = Arc::new(LocalTransport);
        let providers = Providers::detect(transport.as_ref());

        let mut system = System::new(transport)
            .with_fact("os", std::env::consts::OS)
            .with_fact("family", std::env::consts::FAMILY)
            .with_fact("arch", std::env::consts::ARCH);
        if let Some(packages) = &providers.packages {
            system = system.with_packages(Arc::clone(packages));
        }
        if let Some(key) = backup_key {
            system = system.with_backups(Arc::new(BackupManager::new(paths.backups_dir(), key)));
        }

        log::debug!("Target: {:?}", system);
        Self { system, providers }
    }
}

/// Ask before touching the machine, unless `--yes` was given
pub fn confirm(prompt: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Failed to read confirmation")
}
