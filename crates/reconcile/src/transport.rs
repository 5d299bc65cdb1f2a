//! Access to the target machine
//!
//! Adapters never touch the target directly; they go through a [`Transport`]
//! so the same resource works against the local host or a remote one. The
//! remote session protocol lives outside this crate.

use crate::types::CommandOutput;
use anyhow::{Context, Result, bail};
use std::fs;
use std::path::Path;
use std::process::Command;

/// Command and file access to one target
pub trait Transport: Send + Sync {
    /// Short label used in logs (e.g. "local", a host name)
    fn name(&self) -> &str;

    /// Run a command on the target
    fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Run a command and return just success/failure
    fn run_status(&self, cmd: &str, args: &[&str]) -> Result<bool> {
        Ok(self.run(cmd, args)?.success)
    }

    /// Run a command and capture stdout
    fn run_capture(&self, cmd: &str, args: &[&str]) -> Result<String> {
        let output = self.run(cmd, args)?;
        if !output.success {
            bail!("Command failed: {}", output.stderr_str().trim());
        }
        Ok(output.stdout_str())
    }

    /// Whether a path exists (symlinks are not followed)
    fn exists(&self, path: &Path) -> Result<bool>;

    /// Read a file, `None` if it does not exist
    fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>>;

    /// Write a file, creating parent directories
    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()>;

    /// Copy a file on the target
    fn copy_file(&self, from: &Path, to: &Path) -> Result<()>;

    /// Remove a file, symlink or empty directory
    fn remove_path(&self, path: &Path) -> Result<()>;

    /// Create a directory and its parents
    fn create_dir_all(&self, path: &Path) -> Result<()>;
}

/// Transport for the machine the process runs on
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn name(&self) -> &str {
        "local"
    }

    fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput> {
        log::debug!("run: {} {}", cmd, args.join(" "));
        let output = Command::new(cmd)
            .args(args)
            .output()
            .with_context(|| format!("Failed to execute: {} {}", cmd, args.join(" ")))?;
        Ok(output.into())
    }

    fn exists(&self, path: &Path) -> Result<bool> {
        match fs::symlink_metadata(path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to stat {}", path.display())),
        }
    }

    fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create parent directory: {}", parent.display())
            })?;
        }
        fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create parent directory: {}", parent.display())
            })?;
        }
        fs::copy(from, to).with_context(|| {
            format!("Failed to copy {} -> {}", from.display(), to.display())
        })?;
        Ok(())
    }

    fn remove_path(&self, path: &Path) -> Result<()> {
        let meta = fs::symlink_metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        if meta.is_dir() {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        }
        .with_context(|| format!("Failed to remove {}", path.display()))
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))
    }
}
