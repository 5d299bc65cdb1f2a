//! Package and service manager detection
//!
//! Each family is picked once per target from a detection table (first
//! probe that succeeds wins) and then used through a trait object.

use anyhow::{Result, bail};
use reconcile::{PackageBackend, Transport};
use std::sync::Arc;

/// Whether `tool` is on the target's PATH
fn has_command(transport: &dyn Transport, tool: &str) -> bool {
    transport
        .run_status("sh", &["-c", &format!("command -v {tool} >/dev/null 2>&1")])
        .unwrap_or(false)
}

fn run_checked(transport: &dyn Transport, cmd: &str, args: &[&str]) -> Result<()> {
    let output = transport.run(cmd, args)?;
    if !output.success {
        bail!("{} {} failed: {}", cmd, args.join(" "), output.stderr_str().trim());
    }
    Ok(())
}

// ============================================================================
// Packages
// ============================================================================

/// A package manager described by its command lines
///
/// The package name is appended to each argument list.
#[derive(Debug, Clone, Copy)]
pub struct PackageManager {
    pub name: &'static str,
    /// Binary probed during detection
    pub probe: &'static str,
    pub query: (&'static str, &'static [&'static str]),
    pub install: (&'static str, &'static [&'static str]),
    pub remove: (&'static str, &'static [&'static str]),
}

/// Detection order matters: distro managers before brew
pub const PACKAGE_MANAGERS: &[PackageManager] = &[
    PackageManager {
        name: "apt",
        probe: "apt-get",
        query: ("dpkg", &["-s"]),
        install: ("apt-get", &["install", "-y"]),
        remove: ("apt-get", &["remove", "-y"]),
    },
    PackageManager {
        name: "dnf",
        probe: "dnf",
        query: ("rpm", &["-q"]),
        install: ("dnf", &["install", "-y"]),
        remove: ("dnf", &["remove", "-y"]),
    },
    PackageManager {
        name: "pacman",
        probe: "pacman",
        query: ("pacman", &["-Q"]),
        install: ("pacman", &["-S", "--noconfirm", "--needed"]),
        remove: ("pacman", &["-R", "--noconfirm"]),
    },
    PackageManager {
        name: "apk",
        probe: "apk",
        query: ("apk", &["info", "-e"]),
        install: ("apk", &["add"]),
        remove: ("apk", &["del"]),
    },
    PackageManager {
        name: "brew",
        probe: "brew",
        query: ("brew", &["list", "--formula", "--versions"]),
        install: ("brew", &["install", "--formula"]),
        remove: ("brew", &["uninstall", "--formula"]),
    },
];

impl PackageManager {
    fn with_package<'a>(base: &[&'a str], package: &'a str) -> Vec<&'a str> {
        let mut args = base.to_vec();
        args.push(package);
        args
    }
}

impl PackageBackend for PackageManager {
    fn name(&self) -> &str {
        self.name
    }

    fn is_installed(&self, transport: &dyn Transport, package: &str) -> Result<bool> {
        let (cmd, base) = self.query;
        let output = transport.run(cmd, &Self::with_package(base, package))?;
        if !output.success {
            return Ok(false);
        }
        // brew exits 0 with empty output for formulae that are not installed
        Ok(cmd != "brew" || !output.stdout_str().trim().is_empty())
    }

    fn install(&self, transport: &dyn Transport, package: &str) -> Result<()> {
        let (cmd, base) = self.install;
        run_checked(transport, cmd, &Self::with_package(base, package))
    }

    fn remove(&self, transport: &dyn Transport, package: &str) -> Result<()> {
        let (cmd, base) = self.remove;
        run_checked(transport, cmd, &Self::with_package(base, package))
    }
}

/// Pick the first package manager present on the target
pub fn detect_packages(transport: &dyn Transport) -> Option<Arc<dyn PackageBackend>> {
    let found = PACKAGE_MANAGERS
        .iter()
        .find(|pm| has_command(transport, pm.probe))?;
    log::debug!("Detected package manager: {}", found.name);
    Some(Arc::new(*found))
}

// ============================================================================
// Services
// ============================================================================

/// Service manager capability set
pub trait ServiceBackend: Send + Sync {
    fn name(&self) -> &str;
    fn is_running(&self, transport: &dyn Transport, service: &str) -> Result<bool>;
    fn start(&self, transport: &dyn Transport, service: &str) -> Result<()>;
    fn stop(&self, transport: &dyn Transport, service: &str) -> Result<()>;
    fn restart(&self, transport: &dyn Transport, service: &str) -> Result<()>;
}

/// Supported service managers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceManager {
    Systemd,
    OpenRc,
    BrewServices,
}

/// Detection table: probe binary per manager
const SERVICE_MANAGERS: &[(&str, ServiceManager)] = &[
    ("systemctl", ServiceManager::Systemd),
    ("rc-service", ServiceManager::OpenRc),
    ("brew", ServiceManager::BrewServices),
];

impl ServiceManager {
    fn control(self, transport: &dyn Transport, verb: &str, service: &str) -> Result<()> {
        match self {
            Self::Systemd => run_checked(transport, "systemctl", &[verb, service]),
            Self::OpenRc => run_checked(transport, "rc-service", &[service, verb]),
            Self::BrewServices => run_checked(transport, "brew", &["services", verb, service]),
        }
    }
}

impl ServiceBackend for ServiceManager {
    fn name(&self) -> &str {
        match self {
            Self::Systemd => "systemd",
            Self::OpenRc => "openrc",
            Self::BrewServices => "brew-services",
        }
    }

    fn is_running(&self, transport: &dyn Transport, service: &str) -> Result<bool> {
        match self {
            Self::Systemd => transport.run_status("systemctl", &["is-active", "--quiet", service]),
            Self::OpenRc => transport.run_status("rc-service", &[service, "status"]),
            Self::BrewServices => {
                let listing = transport.run_capture("brew", &["services", "list"])?;
                Ok(brew_service_started(&listing, service))
            }
        }
    }

    fn start(&self, transport: &dyn Transport, service: &str) -> Result<()> {
        self.control(transport, "start", service)
    }

    fn stop(&self, transport: &dyn Transport, service: &str) -> Result<()> {
        self.control(transport, "stop", service)
    }

    fn restart(&self, transport: &dyn Transport, service: &str) -> Result<()> {
        self.control(transport, "restart", service)
    }
}

/// Parse `brew services list` output (`Name Status User File`)
fn brew_service_started(listing: &str, service: &str) -> bool {
    listing.lines().skip(1).any(|line| {
        let mut cols = line.split_whitespace();
        cols.next() == Some(service) && cols.next() == Some("started")
    })
}

/// Pick the first service manager present on the target
pub fn detect_services(transport: &dyn Transport) -> Option<Arc<dyn ServiceBackend>> {
    let (_, found) = SERVICE_MANAGERS
        .iter()
        .find(|(probe, _)| has_command(transport, probe))?;
    log::debug!("Detected service manager: {}", found.name());
    Some(Arc::new(*found))
}

/// Providers detected for one target
#[derive(Clone, Default)]
pub struct Providers {
    pub packages: Option<Arc<dyn PackageBackend>>,
    pub services: Option<Arc<dyn ServiceBackend>>,
}

impl Providers {
    pub fn detect(transport: &dyn Transport) -> Self {
        Self {
            packages: detect_packages(transport),
            services: detect_services(transport),
        }
    }
}
