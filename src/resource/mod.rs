//! Built-in resource adapters and the registry that builds them
//!
//! Every adapter implements [`reconcile::Resource`]. The engine only sees the
//! factory function returned by [`Registry::factory`].

mod command;
mod directory;
mod file;
mod package;
mod service;
mod symlink;

pub use command::CommandResource;
pub use directory::Directory;
pub use file::File;
pub use package::Package;
pub use service::Service;
pub use symlink::Symlink;

use crate::providers::{Providers, ServiceBackend};
use anyhow::{Context, Result, anyhow, bail};
use reconcile::{BoxedResource, Params, ResourceFactory, System};
use std::path::PathBuf;
use std::sync::Arc;

/// Resource types this binary can build
pub const RESOURCE_TYPES: &[&str] = &[
    "file",
    "directory",
    "symlink",
    "command",
    "package",
    "service",
];

/// Maps declared types to adapters
#[derive(Clone, Default)]
pub struct Registry {
    services: Option<Arc<dyn ServiceBackend>>,
}

impl Registry {
    pub fn new(providers: &Providers) -> Self {
        Self {
            services: providers.services.clone(),
        }
    }

    /// Build one resource from its declaration
    pub fn build(
        &self,
        resource_type: &str,
        name: &str,
        params: &Params,
        _system: &System,
    ) -> Result<BoxedResource> {
        let resource: BoxedResource = match resource_type {
            "file" => Box::new(File::from_params(name, params)?),
            "directory" => Box::new(Directory::from_params(name, params)?),
            "symlink" => Box::new(Symlink::from_params(name, params)?),
            "command" => Box::new(CommandResource::from_params(name, params)?),
            "package" => Box::new(Package::from_params(name, params)?),
            "service" => {
                let backend = self
                    .services
                    .clone()
                    .context("No supported service manager detected")?;
                Box::new(Service::from_params(name, params, backend)?)
            }
            other => bail!(
                "Unknown resource type '{}' (supported: {})",
                other,
                RESOURCE_TYPES.join(", ")
            ),
        };
        Ok(resource)
    }

    /// The factory handed to the planner
    pub fn factory(self) -> Box<ResourceFactory> {
        Box::new(move |resource_type, name, params, system| {
            self.build(resource_type, name, params, system)
        })
    }
}

// ============================================================================
// Parameter helpers
// ============================================================================

/// Optional string parameter
pub fn str_param<'a>(params: &'a Params, key: &str) -> Result<Option<&'a str>> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(anyhow!("parameter '{}' must be a string, got {}", key, other)),
    }
}

/// Required string parameter
pub fn required_str<'a>(params: &'a Params, key: &str) -> Result<&'a str> {
    str_param(params, key)?.ok_or_else(|| anyhow!("missing required parameter '{}'", key))
}

/// Path parameter, falling back to the resource name
pub fn path_param(name: &str, params: &Params) -> Result<PathBuf> {
    let raw = str_param(params, "path")?.unwrap_or(name);
    if raw.is_empty() {
        bail!("path must not be empty");
    }
    Ok(crate::paths::expand(raw))
}

/// Desired state parameter, checked against the allowed values
pub fn state_param(params: &Params, allowed: &[&str], default: &str) -> Result<String> {
    let state = str_param(params, "state")?.unwrap_or(default);
    if !allowed.contains(&state) {
        bail!(
            "invalid state '{}' (expected one of: {})",
            state,
            allowed.join(", ")
        );
    }
    Ok(state.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::LocalTransport;
    use serde_json::json;

    fn params(value: serde_json::Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_unknown_type_rejected() {
        let system = System::new(Arc::new(LocalTransport));
        let err = Registry::default()
            .build("firewall", "ssh", &Params::new(), &system)
            .unwrap_err();
        assert!(err.to_string().contains("Unknown resource type 'firewall'"));
    }

    #[test]
    fn test_service_requires_backend() {
        let system = System::new(Arc::new(LocalTransport));
        let err = Registry::default()
            .build("service", "nginx", &Params::new(), &system)
            .unwrap_err();
        assert!(err.to_string().contains("service manager"));
    }

    #[test]
    fn test_factory_builds_file() {
        let system = System::new(Arc::new(LocalTransport));
        let factory = Registry::default().factory();
        let resource = factory(
            "file",
            "/tmp/converge-motd",
            &params(json!({"content": "hi"})),
            &system,
        )
        .unwrap();
        assert_eq!(resource.resource_type(), "file");
    }

    #[test]
    fn test_param_helpers() {
        let p = params(json!({"path": "/etc/motd", "mode": 644, "state": "gone"}));
        assert_eq!(str_param(&p, "path").unwrap(), Some("/etc/motd"));
        assert!(str_param(&p, "mode").is_err());
        assert!(required_str(&p, "content").is_err());
        assert_eq!(path_param("ignored", &p).unwrap(), PathBuf::from("/etc/motd"));
        assert!(state_param(&p, &["present", "absent"], "present").is_err());
        assert_eq!(
            state_param(&Params::new(), &["present", "absent"], "present").unwrap(),
            "present"
        );
    }
}
