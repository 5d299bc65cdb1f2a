//! Recipe loading
//!
//! A recipe is a TOML or JSON file with a list of resource declarations:
//!
//! ```toml
//! [[resources]]
//! type = "package"
//! name = "nginx"
//!
//! [[resources]]
//! id = "web"
//! type = "service"
//! name = "nginx"
//! state = "running"
//! depends_on = ["package.nginx"]
//! ```

use anyhow::{Context, Result, bail};
use reconcile::{ConfigItem, Params, state};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Supported recipe file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeFormat {
    Toml,
    Json,
}

impl RecipeFormat {
    /// Pick the format from the file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("json") => Ok(Self::Json),
            _ => bail!(
                "Unsupported recipe format: {} (expected .toml or .json)",
                path.display()
            ),
        }
    }
}

/// A recipe file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
}

/// One declaration as written; ids and names may be left out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDecl {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "state::default_state")]
    pub state: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl ResourceDecl {
    /// Fill in defaults: id `<type>.<name>`, name = id
    pub fn into_item(self) -> Result<ConfigItem> {
        let (id, name) = match (self.id, self.name) {
            (Some(id), Some(name)) => (id, name),
            (None, Some(name)) => (format!("{}.{}", self.resource_type, name), name),
            (Some(id), None) => (id.clone(), id),
            (None, None) => bail!("a '{}' resource needs an id or a name", self.resource_type),
        };

        Ok(ConfigItem {
            id,
            resource_type: self.resource_type,
            name,
            state: self.state,
            params: self.params,
            depends_on: self.depends_on,
        })
    }
}

impl Recipe {
    pub fn parse(content: &str, format: RecipeFormat) -> Result<Self> {
        match format {
            RecipeFormat::Toml => toml::from_str(content).context("Invalid TOML recipe"),
            RecipeFormat::Json => serde_json::from_str(content).context("Invalid JSON recipe"),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let format = RecipeFormat::from_path(path)?;
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let recipe = Self::parse(&content, format)
            .with_context(|| format!("Failed to load recipe {}", path.display()))?;
        log::debug!(
            "Loaded {} resources from {}",
            recipe.resources.len(),
            path.display()
        );
        Ok(recipe)
    }

    /// Resolve every declaration into a planner item, in file order
    pub fn into_items(self) -> Result<Vec<ConfigItem>> {
        self.resources
            .into_iter()
            .enumerate()
            .map(|(i, decl)| {
                decl.into_item()
                    .with_context(|| format!("resource #{} is incomplete", i + 1))
            })
            .collect()
    }
}
