//! Container options and the TOML settings file that describes managers.
//!
//! Settings are layered: a named container's options override its
//! manager's `default_container` options, which override the built-in
//! [`ContainerConfig::default`].
//!
//! ```toml
//! [[managers]]
//! name = "main"
//! home = "./data"
//!
//! [managers.default_container]
//! page_size = 4096
//!
//! [[managers.containers]]
//! name = "membership"
//! path = "membership.db"
//! statistics = true
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{StoreError, StoreResult};

const MIN_PAGE_SIZE: u32 = 512;
const MAX_PAGE_SIZE: u32 = 65_536;

// ── container config ─────────────────────────────────────────────────

/// Effective options for opening one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Create the container file when it does not exist.
    pub allow_create: bool,
    pub read_only: bool,
    /// Fail with `AlreadyExists` when the container file exists.
    pub exclusive_create: bool,
    /// Accepted for compatibility; this backend stores documents uncompressed.
    pub compressed: bool,
    /// Page size of newly created container files.
    pub page_size: u32,
    /// Maintain the namespace index and the `indexes` expression indexes.
    pub index_nodes: bool,
    /// Refresh planner statistics on sync and optimize on close.
    pub statistics: bool,
    /// JSON paths (e.g. `$.username`) to index when `index_nodes` is on.
    pub indexes: Vec<String>,
    /// Capacity of the compiled-statement cache behind prepared handles.
    pub statement_cache_capacity: usize,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            allow_create: true,
            read_only: false,
            exclusive_create: false,
            compressed: false,
            page_size: 8192,
            index_nodes: true,
            statistics: false,
            indexes: Vec::new(),
            statement_cache_capacity: 64,
        }
    }
}

impl ContainerConfig {
    /// Options for opening an existing container without writing to it.
    pub fn read_only() -> Self {
        Self {
            allow_create: false,
            read_only: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_index(mut self, path: impl Into<String>) -> Self {
        self.indexes.push(path.into());
        self
    }

    pub fn validate(&self) -> StoreResult<()> {
        if !self.page_size.is_power_of_two()
            || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size)
        {
            return Err(StoreError::Config {
                reason: format!(
                    "page_size must be a power of two between {MIN_PAGE_SIZE} and {MAX_PAGE_SIZE}, got {}",
                    self.page_size
                ),
            });
        }
        if self.read_only && self.exclusive_create {
            return Err(StoreError::Config {
                reason: "read_only and exclusive_create cannot both be set".into(),
            });
        }
        if let Some(bad) = self.indexes.iter().find(|p| !is_json_path(p)) {
            return Err(StoreError::Config {
                reason: format!("`{bad}` is not a supported JSON path"),
            });
        }
        Ok(())
    }
}

/// `$` followed by `.key` and `[n]` steps only.
pub(crate) fn is_json_path(path: &str) -> bool {
    path.len() > 1
        && path.starts_with('$')
        && path[1..]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '[' | ']'))
}

// ── layered settings ─────────────────────────────────────────────────

/// Optional overrides of [`ContainerConfig`] fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerOptions {
    pub allow_create: Option<bool>,
    pub read_only: Option<bool>,
    pub exclusive_create: Option<bool>,
    pub compressed: Option<bool>,
    pub page_size: Option<u32>,
    pub index_nodes: Option<bool>,
    pub statistics: Option<bool>,
    pub indexes: Option<Vec<String>>,
    pub statement_cache_capacity: Option<usize>,
}

impl ContainerOptions {
    /// `base` with every set option replaced.
    pub fn apply(&self, base: &ContainerConfig) -> ContainerConfig {
        ContainerConfig {
            allow_create: self.allow_create.unwrap_or(base.allow_create),
            read_only: self.read_only.unwrap_or(base.read_only),
            exclusive_create: self.exclusive_create.unwrap_or(base.exclusive_create),
            compressed: self.compressed.unwrap_or(base.compressed),
            page_size: self.page_size.unwrap_or(base.page_size),
            index_nodes: self.index_nodes.unwrap_or(base.index_nodes),
            statistics: self.statistics.unwrap_or(base.statistics),
            indexes: self.indexes.clone().unwrap_or_else(|| base.indexes.clone()),
            statement_cache_capacity: self
                .statement_cache_capacity
                .unwrap_or(base.statement_cache_capacity),
        }
    }
}

/// A named container inside a manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSettings {
    pub name: String,
    /// File path, relative to the manager home unless absolute.
    pub path: PathBuf,
    /// Alias used by query templates. Defaults to `name`.
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(flatten)]
    pub options: ContainerOptions,
}

impl ContainerSettings {
    pub fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// One manager: a home directory, default options and named containers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerSettings {
    pub name: String,
    #[serde(default)]
    pub home: Option<PathBuf>,
    #[serde(default)]
    pub default_container: ContainerOptions,
    #[serde(default)]
    pub containers: Vec<ContainerSettings>,
}

impl ManagerSettings {
    /// Built-in defaults overlaid with this manager's defaults.
    pub fn default_container_config(&self) -> ContainerConfig {
        self.default_container.apply(&ContainerConfig::default())
    }

    pub fn container(&self, name: &str) -> Option<&ContainerSettings> {
        self.containers.iter().find(|c| c.name == name)
    }

    /// Effective options for the named container.
    pub fn container_config(&self, name: &str) -> Option<ContainerConfig> {
        self.container(name)
            .map(|c| c.options.apply(&self.default_container_config()))
    }
}

/// Root of the settings file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub managers: Vec<ManagerSettings>,
}

impl StoreSettings {
    pub fn from_toml_str(text: &str) -> StoreResult<Self> {
        let settings: Self = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let settings = Self::from_toml_str(&text)?;
        info!(path = %path.display(), managers = settings.managers.len(), "store settings loaded");
        Ok(settings)
    }

    pub fn first_manager(&self) -> Option<&ManagerSettings> {
        self.managers.first()
    }

    pub fn manager(&self, name: &str) -> Option<&ManagerSettings> {
        self.managers.iter().find(|m| m.name == name)
    }

    fn validate(&self) -> StoreResult<()> {
        for (i, manager) in self.managers.iter().enumerate() {
            if self.managers[..i].iter().any(|m| m.name == manager.name) {
                return Err(StoreError::Config {
                    reason: format!("manager `{}` is defined twice", manager.name),
                });
            }
            let defaults = manager.default_container_config();
            defaults.validate()?;
            for (j, container) in manager.containers.iter().enumerate() {
                if manager.containers[..j].iter().any(|c| c.name == container.name) {
                    return Err(StoreError::Config {
                        reason: format!(
                            "container `{}` is defined twice in manager `{}`",
                            container.name, manager.name
                        ),
                    });
                }
                container.options.apply(&defaults).validate()?;
            }
        }
        Ok(())
    }
}
