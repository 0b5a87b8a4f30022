//! Managers: the environment containers are opened through.
//!
//! A [`Manager`] holds the default container options, a home directory
//! for relative paths, the query registry shared by its containers and
//! the set of container files it currently has open. Opening the same
//! file twice through one manager fails with `AlreadyOpen` until the
//! first container closes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::config::{ContainerConfig, ContainerSettings, ManagerSettings};
use crate::container::{Container, OpenSet};
use crate::error::{StoreError, StoreResult};
use crate::registry::QueryRegistry;

/// Container environment. Cheap to clone; clones share registry and open set.
#[derive(Clone, Debug)]
pub struct Manager {
    name: String,
    home: PathBuf,
    default_config: ContainerConfig,
    containers: Arc<Vec<ContainerSettings>>,
    registry: QueryRegistry,
    open: OpenSet,
}

impl Manager {
    /// A manager rooted at `home` with built-in container defaults.
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            name: "default".to_string(),
            home: home.into(),
            default_config: ContainerConfig::default(),
            containers: Arc::new(Vec::new()),
            registry: QueryRegistry::new(),
            open: OpenSet::default(),
        }
    }

    /// Build a manager from its settings section.
    pub fn from_settings(settings: &ManagerSettings) -> StoreResult<Self> {
        let default_config = settings.default_container_config();
        default_config.validate()?;
        let manager = Self {
            name: settings.name.clone(),
            home: settings.home.clone().unwrap_or_else(|| PathBuf::from(".")),
            default_config,
            containers: Arc::new(settings.containers.clone()),
            registry: QueryRegistry::new(),
            open: OpenSet::default(),
        };
        info!(
            manager = %manager.name,
            home = %manager.home.display(),
            containers = manager.containers.len(),
            "manager configured"
        );
        Ok(manager)
    }

    #[must_use]
    pub fn with_default_config(mut self, config: ContainerConfig) -> Self {
        self.default_config = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn default_config(&self) -> &ContainerConfig {
        &self.default_config
    }

    /// The registry shared by every container of this manager.
    pub fn registry(&self) -> &QueryRegistry {
        &self.registry
    }

    /// `path` joined to the home directory unless it is absolute.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.home.join(path)
        }
    }

    /// Open (or create) a container with the manager's default options.
    pub fn open_container(&self, path: impl AsRef<Path>, alias: &str) -> StoreResult<Container> {
        self.open_container_with(path, alias, self.default_config.clone())
    }

    pub fn open_container_with(
        &self,
        path: impl AsRef<Path>,
        alias: &str,
        config: ContainerConfig,
    ) -> StoreResult<Container> {
        Container::open(
            &self.resolve(path),
            alias,
            config,
            self.registry.clone(),
            Arc::clone(&self.open),
        )
    }

    /// Open a container described in the settings file by name.
    pub fn open_named(&self, name: &str) -> StoreResult<Container> {
        let settings = self.container_settings(name).ok_or_else(|| StoreError::Config {
            reason: format!("manager `{}` has no container named `{name}`", self.name),
        })?;
        let config = settings.options.apply(&self.default_config);
        self.open_container_with(&settings.path, settings.alias(), config)
    }

    pub fn container_settings(&self, name: &str) -> Option<&ContainerSettings> {
        self.containers.iter().find(|c| c.name == name)
    }

    /// Names of the containers described in the settings file.
    pub fn container_names(&self) -> Vec<&str> {
        self.containers.iter().map(|c| c.name.as_str()).collect()
    }

    /// Whether the container file at `path` is open through this manager.
    pub fn is_open(&self, path: impl AsRef<Path>) -> bool {
        let path = self.resolve(path);
        let key = match (path.parent(), path.file_name()) {
            (Some(parent), Some(file)) => parent.canonicalize().map(|p| p.join(file)).ok(),
            _ => None,
        }
        .unwrap_or(path);
        self.open.lock().map(|open| open.contains(&key)).unwrap_or(false)
    }

    /// Number of containers currently open through this manager.
    pub fn open_count(&self) -> usize {
        self.open.lock().map(|open| open.len()).unwrap_or(0)
    }
}
