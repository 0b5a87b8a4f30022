//! Settings file for the `quire` binary.
//!
//! The store layout (`[[managers]]`) and the provider sections live in one
//! TOML file:
//!
//! ```toml
//! [[managers]]
//! name = "main"
//! home = "data"
//!
//! [membership]
//! min_password_length = 8
//!
//! [files]
//! membership = "users.db"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use quire_providers::MembershipSettings;
use quire_store::{Manager, StoreSettings};
use serde::Deserialize;
use tracing::{debug, info};

pub const DEFAULT_CONFIG_FILE: &str = "quire.toml";

/// Container file names, relative to the manager home.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreFiles {
    pub membership: PathBuf,
    pub roles: PathBuf,
    pub profiles: PathBuf,
    pub events: PathBuf,
}

impl Default for StoreFiles {
    fn default() -> Self {
        Self {
            membership: PathBuf::from("membership.db"),
            roles: PathBuf::from("roles.db"),
            profiles: PathBuf::from("profiles.db"),
            events: PathBuf::from("events.db"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProviderSections {
    membership: MembershipSettings,
    files: StoreFiles,
}

#[derive(Debug, Default)]
pub struct CliConfig {
    pub store: StoreSettings,
    pub membership: MembershipSettings,
    pub files: StoreFiles,
}

impl CliConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let store = StoreSettings::from_toml_str(text).context("invalid store settings")?;
        let sections: ProviderSections = toml::from_str(text).context("invalid provider settings")?;
        Ok(Self {
            store,
            membership: sections.membership,
            files: sections.files,
        })
    }

    /// Load `explicit` if given, else `quire.toml` if present, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !fallback.exists() {
                    debug!("no settings file, using defaults");
                    return Ok(Self::default());
                }
                fallback
            }
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = Self::from_toml_str(&text)
            .with_context(|| format!("failed to load {}", path.display()))?;
        info!(path = %path.display(), "settings loaded");
        Ok(config)
    }

    /// The first configured manager, or one rooted at the working directory.
    pub fn manager(&self) -> Result<Manager> {
        match self.store.first_manager() {
            Some(settings) => Manager::from_settings(settings).context("invalid manager settings"),
            None => Ok(Manager::new(".")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_sections_share_the_file() {
        let config = CliConfig::from_toml_str(
            r#"
            [[managers]]
            name = "main"
            home = "/var/lib/quire"

            [membership]
            min_password_length = 8
            requires_unique_email = true

            [files]
            roles = "groups.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.store.first_manager().unwrap().name, "main");
        assert_eq!(config.membership.min_password_length, 8);
        assert!(config.membership.requires_unique_email);
        assert_eq!(config.membership.max_invalid_password_attempts, 5);
        assert_eq!(config.files.roles, PathBuf::from("groups.db"));
        assert_eq!(config.files.events, PathBuf::from("events.db"));
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = CliConfig::from_toml_str("").unwrap();
        assert!(config.store.managers.is_empty());
        let manager = config.manager().unwrap();
        assert_eq!(manager.home(), Path::new("."));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CliConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
