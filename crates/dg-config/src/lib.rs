//! Run configuration: `grid.toml` loading and state-dir resolution.

use anyhow::{Context, Result};
use dg_capability::PlatformConfig;
use dg_core::{AppBuild, Device, DevicePool, GridError};
use dg_locale::{LocaleProfile, LocaleResolver};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Canonical XDG app name for state paths.
pub const APP_NAME: &str = "device-grid";
/// Environment override for the state root (used by tests and CI).
pub const STATE_DIR_ENV: &str = "DEVICE_GRID_STATE_DIR";

/// Top-level model of `grid.toml`. Unknown keys are tolerated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub pool: PoolConfig,
    #[serde(default)]
    pub run: RunConfig,
    pub platform: PlatformConfig,
    pub build: AppBuild,
    #[serde(default)]
    pub locale_profiles: BTreeMap<String, LocaleProfile>,
    #[serde(default)]
    pub default_locale: Option<LocaleProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub name: String,
    pub devices: Vec<Device>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Optional boolean tag filter expression.
    #[serde(default)]
    pub filter: Option<String>,
    /// Requested worker count.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Where partitioned units are written.
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            filter: None,
            workers: default_workers(),
            out_dir: default_out_dir(),
        }
    }
}

fn default_workers() -> usize {
    1
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("device-grid-out")
}

impl GridConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Fail fast on configuration that cannot produce a valid run.
    pub fn validate(&self) -> Result<()> {
        if self.pool.devices.is_empty() {
            anyhow::bail!(GridError::EmptyPool {
                pool: self.pool.name.clone(),
            });
        }
        if self.run.workers == 0 {
            anyhow::bail!(GridError::Config(
                "run.workers must be at least 1".to_string()
            ));
        }
        Ok(())
    }

    /// The immutable device pool for this run.
    pub fn device_pool(&self) -> Result<DevicePool, GridError> {
        DevicePool::new(self.pool.name.clone(), self.pool.devices.clone())
    }

    /// Resolver with built-ins, config profile overrides, and the
    /// configured default profile.
    pub fn locale_resolver(&self) -> LocaleResolver {
        LocaleResolver::with_overrides(self.locale_profiles.clone(), self.default_locale.clone())
    }
}

/// Resolve the state root: env override first, then the XDG state dir.
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(STATE_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let dirs = directories::ProjectDirs::from("", "", APP_NAME)
        .context("Could not determine a state directory for device-grid")?;
    Ok(dirs
        .state_dir()
        .unwrap_or_else(|| dirs.data_local_dir())
        .to_path_buf())
}
