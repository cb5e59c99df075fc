//! Session capability assembly.
//!
//! Pure merge of static platform configuration with the dynamic
//! (device, app build, locale) tuple into the descriptor the session
//! backend needs. No I/O and no shared state; a missing required
//! static field fails here, at assembly time, not when the session is
//! created.

use dg_core::{AppBuild, Device, GridError};
use dg_locale::ResolvedLocale;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Static platform/build configuration, typically the `[platform]`
/// table of `grid.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Application package identifier (required).
    #[serde(default)]
    pub app_package: String,
    /// Launch activity (required).
    #[serde(default)]
    pub app_activity: String,
    /// Automation driver name (required).
    #[serde(default)]
    pub automation_name: String,
    /// Platform name, e.g. "Android" (required).
    #[serde(default)]
    pub platform_name: String,
    /// Idle session timeout passed to the backend.
    #[serde(default)]
    pub new_command_timeout_secs: Option<u64>,
    /// Extra launch arguments.
    #[serde(default)]
    pub launch_args: Vec<String>,
    /// Free-form additional capability keys. Lowest precedence.
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

/// Complete parameter set for one remote session. Ephemeral:
/// constructed fresh per session, never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    entries: BTreeMap<String, Value>,
}

impl Capability {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> &BTreeMap<String, Value> {
        &self.entries
    }
}

/// Merge static and dynamic values into a session descriptor.
///
/// Precedence, lowest first: `extra` table, named static fields,
/// dynamic (device, build, locale) values. Dynamic always wins on key
/// collision.
pub fn assemble(
    device: &Device,
    build: &AppBuild,
    locale: &ResolvedLocale,
    platform: &PlatformConfig,
) -> Result<Capability, GridError> {
    for (key, value) in [
        ("app_package", &platform.app_package),
        ("app_activity", &platform.app_activity),
        ("automation_name", &platform.automation_name),
        ("platform_name", &platform.platform_name),
    ] {
        if value.trim().is_empty() {
            return Err(GridError::MissingCapability {
                key: key.to_string(),
            });
        }
    }

    let mut entries = platform.extra.clone();

    entries.insert("appPackage".into(), platform.app_package.clone().into());
    entries.insert("appActivity".into(), platform.app_activity.clone().into());
    entries.insert(
        "automationName".into(),
        platform.automation_name.clone().into(),
    );
    entries.insert("platformName".into(), platform.platform_name.clone().into());
    if let Some(timeout) = platform.new_command_timeout_secs {
        entries.insert("newCommandTimeout".into(), timeout.into());
    }
    if !platform.launch_args.is_empty() {
        entries.insert(
            "launchArguments".into(),
            Value::Array(
                platform
                    .launch_args
                    .iter()
                    .map(|a| Value::String(a.clone()))
                    .collect(),
            ),
        );
    }

    // Dynamic values last so they always win.
    entries.insert("deviceName".into(), device.name.clone().into());
    entries.insert("platformVersion".into(), device.os_version.clone().into());
    entries.insert("app".into(), build.handle.clone().into());
    entries.insert("appVersion".into(), build.version.clone().into());
    if let Some(classifier) = &build.classifier {
        entries.insert("buildClassifier".into(), classifier.clone().into());
    }
    entries.insert("language".into(), locale.language.clone().into());
    entries.insert("locale".into(), locale.region_format.clone().into());
    entries.insert("timezone".into(), locale.timezone.clone().into());

    Ok(Capability { entries })
}
