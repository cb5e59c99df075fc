//! `device-grid allocate`: one allocation against the shared counter,
//! for use from a pre-session worker hook. With `--with-capability`
//! the output also carries the full session descriptor, so an external
//! runner can start its session without linking against this
//! workspace.

use anyhow::Result;
use dg_capability::Capability;
use dg_config::GridConfig;
use dg_core::{Device, DevicePool, OutputFormat};
use dg_pool::DevicePoolAllocator;
use std::path::Path;

pub fn run(
    config_path: &Path,
    pool_override: Option<String>,
    with_capability: bool,
    locale_tags: &[String],
    format: &OutputFormat,
) -> Result<()> {
    let config = GridConfig::load(config_path)?;
    let pool = named_pool(&config, pool_override)?;
    let allocator = DevicePoolAllocator::new(pool, &dg_config::state_dir()?);
    let allocation = allocator.allocate_next()?;

    let capability = if with_capability {
        Some(capability_for(&config, &allocation.device, locale_tags)?)
    } else {
        None
    };

    match format {
        OutputFormat::Json => {
            let report = match &capability {
                Some(capability) => serde_json::json!({
                    "allocation": allocation,
                    "capability": capability.entries(),
                }),
                None => serde_json::to_value(&allocation)?,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            let mode = if allocation.degraded { " (degraded)" } else { "" };
            println!(
                "ticket {} -> {}{}",
                allocation.ticket, allocation.device, mode
            );
            if let Some(capability) = &capability {
                for (key, value) in capability.entries() {
                    println!("  {key} = {value}");
                }
            }
        }
    }
    Ok(())
}

/// The session descriptor for one allocated device: static
/// `[platform]` and `[build]` config merged with the device and the
/// locale resolved from `locale_tags`.
pub fn capability_for(
    config: &GridConfig,
    device: &Device,
    locale_tags: &[String],
) -> Result<Capability> {
    let locale = config.locale_resolver().resolve(locale_tags);
    Ok(dg_capability::assemble(
        device,
        &config.build,
        &locale,
        &config.platform,
    )?)
}

/// The configured pool, optionally re-namespaced so concurrent build
/// variants keep independent counters.
pub fn named_pool(config: &GridConfig, pool_override: Option<String>) -> Result<DevicePool> {
    let name = pool_override.unwrap_or_else(|| config.pool.name.clone());
    Ok(DevicePool::new(name, config.pool.devices.clone())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(dir: &Path) -> GridConfig {
        let path = dir.join("grid.toml");
        std::fs::write(
            &path,
            r#"
[pool]
name = "main"
devices = [
    { name = "Pixel 8", os_version = "14.0" },
    { name = "Galaxy S24", os_version = "14.0" },
]

[platform]
app_package = "com.example"
app_activity = ".Main"
automation_name = "UiAutomator2"
platform_name = "Android"

[build]
version = "1.0"
handle = "farm://b/1.0"
"#,
        )
        .unwrap();
        GridConfig::load(&path).unwrap()
    }

    #[test]
    fn test_named_pool_default_and_override() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());

        let pool = named_pool(&config, None).unwrap();
        assert_eq!(pool.name(), "main");
        assert_eq!(pool.len(), 2);

        let variant = named_pool(&config, Some("main-beta".to_string())).unwrap();
        assert_eq!(variant.name(), "main-beta");
        assert_eq!(variant.devices(), pool.devices());
    }

    #[test]
    fn test_capability_for_composes_config_with_allocation() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let device = config.pool.devices[0].clone();

        let cap =
            capability_for(&config, &device, &["@locale:de_DE".to_string()]).unwrap();
        assert_eq!(cap.get("deviceName").unwrap(), "Pixel 8");
        assert_eq!(cap.get("platformVersion").unwrap(), "14.0");
        assert_eq!(cap.get("app").unwrap(), "farm://b/1.0");
        assert_eq!(cap.get("appPackage").unwrap(), "com.example");
        assert_eq!(cap.get("language").unwrap(), "de");
        assert_eq!(cap.get("locale").unwrap(), "de_DE");
        assert_eq!(cap.get("timezone").unwrap(), "Europe/Berlin");
    }

    #[test]
    fn test_capability_for_defaults_locale_when_untagged() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let device = config.pool.devices[1].clone();

        let cap = capability_for(&config, &device, &[]).unwrap();
        assert_eq!(cap.get("deviceName").unwrap(), "Galaxy S24");
        assert_eq!(cap.get("locale").unwrap(), "en_US");
        assert_eq!(cap.get("timezone").unwrap(), "America/New_York");
    }
}
