//! Device and app-build directory interfaces plus a TTL file cache.
//!
//! The HTTP clients that actually talk to the device-farm directory
//! live outside this workspace; here are the traits they implement and
//! a keyed time-to-live cache so repeated queries within a run do not
//! hit the service again.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dg_core::{AppBuild, Device};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Lists devices available to the current account.
pub trait DeviceDirectory {
    fn list_devices(&self) -> Result<Vec<Device>>;
}

/// Lists uploaded app builds.
pub trait BuildDirectory {
    fn list_builds(&self) -> Result<Vec<AppBuild>>;
}

/// One cached record on disk.
#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord<T> {
    cached_at: DateTime<Utc>,
    ttl_secs: u64,
    payload: T,
}

/// Keyed JSON cache with per-record TTL under `{state_dir}/cache/`.
#[derive(Debug, Clone)]
pub struct TtlCache {
    cache_dir: PathBuf,
}

impl TtlCache {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            cache_dir: state_dir.join("cache"),
        }
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{key}.json"))
    }

    /// Fetch a fresh record. Expired or unreadable records behave as
    /// absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.record_path(key);
        let contents = fs::read_to_string(&path).ok()?;
        let record: CacheRecord<T> = match serde_json::from_str(&contents) {
            Ok(record) => record,
            Err(err) => {
                debug!(key, error = %err, "discarding unreadable cache record");
                return None;
            }
        };
        let age = Utc::now().signed_duration_since(record.cached_at);
        if age.num_seconds() < 0 || age.num_seconds() as u64 >= record.ttl_secs {
            debug!(key, "cache record expired");
            return None;
        }
        Some(record.payload)
    }

    /// Store a record with the given TTL, replacing any previous one.
    pub fn put<T: Serialize>(&self, key: &str, payload: &T, ttl: Duration) -> Result<()> {
        fs::create_dir_all(&self.cache_dir).with_context(|| {
            format!("Failed to create cache directory: {}", self.cache_dir.display())
        })?;
        let record = CacheRecord {
            cached_at: Utc::now(),
            ttl_secs: ttl.as_secs(),
            payload,
        };
        let json = serde_json::to_string_pretty(&record).context("Failed to serialize cache record")?;
        let path = self.record_path(key);
        fs::write(&path, json)
            .with_context(|| format!("Failed to write cache record: {}", path.display()))?;
        Ok(())
    }
}

/// Directory wrapper that consults the cache before delegating.
pub struct CachedDeviceDirectory<D: DeviceDirectory> {
    inner: D,
    cache: TtlCache,
    key: String,
    ttl: Duration,
}

impl<D: DeviceDirectory> CachedDeviceDirectory<D> {
    pub fn new(inner: D, cache: TtlCache, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            inner,
            cache,
            key: key.into(),
            ttl,
        }
    }
}

impl<D: DeviceDirectory> DeviceDirectory for CachedDeviceDirectory<D> {
    fn list_devices(&self) -> Result<Vec<Device>> {
        if let Some(devices) = self.cache.get::<Vec<Device>>(&self.key) {
            debug!(key = %self.key, count = devices.len(), "device list served from cache");
            return Ok(devices);
        }
        let devices = self.inner.list_devices()?;
        self.cache.put(&self.key, &devices, self.ttl)?;
        Ok(devices)
    }
}

/// Build-directory wrapper with the same cache-first behavior.
pub struct CachedBuildDirectory<D: BuildDirectory> {
    inner: D,
    cache: TtlCache,
    key: String,
    ttl: Duration,
}

impl<D: BuildDirectory> CachedBuildDirectory<D> {
    pub fn new(inner: D, cache: TtlCache, key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            inner,
            cache,
            key: key.into(),
            ttl,
        }
    }
}

impl<D: BuildDirectory> BuildDirectory for CachedBuildDirectory<D> {
    fn list_builds(&self) -> Result<Vec<AppBuild>> {
        if let Some(builds) = self.cache.get::<Vec<AppBuild>>(&self.key) {
            debug!(key = %self.key, count = builds.len(), "build list served from cache");
            return Ok(builds);
        }
        let builds = self.inner.list_builds()?;
        self.cache.put(&self.key, &builds, self.ttl)?;
        Ok(builds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::tempdir;

    #[test]
    fn test_put_then_get_fresh() {
        let dir = tempdir().unwrap();
        let cache = TtlCache::new(dir.path());
        let devices = vec![Device {
            name: "Pixel 8".into(),
            os_version: "14.0".into(),
        }];
        cache
            .put("devices", &devices, Duration::from_secs(600))
            .unwrap();
        let cached: Vec<Device> = cache.get("devices").unwrap();
        assert_eq!(cached, devices);
    }

    #[test]
    fn test_expired_record_is_absent() {
        let dir = tempdir().unwrap();
        let cache = TtlCache::new(dir.path());
        cache.put("k", &42u32, Duration::from_secs(0)).unwrap();
        assert_eq!(cache.get::<u32>("k"), None);
    }

    #[test]
    fn test_missing_key_is_absent() {
        let dir = tempdir().unwrap();
        let cache = TtlCache::new(dir.path());
        assert_eq!(cache.get::<u32>("never-written"), None);
    }

    #[test]
    fn test_unreadable_record_is_absent() {
        let dir = tempdir().unwrap();
        let cache = TtlCache::new(dir.path());
        fs::create_dir_all(dir.path().join("cache")).unwrap();
        fs::write(dir.path().join("cache/bad.json"), "{oops").unwrap();
        assert_eq!(cache.get::<u32>("bad"), None);
    }

    #[test]
    fn test_put_replaces_previous() {
        let dir = tempdir().unwrap();
        let cache = TtlCache::new(dir.path());
        cache.put("k", &1u32, Duration::from_secs(600)).unwrap();
        cache.put("k", &2u32, Duration::from_secs(600)).unwrap();
        assert_eq!(cache.get::<u32>("k"), Some(2));
    }

    struct CountingDirectory<'a> {
        calls: &'a Cell<u32>,
    }

    impl DeviceDirectory for CountingDirectory<'_> {
        fn list_devices(&self) -> Result<Vec<Device>> {
            self.calls.set(self.calls.get() + 1);
            Ok(vec![Device {
                name: "Pixel 8".into(),
                os_version: "14.0".into(),
            }])
        }
    }

    #[test]
    fn test_cached_directory_hits_inner_once() {
        let dir = tempdir().unwrap();
        let calls = Cell::new(0);
        let cached = CachedDeviceDirectory::new(
            CountingDirectory { calls: &calls },
            TtlCache::new(dir.path()),
            "devices",
            Duration::from_secs(600),
        );

        let first = cached.list_devices().unwrap();
        let second = cached.list_devices().unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.get(), 1);
    }

    struct CountingBuilds<'a> {
        calls: &'a Cell<u32>,
    }

    impl BuildDirectory for CountingBuilds<'_> {
        fn list_builds(&self) -> Result<Vec<AppBuild>> {
            self.calls.set(self.calls.get() + 1);
            Ok(vec![AppBuild {
                version: "7.42.0".into(),
                handle: "farm://builds/7.42.0".into(),
                classifier: Some("beta".into()),
            }])
        }
    }

    #[test]
    fn test_cached_build_directory_hits_inner_once() {
        let dir = tempdir().unwrap();
        let calls = Cell::new(0);
        let cached = CachedBuildDirectory::new(
            CountingBuilds { calls: &calls },
            TtlCache::new(dir.path()),
            "builds",
            Duration::from_secs(600),
        );

        let first = cached.list_builds().unwrap();
        let second = cached.list_builds().unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].version, "7.42.0");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_cached_directory_refetches_after_expiry() {
        let dir = tempdir().unwrap();
        let calls = Cell::new(0);
        let cached = CachedDeviceDirectory::new(
            CountingDirectory { calls: &calls },
            TtlCache::new(dir.path()),
            "devices",
            Duration::from_secs(0),
        );

        cached.list_devices().unwrap();
        cached.list_devices().unwrap();
        assert_eq!(calls.get(), 2);
    }
}
