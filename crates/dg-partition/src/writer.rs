//! Materializes partitioned buckets to disk.
//!
//! Layout: `{out_dir}/{locale_key}/{NNN}_{slug}.feature`, plus a
//! `manifest.json` at the root describing buckets and the
//! bucket-to-worker assignment. The manifest is what the external
//! runner consumes as its spec list.

use crate::partition::{LocaleBucket, assign_buckets};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dg_locale::ResolvedLocale;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Top-level manifest written next to the bucket directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub generated_at: DateTime<Utc>,
    pub worker_count: usize,
    pub buckets: Vec<ManifestBucket>,
    /// `workers[i]` lists the bucket keys worker `i` should execute.
    /// May contain empty lists when buckets are fewer than workers.
    pub workers: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestBucket {
    pub key: String,
    pub locale: ResolvedLocale,
    /// Paths relative to the output dir, in execution order.
    pub files: Vec<String>,
}

/// Write every unit file and the manifest. Returns the manifest.
pub fn write_buckets(
    out_dir: &Path,
    buckets: &[LocaleBucket],
    worker_count: usize,
) -> Result<RunManifest> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output dir: {}", out_dir.display()))?;

    let mut manifest_buckets = Vec::new();
    for bucket in buckets {
        let bucket_dir = out_dir.join(&bucket.key);
        fs::create_dir_all(&bucket_dir)
            .with_context(|| format!("Failed to create bucket dir: {}", bucket_dir.display()))?;

        let mut files = Vec::new();
        for (i, unit) in bucket.units.iter().enumerate() {
            let file_name = format!("{:03}_{}.feature", i, unit.slug());
            let path = bucket_dir.join(&file_name);
            fs::write(&path, unit.render_feature())
                .with_context(|| format!("Failed to write unit file: {}", path.display()))?;
            files.push(format!("{}/{}", bucket.key, file_name));
        }

        manifest_buckets.push(ManifestBucket {
            key: bucket.key.clone(),
            locale: bucket.locale.clone(),
            files,
        });
    }

    let manifest = RunManifest {
        generated_at: Utc::now(),
        worker_count,
        buckets: manifest_buckets,
        workers: assign_buckets(buckets, worker_count),
    };

    let manifest_path = out_dir.join("manifest.json");
    let json = serde_json::to_string_pretty(&manifest).context("Failed to serialize manifest")?;
    fs::write(&manifest_path, json)
        .with_context(|| format!("Failed to write manifest: {}", manifest_path.display()))?;

    info!(
        out_dir = %out_dir.display(),
        buckets = buckets.len(),
        "wrote partitioned work units"
    );
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_feature;
    use crate::partition::partition;
    use dg_locale::LocaleResolver;
    use tempfile::tempdir;

    fn buckets() -> Vec<LocaleBucket> {
        let doc = parse_feature(
            "Feature: F\n\
             Scenario: Plain one\nGiven a step\n\
             @locale:ja_JP\nScenario: Tokyo one\nGiven a step\n",
            "f.feature",
        )
        .unwrap();
        partition(&[doc], None, &LocaleResolver::default()).unwrap()
    }

    #[test]
    fn test_write_buckets_layout() {
        let dir = tempdir().unwrap();
        let manifest = write_buckets(dir.path(), &buckets(), 2).unwrap();

        assert_eq!(manifest.buckets.len(), 2);
        for bucket in &manifest.buckets {
            for file in &bucket.files {
                let path = dir.path().join(file);
                assert!(path.exists(), "missing {}", path.display());
                let content = fs::read_to_string(&path).unwrap();
                assert!(content.contains("Feature: F"));
            }
        }
        assert!(dir.path().join("manifest.json").exists());
    }

    #[test]
    fn test_unit_files_numbered_and_slugged() {
        let dir = tempdir().unwrap();
        let manifest = write_buckets(dir.path(), &buckets(), 1).unwrap();
        let japanese = manifest
            .buckets
            .iter()
            .find(|b| b.key.contains("ja_JP"))
            .unwrap();
        assert_eq!(japanese.files.len(), 1);
        assert!(japanese.files[0].ends_with("000_tokyo-one.feature"));
    }

    #[test]
    fn test_manifest_roundtrip_and_assignment() {
        let dir = tempdir().unwrap();
        write_buckets(dir.path(), &buckets(), 3).unwrap();
        let json = fs::read_to_string(dir.path().join("manifest.json")).unwrap();
        let manifest: RunManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(manifest.worker_count, 3);
        assert_eq!(manifest.workers.len(), 3);
        let assigned: usize = manifest.workers.iter().map(|w| w.len()).sum();
        assert_eq!(assigned, 2);
        assert!(manifest.workers[2].is_empty());
    }
}
