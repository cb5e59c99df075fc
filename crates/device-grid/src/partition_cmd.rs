//! `device-grid partition`: feature corpus in, per-locale unit files
//! and a manifest out.

use anyhow::{Context, Result};
use dg_config::GridConfig;
use dg_core::OutputFormat;
use dg_partition::{FeatureDoc, parse_feature, partition, write_buckets};
use dg_tags::TagFilter;
use std::path::{Path, PathBuf};
use tracing::info;

pub fn run(
    config_path: &Path,
    features_dir: &Path,
    out: Option<PathBuf>,
    filter: Option<String>,
    workers: Option<usize>,
    format: &OutputFormat,
) -> Result<()> {
    let config = GridConfig::load(config_path)?;
    let out_dir = out.unwrap_or_else(|| config.run.out_dir.clone());
    let worker_count = workers.unwrap_or(config.run.workers).max(1);
    let filter_expr = filter.or_else(|| config.run.filter.clone());

    let corpus = load_corpus(features_dir)?;
    info!(
        features = corpus.len(),
        dir = %features_dir.display(),
        "loaded feature corpus"
    );

    let compiled = filter_expr
        .as_deref()
        .map(TagFilter::compile_or_literal);
    let resolver = config.locale_resolver();
    let buckets = partition(&corpus, compiled.as_ref(), &resolver)?;
    let manifest = write_buckets(&out_dir, &buckets, worker_count)?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }
        OutputFormat::Text => {
            let total: usize = manifest.buckets.iter().map(|b| b.files.len()).sum();
            println!(
                "Partitioned {} unit(s) into {} locale bucket(s) under {}",
                total,
                manifest.buckets.len(),
                out_dir.display()
            );
            for bucket in &manifest.buckets {
                println!("  {} ({} units)", bucket.key, bucket.files.len());
            }
            for (i, keys) in manifest.workers.iter().enumerate() {
                if keys.is_empty() {
                    println!("  worker {i}: (no buckets)");
                } else {
                    println!("  worker {i}: {}", keys.join(", "));
                }
            }
        }
    }
    Ok(())
}

/// Collect and parse every `.feature` file under `dir`, recursively,
/// in a deterministic order.
fn load_corpus(dir: &Path) -> Result<Vec<FeatureDoc>> {
    let mut paths = Vec::new();
    collect_feature_files(dir, &mut paths)?;
    paths.sort();

    if paths.is_empty() {
        anyhow::bail!("No .feature files found under {}", dir.display());
    }

    let mut corpus = Vec::with_capacity(paths.len());
    for path in &paths {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read feature: {}", path.display()))?;
        corpus.push(parse_feature(&contents, &path.display().to_string())?);
    }
    Ok(corpus)
}

fn collect_feature_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_feature_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "feature") {
            out.push(path);
        }
    }
    Ok(())
}
