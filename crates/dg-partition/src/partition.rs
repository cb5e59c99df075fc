//! Filtering and materialization of scenarios into independent work
//! units, grouped into per-locale buckets.

use crate::parser::{FeatureDoc, ScenarioDef};
use dg_core::GridError;
use dg_locale::{LocaleResolver, ResolvedLocale};
use dg_tags::TagFilter;
use tracing::{debug, info};

/// One independently executable single-scenario unit.
///
/// Self-contained: rendering it produces a complete feature document
/// so that downstream "one unit = one isolated session" holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub feature_name: String,
    pub scenario_name: String,
    /// Combined tag set: feature tags, then scenario tags, then
    /// example tags, duplicates removed, original text kept.
    pub tags: Vec<String>,
    pub background: Vec<String>,
    pub steps: Vec<String>,
    pub locale: ResolvedLocale,
}

impl WorkUnit {
    /// Render as a standalone feature document.
    pub fn render_feature(&self) -> String {
        let mut out = String::new();
        if !self.tags.is_empty() {
            out.push_str(&self.tags.join(" "));
            out.push('\n');
        }
        out.push_str(&format!("Feature: {}\n", self.feature_name));
        if !self.background.is_empty() {
            out.push_str("\n  Background:\n");
            for step in &self.background {
                out.push_str(&format!("    {step}\n"));
            }
        }
        out.push_str(&format!("\n  Scenario: {}\n", self.scenario_name));
        for step in &self.steps {
            out.push_str(&format!("    {step}\n"));
        }
        out
    }

    /// Filesystem-friendly slug derived from the scenario name.
    pub fn slug(&self) -> String {
        let mut slug = String::new();
        for c in self.scenario_name.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
            } else if !slug.ends_with('-') && !slug.is_empty() {
                slug.push('-');
            }
        }
        let trimmed = slug.trim_matches('-');
        if trimmed.is_empty() {
            "scenario".to_string()
        } else {
            trimmed.chars().take(60).collect()
        }
    }
}

/// All surviving units for one resolved locale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleBucket {
    pub key: String,
    pub locale: ResolvedLocale,
    pub units: Vec<WorkUnit>,
}

/// Filter and materialize a feature corpus into per-locale buckets.
///
/// Buckets are ordered by key; units keep corpus order within a
/// bucket. Zero survivors is fatal.
pub fn partition(
    features: &[FeatureDoc],
    filter: Option<&TagFilter>,
    resolver: &LocaleResolver,
) -> Result<Vec<LocaleBucket>, GridError> {
    let mut buckets: Vec<LocaleBucket> = Vec::new();
    let mut total = 0usize;
    let mut kept = 0usize;

    for feature in features {
        for scenario in &feature.scenarios {
            for (name, tags, steps) in concrete_scenarios(feature, scenario) {
                total += 1;
                if let Some(filter) = filter {
                    if !filter.matches(tags.iter().map(String::as_str)) {
                        continue;
                    }
                }
                kept += 1;
                let locale = resolver.resolve(tags.iter().map(String::as_str));
                let unit = WorkUnit {
                    feature_name: feature.name.clone(),
                    scenario_name: name,
                    tags,
                    background: feature.background.clone(),
                    steps,
                    locale: locale.clone(),
                };
                let key = locale.key();
                match buckets.iter_mut().find(|b| b.key == key) {
                    Some(bucket) => bucket.units.push(unit),
                    None => buckets.push(LocaleBucket {
                        key,
                        locale,
                        units: vec![unit],
                    }),
                }
            }
        }
    }

    if kept == 0 {
        return Err(GridError::NothingToRun);
    }

    buckets.sort_by(|a, b| a.key.cmp(&b.key));
    info!(
        total,
        kept,
        buckets = buckets.len(),
        "partitioned scenario corpus"
    );
    Ok(buckets)
}

/// Expand one scenario definition into concrete (name, tags, steps)
/// triples: one per example row for outlines, one for plain scenarios.
fn concrete_scenarios(
    feature: &FeatureDoc,
    scenario: &ScenarioDef,
) -> Vec<(String, Vec<String>, Vec<String>)> {
    if !scenario.outline {
        let tags = merge_tags(&feature.tags, &scenario.tags, &[]);
        return vec![(scenario.name.clone(), tags, scenario.steps.clone())];
    }

    let mut out = Vec::new();
    for table in &scenario.examples {
        for row in &table.rows {
            let name = substitute(&scenario.name, &table.header, row);
            let steps = scenario
                .steps
                .iter()
                .map(|s| substitute(s, &table.header, row))
                .collect();
            let tags = merge_tags(&feature.tags, &scenario.tags, &table.tags);
            out.push((name, tags, steps));
        }
    }
    debug!(
        scenario = %scenario.name,
        expanded = out.len(),
        "expanded scenario outline"
    );
    out
}

/// Order-preserving, feature-first union with duplicates removed.
fn merge_tags(feature: &[String], scenario: &[String], example: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for tag in feature.iter().chain(scenario).chain(example) {
        if !merged.contains(tag) {
            merged.push(tag.clone());
        }
    }
    merged
}

/// Replace `<column>` placeholders with the row's values.
fn substitute(text: &str, header: &[String], row: &[String]) -> String {
    let mut out = text.to_string();
    for (column, value) in header.iter().zip(row) {
        out = out.replace(&format!("<{column}>"), value);
    }
    out
}

/// Assign bucket keys to workers: descending unit count, dealt
/// round-robin. With fewer buckets than workers, the surplus workers
/// get an explicitly empty assignment.
pub fn assign_buckets(buckets: &[LocaleBucket], worker_count: usize) -> Vec<Vec<String>> {
    let mut assignments = vec![Vec::new(); worker_count.max(1)];
    let mut order: Vec<&LocaleBucket> = buckets.iter().collect();
    order.sort_by(|a, b| b.units.len().cmp(&a.units.len()).then(a.key.cmp(&b.key)));
    let len = assignments.len();
    for (i, bucket) in order.iter().enumerate() {
        assignments[i % len].push(bucket.key.clone());
    }
    assignments
}
