//! Line-oriented feature-document parser.
//!
//! Handles tag lines, `Feature:` / `Background:` / `Scenario:` /
//! `Scenario Outline:` / `Examples:` headers, step lines, and
//! `|`-delimited example tables. Comments (`#`) and blank lines are
//! skipped; free description text is only allowed between the feature
//! header and the first block. Parse errors carry the line number.

use dg_core::GridError;
use regex::Regex;
use std::sync::LazyLock;

/// A parsed feature document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureDoc {
    pub name: String,
    pub tags: Vec<String>,
    /// Steps shared by every scenario, kept verbatim.
    pub background: Vec<String>,
    pub scenarios: Vec<ScenarioDef>,
}

/// One scenario (or scenario outline) as written in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioDef {
    pub name: String,
    pub tags: Vec<String>,
    pub steps: Vec<String>,
    pub outline: bool,
    pub examples: Vec<ExampleTable>,
}

/// An `Examples:` table attached to a scenario outline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExampleTable {
    pub tags: Vec<String>,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

static FEATURE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Feature:\s*(.*)$").expect("valid regex"));

static BACKGROUND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Background:").expect("valid regex"));

static SCENARIO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Scenario(?: Outline| Template)?:\s*(.*)$").expect("valid regex"));

static EXAMPLES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:Examples|Scenarios):").expect("valid regex"));

static STEP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:Given|When|Then|And|But|\*)\s").expect("valid regex"));

#[derive(Debug, PartialEq)]
enum Section {
    Preamble,
    Description,
    Background,
    Scenario,
    Examples,
}

/// Parse one feature document. `path` is used only for error context.
pub fn parse_feature(content: &str, path: &str) -> Result<FeatureDoc, GridError> {
    let err = |line: usize, message: &str| GridError::FeatureParse {
        path: path.to_string(),
        line,
        message: message.to_string(),
    };

    let mut feature_name: Option<String> = None;
    let mut feature_tags: Vec<String> = Vec::new();
    let mut background: Vec<String> = Vec::new();
    let mut scenarios: Vec<ScenarioDef> = Vec::new();
    let mut pending_tags: Vec<String> = Vec::new();
    let mut section = Section::Preamble;

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with('@') {
            for tag in line.split_whitespace() {
                if !tag.starts_with('@') {
                    return Err(err(line_no, "tag line mixes tags with other text"));
                }
                pending_tags.push(tag.to_string());
            }
            continue;
        }

        if let Some(caps) = FEATURE_RE.captures(line) {
            if feature_name.is_some() {
                return Err(err(line_no, "multiple Feature headers"));
            }
            feature_name = Some(caps[1].trim().to_string());
            feature_tags = std::mem::take(&mut pending_tags);
            section = Section::Description;
            continue;
        }

        if feature_name.is_none() {
            return Err(err(line_no, "content before Feature header"));
        }

        if BACKGROUND_RE.is_match(line) {
            if !pending_tags.is_empty() {
                return Err(err(line_no, "tags are not allowed on Background"));
            }
            if !scenarios.is_empty() {
                return Err(err(line_no, "Background must precede all scenarios"));
            }
            section = Section::Background;
            continue;
        }

        if let Some(caps) = SCENARIO_RE.captures(line) {
            let outline = line.starts_with("Scenario Outline:")
                || line.starts_with("Scenario Template:");
            scenarios.push(ScenarioDef {
                name: caps[1].trim().to_string(),
                tags: std::mem::take(&mut pending_tags),
                steps: Vec::new(),
                outline,
                examples: Vec::new(),
            });
            section = Section::Scenario;
            continue;
        }

        if EXAMPLES_RE.is_match(line) {
            let current = scenarios
                .last_mut()
                .ok_or_else(|| err(line_no, "Examples outside a scenario"))?;
            if !current.outline {
                return Err(err(line_no, "Examples on a non-outline scenario"));
            }
            current.examples.push(ExampleTable {
                tags: std::mem::take(&mut pending_tags),
                header: Vec::new(),
                rows: Vec::new(),
            });
            section = Section::Examples;
            continue;
        }

        if line.starts_with('|') {
            if section != Section::Examples {
                return Err(err(line_no, "table row outside an Examples block"));
            }
            let cells = split_table_row(line);
            let table = scenarios
                .last_mut()
                .and_then(|s| s.examples.last_mut())
                .ok_or_else(|| err(line_no, "table row outside an Examples block"))?;
            if table.header.is_empty() {
                table.header = cells;
            } else {
                if cells.len() != table.header.len() {
                    return Err(err(line_no, "row width does not match Examples header"));
                }
                table.rows.push(cells);
            }
            continue;
        }

        if STEP_RE.is_match(line) {
            match (&section, scenarios.last_mut()) {
                (Section::Background, _) => background.push(line.to_string()),
                (Section::Scenario, Some(current)) => current.steps.push(line.to_string()),
                _ => return Err(err(line_no, "step outside a scenario")),
            }
            continue;
        }

        // Free text is only valid as feature description.
        if section == Section::Description {
            continue;
        }
        return Err(err(line_no, "unrecognized line"));
    }

    let name = feature_name.ok_or_else(|| err(content.lines().count(), "no Feature header"))?;

    if let Some(bad) = scenarios.iter().find(|s| s.outline && s.examples.is_empty()) {
        return Err(GridError::FeatureParse {
            path: path.to_string(),
            line: 0,
            message: format!("Scenario Outline '{}' has no Examples", bad.name),
        });
    }

    Ok(FeatureDoc {
        name,
        tags: feature_tags,
        background,
        scenarios,
    })
}

fn split_table_row(line: &str) -> Vec<String> {
    line.trim_matches('|')
        .split('|')
        .map(|cell| cell.trim().to_string())
        .collect()
}
