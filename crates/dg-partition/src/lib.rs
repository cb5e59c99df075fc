//! Scenario partitioning: feature parsing, tag filtering, outline
//! expansion, single-scenario materialization, and per-locale
//! bucketing.

pub mod parser;
pub mod partition;
pub mod writer;

pub use parser::{ExampleTable, FeatureDoc, ScenarioDef, parse_feature};
pub use partition::{LocaleBucket, WorkUnit, assign_buckets, partition};
pub use writer::{RunManifest, write_buckets};
