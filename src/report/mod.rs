//! Report rendering and artifact export.

pub mod artifacts;
pub mod generator;

pub use artifacts::save_artifacts;
pub use generator::{build_report, generate_json_report, generate_markdown_report, QUALITY_THRESHOLD};
