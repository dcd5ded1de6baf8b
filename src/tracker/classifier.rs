//! Topic detection for analysis steps.
//!
//! Matching is approximate: step text is unstructured natural language,
//! so categories are detected by case-insensitive keyword containment.

use crate::models::TopicCategory;
use std::collections::BTreeSet;

/// Infers which analysis categories a step addressed.
pub trait TopicClassifier: Send + Sync {
    /// Detect topics from a step's narrative and generated code.
    fn detect(&self, narrative: &str, code: &str) -> BTreeSet<TopicCategory>;
}

/// Keyword-set classifier. A category matches when any of its keywords
/// appears in the narrative or the code.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    keywords: Vec<(TopicCategory, Vec<String>)>,
}

impl KeywordClassifier {
    /// Build a classifier from explicit keyword sets. Keywords are lowercased.
    pub fn new(keywords: Vec<(TopicCategory, Vec<String>)>) -> Self {
        let keywords = keywords
            .into_iter()
            .map(|(topic, words)| {
                (
                    topic,
                    words.into_iter().map(|w| w.to_lowercase()).collect(),
                )
            })
            .collect();
        Self { keywords }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        let table: [(TopicCategory, &[&str]); 8] = [
            (
                TopicCategory::DataExploration,
                &["shape", "structure", "overview", "basic", "exploration"],
            ),
            (
                TopicCategory::Correlations,
                &["correlation", "relationship", "association"],
            ),
            (
                TopicCategory::Distributions,
                &["distribution", "histogram", "spread", "density"],
            ),
            (
                TopicCategory::Visualizations,
                &["plot", "chart", "graph", "visualiz"],
            ),
            (
                TopicCategory::Patterns,
                &["pattern", "trend", "outlier", "anomal"],
            ),
            (
                TopicCategory::Statistics,
                &["statistical", "summary", "mean", "median", "std"],
            ),
            (
                TopicCategory::TargetAnalysis,
                &["target", "prediction", "classification"],
            ),
            (
                TopicCategory::FeatureAnalysis,
                &["feature", "variable", "column"],
            ),
        ];

        Self::new(
            table
                .iter()
                .map(|(topic, words)| (*topic, words.iter().map(|w| w.to_string()).collect()))
                .collect(),
        )
    }
}

impl TopicClassifier for KeywordClassifier {
    fn detect(&self, narrative: &str, code: &str) -> BTreeSet<TopicCategory> {
        let narrative = narrative.to_lowercase();
        let code = code.to_lowercase();

        self.keywords
            .iter()
            .filter(|(_, words)| {
                words
                    .iter()
                    .any(|w| narrative.contains(w.as_str()) || code.contains(w.as_str()))
            })
            .map(|(topic, _)| *topic)
            .collect()
    }
}
