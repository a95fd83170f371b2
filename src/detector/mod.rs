//! Quality-issue detection over ingested log entries
//!
//! The detector composes five independent passes: pattern rules, performance
//! rules, structural validation, model-assisted review, and accuracy
//! heuristics. All passes run for every entry (no short-circuiting); their
//! findings are merged, deduplicated, filtered against the confidence floor,
//! and ranked by severity then confidence.

mod model;
mod patterns;
mod structural;

pub use model::{ChatCompletionsBackend, LlmBackend, MockBackend, ModelAssistedDetector};

use crate::config::ModelConfig;
use crate::events::{DetectedIssue, DetectionThresholds, IssueSeverity, IssueType, LogEntry};
use log::{debug, error};
use patterns::{performance_issues, AccuracyHeuristics, PatternRuleSet};
use std::cmp::Ordering;

/// Rule- and model-assisted issue detector
///
/// Construct once per process and share; the pattern tables are compiled at
/// construction time.
pub struct IssueDetector {
    patterns: PatternRuleSet,
    heuristics: AccuracyHeuristics,
    model: ModelAssistedDetector,
}

impl Default for IssueDetector {
    fn default() -> Self {
        Self::new(ModelAssistedDetector::disabled())
    }
}

impl IssueDetector {
    /// Create a detector with the given model-assisted pass
    pub fn new(model: ModelAssistedDetector) -> Self {
        Self {
            patterns: PatternRuleSet::with_defaults(),
            heuristics: AccuracyHeuristics::with_defaults(),
            model,
        }
    }

    /// Create a detector from service configuration
    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(ModelAssistedDetector::from_config(config))
    }

    /// Detect quality issues in one log entry
    ///
    /// This call never fails: any unexpected internal error is converted into
    /// a single low-confidence issue noting that detection itself failed, so
    /// the ingestion path keeps moving.
    pub async fn detect_issues(
        &self,
        entry: &LogEntry,
        thresholds: &DetectionThresholds,
    ) -> Vec<DetectedIssue> {
        match self.run_passes(entry, thresholds).await {
            Ok(issues) => issues,
            Err(e) => {
                error!("issue detection failed for {}: {}", entry.key(), e);
                vec![DetectedIssue::new(
                    IssueType::AccuracyIssue,
                    IssueSeverity::Low,
                    "Issue detection failed for this entry; content was not analyzed",
                    0.1,
                )]
            }
        }
    }

    async fn run_passes(
        &self,
        entry: &LogEntry,
        thresholds: &DetectionThresholds,
    ) -> Result<Vec<DetectedIssue>, crate::error::DetectionError> {
        let mut issues = Vec::new();

        // Fast synchronous phase: always runs
        issues.extend(self.patterns.scan(&entry.content));
        issues.extend(performance_issues(entry, thresholds));
        issues.extend(structural::structural_issues(&entry.content));
        issues.extend(self.heuristics.scan(&entry.content));

        // Optional asynchronous phase, gated by the cheap predicate and
        // internally degrading to zero issues on any failure
        issues.extend(self.model.detect(&entry.content, thresholds).await);

        debug!(
            "detection for {} produced {} raw findings",
            entry.key(),
            issues.len()
        );
        Ok(post_process(issues, thresholds))
    }
}

/// Deduplicate, filter, and rank raw findings
///
/// Findings with identical `(type, description)` collapse into one (keeping
/// the highest confidence), findings under the confidence floor are dropped,
/// and the result is ordered by severity (critical first) then confidence
/// descending.
pub fn post_process(
    mut issues: Vec<DetectedIssue>,
    thresholds: &DetectionThresholds,
) -> Vec<DetectedIssue> {
    issues.retain(|issue| issue.confidence >= thresholds.hallucination_confidence);

    issues.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then(b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal))
    });

    let mut seen: Vec<(IssueType, String)> = Vec::new();
    issues.retain(|issue| {
        let key = (issue.issue_type, issue.description.clone());
        if seen.contains(&key) {
            false
        } else {
            seen.push(key);
            true
        }
    });

    issues
}
