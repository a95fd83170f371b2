//! Pattern, performance, and accuracy heuristics for the issue detector
//!
//! These are the fast synchronous passes: a fixed table of compiled regex
//! rules matched against log content, threshold rules over the execution
//! context, and heuristics for confident claims about uncertain topics.

use crate::events::{DetectedIssue, DetectionThresholds, IssueSeverity, IssueType, LogEntry};
use log::debug;
use regex::{Regex, RegexBuilder};
use serde_json::json;

/// One entry in the fixed pattern-rule table
pub struct PatternRule {
    regex: Regex,
    issue_type: IssueType,
    severity: IssueSeverity,
    description: &'static str,
    confidence: f64,
}

/// Fixed table of content patterns, compiled once at detector construction
pub struct PatternRuleSet {
    rules: Vec<PatternRule>,
}

impl Default for PatternRuleSet {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn rule(
    pattern: &str,
    issue_type: IssueType,
    severity: IssueSeverity,
    description: &'static str,
    confidence: f64,
) -> PatternRule {
    // Patterns are fixed at compile time; a failure here is a programming
    // error caught by the construction test below.
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .unwrap_or_else(|e| panic!("invalid built-in pattern {:?}: {}", pattern, e));
    PatternRule {
        regex,
        issue_type,
        severity,
        description,
        confidence,
    }
}

impl PatternRuleSet {
    /// Build the built-in rule table
    pub fn with_defaults() -> Self {
        let rules = vec![
            rule(
                r"\b(i apologize|i was (wrong|mistaken)|correction:|let me correct that|that was incorrect|scratch that)\b",
                IssueType::Hallucination,
                IssueSeverity::Medium,
                "Self-correction phrasing suggests an earlier claim was wrong",
                0.6,
            ),
            rule(
                r"\b(unhandled exception|stack trace|traceback|fatal error|internal error|segmentation fault)\b",
                IssueType::AccuracyIssue,
                IssueSeverity::High,
                "Error diagnostics leaked into model output",
                0.7,
            ),
            rule(
                r"\b(null|undefined|nan)\b",
                IssueType::StructureError,
                IssueSeverity::Medium,
                "Null-like placeholder token in output",
                0.55,
            ),
            rule(
                r"\byes\b.{0,50}\bno\b|\bno\b.{0,50}\byes\b",
                IssueType::Hallucination,
                IssueSeverity::High,
                "Contradictory yes/no statements within close range",
                0.7,
            ),
            rule(
                r"\btrue\b.{0,50}\bfalse\b|\bfalse\b.{0,50}\btrue\b",
                IssueType::Hallucination,
                IssueSeverity::High,
                "Contradictory true/false statements within close range",
                0.7,
            ),
        ];
        Self { rules }
    }

    /// Match every rule against the content; all rules run, no short-circuit
    pub fn scan(&self, content: &str) -> Vec<DetectedIssue> {
        let mut issues = Vec::new();
        for rule in &self.rules {
            if let Some(found) = rule.regex.find(content) {
                debug!("pattern rule matched: {}", rule.description);
                issues.push(
                    DetectedIssue::new(
                        rule.issue_type,
                        rule.severity,
                        rule.description,
                        rule.confidence,
                    )
                    .with_metadata(json!({ "matched": found.as_str() })),
                );
            }
        }
        issues
    }

    #[cfg(test)]
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

/// Threshold rules over the execution context attached to an entry
///
/// Flags slow responses against the per-application latency threshold and
/// token counts that look wrong for the content they accompany.
pub fn performance_issues(
    entry: &LogEntry,
    thresholds: &DetectionThresholds,
) -> Vec<DetectedIssue> {
    let mut issues = Vec::new();
    let Some(context) = &entry.context else {
        return issues;
    };

    if let Some(response_time_ms) = context.response_time_ms {
        let threshold = thresholds.performance_threshold_ms;
        if threshold > 0.0 && response_time_ms > threshold {
            let severity = if response_time_ms > threshold * 2.0 {
                IssueSeverity::High
            } else {
                IssueSeverity::Medium
            };
            issues.push(
                DetectedIssue::new(
                    IssueType::PerformanceDegradation,
                    severity,
                    format!(
                        "Response took {:.0}ms, above the {:.0}ms threshold",
                        response_time_ms, threshold
                    ),
                    0.9,
                )
                .with_metadata(json!({
                    "response_time_ms": response_time_ms,
                    "threshold_ms": threshold,
                })),
            );
        }
    }

    if let Some(token_count) = context.token_count {
        if token_count > 8000 {
            issues.push(
                DetectedIssue::new(
                    IssueType::PerformanceDegradation,
                    IssueSeverity::Low,
                    format!("Unusually large token count ({})", token_count),
                    0.5,
                )
                .with_metadata(json!({ "token_count": token_count })),
            );
        } else if token_count > 0 && entry.content.len() > 200 {
            // Rough floor: well-formed output runs a handful of characters per
            // token, so a count far below that points at truncated or bogus
            // context metadata.
            let expected_minimum = (entry.content.len() / 20) as u64;
            if token_count < expected_minimum {
                issues.push(
                    DetectedIssue::new(
                        IssueType::AccuracyIssue,
                        IssueSeverity::Medium,
                        format!(
                            "Reported token count ({}) is implausibly low for {} characters of content",
                            token_count,
                            entry.content.len()
                        ),
                        0.5,
                    )
                    .with_metadata(json!({
                        "token_count": token_count,
                        "content_length": entry.content.len(),
                    })),
                );
            }
        }
    }

    issues
}

/// Heuristics for confident claims about inherently uncertain topics and
/// placeholder references presented as real ones
pub struct AccuracyHeuristics {
    certainty: Regex,
    uncertain_topic: Regex,
    placeholder_url: Regex,
}

impl Default for AccuracyHeuristics {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl AccuracyHeuristics {
    pub fn with_defaults() -> Self {
        let build = |pattern: &str| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .unwrap_or_else(|e| panic!("invalid built-in pattern {:?}: {}", pattern, e))
        };
        Self {
            certainty: build(
                r"\b(definitely|certainly|always|never|guaranteed|without a doubt|100% (sure|certain|accurate))\b",
            ),
            uncertain_topic: build(
                r"\b(future events?|will happen|by (19|20)\d{2}|medical advice|legal advice|diagnosis|stock (price|market)|real[- ]time|current (price|weather)|tomorrow|next (week|month|year))\b",
            ),
            placeholder_url: build(
                r"https?://(www\.)?(example\.(com|org|net)|test\.com|dummy|placeholder|your-?(site|domain))|\[(url|link|website|insert[ a-z]*)\]",
            ),
        }
    }

    pub fn scan(&self, content: &str) -> Vec<DetectedIssue> {
        let mut issues = Vec::new();

        if self.certainty.is_match(content) && self.uncertain_topic.is_match(content) {
            issues.push(DetectedIssue::new(
                IssueType::AccuracyIssue,
                IssueSeverity::High,
                "Absolute certainty expressed about an inherently uncertain topic",
                0.7,
            ));
        }

        if let Some(found) = self.placeholder_url.find(content) {
            issues.push(
                DetectedIssue::new(
                    IssueType::Hallucination,
                    IssueSeverity::Medium,
                    "Placeholder URL presented as a real reference",
                    0.6,
                )
                .with_metadata(json!({ "matched": found.as_str() })),
            );
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{LogContext, LogLevel};
    use chrono::Utc;

    fn entry_with_context(content: &str, context: Option<LogContext>) -> LogEntry {
        LogEntry {
            tenant_id: "t1".to_string(),
            app_id: "a1".to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
            level: LogLevel::Info,
            context,
            detected_issues: None,
        }
    }

    #[test]
    fn test_rule_table_compiles() {
        let rules = PatternRuleSet::with_defaults();
        assert!(rules.rule_count() >= 5);
    }

    #[test]
    fn test_self_correction_detected() {
        let rules = PatternRuleSet::with_defaults();
        let issues = rules.scan("The capital is Lyon. I apologize, the capital is Paris.");
        assert!(issues
            .iter()
            .any(|i| i.issue_type == IssueType::Hallucination
                && i.severity == IssueSeverity::Medium));
    }

    #[test]
    fn test_contradiction_within_range() {
        let rules = PatternRuleSet::with_defaults();
        let issues = rules.scan("Yes, that is supported. No, it is not available.");
        assert!(issues
            .iter()
            .any(|i| i.issue_type == IssueType::Hallucination && i.severity == IssueSeverity::High));
    }

    #[test]
    fn test_contradiction_out_of_range_ignored() {
        let rules = PatternRuleSet::with_defaults();
        let padding = "x".repeat(80);
        let issues = rules.scan(&format!("Yes, it works. {} No problems found.", padding));
        assert!(!issues
            .iter()
            .any(|i| i.description.contains("Contradictory yes/no")));
    }

    #[test]
    fn test_null_token_detected() {
        let rules = PatternRuleSet::with_defaults();
        let issues = rules.scan("Your balance is NaN dollars");
        assert!(issues
            .iter()
            .any(|i| i.issue_type == IssueType::StructureError));
    }

    #[test]
    fn test_clean_content_produces_nothing() {
        let rules = PatternRuleSet::with_defaults();
        let issues = rules.scan("The order shipped on Tuesday and arrives Thursday.");
        assert!(issues.is_empty());
    }

    #[test]
    fn test_slow_response_medium_then_high() {
        let thresholds = DetectionThresholds {
            performance_threshold_ms: 1000.0,
            ..Default::default()
        };

        let slow = entry_with_context(
            "ok",
            Some(LogContext {
                response_time_ms: Some(1500.0),
                ..Default::default()
            }),
        );
        let issues = performance_issues(&slow, &thresholds);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, IssueSeverity::Medium);

        let very_slow = entry_with_context(
            "ok",
            Some(LogContext {
                response_time_ms: Some(2500.0),
                ..Default::default()
            }),
        );
        let issues = performance_issues(&very_slow, &thresholds);
        assert_eq!(issues[0].severity, IssueSeverity::High);
        assert_eq!(issues[0].issue_type, IssueType::PerformanceDegradation);
    }

    #[test]
    fn test_fast_response_not_flagged() {
        let thresholds = DetectionThresholds::default();
        let entry = entry_with_context(
            "ok",
            Some(LogContext {
                response_time_ms: Some(200.0),
                ..Default::default()
            }),
        );
        assert!(performance_issues(&entry, &thresholds).is_empty());
    }

    #[test]
    fn test_token_count_outliers() {
        let thresholds = DetectionThresholds::default();

        let huge = entry_with_context(
            "short",
            Some(LogContext {
                token_count: Some(9000),
                ..Default::default()
            }),
        );
        let issues = performance_issues(&huge, &thresholds);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, IssueSeverity::Low);

        let long_content = "word ".repeat(200);
        let tiny = entry_with_context(
            &long_content,
            Some(LogContext {
                token_count: Some(3),
                ..Default::default()
            }),
        );
        let issues = performance_issues(&tiny, &thresholds);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, IssueSeverity::Medium);
    }

    #[test]
    fn test_no_context_no_performance_issues() {
        let thresholds = DetectionThresholds::default();
        let entry = entry_with_context("anything", None);
        assert!(performance_issues(&entry, &thresholds).is_empty());
    }

    #[test]
    fn test_certainty_about_uncertain_topic() {
        let heuristics = AccuracyHeuristics::with_defaults();
        let issues =
            heuristics.scan("The stock market will definitely rise next year, guaranteed.");
        assert!(issues
            .iter()
            .any(|i| i.issue_type == IssueType::AccuracyIssue && i.severity == IssueSeverity::High));
    }

    #[test]
    fn test_certainty_alone_is_fine() {
        let heuristics = AccuracyHeuristics::with_defaults();
        let issues = heuristics.scan("This function definitely returns a string.");
        assert!(issues.is_empty());
    }

    #[test]
    fn test_placeholder_url_flagged() {
        let heuristics = AccuracyHeuristics::with_defaults();
        let issues = heuristics.scan("See the docs at https://example.com/guide for details.");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, IssueType::Hallucination);
    }
}
