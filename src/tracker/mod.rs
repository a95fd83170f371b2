//! Performance tracking: metric derivation, buffering, and queries

mod performance_tracker;
mod stats;

pub use performance_tracker::{
    AlertType, ImpactLevel, IssueTypeRanking, PerformanceAlert, PerformanceDashboard,
    PerformanceTracker,
};
pub use stats::{PerformanceSnapshot, PerformanceTrend, TrendBucket, TrendDirection};
