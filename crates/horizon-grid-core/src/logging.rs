//! Logging facilities for Horizon Grid.
//!
//! This module provides:
//! - Target and span names for filtering `tracing` output by subsystem
//! - [`PerfSpan`], a guard for timing pipeline stages
//!
//! # Tracing Integration
//!
//! Horizon Grid uses the `tracing` crate for instrumentation. To see logs,
//! install a tracing subscriber in your application:
//!
//! ```ignore
//! fn main() {
//!     tracing_subscriber::fmt()
//!         .with_env_filter("horizon_grid::grouping=debug")
//!         .init();
//!
//!     // Your application code...
//! }
//! ```

/// Span names used throughout Horizon Grid for tracing.
pub mod span_names {
    /// Full or partial row model refresh.
    pub const REFRESH: &str = "horizon_grid::refresh";
    /// Transaction application.
    pub const TRANSACTION: &str = "horizon_grid::transaction";
    /// Chart data extraction.
    pub const CHART: &str = "horizon_grid::chart";
}

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core signal/slot target.
    pub const SIGNAL: &str = "horizon_grid_core::signal";
    /// Performance spans.
    pub const PERF: &str = "horizon_grid::perf";
    /// Row node manager (row data, transactions, ids).
    pub const NODE_MANAGER: &str = "horizon_grid::node_manager";
    /// Grouping and tree data derivation.
    pub const GROUPING: &str = "horizon_grid::grouping";
    /// Column filtering.
    pub const FILTER: &str = "horizon_grid::filter";
    /// Pivot result column generation.
    pub const PIVOT: &str = "horizon_grid::pivot";
    /// Aggregation.
    pub const AGGREGATION: &str = "horizon_grid::aggregation";
    /// Sorting.
    pub const SORT: &str = "horizon_grid::sort";
    /// Row index assignment.
    pub const FLATTEN: &str = "horizon_grid::flatten";
    /// Row node events and display state.
    pub const NODE: &str = "horizon_grid::node";
    /// Chart datasource.
    pub const CHART: &str = "horizon_grid::chart";
    /// Server-side row model.
    pub const SERVER_SIDE: &str = "horizon_grid::server_side";
    /// Options loading.
    pub const CONFIG: &str = "horizon_grid::config";
}

/// A guard that keeps a tracing span entered until dropped.
///
/// This is useful for tracking the duration of operations.
#[derive(Debug)]
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create a new performance span.
    ///
    /// The span will be active until the guard is dropped.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: "horizon_grid::perf", "perf", operation = name);
        Self {
            span: span.entered(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perf_span() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        // Just ensure it doesn't panic with or without a subscriber
        let _span = PerfSpan::new(span_names::REFRESH);
    }

    #[test]
    fn test_targets_share_prefix() {
        for target in [
            targets::NODE_MANAGER,
            targets::GROUPING,
            targets::FILTER,
            targets::SORT,
            targets::CHART,
        ] {
            assert!(target.starts_with("horizon_grid::"));
        }
    }
}
