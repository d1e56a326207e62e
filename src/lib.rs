//! CohortForge: cohort retention, cumulative revenue and RFM segmentation
//! of customer sales data.
//!
//! Transactions are loaded from a delimited file, bucketed into calendar
//! periods and assigned to acquisition cohorts. The library then derives
//! retention and cumulative-revenue matrices, RFM segments and a handful of
//! headline sales metrics.

pub mod analysis;
pub mod cli;
pub mod cohort;
pub mod data;
pub mod error;
pub mod export;
pub mod formula;
pub mod matrix;
pub mod metrics;
pub mod period;
pub mod retention;
pub mod revenue;
pub mod rfm;
pub mod stats;

// Re-export public items for easier access
pub use analysis::{run_analysis, AnalysisConfig, AnalysisReport, RfmOutcome};
pub use cli::Args;
pub use cohort::{compute_cohorts, AnnotatedTransaction};
pub use data::{load_transactions, ColumnMapping, Transaction, ValueSource};
pub use error::{AnalyticsError, AnalyticsResult};
pub use formula::{evaluate_value_formula, ValueFormulaConfig};
pub use matrix::CohortMatrix;
pub use period::{bucket_period, BucketKey, Granularity};
pub use retention::{compute_retention, RetentionMatrix};
pub use revenue::{compute_cumulative_revenue, CumulativeRevenueMatrix};
pub use rfm::{compute_rfm, compute_rfm_values, rank_rfm, RfmRecord, RfmValues, Segment};
pub use stats::Statistic;

/// Common result type used throughout the application
pub type Result<T> = anyhow::Result<T>;
