//! One complete analysis run over a cleaned transaction set

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cohort::compute_cohorts;
use crate::data::{filter_date_range, Transaction};
use crate::error::{AnalyticsError, AnalyticsResult};
use crate::metrics::{
    compute_summary, estimate_ltv, sales_by_customer_type, LtvEstimate, PeriodSales, SalesSummary,
};
use crate::period::Granularity;
use crate::retention::{compute_retention, median_retention, RetentionMatrix};
use crate::revenue::{compute_cumulative_revenue, CumulativeRevenueMatrix};
use crate::rfm::{compute_rfm, summarize_segments, RfmRecord, SegmentSummary};
use crate::stats::Statistic;

/// Settings shared by every engine in a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub granularity: Granularity,
    pub cumulative_statistic: Statistic,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub contribution_margin_pct: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            granularity: Granularity::Month,
            cumulative_statistic: Statistic::Median,
            start_date: None,
            end_date: None,
            contribution_margin_pct: 50.0,
        }
    }
}

/// RFM result of a run; quartile failures do not discard the other views
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RfmOutcome {
    Segmented {
        records: Vec<RfmRecord>,
        segments: Vec<SegmentSummary>,
    },
    Unavailable {
        reason: String,
    },
}

impl RfmOutcome {
    pub fn records(&self) -> &[RfmRecord] {
        match self {
            Self::Segmented { records, .. } => records,
            Self::Unavailable { .. } => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub config: AnalysisConfig,
    pub transactions_analysed: usize,
    pub summary: SalesSummary,
    pub ltv: LtvEstimate,
    pub sales_by_period: Vec<PeriodSales>,
    pub retention: RetentionMatrix,
    pub median_retention: Vec<f64>,
    pub cumulative_revenue: CumulativeRevenueMatrix,
    pub rfm: RfmOutcome,
}

/// Filter to the configured date range and compute every derived view
pub fn run_analysis(
    transactions: &[Transaction],
    config: &AnalysisConfig,
) -> AnalyticsResult<AnalysisReport> {
    let filtered = filter_date_range(transactions, config.start_date, config.end_date)?;
    if filtered.is_empty() {
        return Err(AnalyticsError::EmptyDataset {
            context: "no transactions inside the selected date range",
        });
    }

    info!(
        transactions = filtered.len(),
        granularity = %config.granularity,
        statistic = config.cumulative_statistic.as_str(),
        "Starting analysis"
    );

    let summary = compute_summary(&filtered)?;
    let ltv = estimate_ltv(&summary, config.contribution_margin_pct)?;
    let sales_by_period = sales_by_customer_type(&filtered, config.granularity);

    let annotated = compute_cohorts(&filtered, config.granularity)?;
    let retention = compute_retention(&annotated)?;
    let cumulative_revenue = compute_cumulative_revenue(&annotated, config.cumulative_statistic)?;

    let rfm = match compute_rfm(&filtered) {
        Ok(records) => RfmOutcome::Segmented {
            segments: summarize_segments(&records),
            records,
        },
        Err(e @ AnalyticsError::InsufficientQuantileGroups { .. }) => {
            warn!(error = %e, "RFM segmentation unavailable");
            RfmOutcome::Unavailable {
                reason: e.to_string(),
            }
        }
        Err(e) => return Err(e),
    };

    Ok(AnalysisReport {
        config: config.clone(),
        transactions_analysed: filtered.len(),
        summary,
        ltv,
        sales_by_period,
        median_retention: median_retention(&retention),
        retention,
        cumulative_revenue,
        rfm,
    })
}
