//! RFM (Recency, Frequency, Monetary) scoring and segmentation

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::data::{group_by_customer, Transaction};
use crate::error::{AnalyticsError, AnalyticsResult};
use crate::stats::{quantile_sorted, sorted};

/// Number of equal-frequency groups each dimension is split into
pub const QUANTILE_GROUPS: usize = 4;

/// How many customer ids a segment summary lists
const SAMPLE_SIZE: usize = 5;

/// Customer segment, checked in declaration order
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, clap::ValueEnum,
)]
pub enum Segment {
    #[serde(rename = "New Customers")]
    NewCustomers,
    #[serde(rename = "Best Customers")]
    BestCustomers,
    #[serde(rename = "Loyal Customers")]
    LoyalCustomers,
    #[serde(rename = "Lost Customers")]
    LostCustomers,
    #[serde(rename = "Lost Cheap Customers")]
    LostCheapCustomers,
    Other,
}

impl Segment {
    pub const ALL: [Segment; 6] = [
        Segment::NewCustomers,
        Segment::BestCustomers,
        Segment::LoyalCustomers,
        Segment::LostCustomers,
        Segment::LostCheapCustomers,
        Segment::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewCustomers => "New Customers",
            Self::BestCustomers => "Best Customers",
            Self::LoyalCustomers => "Loyal Customers",
            Self::LostCustomers => "Lost Customers",
            Self::LostCheapCustomers => "Lost Cheap Customers",
            Self::Other => "Other",
        }
    }

    /// Classify quartile ranks (1-4, higher is better); first matching rule wins
    pub fn classify(r: u8, f: u8, m: u8) -> Self {
        if r >= 3 && f == 1 {
            Self::NewCustomers
        } else if r == 4 && f == 4 && m == 4 {
            Self::BestCustomers
        } else if r >= 3 && f >= 3 && m >= 3 {
            Self::LoyalCustomers
        } else if r >= 3 && f <= 2 && m <= 2 {
            Self::LostCustomers
        } else if r <= 2 && f <= 2 && m <= 2 {
            Self::LostCheapCustomers
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RFM values, quartile ranks and segment of one customer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RfmRecord {
    pub customer_id: String,
    /// Days between the customer's last sale and the latest sale overall
    pub recency: i64,
    pub frequency: usize,
    pub monetary: f64,
    pub r_rank: u8,
    pub f_rank: u8,
    pub m_rank: u8,
    pub segment: Segment,
}

/// Aggregate view of one segment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentSummary {
    pub segment: Segment,
    pub customers: usize,
    pub total_monetary: f64,
    pub sample_customers: Vec<String>,
}

/// Raw recency, frequency and monetary value of one customer, before ranking
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RfmValues {
    pub customer_id: String,
    /// Days between the customer's last sale and the latest sale overall
    pub recency: i64,
    pub frequency: usize,
    pub monetary: f64,
}

/// Recency, frequency and monetary value of every customer that has an id,
/// sorted by customer id.
///
/// Recency is measured against the latest sale among customers with an id.
pub fn compute_rfm_values(transactions: &[Transaction]) -> AnalyticsResult<Vec<RfmValues>> {
    let groups = group_by_customer(transactions);
    let Some(latest) = groups.values().flatten().map(|t| t.sale_date).max() else {
        return Err(AnalyticsError::EmptyDataset {
            context: "no transactions with a customer id for RFM",
        });
    };

    // BTreeMap for a stable customer order
    let groups: BTreeMap<&str, Vec<&Transaction>> = groups.into_iter().collect();

    let values: Vec<RfmValues> = groups
        .into_iter()
        .map(|(id, sales)| {
            let last = sales.iter().map(|t| t.sale_date).max().unwrap_or(latest);
            RfmValues {
                customer_id: id.to_string(),
                recency: (latest - last).num_days(),
                frequency: sales.len(),
                monetary: sales.iter().map(|t| t.sale_value).sum(),
            }
        })
        .collect();

    debug!(customers = values.len(), latest = %latest, "RFM values computed");
    Ok(values)
}

/// Quartile-rank raw values and assign each customer a segment.
///
/// Fails when a dimension cannot be split into four non-empty quantile
/// groups.
pub fn rank_rfm(values: Vec<RfmValues>) -> AnalyticsResult<Vec<RfmRecord>> {
    let recency: Vec<f64> = values.iter().map(|v| v.recency as f64).collect();
    let frequency: Vec<f64> = values.iter().map(|v| v.frequency as f64).collect();
    let monetary: Vec<f64> = values.iter().map(|v| v.monetary).collect();

    // fewer days since the last sale is better, so recency ranks are flipped
    let r_ranks: Vec<u8> = quartile_ranks(&recency, "recency")?
        .into_iter()
        .map(|rank| QUANTILE_GROUPS as u8 + 1 - rank)
        .collect();
    let f_ranks = quartile_ranks(&frequency, "frequency")?;
    let m_ranks = quartile_ranks(&monetary, "monetary")?;

    let records: Vec<RfmRecord> = values
        .into_iter()
        .enumerate()
        .map(|(i, v)| RfmRecord {
            customer_id: v.customer_id,
            recency: v.recency,
            frequency: v.frequency,
            monetary: v.monetary,
            r_rank: r_ranks[i],
            f_rank: f_ranks[i],
            m_rank: m_ranks[i],
            segment: Segment::classify(r_ranks[i], f_ranks[i], m_ranks[i]),
        })
        .collect();

    info!(customers = records.len(), "RFM segmentation computed");
    Ok(records)
}

/// Score and segment every customer that has an id.
///
/// Records come back sorted by customer id. Fails when there are no
/// customers, or when a dimension cannot be split into four non-empty
/// quantile groups.
pub fn compute_rfm(transactions: &[Transaction]) -> AnalyticsResult<Vec<RfmRecord>> {
    rank_rfm(compute_rfm_values(transactions)?)
}

/// Equal-frequency rank (1..=4) of each value.
///
/// Bin edges are the 0, 25, 50, 75 and 100th percentiles; a value belongs to
/// the first bin whose upper edge is at or above it. Fewer than four distinct
/// values, or duplicate edges, would leave a bin empty; that is reported
/// instead of silently merging bins.
pub fn quartile_ranks(values: &[f64], dimension: &'static str) -> AnalyticsResult<Vec<u8>> {
    let sorted_values = sorted(values);
    let edges: Vec<f64> = (0..=QUANTILE_GROUPS)
        .filter_map(|i| quantile_sorted(&sorted_values, i as f64 / QUANTILE_GROUPS as f64))
        .collect();

    let mut distinct = sorted_values.clone();
    distinct.dedup();

    let degenerate = distinct.len() < QUANTILE_GROUPS
        || edges.len() != QUANTILE_GROUPS + 1
        || edges.windows(2).any(|w| w[0] >= w[1]);
    if degenerate {
        return Err(AnalyticsError::InsufficientQuantileGroups {
            dimension,
            distinct: distinct.len(),
            customers: values.len(),
            required: QUANTILE_GROUPS,
        });
    }

    debug!(dimension, edges = ?edges, "Quantile edges");

    Ok(values
        .iter()
        .map(|&value| {
            edges[1..]
                .iter()
                .position(|&upper| value <= upper)
                .map_or(QUANTILE_GROUPS as u8, |i| i as u8 + 1)
        })
        .collect())
}

/// Per-segment counts and revenue, largest segment first
pub fn summarize_segments(records: &[RfmRecord]) -> Vec<SegmentSummary> {
    let mut by_segment: BTreeMap<Segment, SegmentSummary> = BTreeMap::new();
    for record in records {
        let summary = by_segment
            .entry(record.segment)
            .or_insert_with(|| SegmentSummary {
                segment: record.segment,
                customers: 0,
                total_monetary: 0.0,
                sample_customers: Vec::new(),
            });
        summary.customers += 1;
        summary.total_monetary += record.monetary;
        if summary.sample_customers.len() < SAMPLE_SIZE {
            summary.sample_customers.push(record.customer_id.clone());
        }
    }

    let mut summaries: Vec<SegmentSummary> = by_segment.into_values().collect();
    summaries.sort_by(|a, b| b.customers.cmp(&a.customers).then(a.segment.cmp(&b.segment)));
    summaries
}

pub fn customers_in_segment(records: &[RfmRecord], segment: Segment) -> Vec<&RfmRecord> {
    records.iter().filter(|r| r.segment == segment).collect()
}
