//! Cohort retention matrix

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::cohort::AnnotatedTransaction;
use crate::error::{AnalyticsError, AnalyticsResult};
use crate::matrix::CohortMatrix;
use crate::period::BucketKey;
use crate::stats::Statistic;

/// Fraction of each cohort still active at each period offset
pub type RetentionMatrix = CohortMatrix;

/// Build the retention matrix from cohort-annotated sales.
///
/// A customer counts as retained at offset `k` when their latest sale falls
/// at offset `k` or later. Rows are then forced to start at 1.0 and never
/// increase; gaps and the tail past a cohort's last observed offset carry the
/// previous value forward.
pub fn compute_retention(annotated: &[AnnotatedTransaction]) -> AnalyticsResult<RetentionMatrix> {
    if annotated.is_empty() {
        return Err(AnalyticsError::EmptyDataset {
            context: "no annotated transactions to compute retention",
        });
    }

    let mut reach: BTreeMap<BucketKey, HashMap<&str, u32>> = BTreeMap::new();
    for row in annotated {
        let furthest = reach
            .entry(row.cohort)
            .or_default()
            .entry(row.customer_id.as_str())
            .or_insert(0);
        *furthest = (*furthest).max(row.period_offset);
    }

    let mut observed: BTreeMap<BucketKey, BTreeMap<u32, f64>> = BTreeMap::new();
    for (cohort, customers) in &reach {
        let cohort_size = customers.len() as f64;
        let max_offset = customers.values().copied().max().unwrap_or(0);

        // customers whose last sale sits exactly at each offset
        let mut last_seen = vec![0usize; max_offset as usize + 1];
        for &offset in customers.values() {
            last_seen[offset as usize] += 1;
        }

        let mut still_active = 0usize;
        let mut row = BTreeMap::new();
        for offset in (0..=max_offset).rev() {
            still_active += last_seen[offset as usize];
            row.insert(offset, still_active as f64 / cohort_size);
        }
        observed.insert(*cohort, row);
    }

    let mut matrix = CohortMatrix::from_observed(&observed);
    matrix.for_each_row_mut(enforce_non_increasing);

    debug!(
        cohorts = matrix.n_cohorts(),
        periods = matrix.n_periods(),
        "Retention matrix computed"
    );

    Ok(matrix)
}

/// Median retention across cohorts at each offset
pub fn median_retention(matrix: &RetentionMatrix) -> Vec<f64> {
    matrix.column_summary(Statistic::Median)
}

fn enforce_non_increasing(row: &mut [f64]) {
    let Some(first) = row.first_mut() else {
        return;
    };
    *first = 1.0;

    for i in 1..row.len() {
        let previous = row[i - 1];
        row[i] = if row[i].is_nan() {
            previous
        } else {
            row[i].min(previous)
        };
    }
}
