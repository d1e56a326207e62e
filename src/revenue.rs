//! Cumulative revenue per customer, by cohort

use std::collections::BTreeMap;

use tracing::debug;

use crate::cohort::AnnotatedTransaction;
use crate::error::{AnalyticsError, AnalyticsResult};
use crate::matrix::CohortMatrix;
use crate::period::BucketKey;
use crate::stats::Statistic;

/// Typical cumulative revenue per customer at each period offset
pub type CumulativeRevenueMatrix = CohortMatrix;

/// Build the cumulative revenue matrix.
///
/// Each customer's running total is taken at the offsets where they bought,
/// and each (cohort, offset) cell aggregates with `statistic` only the
/// customers who bought at that offset. Gaps and the tail up to the global
/// offset range carry the previous value forward, and each row is finally
/// made non-decreasing with a running maximum.
pub fn compute_cumulative_revenue(
    annotated: &[AnnotatedTransaction],
    statistic: Statistic,
) -> AnalyticsResult<CumulativeRevenueMatrix> {
    if annotated.is_empty() {
        return Err(AnalyticsError::EmptyDataset {
            context: "no annotated transactions to compute cumulative revenue",
        });
    }

    let mut per_period: BTreeMap<BucketKey, BTreeMap<&str, BTreeMap<u32, f64>>> =
        BTreeMap::new();
    for row in annotated {
        *per_period
            .entry(row.cohort)
            .or_default()
            .entry(row.customer_id.as_str())
            .or_default()
            .entry(row.period_offset)
            .or_insert(0.0) += row.sale_value;
    }

    let mut observed: BTreeMap<BucketKey, BTreeMap<u32, f64>> = BTreeMap::new();
    for (cohort, customers) in &per_period {
        // running totals at the offsets where each customer actually bought
        let mut totals: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
        for periods in customers.values() {
            let mut running = 0.0;
            for (&offset, &value) in periods {
                running += value;
                totals.entry(offset).or_default().push(running);
            }
        }

        let row = totals
            .into_iter()
            .filter_map(|(offset, column)| Some((offset, statistic.apply(&column)?)))
            .collect();
        observed.insert(*cohort, row);
    }

    let mut matrix = CohortMatrix::from_observed(&observed);
    matrix.for_each_row_mut(enforce_non_decreasing);

    debug!(
        cohorts = matrix.n_cohorts(),
        periods = matrix.n_periods(),
        statistic = statistic.as_str(),
        "Cumulative revenue matrix computed"
    );

    Ok(matrix)
}

/// Forward-fill gaps and apply a running maximum
fn enforce_non_decreasing(row: &mut [f64]) {
    let mut best = f64::NAN;
    for cell in row.iter_mut() {
        if !cell.is_nan() && (best.is_nan() || *cell > best) {
            best = *cell;
        }
        *cell = best;
    }
}
