//! Cohort assignment: first-purchase bucket and period offset per sale

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use crate::data::Transaction;
use crate::error::{AnalyticsError, AnalyticsResult};
use crate::period::{bucket_period, BucketKey, Granularity};

/// A sale tagged with its customer's cohort and the periods elapsed since it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedTransaction {
    pub customer_id: String,
    pub sale_date: NaiveDate,
    pub sale_value: f64,
    pub cohort: BucketKey,
    pub period_offset: u32,
}

/// Annotate every sale that has a customer id with its cohort and offset.
///
/// Sales without a customer id are left out. Input order is preserved.
pub fn compute_cohorts(
    transactions: &[Transaction],
    granularity: Granularity,
) -> AnalyticsResult<Vec<AnnotatedTransaction>> {
    let mut first_purchase: HashMap<&str, NaiveDate> = HashMap::new();
    for transaction in transactions {
        if let Some(id) = transaction.customer_id.as_deref() {
            first_purchase
                .entry(id)
                .and_modify(|first| *first = (*first).min(transaction.sale_date))
                .or_insert(transaction.sale_date);
        }
    }

    if first_purchase.is_empty() {
        return Err(AnalyticsError::EmptyDataset {
            context: "no transactions with a customer id to form cohorts",
        });
    }

    let mut annotated = Vec::with_capacity(transactions.len());
    for transaction in transactions {
        let Some(id) = transaction.customer_id.as_deref() else {
            continue;
        };
        let Some(&first) = first_purchase.get(id) else {
            continue;
        };

        let cohort = bucket_period(first, granularity);
        let period_offset = bucket_period(transaction.sale_date, granularity).periods_since(&cohort)?;

        annotated.push(AnnotatedTransaction {
            customer_id: id.to_string(),
            sale_date: transaction.sale_date,
            sale_value: transaction.sale_value,
            cohort,
            period_offset,
        });
    }

    debug!(
        customers = first_purchase.len(),
        rows = annotated.len(),
        granularity = %granularity,
        "Cohorts assigned"
    );

    Ok(annotated)
}
