//! Headline sales metrics, LTV estimate and new vs returning sales

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::Serialize;

use crate::data::{group_by_customer, Transaction};
use crate::error::{AnalyticsError, AnalyticsResult};
use crate::period::{bucket_period, BucketKey, Granularity};
use crate::stats::{mean, median};

/// Dataset-wide figures. Per-customer figures only use sales with a
/// customer id and are 0.0 when there are none.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SalesSummary {
    pub total_revenue: f64,
    pub total_sales: usize,
    pub unique_customers: usize,
    pub average_ticket: f64,
    pub mean_revenue_per_customer: f64,
    pub median_revenue_per_customer: f64,
    pub mean_transactions_per_customer: f64,
    pub median_transactions_per_customer: f64,
    pub revenue_without_customer: f64,
    pub sales_without_customer: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LtvEstimate {
    pub margin_pct: f64,
    pub mean: f64,
    pub median: f64,
}

/// Revenue of one period split by whether the sale was a first purchase
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodSales {
    pub period: BucketKey,
    pub new_revenue: f64,
    pub returning_revenue: f64,
    /// Sales without a customer id
    pub unattributed_revenue: f64,
}

pub fn compute_summary(transactions: &[Transaction]) -> AnalyticsResult<SalesSummary> {
    if transactions.is_empty() {
        return Err(AnalyticsError::EmptyDataset {
            context: "no transactions to summarise",
        });
    }

    let total_revenue: f64 = transactions.iter().map(|t| t.sale_value).sum();
    let anonymous: Vec<&Transaction> = transactions
        .iter()
        .filter(|t| t.customer_id.is_none())
        .collect();

    let groups = group_by_customer(transactions);
    let revenue_per_customer: Vec<f64> = groups
        .values()
        .map(|sales| sales.iter().map(|t| t.sale_value).sum())
        .collect();
    let sales_per_customer: Vec<f64> = groups.values().map(|sales| sales.len() as f64).collect();

    Ok(SalesSummary {
        total_revenue,
        total_sales: transactions.len(),
        unique_customers: groups.len(),
        average_ticket: total_revenue / transactions.len() as f64,
        mean_revenue_per_customer: mean(&revenue_per_customer).unwrap_or(0.0),
        median_revenue_per_customer: median(&revenue_per_customer).unwrap_or(0.0),
        mean_transactions_per_customer: mean(&sales_per_customer).unwrap_or(0.0),
        median_transactions_per_customer: median(&sales_per_customer).unwrap_or(0.0),
        revenue_without_customer: anonymous.iter().map(|t| t.sale_value).sum(),
        sales_without_customer: anonymous.len(),
    })
}

/// Lifetime value per customer at a contribution margin given in percent
pub fn estimate_ltv(summary: &SalesSummary, margin_pct: f64) -> AnalyticsResult<LtvEstimate> {
    if !(0.0..=100.0).contains(&margin_pct) {
        return Err(AnalyticsError::InvalidConfig(format!(
            "contribution margin must be between 0 and 100, got {}",
            margin_pct
        )));
    }

    let margin = margin_pct / 100.0;
    Ok(LtvEstimate {
        margin_pct,
        mean: summary.mean_revenue_per_customer * margin,
        median: summary.median_revenue_per_customer * margin,
    })
}

/// Revenue per period split into first-purchase and repeat sales.
///
/// A sale is "new" when it happens on the customer's first purchase date.
pub fn sales_by_customer_type(
    transactions: &[Transaction],
    granularity: Granularity,
) -> Vec<PeriodSales> {
    let mut first_purchase: HashMap<&str, NaiveDate> = HashMap::new();
    for transaction in transactions {
        if let Some(id) = transaction.customer_id.as_deref() {
            let first = first_purchase.entry(id).or_insert(transaction.sale_date);
            *first = (*first).min(transaction.sale_date);
        }
    }

    let mut periods: BTreeMap<BucketKey, PeriodSales> = BTreeMap::new();
    for transaction in transactions {
        let period = bucket_period(transaction.sale_date, granularity);
        let entry = periods.entry(period).or_insert_with(|| PeriodSales {
            period,
            new_revenue: 0.0,
            returning_revenue: 0.0,
            unattributed_revenue: 0.0,
        });

        match transaction
            .customer_id
            .as_deref()
            .and_then(|id| first_purchase.get(id))
        {
            Some(&first) if first == transaction.sale_date => entry.new_revenue += transaction.sale_value,
            Some(_) => entry.returning_revenue += transaction.sale_value,
            None => entry.unattributed_revenue += transaction.sale_value,
        }
    }

    periods.into_values().collect()
}
