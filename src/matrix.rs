//! Cohort x period-offset matrices

use std::collections::BTreeMap;

use ndarray::{Array2, ArrayView1};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::period::BucketKey;
use crate::stats::Statistic;

/// Rows are cohorts in calendar order, columns are offsets `0..=max_offset`.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortMatrix {
    cohorts: Vec<BucketKey>,
    values: Array2<f64>,
}

/// One addressable cell, the shape handed to renderers and CSV export
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortCell {
    pub cohort: String,
    pub offset: u32,
    pub value: f64,
}

impl CohortMatrix {
    /// Lay out sparse per-cohort observations on the dense global offset
    /// range. Cells never observed are NaN until the caller fills them.
    pub(crate) fn from_observed(observed: &BTreeMap<BucketKey, BTreeMap<u32, f64>>) -> Self {
        let max_offset = observed
            .values()
            .filter_map(|row| row.keys().next_back())
            .max()
            .copied()
            .unwrap_or(0);

        let cohorts: Vec<BucketKey> = observed.keys().copied().collect();
        let mut values = Array2::from_elem((cohorts.len(), max_offset as usize + 1), f64::NAN);

        for (i, row) in observed.values().enumerate() {
            for (&offset, &value) in row {
                values[[i, offset as usize]] = value;
            }
        }

        Self { cohorts, values }
    }

    /// Run `pass` over each row in place
    pub(crate) fn for_each_row_mut(&mut self, mut pass: impl FnMut(&mut [f64])) {
        for mut row in self.values.rows_mut() {
            let mut owned = row.to_vec();
            pass(&mut owned);
            row.iter_mut().zip(owned).for_each(|(cell, v)| *cell = v);
        }
    }

    pub fn cohorts(&self) -> &[BucketKey] {
        &self.cohorts
    }

    pub fn labels(&self) -> Vec<String> {
        self.cohorts.iter().map(BucketKey::to_string).collect()
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_cohorts(&self) -> usize {
        self.cohorts.len()
    }

    /// Number of offset columns
    pub fn n_periods(&self) -> usize {
        self.values.ncols()
    }

    pub fn row(&self, cohort: &BucketKey) -> Option<ArrayView1<'_, f64>> {
        let index = self.cohorts.binary_search(cohort).ok()?;
        Some(self.values.row(index))
    }

    /// Row for a cohort label such as `2024-01`
    pub fn row_by_label(&self, label: &str) -> Option<ArrayView1<'_, f64>> {
        let index = self.cohorts.iter().position(|c| c.to_string() == label)?;
        Some(self.values.row(index))
    }

    pub fn get(&self, cohort: &BucketKey, offset: u32) -> Option<f64> {
        self.row(cohort)?.get(offset as usize).copied()
    }

    /// Flatten into `(cohort label, offset, value)` cells, row-major
    pub fn cells(&self) -> Vec<CohortCell> {
        let mut cells = Vec::with_capacity(self.values.len());
        for (cohort, row) in self.cohorts.iter().zip(self.values.rows()) {
            let label = cohort.to_string();
            for (offset, &value) in row.iter().enumerate() {
                cells.push(CohortCell {
                    cohort: label.clone(),
                    offset: offset as u32,
                    value,
                });
            }
        }
        cells
    }

    /// Summary statistic of each offset column across cohorts
    pub fn column_summary(&self, statistic: Statistic) -> Vec<f64> {
        self.values
            .columns()
            .into_iter()
            .map(|column| {
                let present: Vec<f64> = column.iter().copied().filter(|v| !v.is_nan()).collect();
                statistic.apply(&present).unwrap_or(f64::NAN)
            })
            .collect()
    }
}

impl Serialize for CohortMatrix {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let rows: Vec<Vec<f64>> = self.values.rows().into_iter().map(|row| row.to_vec()).collect();
        let mut state = serializer.serialize_struct("CohortMatrix", 2)?;
        state.serialize_field("cohorts", &self.cohorts)?;
        state.serialize_field("rows", &rows)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::{bucket_period, Granularity};
    use chrono::NaiveDate;

    fn month(y: i32, m: u32) -> BucketKey {
        bucket_period(NaiveDate::from_ymd_opt(y, m, 1).unwrap(), Granularity::Month)
    }

    fn sample() -> CohortMatrix {
        let observed = BTreeMap::from([
            (month(2024, 2), BTreeMap::from([(0, 4.0)])),
            (month(2024, 1), BTreeMap::from([(0, 1.0), (2, 3.0)])),
        ]);
        CohortMatrix::from_observed(&observed)
    }

    #[test]
    fn test_dense_layout() {
        let matrix = sample();
        assert_eq!(matrix.labels(), vec!["2024-01", "2024-02"]);
        assert_eq!(matrix.n_periods(), 3);
        assert_eq!(matrix.get(&month(2024, 1), 2), Some(3.0));
        assert!(matrix.get(&month(2024, 1), 1).unwrap().is_nan());
        assert!(matrix.get(&month(2024, 2), 2).unwrap().is_nan());
        assert_eq!(matrix.get(&month(2024, 3), 0), None);
    }

    #[test]
    fn test_row_pass_and_cells() {
        let mut matrix = sample();
        matrix.for_each_row_mut(|row| row.iter_mut().for_each(|v| *v = if v.is_nan() { 0.0 } else { *v }));

        let cells = matrix.cells();
        assert_eq!(cells.len(), 6);
        assert_eq!(
            cells[2],
            CohortCell {
                cohort: "2024-01".to_string(),
                offset: 2,
                value: 3.0,
            }
        );
        assert_eq!(cells[5].value, 0.0);
        assert_eq!(matrix.column_summary(Statistic::Mean), vec![2.5, 0.0, 1.5]);
    }

    #[test]
    fn test_serializes_rows_by_label() {
        let mut matrix = sample();
        matrix.for_each_row_mut(|row| row.iter_mut().for_each(|v| *v = if v.is_nan() { 0.0 } else { *v }));
        let json = serde_json::to_value(&matrix).unwrap();
        assert_eq!(json["cohorts"][1], "2024-02");
        assert_eq!(json["rows"][0], serde_json::json!([1.0, 0.0, 3.0]));
    }
}
