//! Transaction loading and cleaning from delimited files

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::error::{AnalyticsError, AnalyticsResult};
use crate::formula::{evaluate_value_formula, ValueFormulaConfig};

/// Datetime layouts tried before the date-only ones; time of day is discarded
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Date-only layouts, day-first before month-first
const DATE_FORMATS: [&str; 6] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%m/%d/%Y", "%d.%m.%Y", "%Y/%m/%d"];

/// One cleaned sale
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    /// `None` when the source row had no customer identifier
    pub customer_id: Option<String>,
    pub sale_date: NaiveDate,
    pub sale_value: f64,
}

impl Transaction {
    pub fn new(customer_id: Option<&str>, sale_date: NaiveDate, sale_value: f64) -> Self {
        Self {
            customer_id: customer_id
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string),
            sale_date,
            sale_value,
        }
    }
}

/// Untyped table as read from the source file
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    pub fn require_column(&self, name: &str) -> AnalyticsResult<usize> {
        self.column_index(name)
            .ok_or_else(|| AnalyticsError::MissingColumn(name.to_string()))
    }

    /// Cell value, empty for short rows
    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Where the sale value of each row comes from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ValueSource {
    Column(String),
    Formula(ValueFormulaConfig),
}

/// Source columns feeding the transaction fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub customer_id: String,
    pub sale_date: String,
    pub value: ValueSource,
}

/// Row-level problems found while cleaning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleaningReport {
    pub rows_read: usize,
    pub dropped_dates: usize,
    pub dropped_values: usize,
    pub rows_without_customer: usize,
}

#[derive(Debug, Clone)]
pub struct CleanedTransactions {
    pub transactions: Vec<Transaction>,
    pub report: CleaningReport,
}

/// Read a delimited table from any reader
pub fn read_table<R: Read>(reader: R) -> AnalyticsResult<RawTable> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    debug!(column_count = headers.len(), "CSV headers parsed");

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    trace!(row_count = rows.len(), "CSV rows read");
    Ok(RawTable { headers, rows })
}

/// Load a CSV file into a raw table
pub fn load_table(file_path: impl AsRef<Path>) -> crate::Result<RawTable> {
    let path = file_path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let table = read_table(file).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(table)
}

/// Load a CSV file and clean it into transactions in one step
pub fn load_transactions(
    file_path: impl AsRef<Path>,
    mapping: &ColumnMapping,
) -> crate::Result<CleanedTransactions> {
    let table = load_table(file_path)?;
    if table.is_empty() {
        anyhow::bail!("No rows found in input file");
    }

    Ok(build_transactions(&table, mapping)?)
}

/// Turn raw rows into transactions.
///
/// Rows whose date or value cannot be parsed are dropped and counted. Rows
/// without a customer id are kept; per-customer computations skip them.
pub fn build_transactions(
    table: &RawTable,
    mapping: &ColumnMapping,
) -> AnalyticsResult<CleanedTransactions> {
    let id_col = table.require_column(&mapping.customer_id)?;
    let date_col = table.require_column(&mapping.sale_date)?;

    let values: Vec<Option<f64>> = match &mapping.value {
        ValueSource::Column(name) => {
            let value_col = table.require_column(name)?;
            (0..table.len())
                .map(|row| parse_amount(table.cell(row, value_col)))
                .collect()
        }
        ValueSource::Formula(config) => evaluate_value_formula(table, config)?
            .into_iter()
            .map(Some)
            .collect(),
    };

    let mut report = CleaningReport {
        rows_read: table.len(),
        ..CleaningReport::default()
    };
    let mut transactions = Vec::with_capacity(table.len());

    for (row, value) in values.into_iter().enumerate() {
        let sale_date = match parse_sale_date(row + 2, table.cell(row, date_col)) {
            Ok(date) => date,
            Err(e) => {
                debug!(error = %e, "Dropping row with unparseable date");
                report.dropped_dates += 1;
                continue;
            }
        };

        let Some(sale_value) = value else {
            debug!(row = row + 2, "Dropping row with unparseable sale value");
            report.dropped_values += 1;
            continue;
        };

        let transaction = Transaction::new(Some(table.cell(row, id_col)), sale_date, sale_value);
        if transaction.customer_id.is_none() {
            report.rows_without_customer += 1;
        }
        transactions.push(transaction);
    }

    info!(
        rows = report.rows_read,
        kept = transactions.len(),
        dropped_dates = report.dropped_dates,
        dropped_values = report.dropped_values,
        "Transactions cleaned"
    );

    Ok(CleanedTransactions {
        transactions,
        report,
    })
}

/// Parse a sale date in any of the accepted layouts.
///
/// `row` is the 1-based line number in the source file, used for reporting.
pub fn parse_sale_date(row: usize, value: &str) -> AnalyticsResult<NaiveDate> {
    let value = value.trim();

    let parsed = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|datetime| datetime.date())
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|datetime| datetime.date_naive())
        })
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        });

    parsed.ok_or_else(|| AnalyticsError::DateParse {
        row,
        value: value.to_string(),
    })
}

/// Parse a monetary amount, accepting currency prefixes and either decimal
/// separator. Returns `None` for anything that is not a finite number.
pub fn parse_amount(value: &str) -> Option<f64> {
    let cleaned: String = value
        .trim()
        .trim_start_matches("R$")
        .trim_start_matches('$')
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    let normalized = match (cleaned.rfind(','), cleaned.rfind('.')) {
        // 1.234,56
        (Some(comma), Some(dot)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        // 1,234.56
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) => cleaned.replace(',', "."),
        _ => cleaned,
    };

    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Keep transactions dated within `[start, end]`, both bounds optional
pub fn filter_date_range(
    transactions: &[Transaction],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> AnalyticsResult<Vec<Transaction>> {
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(AnalyticsError::InvalidConfig(format!(
                "date range start {} is after end {}",
                start, end
            )));
        }
    }

    Ok(transactions
        .iter()
        .filter(|t| start.map_or(true, |s| t.sale_date >= s))
        .filter(|t| end.map_or(true, |e| t.sale_date <= e))
        .cloned()
        .collect())
}

/// Group transactions with a customer id by that id
pub fn group_by_customer(transactions: &[Transaction]) -> HashMap<&str, Vec<&Transaction>> {
    let mut groups: HashMap<&str, Vec<&Transaction>> = HashMap::new();
    for transaction in transactions {
        if let Some(id) = transaction.customer_id.as_deref() {
            groups.entry(id).or_default().push(transaction);
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_csv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Cliente,Data,Valor,Qtd,Preco").unwrap();
        writeln!(file, "C1,2024-01-05,100.00,2,50").unwrap();
        writeln!(file, "C1,10/02/2024,\"50,00\",1,50").unwrap();
        writeln!(file, "C2,2024-02-01 14:30:00,200,4,50").unwrap();
        writeln!(file, ",2024-02-03,30,1,30").unwrap();
        writeln!(file, "C3,not a date,10,1,10").unwrap();
        writeln!(file, "C4,2024-03-01,abc,1,10").unwrap();
        file
    }

    fn column_mapping() -> ColumnMapping {
        ColumnMapping {
            customer_id: "Cliente".to_string(),
            sale_date: "Data".to_string(),
            value: ValueSource::Column("Valor".to_string()),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_load_transactions() {
        let file = create_test_csv();
        let cleaned = load_transactions(file.path(), &column_mapping()).unwrap();

        assert_eq!(cleaned.transactions.len(), 4);
        assert_eq!(
            cleaned.report,
            CleaningReport {
                rows_read: 6,
                dropped_dates: 1,
                dropped_values: 1,
                rows_without_customer: 1,
            }
        );

        let second = &cleaned.transactions[1];
        assert_eq!(second.customer_id.as_deref(), Some("C1"));
        assert_eq!(second.sale_date, date(2024, 2, 10));
        assert_eq!(second.sale_value, 50.0);
        assert_eq!(cleaned.transactions[2].sale_date, date(2024, 2, 1));
        assert_eq!(cleaned.transactions[3].customer_id, None);
    }

    #[test]
    fn test_formula_value_source() {
        let file = create_test_csv();
        let table = load_table(file.path()).unwrap();
        let mapping = ColumnMapping {
            value: ValueSource::Formula(ValueFormulaConfig {
                aliases: BTreeMap::from([
                    ("Q".to_string(), "Qtd".to_string()),
                    ("P".to_string(), "Preco".to_string()),
                ]),
                expression: "Q * P".to_string(),
            }),
            ..column_mapping()
        };

        let cleaned = build_transactions(&table, &mapping).unwrap();
        let values: Vec<f64> = cleaned.transactions.iter().map(|t| t.sale_value).collect();
        assert_eq!(values, vec![100.0, 50.0, 200.0, 30.0, 10.0]);
        assert_eq!(cleaned.report.dropped_values, 0);
    }

    #[test]
    fn test_missing_column() {
        let file = create_test_csv();
        let table = load_table(file.path()).unwrap();
        let mapping = ColumnMapping {
            customer_id: "Customer".to_string(),
            ..column_mapping()
        };

        assert!(matches!(
            build_transactions(&table, &mapping),
            Err(AnalyticsError::MissingColumn(name)) if name == "Customer"
        ));
    }

    #[test]
    fn test_parse_sale_date_formats() {
        assert_eq!(parse_sale_date(1, "2024-03-09").unwrap(), date(2024, 3, 9));
        assert_eq!(parse_sale_date(1, "2024-03-09T23:59:59").unwrap(), date(2024, 3, 9));
        assert_eq!(parse_sale_date(1, "2024-03-09T08:00:00Z").unwrap(), date(2024, 3, 9));
        assert_eq!(parse_sale_date(1, "09/03/2024").unwrap(), date(2024, 3, 9));
        assert_eq!(parse_sale_date(1, "09.03.2024").unwrap(), date(2024, 3, 9));
        assert_eq!(parse_sale_date(1, "12/31/2024").unwrap(), date(2024, 12, 31));
        assert!(matches!(
            parse_sale_date(7, "yesterday"),
            Err(AnalyticsError::DateParse { row: 7, .. })
        ));
        assert!(parse_sale_date(1, "").is_err());
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("100"), Some(100.0));
        assert_eq!(parse_amount("R$ 1.234,56"), Some(1234.56));
        assert_eq!(parse_amount("$1,234.56"), Some(1234.56));
        assert_eq!(parse_amount("12,5"), Some(12.5));
        assert_eq!(parse_amount("-3.5"), Some(-3.5));
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("n/a"), None);
    }

    #[test]
    fn test_filter_date_range() {
        let transactions = vec![
            Transaction::new(Some("A"), date(2024, 1, 1), 1.0),
            Transaction::new(Some("A"), date(2024, 1, 15), 1.0),
            Transaction::new(Some("B"), date(2024, 2, 1), 1.0),
        ];

        let filtered =
            filter_date_range(&transactions, Some(date(2024, 1, 15)), Some(date(2024, 2, 1))).unwrap();
        assert_eq!(filtered.len(), 2);

        let unbounded = filter_date_range(&transactions, None, None).unwrap();
        assert_eq!(unbounded, transactions);

        assert!(matches!(
            filter_date_range(&transactions, Some(date(2024, 3, 1)), Some(date(2024, 1, 1))),
            Err(AnalyticsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_blank_customer_id_is_none() {
        let t = Transaction::new(Some("   "), date(2024, 1, 1), 5.0);
        assert_eq!(t.customer_id, None);
        let transactions = [t];
        let groups = group_by_customer(&transactions);
        assert!(groups.is_empty());
    }
}
