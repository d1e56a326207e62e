//! Command-line interface definitions and argument parsing

use std::collections::BTreeMap;

use chrono::NaiveDate;
use clap::Parser;

use crate::analysis::AnalysisConfig;
use crate::data::{parse_sale_date, ColumnMapping, ValueSource};
use crate::formula::ValueFormulaConfig;
use crate::period::Granularity;
use crate::rfm::Segment;
use crate::stats::Statistic;

/// Cohort retention, cumulative revenue and RFM segmentation of sales data
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input CSV file
    #[arg(short, long, default_value = "data.csv")]
    pub input: String,

    /// Column holding the customer identifier
    #[arg(long, default_value = "ID do Cliente")]
    pub customer_column: String,

    /// Column holding the sale date
    #[arg(long, default_value = "Data da Venda")]
    pub date_column: String,

    /// Column holding the sale value, ignored when --formula is given
    #[arg(long, default_value = "Valor da Venda")]
    pub value_column: String,

    /// Arithmetic expression computing the sale value from aliased columns
    /// Example: --formula "Qty*Price" --alias Qty=quantidade --alias Price=preco
    #[arg(short, long)]
    pub formula: Option<String>,

    /// Formula alias as ALIAS=COLUMN, may be repeated
    #[arg(short, long = "alias", value_name = "ALIAS=COLUMN")]
    pub aliases: Vec<String>,

    /// Period size used for cohorts and offsets
    #[arg(short, long, value_enum, default_value = "month")]
    pub granularity: Granularity,

    /// Statistic aggregating cumulative revenue across a cohort
    #[arg(short, long, value_enum, default_value = "median")]
    pub statistic: Statistic,

    /// First sale date to include
    #[arg(long)]
    pub start: Option<String>,

    /// Last sale date to include
    #[arg(long)]
    pub end: Option<String>,

    /// Contribution margin in percent used for the LTV estimate
    #[arg(short, long, default_value = "50")]
    pub margin: f64,

    /// Directory receiving the exported tables
    #[arg(short, long, default_value = "cohortforge_output")]
    pub output_dir: String,

    /// Only export the RFM records of this segment
    #[arg(long, value_enum)]
    pub segment: Option<Segment>,

    /// Also write the whole report as JSON
    #[arg(long)]
    pub json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Parse the `--alias` values into an alias -> column map
    pub fn parse_aliases(&self) -> crate::Result<BTreeMap<String, String>> {
        let mut aliases = BTreeMap::new();
        for raw in &self.aliases {
            let Some((alias, column)) = raw.split_once('=') else {
                anyhow::bail!("Alias must be in format 'ALIAS=COLUMN', got '{}'", raw);
            };

            let (alias, column) = (alias.trim(), column.trim());
            if alias.is_empty() || column.is_empty() {
                anyhow::bail!("Alias and column must both be non-empty in '{}'", raw);
            }
            if aliases.insert(alias.to_string(), column.to_string()).is_some() {
                anyhow::bail!("Alias '{}' given more than once", alias);
            }
        }
        Ok(aliases)
    }

    /// Build the column mapping, using the formula when one is given
    pub fn column_mapping(&self) -> crate::Result<ColumnMapping> {
        let value = match &self.formula {
            Some(expression) => ValueSource::Formula(ValueFormulaConfig {
                aliases: self.parse_aliases()?,
                expression: expression.clone(),
            }),
            None => {
                if !self.aliases.is_empty() {
                    anyhow::bail!("--alias is only meaningful together with --formula");
                }
                ValueSource::Column(self.value_column.clone())
            }
        };

        Ok(ColumnMapping {
            customer_id: self.customer_column.clone(),
            sale_date: self.date_column.clone(),
            value,
        })
    }

    /// Build the analysis settings, parsing the optional date bounds
    pub fn analysis_config(&self) -> crate::Result<AnalysisConfig> {
        Ok(AnalysisConfig {
            granularity: self.granularity,
            cumulative_statistic: self.statistic,
            start_date: parse_bound("start", self.start.as_deref())?,
            end_date: parse_bound("end", self.end.as_deref())?,
            contribution_margin_pct: self.margin,
        })
    }
}

fn parse_bound(name: &str, value: Option<&str>) -> crate::Result<Option<NaiveDate>> {
    value
        .map(|raw| {
            parse_sale_date(0, raw).map_err(|_| anyhow::anyhow!("Invalid {} date: {}", name, raw))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Args {
        Args {
            input: "test.csv".to_string(),
            customer_column: "Cliente".to_string(),
            date_column: "Data".to_string(),
            value_column: "Valor".to_string(),
            formula: None,
            aliases: Vec::new(),
            granularity: Granularity::Month,
            statistic: Statistic::Median,
            start: None,
            end: None,
            margin: 50.0,
            output_dir: "out".to_string(),
            segment: None,
            json: false,
            verbose: false,
        }
    }

    #[test]
    fn test_column_mapping() {
        let mut args = args();

        let mapping = args.column_mapping().unwrap();
        assert_eq!(mapping.customer_id, "Cliente");
        assert!(matches!(mapping.value, ValueSource::Column(ref name) if name == "Valor"));

        args.formula = Some("Qty*Price".to_string());
        args.aliases = vec!["Qty=Qtd".to_string(), "Price = Preco".to_string()];
        let mapping = args.column_mapping().unwrap();
        match mapping.value {
            ValueSource::Formula(config) => {
                assert_eq!(config.expression, "Qty*Price");
                assert_eq!(config.aliases["Qty"], "Qtd");
                assert_eq!(config.aliases["Price"], "Preco");
            }
            other => panic!("expected a formula, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_aliases_rejects_bad_input() {
        let mut args = args();
        args.formula = Some("A".to_string());

        args.aliases = vec!["invalid".to_string()];
        assert!(args.parse_aliases().is_err());

        args.aliases = vec!["=Qtd".to_string()];
        assert!(args.parse_aliases().is_err());

        args.aliases = vec!["A=x".to_string(), "A=y".to_string()];
        assert!(args.parse_aliases().is_err());

        args.formula = None;
        args.aliases = vec!["A=x".to_string()];
        assert!(args.column_mapping().is_err());
    }

    #[test]
    fn test_analysis_config() {
        let mut args = args();
        args.start = Some("2024-01-01".to_string());
        args.end = Some("31/03/2024".to_string());
        args.granularity = Granularity::Quarter;

        let config = args.analysis_config().unwrap();
        assert_eq!(config.granularity, Granularity::Quarter);
        assert_eq!(config.start_date, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(config.end_date, NaiveDate::from_ymd_opt(2024, 3, 31));

        args.end = Some("not a date".to_string());
        assert!(args.analysis_config().is_err());
    }

    #[test]
    fn test_parse_from_command_line() {
        let args = Args::try_parse_from([
            "cohortforge",
            "--input",
            "sales.csv",
            "--granularity",
            "week",
            "--statistic",
            "mean",
            "--segment",
            "best-customers",
        ])
        .unwrap();

        assert_eq!(args.input, "sales.csv");
        assert_eq!(args.granularity, Granularity::Week);
        assert_eq!(args.statistic, Statistic::Mean);
        assert_eq!(args.segment, Some(Segment::BestCustomers));
        assert_eq!(args.value_column, "Valor da Venda");
        assert_eq!(args.margin, 50.0);
    }
}
