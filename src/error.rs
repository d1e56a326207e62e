//! Error types shared by the analytical core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("Could not parse date '{value}' in row {row}")]
    DateParse { row: usize, value: String },

    #[error("Empty dataset: {context}")]
    EmptyDataset { context: &'static str },

    #[error("Formula syntax error in '{expression}': {reason}")]
    FormulaSyntax { expression: String, reason: String },

    #[error("Formula evaluation error in '{expression}': {reason}")]
    FormulaEvaluation { expression: String, reason: String },

    #[error(
        "Cannot form {required} quantile groups for {dimension}: only {distinct} distinct value(s) across {customers} customer(s)"
    )]
    InsufficientQuantileGroups {
        dimension: &'static str,
        distinct: usize,
        customers: usize,
        required: usize,
    },

    #[error("Period {later} is before cohort start {earlier}")]
    PeriodOrder { earlier: String, later: String },

    #[error("Cannot compare a {left} bucket with a {right} bucket")]
    GranularityMismatch {
        left: &'static str,
        right: &'static str,
    },

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;
