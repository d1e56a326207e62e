//! CohortForge: cohort and RFM analysis of customer sales data
//!
//! This is the main entrypoint that orchestrates loading, analysis and export.

use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use cohortforge::data::load_transactions;
use cohortforge::export::write_outputs;
use cohortforge::{run_analysis, AnalysisReport, Args, CohortMatrix, RfmOutcome};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "cohortforge=debug"
    } else {
        "cohortforge=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    run_pipeline(&args)
}

fn run_pipeline(args: &Args) -> Result<()> {
    println!("=== Cohort Analysis Pipeline ===\n");

    let start_time = Instant::now();
    let mapping = args.column_mapping()?;
    let config = args.analysis_config()?;

    // Step 1: Load and clean transactions
    if args.verbose {
        println!("Step 1: Loading transactions");
        println!("  Input file: {}", args.input);
    }

    let data_start = Instant::now();
    let cleaned = load_transactions(&args.input, &mapping)?;
    let data_time = data_start.elapsed();

    let report = &cleaned.report;
    println!(
        "✓ Data loaded: {} of {} rows kept",
        cleaned.transactions.len(),
        report.rows_read
    );
    if report.dropped_dates > 0 || report.dropped_values > 0 {
        println!(
            "  Dropped: {} unparseable dates, {} unparseable values",
            report.dropped_dates, report.dropped_values
        );
    }
    if args.verbose {
        println!("  Rows without customer id: {}", report.rows_without_customer);
        println!("  Processing time: {:.2}s", data_time.as_secs_f64());
    }

    // Step 2: Run the analysis
    if args.verbose {
        println!("\nStep 2: Running analysis");
        println!("  Granularity: {}", config.granularity);
        println!("  Cumulative statistic: {}", config.cumulative_statistic.as_str());
    }

    let analysis_start = Instant::now();
    let analysis = run_analysis(&cleaned.transactions, &config)?;
    let analysis_time = analysis_start.elapsed();

    println!("✓ Analysis complete");
    if args.verbose {
        println!("  Analysis time: {:.2}s", analysis_time.as_secs_f64());
    }

    print_summary(&analysis);
    print_matrix("Retention", &analysis.retention, true);
    print_matrix("Cumulative Revenue", &analysis.cumulative_revenue, false);
    print_segments(&analysis);

    // Step 3: Export
    if args.verbose {
        println!("\nStep 3: Writing outputs");
        println!("  Output directory: {}", args.output_dir);
    }

    let written = write_outputs(&analysis, Path::new(&args.output_dir), args.segment, args.json)?;

    let total_time = start_time.elapsed();
    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", total_time.as_secs_f64());
    for path in written {
        println!("Saved: {}", path.display());
    }

    Ok(())
}

fn print_summary(analysis: &AnalysisReport) {
    let summary = &analysis.summary;
    println!("\n=== Sales Summary ===");
    println!("Total revenue: {:.2}", summary.total_revenue);
    println!("Total sales: {}", summary.total_sales);
    println!("Unique customers: {}", summary.unique_customers);
    println!("Average ticket: {:.2}", summary.average_ticket);
    println!(
        "Revenue per customer: mean {:.2}, median {:.2}",
        summary.mean_revenue_per_customer, summary.median_revenue_per_customer
    );
    println!(
        "Transactions per customer: mean {:.2}, median {:.2}",
        summary.mean_transactions_per_customer, summary.median_transactions_per_customer
    );
    if summary.sales_without_customer > 0 {
        println!(
            "Sales without customer id: {} ({:.2})",
            summary.sales_without_customer, summary.revenue_without_customer
        );
    }
    println!(
        "LTV at {:.0}% margin: mean {:.2}, median {:.2}",
        analysis.ltv.margin_pct, analysis.ltv.mean, analysis.ltv.median
    );
}

fn print_matrix(title: &str, matrix: &CohortMatrix, as_percent: bool) {
    println!("\n=== {} ===", title);
    for (label, row) in matrix.labels().iter().zip(matrix.values().rows()) {
        let cells: Vec<String> = row
            .iter()
            .map(|&v| {
                if as_percent {
                    format!("{:>6.1}%", v * 100.0)
                } else {
                    format!("{:>10.2}", v)
                }
            })
            .collect();
        println!("{:>8} {}", label, cells.join(" "));
    }
}

fn print_segments(analysis: &AnalysisReport) {
    println!("\n=== RFM Segments ===");
    match &analysis.rfm {
        RfmOutcome::Segmented { records, segments } => {
            for summary in segments {
                let percentage = summary.customers as f64 / records.len() as f64 * 100.0;
                println!(
                    "{}: {} customers ({:.1}%), monetary {:.2}",
                    summary.segment, summary.customers, percentage, summary.total_monetary
                );
            }
        }
        RfmOutcome::Unavailable { reason } => println!("Unavailable: {}", reason),
    }
}
