//! Anonymized usage metrics export tool.
//!
//! This binary counts the application's end users, discovers where their
//! email addresses live, pages through the user table with `psql` and
//! writes one JSON file of anonymized records.
//!
//! # Security Guarantees
//! - Read-only database operations only
//! - No credentials stored or logged
//! - No raw user names or email addresses in the output

use clap::Parser;
use tracing::{error, info};
use usagemeter_core::{
    Anonymizer, HttpAdminClient, PsqlExecutor, Result, SchemaProber, UsageExporter,
    build_usage_query, init_logging,
};
use usagemeter_collect::{Cli, Command, describe_columns};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.global.verbose, cli.global.quiet)?;

    match cli.selected_command() {
        Command::Export => export_metrics(&cli).await,
        Command::Probe => probe_schema(&cli).await,
        Command::ShowQuery(args) => show_query(&cli, args.offset).await,
    }
}

/// Creates the `psql` executor from the command line.
fn create_executor(cli: &Cli) -> Result<PsqlExecutor> {
    let config = cli.client_config()?;
    info!("Target: {}", config.database);
    PsqlExecutor::new(config)
}

/// Runs a full export and reports where the file went
async fn export_metrics(cli: &Cli) -> Result<()> {
    info!("Starting usage metrics export...");

    let executor = create_executor(cli)?;
    let admin = HttpAdminClient::new(cli.admin_config()?)?;
    let export_config = cli.export_config()?;
    let anonymizer = Anonymizer::default();

    let exporter = UsageExporter::new(&executor, &admin, &export_config, &anonymizer)?;
    let summary = exporter.export().await.map_err(|e| {
        error!("Usage metrics export failed: {}", e);
        e
    })?;

    info!("✓ Usage metrics export completed");
    println!("Usage metrics export completed successfully");
    println!("Output: {}", summary.path.display());
    println!("Records: {}", summary.records);
    println!("Pages: {}", summary.pages);

    Ok(())
}

/// Runs schema discovery only and prints the result
async fn probe_schema(cli: &Cli) -> Result<()> {
    info!("Probing user specializations...");

    let executor = create_executor(cli)?;
    let prober = SchemaProber::new(&executor);

    let tables = prober.discover_specialization_tables().await.map_err(|e| {
        error!("Specialization discovery failed: {}", e);
        e
    })?;
    info!("Found {} specialization tables", tables.len());

    let columns = prober.guess_email_columns(&tables).await?;
    println!("Specialization tables: {}", tables.len());
    print!("{}", describe_columns(&columns));

    Ok(())
}

/// Prints the usage query one page of an export would run
async fn show_query(cli: &Cli, offset: u64) -> Result<()> {
    let executor = create_executor(cli)?;
    let columns = SchemaProber::new(&executor)
        .discover_email_columns()
        .await?;

    let query = build_usage_query(&columns, cli.export.page_size, offset)?;
    println!("{}", query);

    Ok(())
}
