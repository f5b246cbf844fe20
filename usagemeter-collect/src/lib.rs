//! Library module for usagemeter-collect
//!
//! Exposes the command-line definition and the mapping from parsed
//! arguments to core configuration, so both can be tested without
//! running an export. The command implementations live in main.rs.

use clap::{Args, Parser, Subcommand};
use std::convert::Infallible;
use std::fmt::Write as _;
use std::path::PathBuf;
use usagemeter_core::config::{DEFAULT_OUTPUT_STEM, DatabaseEnvironment};
use usagemeter_core::{AdminConfig, ClientConfig, ColumnMap, ExportConfig, MeteringError, Result};
use zeroize::Zeroizing;

/// Parses a secret argument straight into a zeroizing container.
#[allow(clippy::unnecessary_wraps)]
fn parse_secret(value: &str) -> std::result::Result<Zeroizing<String>, Infallible> {
    Ok(Zeroizing::new(value.to_string()))
}

/// CLI argument structure
#[derive(Parser)]
#[command(name = "usagemeter-collect")]
#[command(about = "Anonymized end-user usage metrics exporter")]
#[command(version)]
#[command(long_about = "
Usage Metrics Collector - anonymized end-user metrics export

Counts the application's users, discovers which specialization tables carry
an email address, pages through the user table with psql and writes one
JSON file of anonymized records.

PRIVACY:
- User names and email addresses never leave the database unhashed
- Email domains are exported only as salted SHA-256 digests
- Credentials are never logged

EXAMPLES:
  usagemeter-collect
  usagemeter-collect --page-size 500 --output-dir /var/metrics export
  usagemeter-collect probe
  usagemeter-collect show-query --offset 1000 --page-size 500
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub export: ExportArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available commands; `export` runs when none is given
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Export anonymized usage metrics to a JSON file
    Export,
    /// Discover specialization tables and their email columns
    Probe,
    /// Print the usage query for one page without running it
    ShowQuery(ShowQueryArgs),
}

/// Arguments of `show-query`
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ShowQueryArgs {
    /// Row offset of the page
    #[arg(long, default_value_t = 0, help = "Row offset of the page to render")]
    pub offset: u64,
}

/// Flags accepted by every command
#[derive(Args)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Suppress all output except errors")]
    pub quiet: bool,
}

/// Database client and admin API settings
#[derive(Args)]
pub struct ConnectionArgs {
    /// Database connection URL
    #[arg(
        long,
        global = true,
        env = "DATABASE_URL",
        hide_env_values = true,
        value_parser = parse_secret,
        help = "postgres:// URL whose parts are passed to psql as PG* variables"
    )]
    pub database_url: Option<Zeroizing<String>>,

    /// psql executable
    #[arg(
        long,
        global = true,
        env = "PSQL_BINARY",
        default_value = "psql",
        help = "Path to the psql client"
    )]
    pub psql: PathBuf,

    /// Admin API host
    #[arg(
        long,
        global = true,
        env = "M2EE_ADMIN_HOST",
        default_value = "127.0.0.1",
        help = "Host of the application's admin API"
    )]
    pub admin_host: String,

    /// Admin API port
    #[arg(
        long,
        global = true,
        env = "M2EE_ADMIN_PORT",
        default_value_t = 9000,
        help = "Port of the application's admin API"
    )]
    pub admin_port: u16,

    /// Admin API password
    #[arg(
        long,
        global = true,
        env = "M2EE_ADMIN_PASS",
        hide_env_values = true,
        value_parser = parse_secret,
        help = "Password of the application's admin API"
    )]
    pub admin_pass: Option<Zeroizing<String>>,
}

/// Paging and output settings
#[derive(Args)]
pub struct ExportArgs {
    /// Rows per page
    #[arg(
        long,
        global = true,
        env = "USAGE_METRICS_PAGE_SIZE",
        default_value_t = 0,
        help = "Rows per usage query; 0 fetches all rows at once"
    )]
    pub page_size: u64,

    /// Output directory
    #[arg(
        long,
        global = true,
        env = "USAGE_METRICS_OUTPUT_DIR",
        default_value = ".",
        help = "Directory the JSON file is written to"
    )]
    pub output_dir: PathBuf,

    /// Output file-name stem
    #[arg(
        long,
        global = true,
        env = "USAGE_METRICS_OUTPUT_STEM",
        default_value = DEFAULT_OUTPUT_STEM,
        help = "File-name stem; the run timestamp and .json are appended"
    )]
    pub output_stem: String,
}

impl Cli {
    /// The command to run, defaulting to `export`.
    pub fn selected_command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Export)
    }

    /// Connection parameters for the `psql` executor.
    ///
    /// Without `--database-url`, psql falls back to the PG* variables and
    /// defaults of the surrounding environment.
    ///
    /// # Errors
    /// Returns a configuration error for an unparsable database URL.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let database = match &self.connection.database_url {
            Some(url) => DatabaseEnvironment::from_url(url.as_str())?,
            None => DatabaseEnvironment::new(),
        };
        let config = ClientConfig::new(&self.connection.psql).with_database(database);
        config.validate()?;
        Ok(config)
    }

    /// Settings for the admin API client.
    ///
    /// # Errors
    /// Returns a configuration error when no admin password was supplied.
    pub fn admin_config(&self) -> Result<AdminConfig> {
        let password = self.connection.admin_pass.as_ref().ok_or_else(|| {
            MeteringError::configuration(
                "Admin API password required. Set M2EE_ADMIN_PASS or use --admin-pass.",
            )
        })?;
        let config = AdminConfig::new(password.as_str())
            .with_host(&self.connection.admin_host)
            .with_port(self.connection.admin_port);
        config.validate()?;
        Ok(config)
    }

    /// Paging and output settings for an export run.
    ///
    /// # Errors
    /// Returns a configuration error for an unusable output stem.
    pub fn export_config(&self) -> Result<ExportConfig> {
        let config = ExportConfig::new()
            .with_page_size(self.export.page_size)
            .with_output_dir(&self.export.output_dir)
            .with_output_stem(&self.export.output_stem);
        config.validate()?;
        Ok(config)
    }
}

/// Renders a discovered column map, one `table -> column` per line.
pub fn describe_columns(columns: &ColumnMap) -> String {
    if columns.is_empty() {
        return "No email columns discovered\n".to_string();
    }
    let mut out = String::new();
    for (table, column) in columns {
        let _ = writeln!(out, "{} -> {}", table, column);
    }
    out
}
