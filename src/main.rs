//! PostgreSQL to S3 Backup Tool
//!
//! Dumps every database on each configured server and uploads the archives to
//! S3-compatible storage, pruning old backups when retention is set.

// s3-db-backup/src/main.rs
mod backup;
mod config;
mod errors;
mod logging;
mod utils;

use anyhow::{Context, Result};
use backup::RunReport;
use backup::db_dump::PgTools;
use backup::s3_storage::S3StoreFactory;
use config::{AppConfig, LogConfig};
use std::process::ExitCode;

/// Main entry point for the backup tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    if let Err(e) = logging::init(&LogConfig::from_env()) {
        eprintln!("❌ Error: {:?}", e);
        return ExitCode::FAILURE;
    }

    match run_app().await {
        Ok(report) if !report.has_failures() => {
            println!(
                "✅ Backup completed successfully ({} databases uploaded).",
                report.uploaded_count()
            );
            ExitCode::SUCCESS
        }
        Ok(report) => {
            eprintln!(
                "❌ Backup finished with failures ({} databases uploaded). See the log for details.",
                report.uploaded_count()
            );
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<RunReport> {
    let app_config = AppConfig::from_env().context("Failed to load configuration from the environment")?;
    let tools = PgTools::locate().context("PostgreSQL client tools are required")?;

    println!(
        "🚀 Starting backup of {} connection(s)...",
        app_config.connections.len()
    );
    Ok(backup::run_backup_flow(&app_config, &tools, &S3StoreFactory).await)
}
