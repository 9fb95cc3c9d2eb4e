mod logic;
pub(crate) mod archive;
pub(crate) mod db_dump;
pub(crate) mod object_key;
pub(crate) mod retention;
pub(crate) mod s3_storage;

use crate::config::AppConfig;
use db_dump::DatabaseTools;
use s3_storage::StoreFactory;

pub use logic::RunReport;

/// Public entry point for the backup process.
/// Backs up every configured connection in order and reports what happened.
pub async fn run_backup_flow(
    app_config: &AppConfig,
    tools: &dyn DatabaseTools,
    stores: &dyn StoreFactory,
) -> RunReport {
    let report = logic::BackupRunner::new(app_config, tools, stores).run().await;
    report.log_summary();
    report
}
