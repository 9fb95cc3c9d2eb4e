// s3-db-backup/src/backup/logic.rs
use chrono::{DateTime, NaiveDateTime, Utc};
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

use super::archive::Archiver;
use super::db_dump::DatabaseTools;
use super::object_key::BackupArtifactKey;
use super::retention::plan_for_keys;
use super::s3_storage::{ObjectStore, StoreFactory};
use crate::config::AppConfig;
use crate::config::descriptor::ConnectionDescriptor;
use crate::config::resolve::{ResolvedSettings, SettingsLayer, resolve_settings};
use crate::config::target::PgTarget;
use crate::errors::{AppError, Result};
use crate::utils::local_file_stem;

pub type Clock = fn() -> DateTime<Utc>;

/// One archive stored during this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedBackup {
    pub database: String,
    pub bucket: String,
    pub key: String,
    pub listing_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDatabase {
    pub database: String,
    pub reason: String,
}

/// What happened on one connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionReport {
    pub host: String,
    pub uploaded: Vec<UploadedBackup>,
    pub failed: Vec<FailedDatabase>,
    pub deleted: usize,
    /// Set when the connection was abandoned part way.
    pub error: Option<String>,
    pub retention_error: Option<String>,
}

impl ConnectionReport {
    fn new(host: &str) -> Self {
        ConnectionReport {
            host: host.to_string(),
            ..Default::default()
        }
    }

    pub fn has_failures(&self) -> bool {
        self.error.is_some() || self.retention_error.is_some() || !self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub connections: Vec<ConnectionReport>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.connections.iter().any(ConnectionReport::has_failures)
    }

    pub fn uploaded_count(&self) -> usize {
        self.connections.iter().map(|c| c.uploaded.len()).sum()
    }

    pub fn log_summary(&self) {
        for connection in &self.connections {
            info!(
                host = %connection.host,
                uploaded = connection.uploaded.len(),
                failed = connection.failed.len(),
                deleted = connection.deleted,
                "Connection summary"
            );
            for failure in &connection.failed {
                warn!(host = %connection.host, database = %failure.database, reason = %failure.reason, "Database not backed up");
            }
            if let Some(reason) = &connection.error {
                error!(host = %connection.host, %reason, "Connection aborted");
            }
            if let Some(reason) = &connection.retention_error {
                error!(host = %connection.host, %reason, "Retention abandoned");
            }
        }
    }
}

/// Walks every configured connection in order, one database at a time.
pub struct BackupRunner<'a> {
    config: &'a AppConfig,
    tools: &'a dyn DatabaseTools,
    stores: &'a dyn StoreFactory,
    archiver: Archiver,
    clock: Clock,
}

impl<'a> BackupRunner<'a> {
    pub fn new(config: &'a AppConfig, tools: &'a dyn DatabaseTools, stores: &'a dyn StoreFactory) -> Self {
        BackupRunner {
            config,
            tools,
            stores,
            archiver: Archiver::new(config.archive_format, config.archive_password.clone()),
            clock: Utc::now,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub async fn run(&self) -> RunReport {
        let mut report = RunReport::default();

        for descriptor in &self.config.connections {
            let connection = match descriptor.target() {
                Ok(target) => self.run_connection(descriptor, &target).await,
                Err(e) => {
                    error!(error = %e, "Skipping connection with an unusable URL");
                    ConnectionReport {
                        error: Some(e.to_string()),
                        ..Default::default()
                    }
                }
            };
            report.connections.push(connection);
        }

        report
    }

    async fn run_connection(&self, descriptor: &ConnectionDescriptor, target: &PgTarget) -> ConnectionReport {
        let mut report = ConnectionReport::new(&target.host);
        info!(host = %target.host, port = target.port, "Starting connection backup");

        if let Err(e) = self.backup_connection(descriptor, target, &mut report).await {
            error!(host = %target.host, error = %e, "Connection backup aborted");
            report.error = Some(e.to_string());
        }
        report
    }

    async fn backup_connection(
        &self,
        descriptor: &ConnectionDescriptor,
        target: &PgTarget,
        report: &mut ConnectionReport,
    ) -> Result<()> {
        // Databases carry no settings of their own; per-database buckets come through db_buckets.
        let settings = resolve_settings(
            &target.host,
            &SettingsLayer::default(),
            &descriptor.settings_layer(),
            &self.config.global,
        )?;
        let store = self.stores.connect(&settings).await?;

        if settings.force_terminate {
            if let Err(e) = self.tools.terminate_sessions(target).await {
                warn!(host = %target.host, error = %e, "Could not terminate other sessions, continuing");
            }
        }

        let databases = self.tools.list_databases(target).await?;
        let databases: Vec<String> = databases
            .into_iter()
            .filter(|db| !self.config.ignored_databases.contains(db))
            .collect();
        info!(host = %target.host, count = databases.len(), "Databases selected for backup");

        for database in &databases {
            let Some(bucket) = settings.bucket_for(database) else {
                warn!(host = %target.host, database = %database, "No bucket configured, skipping");
                report.failed.push(FailedDatabase {
                    database: database.clone(),
                    reason: "no bucket configured".to_string(),
                });
                continue;
            };

            match self
                .backup_database(target, &settings, store.as_ref(), database, bucket)
                .await
            {
                Ok(uploaded) => report.uploaded.push(uploaded),
                Err(e @ AppError::DumpFailure { .. }) => return Err(e),
                Err(e) => {
                    error!(host = %target.host, database = %database, error = %e, "Backup failed");
                    report.failed.push(FailedDatabase {
                        database: database.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Some(days) = settings.retention_days {
            let (deleted, retention_error) = self
                .apply_retention(&target.host, store.as_ref(), days, &report.uploaded)
                .await;
            report.deleted = deleted;
            report.retention_error = retention_error;
        }
        Ok(())
    }

    async fn backup_database(
        &self,
        target: &PgTarget,
        settings: &ResolvedSettings,
        store: &dyn ObjectStore,
        database: &str,
        bucket: &str,
    ) -> Result<UploadedBackup> {
        // Dropped on every return path, taking the dump and archive with it.
        let workdir = TempDir::new()?;
        let stem = local_file_stem(database);
        let dump_path = workdir.path().join(format!("{}.pgdump", stem));

        info!(host = %target.host, database, "Dumping database");
        self.tools.dump_database(target, database, &dump_path).await?;

        let archive_path = self.archiver.archive(
            &dump_path,
            workdir.path(),
            &stem,
            &format!("{}.dump", database),
        )?;

        let key = BackupArtifactKey::new(
            &target.host,
            database,
            settings.prefix.as_deref(),
            self.local_now(),
            self.archiver.extension(),
        );
        let object_key = key.encode();
        store.upload(bucket, &object_key, &archive_path).await?;
        info!(host = %target.host, database, bucket, key = %object_key, "Backup uploaded");

        Ok(UploadedBackup {
            database: database.to_string(),
            bucket: bucket.to_string(),
            key: object_key,
            listing_prefix: key.listing_prefix(),
        })
    }

    /// Returns the number of deleted objects and the listing error that stopped
    /// retention, if any.
    async fn apply_retention(
        &self,
        host: &str,
        store: &dyn ObjectStore,
        retention_days: u32,
        uploaded: &[UploadedBackup],
    ) -> (usize, Option<String>) {
        let today = self.local_now().date();
        let mut deleted = 0;

        for backup in uploaded {
            let keys = match store.list(&backup.bucket, &backup.listing_prefix).await {
                Ok(keys) => keys,
                Err(e) => {
                    error!(
                        host,
                        database = %backup.database,
                        bucket = %backup.bucket,
                        prefix = %backup.listing_prefix,
                        error = %e,
                        "Retention abandoned"
                    );
                    return (deleted, Some(e.to_string()));
                }
            };

            let plan = plan_for_keys(retention_days, today, &keys);
            debug!(
                bucket = %backup.bucket,
                prefix = %backup.listing_prefix,
                kept = plan.survivors().len(),
                unmanaged = plan.unmanaged.len(),
                "Retention planned"
            );
            for key in plan.deletions() {
                match store.delete(&backup.bucket, key).await {
                    Ok(()) => {
                        deleted += 1;
                        info!(host, database = %backup.database, bucket = %backup.bucket, key, "Expired backup deleted");
                    }
                    Err(e) => warn!(
                        host,
                        database = %backup.database,
                        bucket = %backup.bucket,
                        key,
                        error = %e,
                        "Could not delete backup"
                    ),
                }
            }
        }

        (deleted, None)
    }

    fn local_now(&self) -> NaiveDateTime {
        (self.clock)().with_timezone(&self.config.timezone).naive_local()
    }
}
