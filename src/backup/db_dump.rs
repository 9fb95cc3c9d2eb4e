// s3-db-backup/src/backup/db_dump.rs
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::RegexSet;
use sqlx::{Connection, PgConnection};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::target::PgTarget;
use crate::errors::{AppError, Result};
use crate::utils::find_executable;

const LIST_DATABASES_QUERY: &str =
    "SELECT datname FROM pg_database WHERE datistemplate = false AND datallowconn = true ORDER BY datname;";

const TERMINATE_SESSIONS_QUERY: &str = "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
     WHERE usename = current_user AND pid <> pg_backend_pid()";

/// stderr lines from psql that say nothing about why a command failed.
const NOISE_PATTERNS: [&str; 4] = [
    r"^could not change directory to ",
    r"(?i)^WARNING:\s+database .* has a collation version mismatch",
    r"^DETAIL:\s+The database was created using collation version",
    r"^HINT:\s+Rebuild all objects in this database",
];

static NOISE: LazyLock<Option<RegexSet>> = LazyLock::new(|| RegexSet::new(NOISE_PATTERNS).ok());

/// Database-side operations the backup needs from a server.
#[async_trait]
pub trait DatabaseTools: Send + Sync {
    /// Non-template databases on the server, in name order.
    async fn list_databases(&self, target: &PgTarget) -> Result<Vec<String>>;

    /// Writes a dump of `database` to `output`.
    async fn dump_database(&self, target: &PgTarget, database: &str, output: &Path) -> Result<()>;

    /// Terminates the backup user's other sessions; returns how many were ended.
    async fn terminate_sessions(&self, target: &PgTarget) -> Result<u64>;
}

/// [`DatabaseTools`] backed by the PostgreSQL client binaries.
#[derive(Debug, Clone)]
pub struct PgTools {
    psql: PathBuf,
    pg_dump: PathBuf,
}

impl PgTools {
    pub fn locate() -> Result<Self> {
        let psql = find_executable("psql")?;
        let pg_dump = find_executable("pg_dump")?;
        debug!(psql = %psql.display(), pg_dump = %pg_dump.display(), "Found PostgreSQL client tools");
        Ok(PgTools { psql, pg_dump })
    }

    fn command(program: &Path, target: &PgTarget) -> Command {
        let mut command = Command::new(program);
        command
            .arg("-h")
            .arg(&target.host)
            .arg("-p")
            .arg(target.port.to_string())
            .arg("-U")
            .arg(&target.user)
            // never prompt; a missing password must fail instead of hanging
            .arg("-w");
        // Only the child sees the password; the process environment is untouched.
        if let Some(password) = &target.password {
            command.env("PGPASSWORD", password);
        }
        command
    }
}

#[async_trait]
impl DatabaseTools for PgTools {
    async fn list_databases(&self, target: &PgTarget) -> Result<Vec<String>> {
        let output = Self::command(&self.psql, target)
            .arg("-d")
            .arg(target.maintenance_database())
            .arg("-At")
            .arg("-c")
            .arg(LIST_DATABASES_QUERY)
            .output()
            .await
            .map_err(|e| AppError::ListFailure {
                host: target.host.clone(),
                message: format!("failed to run psql: {}", e),
            })?;

        if !output.status.success() {
            return Err(AppError::ListFailure {
                host: target.host.clone(),
                message: failure_message(&output),
            });
        }

        let databases = parse_database_list(&String::from_utf8_lossy(&output.stdout));
        debug!(host = %target.host, count = databases.len(), "Listed databases");
        Ok(databases)
    }

    async fn dump_database(&self, target: &PgTarget, database: &str, output: &Path) -> Result<()> {
        let result = Self::command(&self.pg_dump, target)
            .arg("-F")
            .arg("c")
            .arg("-f")
            .arg(output)
            .arg(database)
            .output()
            .await
            .map_err(|e| AppError::DumpFailure {
                database: database.to_string(),
                message: format!("failed to run pg_dump: {}", e),
            })?;

        if !result.status.success() {
            return Err(AppError::DumpFailure {
                database: database.to_string(),
                message: failure_message(&result),
            });
        }
        Ok(())
    }

    async fn terminate_sessions(&self, target: &PgTarget) -> Result<u64> {
        let mut conn = PgConnection::connect(&target.maintenance_url()).await?;
        let terminated = sqlx::query_scalar::<_, bool>(TERMINATE_SESSIONS_QUERY)
            .fetch_all(&mut conn)
            .await?;
        conn.close().await?;

        let count = terminated.into_iter().filter(|ended| *ended).count() as u64;
        info!(host = %target.host, user = %target.user, count, "Terminated other sessions");
        Ok(count)
    }
}

fn parse_database_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Removes known psql noise from stderr, keeping every line that might explain a failure.
pub fn filter_diagnostic_noise(stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !NOISE.as_ref().is_some_and(|set| set.is_match(line.trim_start())))
        .collect::<Vec<_>>()
        .join("\n")
}

fn failure_message(output: &Output) -> String {
    let filtered = filter_diagnostic_noise(&String::from_utf8_lossy(&output.stderr));
    if filtered.is_empty() {
        format!("exited with {}", output.status)
    } else {
        filtered
    }
}
