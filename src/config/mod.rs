// s3-db-backup/src/config/mod.rs
pub mod descriptor;
pub mod resolve;
pub mod target;

use std::env;
use std::path::PathBuf;

use chrono_tz::Tz;
use tracing::warn;

use crate::errors::{AppError, Result};
use descriptor::{ConnectionDescriptor, DEFAULT_DELIMITER, split_connection_list};
use resolve::SettingsLayer;

/// Zone used for object key timestamps when `BACKUP_TIMEZONE` is not set.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::Sao_Paulo;

/// How a dump is packaged before upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Gzip,
    None,
}

impl ArchiveFormat {
    /// Extension used in the object key, without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Gzip => "dump.gz",
            ArchiveFormat::None => "dump",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "" | "zip" => Ok(ArchiveFormat::Zip),
            "gzip" | "gz" => Ok(ArchiveFormat::Gzip),
            "none" | "raw" => Ok(ArchiveFormat::None),
            other => Err(AppError::Config(format!(
                "ARCHIVE_FORMAT must be one of zip, gzip or none (got '{}')",
                other
            ))),
        }
    }
}

/// Global configuration, read once from the environment at startup.
#[derive(Clone)]
pub struct AppConfig {
    pub connections: Vec<ConnectionDescriptor>,
    pub global: SettingsLayer,
    pub ignored_databases: Vec<String>,
    pub timezone: Tz,
    pub archive_format: ArchiveFormat,
    pub archive_password: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let raw_connections = get("PG_URLS").ok_or_else(|| {
            AppError::Config(
                "PG_URLS must be set to one or more comma-separated Postgres connections"
                    .to_string(),
            )
        })?;

        let delimiter = match get("DESCRIPTOR_DELIMITER") {
            Some(raw) => {
                let mut chars = raw.trim().chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => c,
                    _ => {
                        return Err(AppError::Config(format!(
                            "DESCRIPTOR_DELIMITER must be a single character (got '{}')",
                            raw
                        )));
                    }
                }
            }
            None => DEFAULT_DELIMITER,
        };

        let connections = split_connection_list(&raw_connections)?
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                ConnectionDescriptor::parse(entry, delimiter).map_err(|e| match e {
                    AppError::MalformedConnection(message) => {
                        AppError::MalformedConnection(format!("entry {}: {}", index + 1, message))
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if connections.is_empty() {
            return Err(AppError::Config(
                "PG_URLS does not contain any connection".to_string(),
            ));
        }

        let global = SettingsLayer {
            endpoint: get("S3_ENDPOINT"),
            access: get("S3_ACCESS_KEY"),
            secret: get("S3_SECRET_KEY"),
            region: get("S3_REGION").or_else(|| get("AWS_REGION")),
            force_path_style: get("S3_FORCE_PATH_STYLE"),
            bucket: get("S3_BUCKET"),
            db_buckets: get("S3_DB_BUCKETS"),
            prefix: get("GLOBAL_PREFIX"),
            retention: get("RETENTION_DAYS"),
            force_terminate: get("FORCE_TERMINATE"),
        };

        let ignored_databases = get("IGNORE_DATABASES")
            .map(|raw| parse_name_list(&raw))
            .unwrap_or_default();

        let timezone = match get("BACKUP_TIMEZONE") {
            Some(name) => parse_timezone(&name),
            None => DEFAULT_TIMEZONE,
        };

        let archive_format = ArchiveFormat::parse(&get("ARCHIVE_FORMAT").unwrap_or_default())?;
        let archive_password = get("ARCHIVE_PASSWORD");
        if archive_password.is_some() && archive_format != ArchiveFormat::Zip {
            return Err(AppError::Config(
                "ARCHIVE_PASSWORD requires ARCHIVE_FORMAT=zip".to_string(),
            ));
        }

        Ok(AppConfig {
            connections,
            global,
            ignored_databases,
            timezone,
            archive_format,
            archive_password,
        })
    }
}

/// Parses an IANA zone name, falling back to UTC rather than the host's local time.
pub fn parse_timezone(name: &str) -> Tz {
    name.trim().parse::<Tz>().unwrap_or_else(|_| {
        warn!(timezone = %name, "Unknown time zone, falling back to UTC");
        Tz::UTC
    })
}

fn parse_name_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Where log output goes. Read separately so logging is up before the rest of
/// the configuration is validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        LogConfig {
            level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            file: get("LOG_FILE").map(PathBuf::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_load_minimal_config() -> anyhow::Result<()> {
        let config = AppConfig::from_lookup(lookup(&[(
            "PG_URLS",
            "postgres://u:p@h1/db,postgresql://u:p@h2/db",
        )]))?;

        assert_eq!(config.connections.len(), 2);
        assert_eq!(config.timezone, DEFAULT_TIMEZONE);
        assert_eq!(config.archive_format, ArchiveFormat::Zip);
        assert!(config.archive_password.is_none());
        assert!(config.ignored_databases.is_empty());
        assert_eq!(config.global, SettingsLayer::default());
        Ok(())
    }

    #[test]
    fn test_load_global_layer() -> anyhow::Result<()> {
        let config = AppConfig::from_lookup(lookup(&[
            ("PG_URLS", "postgres://u:p@h1/db"),
            ("S3_ENDPOINT", "https://s3.example.com"),
            ("S3_ACCESS_KEY", "AK"),
            ("S3_SECRET_KEY", "SK"),
            ("AWS_REGION", "eu-west-1"),
            ("S3_FORCE_PATH_STYLE", "true"),
            ("S3_BUCKET", "backups"),
            ("GLOBAL_PREFIX", "nightly"),
            ("RETENTION_DAYS", "7"),
            ("IGNORE_DATABASES", "postgres, rdsadmin ,,"),
            ("BACKUP_TIMEZONE", "Europe/Lisbon"),
            ("ARCHIVE_FORMAT", "gzip"),
        ]))?;

        assert_eq!(config.global.endpoint.as_deref(), Some("https://s3.example.com"));
        assert_eq!(config.global.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.global.retention.as_deref(), Some("7"));
        assert_eq!(config.ignored_databases, vec!["postgres", "rdsadmin"]);
        assert_eq!(config.timezone, chrono_tz::Europe::Lisbon);
        assert_eq!(config.archive_format, ArchiveFormat::Gzip);
        Ok(())
    }

    #[test]
    fn test_s3_region_preferred_over_aws_region() -> anyhow::Result<()> {
        let config = AppConfig::from_lookup(lookup(&[
            ("PG_URLS", "postgres://u:p@h1/db"),
            ("S3_REGION", "sa-east-1"),
            ("AWS_REGION", "eu-west-1"),
        ]))?;
        assert_eq!(config.global.region.as_deref(), Some("sa-east-1"));
        Ok(())
    }

    #[test]
    fn test_missing_connection_list() {
        let result = AppConfig::from_lookup(lookup(&[("PG_URLS", "  ")]));
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_malformed_entry_is_reported_with_position() {
        let result = AppConfig::from_lookup(lookup(&[(
            "PG_URLS",
            "postgres://u:p@h1/db,mysql://u:p@h2/db",
        )]));
        match result {
            Err(AppError::MalformedConnection(message)) => assert!(message.contains("entry 2")),
            _ => panic!("expected MalformedConnection"),
        }
    }

    #[test]
    fn test_leading_typo_fails_the_whole_load() {
        for raw in [
            "postgress://u:p@h1/db,postgres://u:p@h2/db",
            "mysql://u:p@h1/db,postgres://u:p@h2/db",
        ] {
            let result = AppConfig::from_lookup(lookup(&[("PG_URLS", raw)]));
            assert!(matches!(result, Err(AppError::MalformedConnection(_))));
        }
    }

    #[test]
    fn test_custom_delimiter() -> anyhow::Result<()> {
        let config = AppConfig::from_lookup(lookup(&[
            ("PG_URLS", "nightly|backups|postgres://u:p@h1/db"),
            ("DESCRIPTOR_DELIMITER", "|"),
        ]))?;
        assert_eq!(config.connections[0].get("bucket"), Some("backups"));

        let result = AppConfig::from_lookup(lookup(&[
            ("PG_URLS", "postgres://u:p@h1/db"),
            ("DESCRIPTOR_DELIMITER", "||"),
        ]));
        assert!(matches!(result, Err(AppError::Config(_))));
        Ok(())
    }

    #[test]
    fn test_unknown_timezone_falls_back_to_utc() {
        assert_eq!(parse_timezone("Mars/Olympus_Mons"), Tz::UTC);
        assert_eq!(parse_timezone("America/Sao_Paulo"), DEFAULT_TIMEZONE);
    }

    #[test]
    fn test_archive_password_requires_zip() {
        let result = AppConfig::from_lookup(lookup(&[
            ("PG_URLS", "postgres://u:p@h1/db"),
            ("ARCHIVE_FORMAT", "none"),
            ("ARCHIVE_PASSWORD", "pw"),
        ]));
        assert!(matches!(result, Err(AppError::Config(_))));

        let result = AppConfig::from_lookup(lookup(&[
            ("PG_URLS", "postgres://u:p@h1/db"),
            ("ARCHIVE_FORMAT", "tar"),
        ]));
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::from_lookup(lookup(&[]));
        assert_eq!(config.level, "info");
        assert_eq!(config.file, None);

        let config = LogConfig::from_lookup(lookup(&[("LOG_LEVEL", "debug"), ("LOG_FILE", "/tmp/b.log")]));
        assert_eq!(config.level, "debug");
        assert_eq!(config.file, Some(PathBuf::from("/tmp/b.log")));
    }
}
