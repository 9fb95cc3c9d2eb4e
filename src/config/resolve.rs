// s3-db-backup/src/config/resolve.rs
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::errors::{AppError, Result};

/// Region handed to the S3 SDK when no level configures one.
pub const DEFAULT_REGION: &str = "us-east-1";

const TRUTHY_VALUES: [&str; 3] = ["1", "true", "yes"];

/// One level of raw settings (database, connection or global).
///
/// Values are kept as written; an empty string counts as unset.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SettingsLayer {
    pub endpoint: Option<String>,
    pub access: Option<String>,
    pub secret: Option<String>,
    pub region: Option<String>,
    pub force_path_style: Option<String>,
    pub bucket: Option<String>,
    pub db_buckets: Option<String>,
    pub prefix: Option<String>,
    pub retention: Option<String>,
    pub force_terminate: Option<String>,
}

impl SettingsLayer {
    pub fn from_meta(meta: &BTreeMap<String, String>) -> Self {
        let get = |key: &str| meta.get(key).cloned();
        SettingsLayer {
            endpoint: get("endpoint"),
            access: get("access"),
            secret: get("secret"),
            region: get("region"),
            force_path_style: get("force_path_style"),
            bucket: get("bucket"),
            db_buckets: get("db_buckets"),
            prefix: get("prefix"),
            retention: get("retention"),
            force_terminate: get("force_terminate"),
        }
    }
}

impl fmt::Debug for SettingsLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsLayer")
            .field("endpoint", &self.endpoint)
            .field("access", &self.access.as_ref().map(|_| "<redacted>"))
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .field("force_path_style", &self.force_path_style)
            .field("bucket", &self.bucket)
            .field("db_buckets", &self.db_buckets)
            .field("prefix", &self.prefix)
            .field("retention", &self.retention)
            .field("force_terminate", &self.force_terminate)
            .finish()
    }
}

/// Effective configuration of one connection.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedSettings {
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// `None` leaves the addressing style to the SDK default.
    pub force_path_style: Option<bool>,
    pub bucket: Option<String>,
    pub db_buckets: HashMap<String, String>,
    pub prefix: Option<String>,
    pub retention_days: Option<u32>,
    pub force_terminate: bool,
}

impl ResolvedSettings {
    /// Bucket for one database: its own override first, then the connection bucket.
    pub fn bucket_for(&self, database: &str) -> Option<&str> {
        self.db_buckets
            .get(database)
            .map(String::as_str)
            .filter(|b| !b.is_empty())
            .or(self.bucket.as_deref())
    }
}

impl fmt::Debug for ResolvedSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedSettings")
            .field("endpoint", &self.endpoint)
            .field("access_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .field("force_path_style", &self.force_path_style)
            .field("bucket", &self.bucket)
            .field("db_buckets", &self.db_buckets)
            .field("prefix", &self.prefix)
            .field("retention_days", &self.retention_days)
            .field("force_terminate", &self.force_terminate)
            .finish()
    }
}

/// Resolves the settings of one connection.
///
/// Every field is taken from the first layer that has a non-empty value, in the
/// order database, connection, global. Nothing is read from the environment
/// here; the global layer is built once at startup.
pub fn resolve_settings(
    host: &str,
    database: &SettingsLayer,
    connection: &SettingsLayer,
    global: &SettingsLayer,
) -> Result<ResolvedSettings> {
    let layers = [database, connection, global];
    let pick = |field: fn(&SettingsLayer) -> &Option<String>| -> Option<String> {
        first_non_empty(layers.into_iter().map(|layer| field(layer).as_deref())).map(str::to_string)
    };

    let access_key = pick(|l| &l.access);
    let secret_key = pick(|l| &l.secret);
    let (Some(access_key), Some(secret_key)) = (access_key, secret_key) else {
        return Err(AppError::MissingCredentials {
            host: host.to_string(),
        });
    };

    let retention_days = pick(|l| &l.retention)
        .map(|raw| parse_retention_days(&raw))
        .transpose()?;

    // Global pairs first so connection and database pairs override them.
    let mut db_buckets = HashMap::new();
    for layer in layers.iter().rev() {
        if let Some(pairs) = layer.db_buckets.as_deref() {
            db_buckets.extend(parse_db_buckets(pairs));
        }
    }

    Ok(ResolvedSettings {
        endpoint: pick(|l| &l.endpoint),
        access_key,
        secret_key,
        region: pick(|l| &l.region).unwrap_or_else(|| DEFAULT_REGION.to_string()),
        force_path_style: first_non_empty(layers.into_iter().map(|l| l.force_path_style.as_deref()))
            .map(is_truthy),
        bucket: pick(|l| &l.bucket),
        db_buckets,
        prefix: pick(|l| &l.prefix),
        retention_days,
        force_terminate: first_non_empty(layers.into_iter().map(|l| l.force_terminate.as_deref()))
            .is_some_and(is_truthy),
    })
}

fn first_non_empty<'a>(values: impl IntoIterator<Item = Option<&'a str>>) -> Option<&'a str> {
    values
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
}

/// `1`, `true` and `yes` (any case) are true; every other non-empty value is false.
pub fn is_truthy(value: &str) -> bool {
    TRUTHY_VALUES.contains(&value.trim().to_lowercase().as_str())
}

fn parse_retention_days(raw: &str) -> Result<u32> {
    match raw.trim().parse::<u32>() {
        Ok(days) if days >= 1 => Ok(days),
        _ => Err(AppError::InvalidSetting {
            field: "retention",
            value: raw.to_string(),
        }),
    }
}

/// Parses `db=bucket` pairs separated by `,` or `;`. Pairs without `=` are ignored.
pub fn parse_db_buckets(raw: &str) -> HashMap<String, String> {
    raw.split([',', ';'])
        .filter_map(|pair| pair.split_once('='))
        .map(|(db, bucket)| (db.trim().to_string(), bucket.trim().to_string()))
        .filter(|(db, bucket)| !db.is_empty() && !bucket.is_empty())
        .collect()
}
