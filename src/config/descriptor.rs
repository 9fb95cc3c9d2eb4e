// s3-db-backup/src/config/descriptor.rs
use std::collections::BTreeMap;
use std::fmt;

use tracing::warn;

use crate::config::resolve::SettingsLayer;
use crate::config::target::PgTarget;
use crate::errors::{AppError, Result};

/// URL scheme markers that start the database part of a descriptor.
pub const URL_SCHEME_MARKERS: [&str; 2] = ["postgres://", "postgresql://"];

/// Delimiter separating metadata tokens when none is configured.
pub const DEFAULT_DELIMITER: char = '@';

/// Keys accepted in descriptor metadata.
pub const META_KEYS: [&str; 10] = [
    "prefix",
    "bucket",
    "endpoint",
    "force_path_style",
    "access",
    "secret",
    "region",
    "db_buckets",
    "retention",
    "force_terminate",
];

const BOOLEAN_LITERALS: [&str; 6] = ["true", "false", "1", "0", "yes", "no"];

/// One requested backup connection: the database URL plus whatever storage
/// metadata was written in front of it.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub url: String,
    pub meta: BTreeMap<String, String>,
}

impl ConnectionDescriptor {
    /// Parses one entry of the connection list.
    ///
    /// Two grammars are accepted for the metadata in front of the URL:
    ///
    /// * `key=value` tokens (`prefix=app@bucket=backups@postgres://...`). The
    ///   first bare token, if any, is taken as the prefix.
    /// * positional tokens (`prefix@bucket@endpoint@[force_path_style@]access@secret@postgres://...`).
    ///
    /// Key=value mode is selected as soon as one token contains `=`.
    pub fn parse(entry: &str, delimiter: char) -> Result<Self> {
        let entry = entry.trim();
        let url_start = URL_SCHEME_MARKERS
            .iter()
            .filter_map(|marker| entry.find(marker))
            .min()
            .ok_or_else(|| {
                AppError::MalformedConnection(
                    "entry does not contain a postgres:// or postgresql:// URL".to_string(),
                )
            })?;

        let (metadata, url) = entry.split_at(url_start);
        PgTarget::parse(url)?;
        let tokens: Vec<&str> = metadata.split(delimiter).filter(|t| !t.is_empty()).collect();

        let meta = if tokens.iter().any(|t| t.contains('=')) {
            parse_key_value_tokens(&tokens)
        } else {
            parse_positional_tokens(&tokens)
        };

        Ok(ConnectionDescriptor {
            url: url.to_string(),
            meta,
        })
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str)
    }

    /// Host, port and login of the server this descriptor points at.
    pub fn target(&self) -> Result<PgTarget> {
        PgTarget::parse(&self.url)
    }

    /// Connection-level settings layer built from the metadata.
    pub fn settings_layer(&self) -> SettingsLayer {
        SettingsLayer::from_meta(&self.meta)
    }
}

// Both the URL and the metadata carry credentials, so only key names are shown.
impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("url", &"<redacted>")
            .field("meta_keys", &self.meta.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn parse_key_value_tokens(tokens: &[&str]) -> BTreeMap<String, String> {
    let mut meta = BTreeMap::new();
    for token in tokens {
        match token.split_once('=') {
            Some((key, value)) => {
                let key = key.trim().to_lowercase();
                if META_KEYS.contains(&key.as_str()) {
                    meta.insert(key, value.to_string());
                } else {
                    warn!(key = %key, "Ignoring unknown connection descriptor key");
                }
            }
            None => {
                meta.entry("prefix".to_string())
                    .or_insert_with(|| token.to_string());
            }
        }
    }
    meta
}

fn parse_positional_tokens(tokens: &[&str]) -> BTreeMap<String, String> {
    let mut meta = BTreeMap::new();
    let mut rest = tokens.iter();

    if let Some(prefix) = rest.next() {
        meta.insert("prefix".to_string(), prefix.to_string());
    }
    if let Some(bucket) = rest.next() {
        // `bucket(label)` keeps only the bucket name
        let bucket = bucket.split('(').next().unwrap_or_default();
        meta.insert("bucket".to_string(), bucket.to_string());
    }
    if let Some(endpoint) = rest.next() {
        meta.insert("endpoint".to_string(), endpoint.to_string());
    }

    let mut rest = rest.peekable();
    if let Some(flag) = rest.next_if(|t| is_boolean_literal(t)) {
        meta.insert("force_path_style".to_string(), flag.to_string());
    }
    if let Some(access) = rest.next() {
        meta.insert("access".to_string(), access.to_string());
    }
    if let Some(secret) = rest.next() {
        meta.insert("secret".to_string(), secret.to_string());
    }
    meta
}

fn is_boolean_literal(token: &str) -> bool {
    BOOLEAN_LITERALS.contains(&token.to_lowercase().as_str())
}

fn has_scheme_marker(fragment: &str) -> bool {
    URL_SCHEME_MARKERS.iter().any(|marker| fragment.contains(marker))
}

/// A marker-less fragment may only continue the metadata of the next entry
/// when it reads as `key=value` text and carries no other URL scheme.
fn is_metadata_continuation(fragment: &str) -> bool {
    fragment.contains('=') && !fragment.contains("://")
}

/// Splits the raw connection list on commas.
///
/// A `key=value` fragment without a URL belongs to the metadata of the entry
/// that follows it, which lets values such as `db_buckets=a=x,b=y` contain
/// commas. Any other fragment without a URL is a malformed entry.
pub fn split_connection_list(raw: &str) -> Result<Vec<String>> {
    let mut entries = Vec::new();
    let mut pending = String::new();

    for fragment in raw.split(',') {
        if pending.is_empty() && fragment.trim().is_empty() {
            continue;
        }
        if !has_scheme_marker(fragment) && !is_metadata_continuation(fragment) {
            return Err(AppError::MalformedConnection(format!(
                "entry {} does not contain a postgres:// or postgresql:// URL",
                entries.len() + 1
            )));
        }
        if !pending.is_empty() {
            pending.push(',');
        }
        pending.push_str(fragment);
        if has_scheme_marker(fragment) {
            entries.push(pending.trim().to_string());
            pending.clear();
        }
    }

    if !pending.trim().is_empty() {
        return Err(AppError::MalformedConnection(format!(
            "entry {} does not contain a postgres:// or postgresql:// URL",
            entries.len() + 1
        )));
    }
    Ok(entries)
}
