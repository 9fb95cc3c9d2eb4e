// s3-db-backup/src/backup/object_key.rs
//! Object key naming for uploaded backups.
//!
//! Keys look like `{base}/{database}/{prefix-}{database}-14h-01m-07d-09mon-2025y.zip`.
//! Objects written by earlier releases use the same layout, so the field order,
//! zero padding and unit suffixes must not change.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

/// Number of hyphen-separated timestamp fields at the end of a file name.
const TIMESTAMP_FIELDS: usize = 5;

/// Identity of one uploaded backup object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifactKey {
    pub base: String,
    pub database: String,
    pub prefix: Option<String>,
    /// Civil time in the connection's time zone.
    pub timestamp: NaiveDateTime,
    pub extension: String,
}

impl BackupArtifactKey {
    /// Builds a key for `database`.
    ///
    /// The base directory is the configured prefix, or `host` when there is none.
    /// A prefix containing slashes keeps them in the base directory, while only its
    /// last segment goes into the file name.
    pub fn new(
        host: &str,
        database: &str,
        prefix: Option<&str>,
        timestamp: NaiveDateTime,
        extension: &str,
    ) -> Self {
        let prefix = prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty());
        BackupArtifactKey {
            base: prefix.unwrap_or(host).to_string(),
            database: database.to_string(),
            prefix: prefix
                .and_then(|p| p.rsplit('/').next())
                .map(str::to_string),
            timestamp,
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    /// Directory part plus file-name stem shared by every backup of this database.
    /// Listing with this prefix returns only objects this key scheme produced.
    pub fn listing_prefix(&self) -> String {
        format!("{}/{}/{}", self.base, self.database, self.file_stem())
    }

    fn file_stem(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}-{}-", prefix, self.database),
            None => format!("{}-", self.database),
        }
    }

    pub fn encode(&self) -> String {
        let ts = &self.timestamp;
        format!(
            "{}{:02}h-{:02}m-{:02}d-{:02}mon-{:04}y.{}",
            self.listing_prefix(),
            ts.hour(),
            ts.minute(),
            ts.day(),
            ts.month(),
            ts.year(),
            self.extension
        )
    }
}

/// Recovers the timestamp encoded in a key.
///
/// Returns `None` for anything that was not produced by [`BackupArtifactKey::encode`]:
/// fewer than five trailing fields, fields with underscores, fields without digits
/// or values that do not form a real date and time.
pub fn decode_timestamp(key: &str) -> Option<NaiveDateTime> {
    let file_name = key.rsplit('/').next()?;
    let segments: Vec<&str> = file_name.split('-').collect();
    if segments.len() < TIMESTAMP_FIELDS {
        return None;
    }

    let mut fields = segments[segments.len() - TIMESTAMP_FIELDS..].to_vec();
    // the year field carries the extension
    fields[TIMESTAMP_FIELDS - 1] = fields[TIMESTAMP_FIELDS - 1].split('.').next().unwrap_or_default();
    if fields.iter().any(|f| f.contains('_')) {
        return None;
    }

    let values: Vec<u32> = fields
        .iter()
        .map(|field| field_digits(field))
        .collect::<Option<_>>()?;
    let &[hour, minute, day, month, year] = values.as_slice() else {
        return None;
    };

    NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, month, day)?.and_hms_opt(hour, minute, 0)
}

/// Digits of a field such as `07d` or `2025y`; `None` if there are none.
fn field_digits(field: &str) -> Option<u32> {
    let digits: String = field.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .and_then(|date| date.and_hms_opt(h, mi, 0))
            .expect("valid test timestamp")
    }

    #[test]
    fn test_encode_with_prefix() {
        let key = BackupArtifactKey::new("db.internal", "app", Some("myprefix"), at(2025, 9, 7, 14, 1), "zip");
        assert_eq!(key.encode(), "myprefix/app/myprefix-app-14h-01m-07d-09mon-2025y.zip");
    }

    #[test]
    fn test_encode_without_prefix_uses_host() {
        let key = BackupArtifactKey::new("db.internal", "app", None, at(2024, 1, 2, 3, 4), ".dump.gz");
        assert_eq!(key.encode(), "db.internal/app/app-03h-04m-02d-01mon-2024y.dump.gz");

        let empty = BackupArtifactKey::new("db.internal", "app", Some("//"), at(2024, 1, 2, 3, 4), "zip");
        assert_eq!(empty.base, "db.internal");
        assert_eq!(empty.prefix, None);
    }

    #[test]
    fn test_nested_prefix() {
        let key = BackupArtifactKey::new("h", "app", Some("/backups/prod/"), at(2025, 12, 31, 23, 59), "zip");
        assert_eq!(key.encode(), "backups/prod/app/prod-app-23h-59m-31d-12mon-2025y.zip");
        assert_eq!(key.listing_prefix(), "backups/prod/app/prod-app-");
    }

    #[test]
    fn test_decode_known_key() {
        let decoded = decode_timestamp("base/db/myprefix-db-14h-01m-07d-09mon-2025y.zip");
        assert_eq!(decoded, Some(at(2025, 9, 7, 14, 1)));
    }

    #[test]
    fn test_round_trip() {
        let samples = [
            at(2025, 9, 7, 14, 1),
            at(2000, 2, 29, 0, 0),
            at(2031, 12, 31, 23, 59),
        ];
        for ts in samples {
            for (prefix, database, ext) in [
                (Some("nightly"), "app", "zip"),
                (None, "multi-part-name", "dump.gz"),
                (Some("a/b"), "x", "dump"),
            ] {
                let key = BackupArtifactKey::new("host", database, prefix, ts, ext).encode();
                assert_eq!(decode_timestamp(&key), Some(ts), "key {}", key);
            }
        }
    }

    #[test]
    fn test_decode_rejects_foreign_keys() {
        for key in [
            "",
            "base/db/readme.txt",
            "base/db/a-b-c-d.zip",
            "host-app-20240101T000000Z.dump",
            "base/db/app-xxh-01m-07d-09mon-2025y.zip",
            "base/db/app-14h-01m-07d-09_mon-2025y.zip",
            "base/db/app-25h-01m-07d-09mon-2025y.zip",
            "base/db/app-14h-01m-31d-02mon-2025y.zip",
            "base/db/app-14h-01m-07d-13mon-2025y.zip",
            "base/db/",
        ] {
            assert_eq!(decode_timestamp(key), None, "key {:?}", key);
        }
    }

    #[test]
    fn test_decode_ignores_directories() {
        let decoded = decode_timestamp("01h-02m-03d-04mon-2020y/db/app-10h-11m-12d-01mon-2021y.zip");
        assert_eq!(decoded, Some(at(2021, 1, 12, 10, 11)));
    }
}
