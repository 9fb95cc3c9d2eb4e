// s3-db-backup/src/backup/retention.rs
use std::collections::{BTreeMap, HashMap};

use chrono::{Days, NaiveDate, NaiveDateTime};

use super::object_key::decode_timestamp;

/// What retention does with one stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionDecision {
    Keep,
    DeleteExpired,
    DeleteDuplicate,
}

impl RetentionDecision {
    pub fn is_delete(&self) -> bool {
        !matches!(self, RetentionDecision::Keep)
    }
}

/// Outcome of one planning pass over a single database's objects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPlan {
    /// Decision per managed key. Keys that could not be decoded are absent.
    pub decisions: BTreeMap<String, RetentionDecision>,
    /// Keys whose names carry no timestamp; never touched.
    pub unmanaged: Vec<String>,
}

impl RetentionPlan {
    /// Keys to delete, in key order.
    pub fn deletions(&self) -> Vec<&str> {
        self.decisions
            .iter()
            .filter(|(_, decision)| decision.is_delete())
            .map(|(key, _)| key.as_str())
            .collect()
    }

    pub fn survivors(&self) -> Vec<&str> {
        self.decisions
            .iter()
            .filter(|(_, decision)| !decision.is_delete())
            .map(|(key, _)| key.as_str())
            .collect()
    }
}

/// First calendar date that survives a window of `retention_days` ending `today`.
///
/// One day keeps only today; seven days keep today and the six days before it.
pub fn cutoff_date(today: NaiveDate, retention_days: u32) -> NaiveDate {
    let back = u64::from(retention_days.max(1) - 1);
    today.checked_sub_days(Days::new(back)).unwrap_or(NaiveDate::MIN)
}

/// Classifies already-decoded objects.
///
/// Anything dated before the cutoff is expired. Of the rest, only the newest
/// object of each calendar day is kept; ties on the timestamp keep the greatest
/// key so the result does not depend on listing order.
pub fn plan_retention(
    retention_days: u32,
    today: NaiveDate,
    objects: &[(String, NaiveDateTime)],
) -> BTreeMap<String, RetentionDecision> {
    let cutoff = cutoff_date(today, retention_days);
    let mut decisions = BTreeMap::new();
    let mut newest_per_day: HashMap<NaiveDate, (&NaiveDateTime, &str)> = HashMap::new();

    for (key, timestamp) in objects {
        let date = timestamp.date();
        if date < cutoff {
            decisions.insert(key.clone(), RetentionDecision::DeleteExpired);
            continue;
        }
        decisions.insert(key.clone(), RetentionDecision::DeleteDuplicate);
        let candidate = (timestamp, key.as_str());
        newest_per_day
            .entry(date)
            .and_modify(|best| {
                if candidate > *best {
                    *best = candidate;
                }
            })
            .or_insert(candidate);
    }

    for (_, key) in newest_per_day.into_values() {
        decisions.insert(key.to_string(), RetentionDecision::Keep);
    }
    decisions
}

/// Decodes the listed keys and plans retention over the ones that carry a timestamp.
pub fn plan_for_keys(retention_days: u32, today: NaiveDate, keys: &[String]) -> RetentionPlan {
    let mut unmanaged = Vec::new();
    let mut decoded = Vec::with_capacity(keys.len());
    for key in keys {
        match decode_timestamp(key) {
            Some(timestamp) => decoded.push((key.clone(), timestamp)),
            None => unmanaged.push(key.clone()),
        }
    }

    RetentionPlan {
        decisions: plan_retention(retention_days, today, &decoded),
        unmanaged,
    }
}
