//! Retention model: how long a previously seen value survives without fresh data.
//!
//! A [`RetentionInterval`] is persisted as the tuple
//! `(cached_at, cache_interval, retention_interval, source)`. Older files carry
//! only the first three entries; those are read as `source = "current"`.

use crate::filter::SDChoice;
use crate::value::{SDKey, SDPath};
use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Where a retention stamp came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionSource {
    /// Carried forward untouched from the previous cycle.
    Previous,
    /// Stamped by the current cycle's configuration.
    Current,
}

impl fmt::Display for RetentionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionSource::Previous => write!(f, "previous"),
            RetentionSource::Current => write!(f, "current"),
        }
    }
}

/// Aging metadata of a single attribute or table cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RetentionInterval {
    pub cached_at: i64,
    pub cache_interval: i64,
    pub retention_interval: i64,
    pub source: RetentionSource,
}

impl RetentionInterval {
    pub fn new(
        cached_at: i64,
        cache_interval: i64,
        retention_interval: i64,
        source: RetentionSource,
    ) -> Self {
        Self {
            cached_at,
            cache_interval,
            retention_interval,
            source,
        }
    }

    /// Fresh stamp from the configured cache and retention intervals.
    pub fn from_config(cached_at: i64, cache_interval: i64, retention_interval: i64) -> Self {
        Self::new(
            cached_at,
            cache_interval,
            retention_interval,
            RetentionSource::Current,
        )
    }

    /// Same timing as `previous`, marked as carried forward.
    pub fn from_previous(previous: &RetentionInterval) -> Self {
        Self {
            source: RetentionSource::Previous,
            ..*previous
        }
    }

    pub fn keep_until(&self) -> i64 {
        self.cached_at
            .saturating_add(self.cache_interval)
            .saturating_add(self.retention_interval)
    }

    /// Expired values must not be carried forward by an update at `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.keep_until()
    }
}

impl Serialize for RetentionInterval {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut tuple = serializer.serialize_tuple(4)?;
        tuple.serialize_element(&self.cached_at)?;
        tuple.serialize_element(&self.cache_interval)?;
        tuple.serialize_element(&self.retention_interval)?;
        tuple.serialize_element(&self.source)?;
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for RetentionInterval {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct IntervalVisitor;

        impl<'de> Visitor<'de> for IntervalVisitor {
            type Value = RetentionInterval;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a 3- or 4-tuple (cached_at, cache_interval, retention_interval[, source])")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let cached_at = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let cache_interval = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                let retention_interval = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                let source = seq
                    .next_element()?
                    .unwrap_or(RetentionSource::Current);
                if seq.next_element::<de::IgnoredAny>()?.is_some() {
                    return Err(de::Error::invalid_length(5, &self));
                }
                Ok(RetentionInterval::new(
                    cached_at,
                    cache_interval,
                    retention_interval,
                    source,
                ))
            }
        }

        deserializer.deserialize_seq(IntervalVisitor)
    }
}

/// One retention rule for a node: which keys it covers and the cache
/// timing `(cached_at, cache_interval)` of the data that produced them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetentionFilterChoice {
    pub choice: SDChoice,
    pub cache_info: (i64, i64),
}

impl RetentionFilterChoice {
    /// The stamp given to keys that are present in the current cycle.
    pub fn interval(&self, retention_interval: i64) -> RetentionInterval {
        RetentionInterval::from_config(self.cache_info.0, self.cache_info.1, retention_interval)
    }
}

/// All retention rules registered for one node path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SDRetentionFilterChoices {
    pub path: SDPath,
    pub interval: i64,
    pairs: Vec<RetentionFilterChoice>,
    columns: Vec<RetentionFilterChoice>,
}

impl SDRetentionFilterChoices {
    pub fn new(path: SDPath, interval: i64) -> Self {
        Self {
            path,
            interval,
            pairs: Vec::new(),
            columns: Vec::new(),
        }
    }

    pub fn pairs(&self) -> &[RetentionFilterChoice] {
        &self.pairs
    }

    pub fn columns(&self) -> &[RetentionFilterChoice] {
        &self.columns
    }

    pub fn add_pairs_choice(&mut self, choice: SDChoice, cache_info: (i64, i64)) {
        self.pairs.push(RetentionFilterChoice { choice, cache_info });
    }

    pub fn add_columns_choice(&mut self, choice: SDChoice, cache_info: (i64, i64)) {
        self.columns.push(RetentionFilterChoice { choice, cache_info });
    }
}

/// Keys eligible for carry-forward: permitted by `choice` and stamped with a
/// retention interval that is still valid at `now`.
pub(crate) fn is_retainable(
    choice: &SDChoice,
    key: &SDKey,
    interval: Option<&RetentionInterval>,
    now: i64,
) -> bool {
    choice.permits(key) && interval.is_some_and(|i| !i.is_expired(now))
}
