//! Old/new value pairs and change counters.

use invtree_core::{SDKey, SDValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// A value before and after; `Null` on either side means absent.
///
/// Persisted as the pair `[old, new]`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(SDValue, SDValue)", into = "(SDValue, SDValue)")]
pub struct SDDeltaValue {
    pub old: SDValue,
    pub new: SDValue,
}

impl SDDeltaValue {
    pub fn new(old: SDValue, new: SDValue) -> Self {
        Self { old, new }
    }

    pub fn is_new(&self) -> bool {
        self.old.is_null() && !self.new.is_null()
    }

    pub fn is_removed(&self) -> bool {
        !self.old.is_null() && self.new.is_null()
    }

    pub fn is_changed(&self) -> bool {
        !self.old.is_null() && !self.new.is_null() && self.old != self.new
    }
}

impl From<(SDValue, SDValue)> for SDDeltaValue {
    fn from((old, new): (SDValue, SDValue)) -> Self {
        Self { old, new }
    }
}

impl From<SDDeltaValue> for (SDValue, SDValue) {
    fn from(value: SDDeltaValue) -> Self {
        (value.old, value.new)
    }
}

/// How a whole subtree is encoded when only one side has it.
pub type EncodeAs = fn(SDValue) -> SDDeltaValue;

pub fn encode_as_new(value: SDValue) -> SDDeltaValue {
    SDDeltaValue::new(SDValue::Null, value)
}

pub fn encode_as_removed(value: SDValue) -> SDDeltaValue {
    SDDeltaValue::new(value, SDValue::Null)
}

/// Counts of new, changed and removed values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeltaStats {
    pub new: usize,
    pub changed: usize,
    pub removed: usize,
}

impl DeltaStats {
    pub fn new(new: usize, changed: usize, removed: usize) -> Self {
        Self {
            new,
            changed,
            removed,
        }
    }

    /// Identical pairs are not counted.
    pub fn from_values<'a>(values: impl IntoIterator<Item = &'a SDDeltaValue>) -> Self {
        values.into_iter().fold(Self::default(), |mut stats, value| {
            if value.is_new() {
                stats.new += 1;
            } else if value.is_removed() {
                stats.removed += 1;
            } else if value.is_changed() {
                stats.changed += 1;
            }
            stats
        })
    }

    pub(crate) fn from_map(map: &BTreeMap<SDKey, SDDeltaValue>) -> Self {
        Self::from_values(map.values())
    }

    pub fn total(&self) -> usize {
        self.new + self.changed + self.removed
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl Add for DeltaStats {
    type Output = DeltaStats;

    fn add(self, other: DeltaStats) -> DeltaStats {
        DeltaStats {
            new: self.new + other.new,
            changed: self.changed + other.changed,
            removed: self.removed + other.removed,
        }
    }
}

impl AddAssign for DeltaStats {
    fn add_assign(&mut self, other: DeltaStats) {
        *self = *self + other;
    }
}

impl Sum for DeltaStats {
    fn sum<I: Iterator<Item = DeltaStats>>(iter: I) -> Self {
        iter.fold(DeltaStats::default(), Add::add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_classification() {
        let values = [
            encode_as_new(SDValue::from("a")),
            encode_as_removed(SDValue::from("b")),
            SDDeltaValue::new(SDValue::from(1), SDValue::from(2)),
            SDDeltaValue::new(SDValue::from(1), SDValue::from(1)),
            SDDeltaValue::new(SDValue::Null, SDValue::Null),
        ];
        assert_eq!(DeltaStats::from_values(&values), DeltaStats::new(1, 1, 1));
    }

    #[test]
    fn test_delta_value_is_a_pair_on_the_wire() {
        let value = SDDeltaValue::new(SDValue::from("old"), SDValue::Null);
        assert_eq!(serde_json::to_string(&value).unwrap(), r#"["old",null]"#);
        let back: SDDeltaValue = serde_json::from_str(r#"[null, 5]"#).unwrap();
        assert_eq!(back, encode_as_new(SDValue::from(5)));
    }

    #[test]
    fn test_stats_sum() {
        let total: DeltaStats = [DeltaStats::new(1, 0, 2), DeltaStats::new(0, 3, 1)]
            .into_iter()
            .sum();
        assert_eq!(total, DeltaStats::new(1, 3, 3));
        assert!(DeltaStats::default().is_empty());
    }
}
