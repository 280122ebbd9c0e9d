//! Partial-update primitive shared by every cached entity.
//!
//! A patch is a JSON object holding a subset of an entity's fields. Absent
//! keys leave the current value untouched, explicit `null` clears a nullable
//! field, and values of the wrong shape are ignored. Applying the same patch
//! twice is a no-op the second time.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Names of the fields a patch actually changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppliedDiff {
    changed: Vec<&'static str>,
}

impl AppliedDiff {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    /// Whether `field` changed.
    pub fn contains(&self, field: &str) -> bool {
        self.changed.contains(&field)
    }

    /// Changed field names, in patch order.
    pub fn fields(&self) -> &[&'static str] {
        &self.changed
    }

    /// Record a changed field.
    pub fn record(&mut self, field: &'static str) {
        self.changed.push(field);
    }

    /// Fold another diff into this one.
    pub fn extend(&mut self, other: AppliedDiff) {
        self.changed.extend(other.changed);
    }
}

/// An entity that accepts partial updates.
pub trait Patch {
    /// Immutable copy handed out in change notifications.
    type Snapshot: Clone + Send + Sync + 'static;

    /// Apply a partial update in place.
    fn patch(&mut self, fields: &Map<String, Value>) -> AppliedDiff;

    /// Capture the current value.
    fn snapshot(&self) -> Self::Snapshot;
}

fn decode<T: DeserializeOwned>(raw: &Value) -> Option<T> {
    T::deserialize(raw).ok()
}

/// Apply `fields[key]` to a non-nullable slot.
///
/// Absent, `null`, or ill-typed values leave the slot untouched.
pub fn set<T>(slot: &mut T, fields: &Map<String, Value>, key: &'static str, diff: &mut AppliedDiff)
where
    T: DeserializeOwned + PartialEq,
{
    let Some(raw) = fields.get(key) else {
        return;
    };
    if raw.is_null() {
        return;
    }
    let Some(value) = decode::<T>(raw) else {
        return;
    };
    if *slot != value {
        *slot = value;
        diff.record(key);
    }
}

/// Apply `fields[key]` to a nullable slot; explicit `null` clears it.
pub fn set_nullable<T>(
    slot: &mut Option<T>,
    fields: &Map<String, Value>,
    key: &'static str,
    diff: &mut AppliedDiff,
) where
    T: DeserializeOwned + PartialEq,
{
    let Some(raw) = fields.get(key) else {
        return;
    };
    let value = if raw.is_null() {
        None
    } else {
        match decode::<T>(raw) {
            Some(value) => Some(value),
            None => return,
        }
    };
    if *slot != value {
        *slot = value;
        diff.record(key);
    }
}

/// Parse a required snowflake-like id at `key`.
pub fn id<T: DeserializeOwned>(fields: &Map<String, Value>, key: &str) -> Option<T> {
    fields.get(key).and_then(decode)
}
