//! Three-way JSON merge patch with preconditions
//!
//! The patch carries the deletions between `original` and `modified` plus
//! the changes from `current` to `modified`. Arrays and scalars are
//! replaced wholesale, as JSON merge patch (RFC 7386) requires.

use serde_json::{Map, Value};

use crate::Error;

/// A check the computed patch must pass before it is sent
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Precondition {
    /// A top-level key must not appear in the patch
    KeyUnchanged(&'static str),
    /// A key under `metadata` must not appear in the patch
    MetadataKeyUnchanged(&'static str),
}

impl Precondition {
    fn check(&self, patch: &Map<String, Value>) -> Result<(), Error> {
        match self {
            Self::KeyUnchanged(key) if patch.contains_key(*key) => {
                Err(Error::precondition(format!("{key} must not be changed")))
            }
            Self::MetadataKeyUnchanged(key)
                if patch
                    .get("metadata")
                    .and_then(Value::as_object)
                    .is_some_and(|m| m.contains_key(*key)) =>
            {
                Err(Error::precondition(format!("metadata.{key} must not be changed")))
            }
            _ => Ok(()),
        }
    }
}

/// Preconditions for updating an object in place: same apiVersion, kind, and name
pub const IDENTITY_PRECONDITIONS: &[Precondition] = &[
    Precondition::KeyUnchanged("apiVersion"),
    Precondition::KeyUnchanged("kind"),
    Precondition::MetadataKeyUnchanged("name"),
];

/// Compute a three-way merge patch
///
/// Returns an empty object when `current` already matches `modified` in
/// every field `modified` sets and nothing was removed since `original`.
pub fn three_way_merge_patch(
    original: &Value,
    modified: &Value,
    current: &Value,
    preconditions: &[Precondition],
) -> Result<Value, Error> {
    let original = as_object(original, "original")?;
    let modified = as_object(modified, "modified")?;
    let current = as_object(current, "current")?;

    let deletions = diff(original, modified, false, true);
    let changes = diff(current, modified, true, false);
    let patch = merge_maps(deletions, changes);

    for precondition in preconditions {
        precondition.check(&patch)?;
    }
    Ok(Value::Object(patch))
}

/// Returns true for `{}`
pub fn is_empty_patch(patch: &Value) -> bool {
    patch.as_object().is_some_and(Map::is_empty)
}

fn as_object<'a>(value: &'a Value, which: &str) -> Result<&'a Map<String, Value>, Error> {
    value
        .as_object()
        .ok_or_else(|| Error::serialization(format!("{which} object is not a JSON object")))
}

fn diff(
    from: &Map<String, Value>,
    to: &Map<String, Value>,
    keep_changes: bool,
    keep_deletions: bool,
) -> Map<String, Value> {
    let mut patch = Map::new();

    for (key, to_value) in to {
        match (from.get(key), to_value) {
            (Some(from_value), _) if from_value == to_value => {}
            (Some(Value::Object(from_map)), Value::Object(to_map)) => {
                let nested = diff(from_map, to_map, keep_changes, keep_deletions);
                if !nested.is_empty() {
                    patch.insert(key.clone(), Value::Object(nested));
                }
            }
            _ if keep_changes => {
                patch.insert(key.clone(), to_value.clone());
            }
            _ => {}
        }
    }

    if keep_deletions {
        for key in from.keys() {
            if !to.contains_key(key) {
                patch.insert(key.clone(), Value::Null);
            }
        }
    }

    patch
}

fn merge_maps(mut base: Map<String, Value>, overlay: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in overlay {
        match (base.remove(&key), value) {
            (Some(Value::Object(b)), Value::Object(o)) => {
                base.insert(key, Value::Object(merge_maps(b, o)));
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
    base
}
