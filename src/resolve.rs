//! Turning fetched records into path values.
//!
//! Every function here produces at least one path value for whatever it is
//! asked about, at the requested path or at an ancestor of it: a missing
//! entity becomes a null atom at the entity's own path, a failed one becomes
//! an error there, and a missing field becomes the undefined atom.

use std::hash::Hash;

use tracing::debug;

use crate::data::{KeySet, Record, Records};
use crate::error::{Error, Result};
use crate::path::{Path, PathKey};
use crate::value::{GraphValue, PathValue};

/// An entity whose fields can be read by name.
pub trait Fields {
    /// The value of one field, or `None` if the entity has no such field.
    /// A field that refers to another entity should come back as a
    /// [`GraphValue::Ref`] to that entity's root path.
    fn field(&self, name: &PathKey) -> Option<GraphValue>;
}

/// Resolve some fields of the entity at `key_path`. A found entity yields
/// one value per field, so callers should not ask for an empty field list.
pub fn resolve_fields<V: Fields>(
    key_path: &Path,
    fields: &[PathKey],
    record: &Record<V>,
) -> Vec<PathValue> {
    match record {
        Record::Found(entity) => fields
            .iter()
            .map(|name| {
                let value = entity.field(name).unwrap_or_else(GraphValue::undefined);
                PathValue::new(key_path.child(name.clone()), value)
            })
            .collect(),
        Record::NotFound => vec![PathValue::new(key_path.clone(), GraphValue::atom_null())],
        Record::Error(err) => vec![PathValue::new(key_path.clone(), GraphValue::error(err))],
    }
}

/// Resolve a record that is itself a single leaf value.
pub fn resolve_leaf<V>(path: &Path, record: &Record<V>) -> PathValue
where
    V: Clone + Into<GraphValue>,
{
    let value = match record {
        Record::Found(value) => value.clone().into(),
        Record::NotFound => GraphValue::atom_null(),
        Record::Error(err) => GraphValue::error(err),
    };

    PathValue::new(path.clone(), value)
}

/// Resolve one position of an ordered collection. Indices outside the
/// collection, negative ones included, resolve to a null atom at the index
/// path.
pub fn resolve_index<T>(
    list_path: &Path,
    index: i64,
    items: &[T],
    to_value: impl FnOnce(&T) -> GraphValue,
) -> PathValue {
    let item = usize::try_from(index).ok().and_then(|index| items.get(index));
    let value = match item {
        Some(item) => to_value(item),
        None => GraphValue::atom_null(),
    };

    PathValue::new(list_path.child(index), value)
}

/// Settle the outcome of a whole fetch into one record per key.
///
/// A fetch that failed as a whole is turned into an error record for every
/// key, so that it is reported at each key's path like any other per-key
/// failure. Errors that reject the request itself are passed through.
pub fn settle<K, V>(keys: &KeySet<K>, result: Result<Records<K, V>>) -> Result<Records<K, V>>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    match result {
        Ok(records) => Ok(records),
        Err(err) if err.is_call_level() => Err(err),
        Err(err) => {
            debug!(error = %err, keys = keys.len(), "reporting fetch failure per key");
            Ok(keys.clone().into_values(|_key| Record::Error(err.clone())))
        }
    }
}

/// The record for one key out of a fetch result.
pub fn record_for<K, V>(records: &Records<K, V>, key: &K) -> Record<V>
where
    K: Eq + Hash,
    V: Clone,
{
    records.get(key).cloned().unwrap_or(Record::Error(Error::Missing))
}
