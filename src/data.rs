//! Data structures for passing keys into a fetcher and records back out of
//! it.

use std::borrow::Borrow;
use std::collections::hash_map::{self, Entry, HashMap};
use std::fmt::{self, Debug, Formatter};
use std::hash::Hash;
use std::iter::FromIterator;
use std::mem;

use crate::error::Error;

/// A set of keys passed into a fetcher. All of the keys are unique; use the
/// `keys` method to iterate them and execute your request. Then, use one of
/// the `into_values` family of methods to pair your response data with the
/// keys, producing a [`ValueSet`].
#[derive(Clone)]
pub struct KeySet<Key: Eq + Hash> {
    // Each key is associated with the number of requests *past the first*
    // that are interested in it. A coalesced batch uses this count to decide
    // whether a key can be withdrawn when one of its requesters goes away.
    keys: HashMap<Key, usize>,
}

impl<Key: Eq + Hash + Debug> Debug for KeySet<Key> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.keys.keys()).finish()
    }
}

impl<Key: Eq + Hash> Default for KeySet<Key> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Key: Eq + Hash> KeySet<Key> {
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }

    /// Check if there are any keys in this keyset
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Get the number of unique keys in this keyset.
    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.keys.contains_key(key)
    }

    /// Get an iterator over all the keys in this keyset. These are guaranteed
    /// to be unique, and are yielded in an arbitrary order.
    pub fn keys(&self) -> impl Iterator<Item = &Key> + Clone {
        self.keys.keys()
    }

    /// Add a key to this set. Returns true if the key was not already
    /// present. Adding a key that is already present registers one more
    /// request for it.
    pub fn insert(&mut self, key: Key) -> bool {
        match self.keys.entry(key) {
            Entry::Occupied(mut entry) => {
                *entry.get_mut() += 1;
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(0);
                true
            }
        }
    }

    /// Withdraw one request for a key. The key is removed from the set once
    /// no request is left for it. No-op if the key isn't present.
    pub(crate) fn discard_key<Q>(&mut self, key: &Q)
    where
        Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let remove = match self.keys.get_mut(key) {
            None => false,
            Some(0) => true,
            Some(count) => {
                *count -= 1;
                false
            }
        };

        if remove {
            self.keys.remove(key);
        }
    }

    /// Take the keyset out of this particular &mut self instance, replacing it
    /// with an empty set. Helper method for when a batch is flushed.
    pub(crate) fn take(&mut self) -> Self {
        Self {
            keys: mem::take(&mut self.keys),
        }
    }

    /// After you've completed your request, use this method to pair each value
    /// in your result with its key.
    pub fn into_values<Value>(
        self,
        mut get_value: impl FnMut(&Key) -> Value,
    ) -> ValueSet<Key, Value> {
        let values = self
            .keys
            .into_iter()
            .map(move |(key, _count)| {
                let value = get_value(&key);
                (key, value)
            })
            .collect();

        ValueSet { values }
    }

    /// Fallible version of into_values. Same as into_values, but will return
    /// an error the first time `get_value` returns an error.
    pub fn try_into_values<Value, E>(
        self,
        mut get_value: impl FnMut(&Key) -> Result<Value, E>,
    ) -> Result<ValueSet<Key, Value>, E> {
        let values: Result<HashMap<Key, Value>, E> = self
            .keys
            .into_iter()
            .map(move |(key, _count)| {
                let value = get_value(&key)?;
                Ok((key, value))
            })
            .collect();

        values.map(|values| ValueSet { values })
    }

    /// Pair a collection of self-keyed entries with the keys in this set.
    /// Every key in the set must be matched by exactly one entry (subject to
    /// `on_duplicate`), and every entry must belong to a key in the set.
    pub fn values_from_iter<Q, Value>(
        self,
        on_duplicate: OnDuplicate,
        entries: impl IntoIterator<Item = Value>,
    ) -> Result<ValueSet<Key, Value>, IntoValuesError>
    where
        Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        Value: KeyedEntry<Q>,
    {
        let mut slots: HashMap<Key, Option<Value>> = self
            .keys
            .into_iter()
            .map(|(key, _count)| (key, None))
            .collect();

        for entry in entries {
            let slot = slots
                .get_mut(entry.get_key())
                .ok_or(IntoValuesError::UnrecognizedKey)?;

            match (slot.is_some(), on_duplicate) {
                (false, _) | (true, OnDuplicate::Overwrite) => *slot = Some(entry),
                (true, OnDuplicate::Ignore) => {}
                (true, OnDuplicate::Fail) => return Err(IntoValuesError::DuplicateKey),
            }
        }

        let missing = slots.values().filter(|slot| slot.is_none()).count();
        if missing > 0 {
            return Err(IntoValuesError::MissingKeys { count: missing });
        }

        let values = slots
            .into_iter()
            .filter_map(|(key, slot)| slot.map(|value| (key, value)))
            .collect();

        Ok(ValueSet { values })
    }

    /// Build a record set from `(key, value)` pairs produced by a backend.
    /// Keys in this set with no matching pair become [`Record::NotFound`];
    /// pairs for keys that weren't requested are ignored.
    pub fn records_from_iter<Value>(
        self,
        found: impl IntoIterator<Item = (Key, Value)>,
    ) -> Records<Key, Value> {
        let mut values: HashMap<Key, Record<Value>> = self
            .keys
            .into_iter()
            .map(|(key, _count)| (key, Record::NotFound))
            .collect();

        for (key, value) in found {
            if let Some(slot) = values.get_mut(&key) {
                *slot = Record::Found(value);
            }
        }

        ValueSet { values }
    }
}

impl<Key: Eq + Hash> FromIterator<Key> for KeySet<Key> {
    fn from_iter<I: IntoIterator<Item = Key>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl<Key: Eq + Hash> Extend<Key> for KeySet<Key> {
    fn extend<I: IntoIterator<Item = Key>>(&mut self, iter: I) {
        iter.into_iter().for_each(|key| {
            self.insert(key);
        })
    }
}

impl<Key: Eq + Hash> IntoIterator for KeySet<Key> {
    type Item = Key;
    type IntoIter = hash_map::IntoKeys<Key, usize>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.into_keys()
    }
}

impl<Key: Eq + Hash> PartialEq for KeySet<Key> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.keys().all(|key| other.contains(key))
    }
}

impl<Key: Eq + Hash> Eq for KeySet<Key> {}

/// Policy for [`KeySet::values_from_iter`] when more than one entry has the
/// same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDuplicate {
    /// Keep the first entry
    Ignore,
    /// Keep the last entry
    Overwrite,
    /// Fail with [`IntoValuesError::DuplicateKey`]
    Fail,
}

/// An entry that knows which key it belongs to.
pub trait KeyedEntry<Key: ?Sized> {
    fn get_key(&self) -> &Key;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntoValuesError {
    #[error("entry does not belong to any requested key")]
    UnrecognizedKey,

    #[error("more than one entry for the same key")]
    DuplicateKey,

    #[error("{count} requested keys have no entry")]
    MissingKeys { count: usize },
}

impl From<IntoValuesError> for Error {
    fn from(err: IntoValuesError) -> Self {
        Error::backend(err)
    }
}

/// The outcome of looking up a single key, decided once at the fetcher
/// boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Record<Value> {
    Found(Value),
    NotFound,
    Error(Error),
}

impl<Value> Record<Value> {
    pub fn is_found(&self) -> bool {
        matches!(self, Record::Found(..))
    }

    /// True for `NotFound` and `Error` outcomes
    pub fn is_negative(&self) -> bool {
        !self.is_found()
    }

    pub fn found(&self) -> Option<&Value> {
        match self {
            Record::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_found(self) -> Option<Value> {
        match self {
            Record::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<T>(self, f: impl FnOnce(Value) -> T) -> Record<T> {
        match self {
            Record::Found(value) => Record::Found(f(value)),
            Record::NotFound => Record::NotFound,
            Record::Error(err) => Record::Error(err),
        }
    }
}

impl<Value> From<Option<Value>> for Record<Value> {
    fn from(value: Option<Value>) -> Self {
        match value {
            Some(value) => Record::Found(value),
            None => Record::NotFound,
        }
    }
}

impl<Value> From<Result<Value, Error>> for Record<Value> {
    fn from(result: Result<Value, Error>) -> Self {
        match result {
            Ok(value) => Record::Found(value),
            Err(Error::NotFound) => Record::NotFound,
            Err(err) => Record::Error(err),
        }
    }
}

/// A value set is the result of a fetch: precisely one value for each key
/// that was asked for. Fetchers create it with one of the `KeySet` methods.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueSet<Key: Eq + Hash, Value> {
    values: HashMap<Key, Value>,
}

/// The record map a [`Fetcher`](crate::Fetcher) hands back.
pub type Records<Key, Value> = ValueSet<Key, Record<Value>>;

impl<Key: Eq + Hash, Value> Default for ValueSet<Key, Value> {
    fn default() -> Self {
        Self {
            values: HashMap::new(),
        }
    }
}

impl<Key: Eq + Hash, Value> ValueSet<Key, Value> {
    pub(crate) fn from_map(values: HashMap<Key, Value>) -> Self {
        Self { values }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&Value>
    where
        Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.values.get(key)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.values.keys()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, Key, Value> {
        self.values.iter()
    }

    pub fn into_map(self) -> HashMap<Key, Value> {
        self.values
    }
}

impl<Key: Eq + Hash + Clone, Value: Clone> ValueSet<Key, Value> {
    /// Copy out the values for exactly the keys in `keys`. Keys this set has
    /// no value for are filled in with `missing`.
    pub(crate) fn project(
        &self,
        keys: &KeySet<Key>,
        mut missing: impl FnMut(&Key) -> Value,
    ) -> Self {
        let values = keys
            .keys()
            .map(|key| {
                let value = match self.values.get(key) {
                    Some(value) => value.clone(),
                    None => missing(key),
                };
                (key.clone(), value)
            })
            .collect();

        Self { values }
    }
}

impl<Key: Eq + Hash, Value> IntoIterator for ValueSet<Key, Value> {
    type Item = (Key, Value);
    type IntoIter = hash_map::IntoIter<Key, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<'a, Key: Eq + Hash, Value> IntoIterator for &'a ValueSet<Key, Value> {
    type Item = (&'a Key, &'a Value);
    type IntoIter = hash_map::Iter<'a, Key, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}
