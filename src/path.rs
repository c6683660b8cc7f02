//! Paths into the virtual JSON graph.

use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{Error, Result};

/// One step of a [`Path`]: an object key or a list index.
///
/// JSON Graph object keys are always strings on the wire, so an index and
/// the string spelling of the same integer name the same location:
/// `PathKey::Index(5) == PathKey::from("5")`. Equality, hashing and ordering
/// all go through this canonical form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathKey {
    Index(i64),
    Key(String),
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Canonical<'a> {
    Index(i64),
    Key(&'a str),
}

impl PathKey {
    fn canonical(&self) -> Canonical<'_> {
        match self {
            PathKey::Index(index) => Canonical::Index(*index),
            PathKey::Key(key) => match parse_index(key) {
                Some(index) => Canonical::Index(index),
                None => Canonical::Key(key),
            },
        }
    }

    /// The integer this key names, if it names one.
    pub fn as_index(&self) -> Option<i64> {
        match self.canonical() {
            Canonical::Index(index) => Some(index),
            Canonical::Key(..) => None,
        }
    }

    /// The string this key names, if it isn't an index.
    pub fn as_str(&self) -> Option<&str> {
        match self.canonical() {
            Canonical::Key(key) => Some(key),
            Canonical::Index(..) => None,
        }
    }

    pub(crate) fn to_json(&self) -> Json {
        match self {
            PathKey::Index(index) => Json::from(*index),
            PathKey::Key(key) => Json::from(key.as_str()),
        }
    }

    pub(crate) fn from_json(json: &Json) -> Result<Self> {
        match json {
            Json::String(key) => Ok(PathKey::Key(key.clone())),
            Json::Number(number) => number
                .as_i64()
                .map(PathKey::Index)
                .ok_or_else(|| {
                    Error::invalid_argument(format!("{} is not a valid path index", number))
                }),
            other => Err(Error::invalid_argument(format!(
                "{} is not a valid path key",
                other
            ))),
        }
    }
}

// Only the exact decimal spelling of an integer is its canonical form; "05"
// and "+5" are plain string keys.
fn parse_index(key: &str) -> Option<i64> {
    let index: i64 = key.parse().ok()?;
    if index.to_string() == key {
        Some(index)
    } else {
        None
    }
}

impl PartialEq for PathKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for PathKey {}

impl Hash for PathKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state)
    }
}

impl PartialOrd for PathKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Indices sort before string keys, and numerically among themselves.
impl Ord for PathKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical().cmp(&other.canonical())
    }
}

impl From<i64> for PathKey {
    fn from(index: i64) -> Self {
        PathKey::Index(index)
    }
}

impl From<i32> for PathKey {
    fn from(index: i32) -> Self {
        PathKey::Index(index.into())
    }
}

impl From<usize> for PathKey {
    fn from(index: usize) -> Self {
        match i64::try_from(index) {
            Ok(index) => PathKey::Index(index),
            Err(..) => PathKey::Key(index.to_string()),
        }
    }
}

impl From<&str> for PathKey {
    fn from(key: &str) -> Self {
        PathKey::Key(key.to_owned())
    }
}

impl From<String> for PathKey {
    fn from(key: String) -> Self {
        PathKey::Key(key)
    }
}

impl Display for PathKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PathKey::Index(index) => write!(f, "{}", index),
            PathKey::Key(key) => f.write_str(key),
        }
    }
}

/// An ordered sequence of keys naming one location in the graph, such as
/// `["titlesById", 523, "name"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<PathKey>);

impl Path {
    pub fn new() -> Self {
        Path(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> &[PathKey] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&PathKey> {
        self.0.get(index)
    }

    pub fn last(&self) -> Option<&PathKey> {
        self.0.last()
    }

    pub fn push(&mut self, key: impl Into<PathKey>) {
        self.0.push(key.into())
    }

    /// A copy of this path, extended by one key.
    pub fn child(&self, key: impl Into<PathKey>) -> Path {
        let mut child = self.clone();
        child.push(key);
        child
    }

    pub fn join(&self, tail: &Path) -> Path {
        let mut joined = self.clone();
        joined.0.extend(tail.0.iter().cloned());
        joined
    }

    pub fn parent(&self) -> Option<Path> {
        match self.0.split_last() {
            Some((_last, init)) => Some(Path(init.to_vec())),
            None => None,
        }
    }

    /// True if `other` is this path or lies underneath it.
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        other.0.starts_with(&self.0)
    }

    pub(crate) fn to_json(&self) -> Json {
        Json::Array(self.0.iter().map(PathKey::to_json).collect())
    }

    pub(crate) fn from_json(json: &Json) -> Result<Self> {
        match json {
            Json::Array(keys) => keys.iter().map(PathKey::from_json).collect(),
            other => Err(Error::invalid_argument(format!("{} is not a path", other))),
        }
    }
}

impl From<Vec<PathKey>> for Path {
    fn from(keys: Vec<PathKey>) -> Self {
        Path(keys)
    }
}

impl FromIterator<PathKey> for Path {
    fn from_iter<T: IntoIterator<Item = PathKey>>(iter: T) -> Self {
        Path(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Path {
    type Item = &'a PathKey;
    type IntoIter = std::slice::Iter<'a, PathKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '$' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        }
        _ => false,
    }
}

/// Paths display in path-syntax form: `titlesById[523].name`.
impl Display for Path {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (position, key) in self.0.iter().enumerate() {
            match key.canonical() {
                Canonical::Index(index) => write!(f, "[{}]", index)?,
                Canonical::Key(key) if is_identifier(key) => {
                    if position > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(key)?;
                }
                Canonical::Key(key) => write!(f, "[{:?}]", key)?,
            }
        }
        Ok(())
    }
}

/// Build a [`Path`] from a list of keys; string literals become object keys
/// and integer literals become indices.
///
/// ```
/// use graphloader::{path, PathKey};
///
/// let path = path!["titlesById", 523, "name"];
/// assert_eq!(path.get(1), Some(&PathKey::Index(523)));
/// assert_eq!(path.to_string(), "titlesById[523].name");
/// ```
#[macro_export]
macro_rules! path {
    ($($key:expr),* $(,)?) => {
        $crate::Path::from(vec![$($crate::PathKey::from($key)),*])
    };
}
