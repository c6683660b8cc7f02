//! The nested form of a graph fragment, and handler responses.

use std::collections::BTreeMap;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as Json};
use tracing::trace;

use crate::error::{Error, Result};
use crate::path::{Path, PathKey};
use crate::value::{GraphValue, PathValue};

/// One node of a [`GraphEnvelope`].
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Branch(BTreeMap<PathKey, Node>),
    Leaf(GraphValue),
}

impl Node {
    fn to_json(&self) -> Json {
        match self {
            Node::Leaf(value) => value.to_json(),
            Node::Branch(children) => Json::Object(
                children
                    .iter()
                    .map(|(key, child)| (key.to_string(), child.to_json()))
                    .collect::<Map<String, Json>>(),
            ),
        }
    }

    fn from_json(json: &Json) -> Result<Self> {
        match json {
            Json::Object(children) if !GraphValue::is_leaf_json(json) => children
                .iter()
                .map(|(key, child)| Ok((PathKey::from(key.as_str()), Node::from_json(child)?)))
                .collect::<Result<BTreeMap<_, _>>>()
                .map(Node::Branch),
            leaf => GraphValue::from_json(leaf).map(Node::Leaf),
        }
    }
}

/// A sparse fragment of the graph, nested by path the way JSON Graph puts
/// it on the wire: `{"jsonGraph": {"titlesById": {"523": {"name": ...}}}}`.
///
/// An envelope and a list of [`PathValue`]s carry the same information.
/// When building an envelope from path values, a leaf at some path hides
/// anything underneath it, whichever order the two arrive in: an error or
/// null atom attached at `titlesById[7]` stands for the whole title.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphEnvelope {
    root: BTreeMap<PathKey, Node>,
}

impl GraphEnvelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Build an envelope out of path values. Fails if a path value has an
    /// empty path, since there is nowhere to put it.
    pub fn from_path_values(values: impl IntoIterator<Item = PathValue>) -> Result<Self> {
        let mut envelope = Self::new();
        for value in values {
            envelope.insert(value)?;
        }
        Ok(envelope)
    }

    pub fn insert(&mut self, value: PathValue) -> Result<()> {
        let (last, init) = value
            .path
            .keys()
            .split_last()
            .ok_or_else(|| Error::invalid_argument("path value with an empty path"))?;

        let mut children = &mut self.root;
        for key in init {
            let node = children
                .entry(key.clone())
                .or_insert_with(|| Node::Branch(BTreeMap::new()));

            children = match node {
                Node::Branch(next) => next,
                Node::Leaf(..) => {
                    trace!(path = %value.path, "path value hidden by a leaf at an ancestor path");
                    return Ok(());
                }
            };
        }

        // Replaces a branch as well as a leaf
        children.insert(last.clone(), Node::Leaf(value.value));
        Ok(())
    }

    /// The node at a path, if there is one.
    pub fn get(&self, path: &Path) -> Option<&Node> {
        let (first, rest) = path.keys().split_first()?;
        let mut node = self.root.get(first)?;
        for key in rest {
            node = match node {
                Node::Branch(children) => children.get(key)?,
                Node::Leaf(..) => return None,
            };
        }
        Some(node)
    }

    pub fn value_at(&self, path: &Path) -> Option<&GraphValue> {
        match self.get(path)? {
            Node::Leaf(value) => Some(value),
            Node::Branch(..) => None,
        }
    }

    /// Flatten the envelope into one path value per leaf, in path order.
    pub fn path_values(&self) -> Vec<PathValue> {
        fn walk(children: &BTreeMap<PathKey, Node>, prefix: &Path, out: &mut Vec<PathValue>) {
            for (key, node) in children {
                let path = prefix.child(key.clone());
                match node {
                    Node::Leaf(value) => out.push(PathValue::new(path, value.clone())),
                    Node::Branch(children) => walk(children, &path, out),
                }
            }
        }

        let mut out = Vec::new();
        walk(&self.root, &Path::new(), &mut out);
        out
    }

    pub fn to_json(&self) -> Json {
        let mut object = Map::new();
        object.insert("jsonGraph".to_owned(), Node::Branch(self.root.clone()).to_json());
        Json::Object(object)
    }

    pub fn from_json(json: &Json) -> Result<Self> {
        let graph = json
            .get("jsonGraph")
            .ok_or_else(|| Error::invalid_argument("envelope has no jsonGraph"))?;

        match Node::from_json(graph)? {
            Node::Branch(root) => Ok(GraphEnvelope { root }),
            Node::Leaf(..) => Err(Error::invalid_argument("jsonGraph must be an object")),
        }
    }
}

impl Serialize for GraphEnvelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for GraphEnvelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        GraphEnvelope::from_json(&json).map_err(<D::Error as de::Error>::custom)
    }
}

/// What a handler operation produces: the path values it resolved, and the
/// paths whose previously cached values are no longer valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphResponse {
    pub values: Vec<PathValue>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invalidated: Vec<Path>,
}

impl GraphResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: Path, value: impl Into<GraphValue>) {
        self.values.push(PathValue::new(path, value))
    }

    pub fn invalidate(&mut self, path: Path) {
        self.invalidated.push(path)
    }

    /// The value most recently resolved at exactly this path.
    pub fn value_at(&self, path: &Path) -> Option<&GraphValue> {
        self.values
            .iter()
            .rev()
            .find(|value| &value.path == path)
            .map(|value| &value.value)
    }

    pub fn to_envelope(&self) -> Result<GraphEnvelope> {
        GraphEnvelope::from_path_values(self.values.iter().cloned())
    }
}

impl Extend<PathValue> for GraphResponse {
    fn extend<T: IntoIterator<Item = PathValue>>(&mut self, iter: T) {
        self.values.extend(iter)
    }
}

impl FromIterator<PathValue> for GraphResponse {
    fn from_iter<T: IntoIterator<Item = PathValue>>(iter: T) -> Self {
        GraphResponse {
            values: iter.into_iter().collect(),
            invalidated: Vec::new(),
        }
    }
}
