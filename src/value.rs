//! Values found at graph paths.

use std::fmt::{self, Display, Formatter};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as Json};

use crate::error::{Error, Result};
use crate::path::Path;

/// A plain JSON value type.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl Primitive {
    /// A number, stored as an integer when it has no fractional part.
    pub fn number(number: f64) -> Self {
        if number.fract() == 0.0 && number >= i64::MIN as f64 && number <= i64::MAX as f64 {
            Primitive::Integer(number as i64)
        } else {
            Primitive::Float(number)
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Primitive::Integer(number) => Some(number as f64),
            Primitive::Float(number) => Some(number),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Primitive::Integer(number) => Some(number),
            _ => None,
        }
    }

    fn to_json(&self) -> Json {
        match self {
            Primitive::Null => Json::Null,
            Primitive::Bool(value) => Json::Bool(*value),
            Primitive::Integer(number) => Json::from(*number),
            // Non-finite floats have no JSON spelling
            Primitive::Float(number) => Json::from(*number),
            Primitive::String(value) => Json::String(value.clone()),
        }
    }

    fn from_json(json: &Json) -> Result<Self> {
        match json {
            Json::Null => Ok(Primitive::Null),
            Json::Bool(value) => Ok(Primitive::Bool(*value)),
            Json::Number(number) => Ok(match number.as_i64() {
                Some(number) => Primitive::Integer(number),
                None => Primitive::number(number.as_f64().unwrap_or(f64::NAN)),
            }),
            Json::String(value) => Ok(Primitive::String(value.clone())),
            other => Err(Error::invalid_argument(format!(
                "{} is not a JSON Graph value type",
                other
            ))),
        }
    }
}

impl Display for Primitive {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.to_json(), f)
    }
}

/// The value at one graph path.
///
/// `Atom` marks a leaf whose value is known, even when that value is empty:
/// an atom of null says "there is nothing here", while a missing path value
/// says "this wasn't resolved". `Atom(None)` is the undefined atom.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphValue {
    Primitive(Primitive),
    Ref(Path),
    Atom(Option<Primitive>),
    Error(String),
}

impl GraphValue {
    pub fn null() -> Self {
        GraphValue::Primitive(Primitive::Null)
    }

    /// The known-empty leaf.
    pub fn atom_null() -> Self {
        GraphValue::Atom(Some(Primitive::Null))
    }

    pub fn undefined() -> Self {
        GraphValue::Atom(None)
    }

    pub fn reference(path: Path) -> Self {
        GraphValue::Ref(path)
    }

    pub fn error(cause: impl Display) -> Self {
        GraphValue::Error(cause.to_string())
    }

    pub fn number(number: f64) -> Self {
        GraphValue::Primitive(Primitive::number(number))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, GraphValue::Error(..))
    }

    pub fn as_primitive(&self) -> Option<&Primitive> {
        match self {
            GraphValue::Primitive(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_ref_path(&self) -> Option<&Path> {
        match self {
            GraphValue::Ref(path) => Some(path),
            _ => None,
        }
    }

    /// The JSON Graph encoding: primitives as themselves, everything else
    /// as a `{"$type": ..., "value": ...}` object.
    pub fn to_json(&self) -> Json {
        let (kind, value) = match self {
            GraphValue::Primitive(value) => return value.to_json(),
            GraphValue::Ref(path) => ("ref", Some(path.to_json())),
            GraphValue::Atom(value) => ("atom", value.as_ref().map(Primitive::to_json)),
            GraphValue::Error(cause) => ("error", Some(Json::String(cause.clone()))),
        };

        let mut object = Map::new();
        object.insert("$type".to_owned(), Json::from(kind));
        if let Some(value) = value {
            object.insert("value".to_owned(), value);
        }
        Json::Object(object)
    }

    pub fn from_json(json: &Json) -> Result<Self> {
        let object = match json {
            Json::Object(object) => object,
            other => return Primitive::from_json(other).map(GraphValue::Primitive),
        };

        let value = object.get("value");
        match object.get("$type").and_then(Json::as_str) {
            Some("ref") => value
                .ok_or_else(|| Error::invalid_argument("ref without a value"))
                .and_then(Path::from_json)
                .map(GraphValue::Ref),
            Some("atom") => match value {
                None => Ok(GraphValue::undefined()),
                Some(value) => {
                    Primitive::from_json(value).map(|value| GraphValue::Atom(Some(value)))
                }
            },
            Some("error") => Ok(GraphValue::Error(match value {
                Some(Json::String(cause)) => cause.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            })),
            Some(kind) => Err(Error::invalid_argument(format!("unknown $type {:?}", kind))),
            None => Err(Error::invalid_argument("object without a $type is not a leaf")),
        }
    }

    /// True if this JSON object is a graph leaf rather than a branch.
    pub(crate) fn is_leaf_json(json: &Json) -> bool {
        match json {
            Json::Object(object) => object.contains_key("$type"),
            _ => true,
        }
    }
}

impl From<Primitive> for GraphValue {
    fn from(value: Primitive) -> Self {
        GraphValue::Primitive(value)
    }
}

impl From<bool> for GraphValue {
    fn from(value: bool) -> Self {
        GraphValue::Primitive(Primitive::Bool(value))
    }
}

impl From<i64> for GraphValue {
    fn from(value: i64) -> Self {
        GraphValue::Primitive(Primitive::Integer(value))
    }
}

impl From<i32> for GraphValue {
    fn from(value: i32) -> Self {
        GraphValue::Primitive(Primitive::Integer(value.into()))
    }
}

impl From<usize> for GraphValue {
    fn from(value: usize) -> Self {
        match i64::try_from(value) {
            Ok(value) => GraphValue::from(value),
            Err(..) => GraphValue::number(value as f64),
        }
    }
}

impl From<f64> for GraphValue {
    fn from(value: f64) -> Self {
        GraphValue::number(value)
    }
}

impl From<&str> for GraphValue {
    fn from(value: &str) -> Self {
        GraphValue::Primitive(Primitive::String(value.to_owned()))
    }
}

impl From<String> for GraphValue {
    fn from(value: String) -> Self {
        GraphValue::Primitive(Primitive::String(value))
    }
}

impl Serialize for GraphValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for GraphValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        GraphValue::from_json(&json).map_err(<D::Error as de::Error>::custom)
    }
}

/// A value together with the path it was found at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathValue {
    pub path: Path,
    pub value: GraphValue,
}

impl PathValue {
    pub fn new(path: Path, value: impl Into<GraphValue>) -> Self {
        PathValue {
            path,
            value: value.into(),
        }
    }
}
