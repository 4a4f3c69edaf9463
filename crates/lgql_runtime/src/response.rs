//! Response assembly.
//!
//! [`ResultNode`] is the order-preserving result tree built by the executor.
//! [`Response`] is the initial payload of an execution and [`Patch`] is a
//! path-addressed incremental payload. All of them serialize with `serde`
//! to the wire format:
//!
//! ```json
//! {"data": {"regions": []}}
//! {"path": ["regions", 0], "data": {"id": "test"}}
//! {"path": ["regions", 0, "name"], "data": null, "errors": [{"message": "..."}]}
//! ```

use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// One step of a result path: a response key or a list index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        Self::Field(key)
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        Self::Field(key.to_owned())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => write!(f, "{name}"),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Path from the response root to a node.
pub type Path = Vec<PathSegment>;

/// Extends a path by one segment.
pub fn child_path(path: &[PathSegment], segment: impl Into<PathSegment>) -> Path {
    let mut child = Vec::with_capacity(path.len() + 1);
    child.extend_from_slice(path);
    child.push(segment.into());
    child
}

/// Renders a path as `a/0/b`.
pub fn display_path(path: &[PathSegment]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("/")
}

/// A location in the query document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

/// An error entry of a response or patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub message: String,
    /// Where the failing selection sits in the document.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,
    /// Result path of the field that failed; absent for document errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<IndexMap<String, Value>>,
}

impl FieldError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: None,
            extensions: None,
        }
    }

    pub fn with_path(mut self, path: Path) -> Self {
        self.path.replace(path);
        self
    }

    /// A `None` location is ignored.
    pub fn with_location(mut self, location: Option<Location>) -> Self {
        self.locations.extend(location);
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions
            .get_or_insert_with(IndexMap::new)
            .insert(key.into(), value);
        self
    }

    /// Shorthand for the `code` extension.
    pub fn with_code(self, code: impl Into<String>) -> Self {
        self.with_extension("code", Value::String(code.into()))
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{} (at {})", self.message, display_path(path)),
            None => write!(f, "{}", self.message),
        }
    }
}

/// The assembled value of one selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResultNode {
    #[default]
    Null,
    Scalar(Value),
    List(Vec<ResultNode>),
    Object(IndexMap<String, ResultNode>),
}

impl ResultNode {
    /// Returns true for `null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Looks up a field of an object node.
    pub fn get(&self, key: &str) -> Option<&ResultNode> {
        match self {
            Self::Object(fields) => fields.get(key),
            _ => None,
        }
    }

    /// Follows a path down the tree.
    pub fn at_path(&self, path: &[PathSegment]) -> Option<&ResultNode> {
        path.iter().try_fold(self, |node, segment| match (node, segment) {
            (Self::Object(fields), PathSegment::Field(key)) => fields.get(key),
            (Self::List(items), PathSegment::Index(index)) => items.get(*index),
            _ => None,
        })
    }

    /// Converts the tree into a JSON value, keeping field order.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Scalar(value) => value.clone(),
            Self::List(items) => Value::Array(items.iter().map(Self::to_value).collect()),
            Self::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(key, node)| (key.clone(), node.to_value()))
                    .collect(),
            ),
        }
    }
}

impl Serialize for ResultNode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Scalar(value) => value.serialize(serializer),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (key, node) in fields {
                    map.serialize_entry(key, node)?;
                }
                map.end()
            }
        }
    }
}

impl From<Value> for ResultNode {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(fields) => Self::Object(
                fields
                    .into_iter()
                    .map(|(key, value)| (key, Self::from(value)))
                    .collect(),
            ),
            scalar => Self::Scalar(scalar),
        }
    }
}

/// The initial response of an execution.
///
/// `data` is `None` only when the execution was rejected before any field
/// was resolved; it is then left out of the serialized payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub data: Option<ResultNode>,
    pub errors: Vec<FieldError>,
}

impl Response {
    pub fn data(data: ResultNode) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    /// A rejected execution: no data, a single error.
    pub fn error(error: FieldError) -> Self {
        Self::errors(vec![error])
    }

    pub fn errors(errors: Vec<FieldError>) -> Self {
        Self { data: None, errors }
    }

    /// Attaches field errors.
    pub fn with_errors(mut self, errors: Vec<FieldError>) -> Self {
        self.errors.extend(errors);
        self
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Serializes the response into a JSON value.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Serialize for Response {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let len = usize::from(self.data.is_some()) + usize::from(self.has_errors());
        let mut state = serializer.serialize_struct("Response", len)?;
        match &self.data {
            Some(data) => state.serialize_field("data", data)?,
            None => state.skip_field("data")?,
        }
        if self.has_errors() {
            state.serialize_field("errors", &self.errors)?;
        } else {
            state.skip_field("errors")?;
        }
        state.end()
    }
}

/// An incremental payload addressed by path.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub path: Path,
    pub data: ResultNode,
    pub errors: Vec<FieldError>,
    pub label: Option<String>,
}

impl Patch {
    /// Assembles the patch for a resolved subtree rooted at `path`.
    pub fn assemble(
        path: Path,
        data: ResultNode,
        errors: Vec<FieldError>,
        label: Option<String>,
    ) -> Self {
        Self {
            path,
            data,
            errors,
            label,
        }
    }

    /// Returns true if the patch carries errors.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Serializes the patch into a JSON value.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Writes the patch data into an assembled `data` value.
    ///
    /// Returns false if the path does not lead to an existing container.
    pub fn apply_to(&self, target: &mut Value) -> bool {
        let Some((last, parents)) = self.path.split_last() else {
            *target = self.data.to_value();
            return true;
        };
        let mut node = target;
        for segment in parents {
            let next = match (node, segment) {
                (Value::Object(fields), PathSegment::Field(key)) => fields.get_mut(key),
                (Value::Array(items), PathSegment::Index(index)) => items.get_mut(*index),
                _ => None,
            };
            match next {
                Some(next) => node = next,
                None => return false,
            }
        }
        match (node, last) {
            (Value::Object(fields), PathSegment::Field(key)) => {
                fields.insert(key.clone(), self.data.to_value());
                true
            }
            (Value::Array(items), PathSegment::Index(index)) => {
                if *index >= items.len() {
                    items.resize(*index + 1, Value::Null);
                }
                items[*index] = self.data.to_value();
                true
            }
            _ => false,
        }
    }
}

impl Serialize for Patch {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let len = 2 + usize::from(self.has_errors()) + usize::from(self.label.is_some());
        let mut state = serializer.serialize_struct("Patch", len)?;
        state.serialize_field("path", &self.path)?;
        state.serialize_field("data", &self.data)?;
        if self.has_errors() {
            state.serialize_field("errors", &self.errors)?;
        } else {
            state.skip_field("errors")?;
        }
        match &self.label {
            Some(label) => state.serialize_field("label", label)?,
            None => state.skip_field("label")?,
        }
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn region(id: &str) -> ResultNode {
        let mut fields = IndexMap::new();
        fields.insert("id".to_string(), ResultNode::Scalar(json!(id)));
        fields.insert("name".to_string(), ResultNode::Null);
        ResultNode::Object(fields)
    }

    #[test]
    fn test_result_node_keeps_field_order() {
        let mut fields = IndexMap::new();
        fields.insert("zeta".to_string(), ResultNode::Scalar(json!(1)));
        fields.insert("alpha".to_string(), ResultNode::Scalar(json!(2)));
        let node = ResultNode::Object(fields);

        assert_eq!(
            serde_json::to_string(&node).unwrap(),
            r#"{"zeta":1,"alpha":2}"#
        );
        assert_eq!(node.to_value().to_string(), r#"{"zeta":1,"alpha":2}"#);
    }

    #[test]
    fn test_at_path() {
        let mut root = IndexMap::new();
        root.insert(
            "regions".to_string(),
            ResultNode::List(vec![region("a"), region("b")]),
        );
        let root = ResultNode::Object(root);

        let path: Path = vec!["regions".into(), 1.into(), "id".into()];
        assert_eq!(root.at_path(&path), Some(&ResultNode::Scalar(json!("b"))));
        assert_eq!(root.at_path(&["regions".into(), 5.into()]), None);
        assert_eq!(display_path(&path), "regions/1/id");
    }

    #[test]
    fn test_response_serialization() {
        let response = Response::data(region("test"));
        insta::assert_json_snapshot!(response, @r###"
        {
          "data": {
            "id": "test",
            "name": null
          }
        }
        "###);

        let rejected = Response::error(FieldError::new("Unknown operation named \"Foo\""));
        insta::assert_json_snapshot!(rejected, @r###"
        {
          "errors": [
            {
              "message": "Unknown operation named \"Foo\""
            }
          ]
        }
        "###);
    }

    #[test]
    fn test_patch_serialization() {
        let patch = Patch::assemble(
            vec!["regions".into(), 0.into(), "name".into()],
            ResultNode::Null,
            vec![FieldError::new("boom")
                .with_path(vec!["regions".into(), 0.into(), "name".into()])
                .with_location(Some(Location { line: 3, column: 5 }))],
            Some("names".to_string()),
        );

        insta::assert_json_snapshot!(patch, @r###"
        {
          "path": [
            "regions",
            0,
            "name"
          ],
          "data": null,
          "errors": [
            {
              "message": "boom",
              "locations": [
                {
                  "line": 3,
                  "column": 5
                }
              ],
              "path": [
                "regions",
                0,
                "name"
              ]
            }
          ],
          "label": "names"
        }
        "###);
    }

    #[test]
    fn test_patch_apply() {
        let mut data = json!({"regions": [{"id": "a", "name": null}]});

        let name = Patch::assemble(
            vec!["regions".into(), 0.into(), "name".into()],
            ResultNode::Scalar(json!("first")),
            Vec::new(),
            None,
        );
        assert!(name.apply_to(&mut data));

        let element = Patch::assemble(
            vec!["regions".into(), 1.into()],
            region("b"),
            Vec::new(),
            None,
        );
        assert!(element.apply_to(&mut data));

        let dangling = Patch::assemble(
            vec!["missing".into(), 0.into()],
            ResultNode::Null,
            Vec::new(),
            None,
        );
        assert!(!dangling.apply_to(&mut data));

        assert_eq!(
            data,
            json!({"regions": [{"id": "a", "name": "first"}, {"id": "b", "name": null}]})
        );
    }

    #[test]
    fn test_field_error() {
        let error = FieldError::new("region offline")
            .with_path(vec!["regions".into(), 1.into(), "status".into()])
            .with_location(None)
            .with_code("UNAVAILABLE");

        assert_eq!(error.to_string(), "region offline (at regions/1/status)");
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({
                "message": "region offline",
                "path": ["regions", 1, "status"],
                "extensions": {"code": "UNAVAILABLE"}
            })
        );
    }

    #[test]
    fn test_response() {
        let ok = Response::data(ResultNode::from(json!({"regions": []})));
        assert!(ok.has_data() && !ok.has_errors());

        let rejected = Response::error(FieldError::new("Must provide an operation"));
        assert!(!rejected.has_data() && rejected.has_errors());
        assert_eq!(
            rejected.to_json(),
            json!({"errors": [{"message": "Must provide an operation"}]})
        );
    }
}
