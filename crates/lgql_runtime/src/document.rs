//! Executable documents.
//!
//! A [`Document`] is the output of an already-run parse and validation pass:
//! operations holding trees of [`Selection`]s, with the `@defer`, `@stream`
//! and `@live` directives classified into [`Directives`] flags. Trees are
//! immutable and reference-counted so that asynchronous units can hold on to
//! the selection they resolve.

use crate::executor::ExecutionError;
use crate::response::Location;
use crate::schema::TypeRef;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::sync::Arc;

/// A list of selections, in document order.
pub type SelectionSet = Vec<Arc<Selection>>;

/// A validated executable document.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub operations: Vec<Arc<Operation>>,
}

impl Document {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an operation.
    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operations.push(Arc::new(operation));
        self
    }

    /// Picks the operation to run.
    ///
    /// Without a name the document must contain exactly one operation.
    pub fn operation(&self, name: Option<&str>) -> Result<&Arc<Operation>, ExecutionError> {
        match name {
            Some(name) => self
                .operations
                .iter()
                .find(|op| op.name.as_deref() == Some(name))
                .ok_or_else(|| ExecutionError::UnknownOperation(name.to_string())),
            None => match self.operations.as_slice() {
                [] => Err(ExecutionError::NoOperation),
                [op] => Ok(op),
                _ => Err(ExecutionError::AmbiguousOperation),
            },
        }
    }
}

/// The kind of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
}

/// An operation definition.
#[derive(Debug, Clone)]
pub struct Operation {
    pub name: Option<String>,
    pub kind: OperationKind,
    pub variables: Vec<VariableDefinition>,
    pub selection_set: SelectionSet,
}

impl Operation {
    /// Creates an anonymous query.
    pub fn query() -> Self {
        Self {
            name: None,
            kind: OperationKind::Query,
            variables: Vec::new(),
            selection_set: Vec::new(),
        }
    }

    /// Creates an anonymous mutation.
    pub fn mutation() -> Self {
        Self {
            kind: OperationKind::Mutation,
            ..Self::query()
        }
    }

    /// Sets the operation name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Declares a variable.
    pub fn variable(mut self, variable: VariableDefinition) -> Self {
        self.variables.push(variable);
        self
    }

    /// Sets the root selections.
    pub fn selections(mut self, selections: impl IntoIterator<Item = Selection>) -> Self {
        self.selection_set = selections.into_iter().map(Arc::new).collect();
        self
    }

    /// Returns true if any selection in the operation requests incremental delivery.
    pub fn is_incremental(&self) -> bool {
        fn walk(set: &SelectionSet) -> bool {
            set.iter()
                .any(|s| s.directives.is_incremental() || walk(&s.selection_set))
        }
        walk(&self.selection_set)
    }
}

/// A variable definition.
#[derive(Debug, Clone)]
pub struct VariableDefinition {
    pub name: String,
    pub ty: TypeRef,
    pub default_value: Option<Value>,
}

impl VariableDefinition {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            default_value: None,
        }
    }

    /// Sets the default value.
    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// Delivery directives applied to a selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives {
    /// `@defer`: delivered later as a single patch.
    pub defer: bool,
    /// `@stream`: list elements delivered one patch each.
    pub stream: bool,
    /// `@live`: re-delivered every time the value changes.
    pub live: bool,
    /// Label echoed on the patches of this selection.
    pub label: Option<String>,
    /// `@stream(initialCount:)`: elements kept in the initial result.
    pub initial_count: usize,
}

impl Directives {
    /// Returns true if any directive asks for out-of-band delivery.
    pub fn is_incremental(&self) -> bool {
        self.defer || self.stream || self.live
    }
}

/// A field selection.
#[derive(Debug, Clone)]
pub struct Selection {
    pub name: String,
    pub alias: Option<String>,
    pub arguments: IndexMap<String, ArgValue>,
    pub selection_set: SelectionSet,
    pub directives: Directives,
    /// Restricts the selection to parents of this concrete type
    /// (a flattened inline fragment).
    pub type_condition: Option<String>,
    pub location: Option<Location>,
}

impl Selection {
    /// Creates a selection of the named field.
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            arguments: IndexMap::new(),
            selection_set: Vec::new(),
            directives: Directives::default(),
            type_condition: None,
            location: None,
        }
    }

    /// Returns the key under which the field appears in the response.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn argument(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    pub fn selections(mut self, selections: impl IntoIterator<Item = Selection>) -> Self {
        self.selection_set = selections.into_iter().map(Arc::new).collect();
        self
    }

    pub fn defer(mut self) -> Self {
        self.directives.defer = true;
        self
    }

    pub fn stream(mut self) -> Self {
        self.directives.stream = true;
        self
    }

    pub fn live(mut self) -> Self {
        self.directives.live = true;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.directives.label = Some(label.into());
        self
    }

    pub fn initial_count(mut self, count: usize) -> Self {
        self.directives.initial_count = count;
        self
    }

    pub fn on_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_condition = Some(type_name.into());
        self
    }

    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.location = Some(Location { line, column });
        self
    }
}

/// An argument value as written in the document.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Literal(Value),
    Variable(String),
    List(Vec<ArgValue>),
    Object(IndexMap<String, ArgValue>),
}

impl ArgValue {
    pub fn variable(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }

    /// Substitutes variable references.
    ///
    /// Returns `None` when the value is a bare reference to a variable that
    /// was not provided, so that the argument counts as absent.
    pub fn substitute(&self, variables: &Map<String, Value>) -> Option<Value> {
        match self {
            Self::Literal(value) => Some(value.clone()),
            Self::Variable(name) => variables.get(name).cloned(),
            Self::List(items) => Some(Value::Array(
                items
                    .iter()
                    .map(|item| item.substitute(variables).unwrap_or(Value::Null))
                    .collect(),
            )),
            Self::Object(fields) => Some(Value::Object(
                fields
                    .iter()
                    .filter_map(|(name, value)| {
                        value.substitute(variables).map(|v| (name.clone(), v))
                    })
                    .collect(),
            )),
        }
    }
}

impl From<Value> for ArgValue {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}
