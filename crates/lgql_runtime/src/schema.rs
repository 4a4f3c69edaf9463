//! Schema model consumed by the executor.
//!
//! The schema is built once (by an SDL front-end or by hand through
//! [`SchemaBuilder`]) and then shared read-only between every execution.
//! Types are non-null unless wrapped in [`TypeRef::Option`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const BUILTIN_SCALARS: [&str; 5] = ["Int", "Float", "String", "Boolean", "ID"];

/// Type definitions keyed by name, plus the names of the root types.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub query_type: Option<String>,
    pub mutation_type: Option<String>,
    pub types: IndexMap<String, TypeDef>,
}

impl Schema {
    pub fn get_type(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    /// Field table of an object or interface type.
    pub fn fields_of(&self, type_name: &str) -> Option<&IndexMap<String, FieldDef>> {
        match self.types.get(type_name)? {
            TypeDef::Object(object) => Some(&object.fields),
            TypeDef::Interface(interface) => Some(&interface.fields),
            _ => None,
        }
    }

    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&FieldDef> {
        self.fields_of(type_name)?.get(field_name)
    }

    /// Scalars and enums complete without a sub-selection.
    pub fn is_leaf_type(&self, name: &str) -> bool {
        matches!(
            self.types.get(name),
            Some(TypeDef::Scalar(_) | TypeDef::Enum(_))
        )
    }

    pub fn is_abstract_type(&self, name: &str) -> bool {
        matches!(
            self.types.get(name),
            Some(TypeDef::Interface(_) | TypeDef::Union(_))
        )
    }

    /// True if `object` may appear where `abstract_type` is expected. An
    /// object type is only possible for itself.
    pub fn is_possible_type(&self, abstract_type: &str, object: &str) -> bool {
        match self.types.get(abstract_type) {
            Some(TypeDef::Union(union)) => union.members.iter().any(|m| m == object),
            Some(TypeDef::Interface(_)) => matches!(
                self.types.get(object),
                Some(TypeDef::Object(def)) if def.implements.iter().any(|i| i == abstract_type)
            ),
            Some(TypeDef::Object(_)) => abstract_type == object,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TypeDef {
    Scalar(String),
    Object(ObjectDef),
    Interface(InterfaceDef),
    Union(UnionDef),
    Enum(EnumDef),
    InputObject(InputObjectDef),
}

impl TypeDef {
    pub fn name(&self) -> &str {
        match self {
            Self::Scalar(name) => name,
            Self::Object(def) => &def.name,
            Self::Interface(def) => &def.name,
            Self::Union(def) => &def.name,
            Self::Enum(def) => &def.name,
            Self::InputObject(def) => &def.name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectDef {
    pub name: String,
    pub fields: IndexMap<String, FieldDef>,
    /// Interfaces this object can stand in for.
    pub implements: Vec<String>,
}

impl ObjectDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: IndexMap::new(),
            implements: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.implements.push(interface.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceDef {
    pub name: String,
    pub fields: IndexMap<String, FieldDef>,
}

impl InterfaceDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: IndexMap::new(),
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnionDef {
    pub name: String,
    pub members: Vec<String>,
}

impl UnionDef {
    pub fn new<I, S>(name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            members: members.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: String,
    pub values: Vec<String>,
}

impl EnumDef {
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_value(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputObjectDef {
    pub name: String,
    pub fields: IndexMap<String, InputFieldDef>,
}

impl InputObjectDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: IndexMap::new(),
        }
    }

    pub fn field(mut self, field: InputFieldDef) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }
}

/// An output field.
///
/// `live` and `streamable` declare the resolver's return capability: a field
/// carrying either flag is resolved to a [`crate::live::LiveHandle`] instead of
/// a plain value. For `live` fields each emission replaces the field's value,
/// for `streamable` fields each emission is the next list element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeRef,
    pub arguments: IndexMap<String, InputFieldDef>,
    pub live: bool,
    pub streamable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            arguments: IndexMap::new(),
            live: false,
            streamable: false,
            description: None,
        }
    }

    pub fn argument(mut self, argument: InputFieldDef) -> Self {
        self.arguments.insert(argument.name.clone(), argument);
        self
    }

    /// Resolves to a live handle of successive values.
    pub fn live(mut self) -> Self {
        self.live = true;
        self
    }

    /// Resolves to a live handle of list elements.
    pub fn streamable(mut self) -> Self {
        self.streamable = true;
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn capability(&self) -> Capability {
        match (self.streamable, self.live) {
            (true, _) => Capability::Sequence,
            (false, true) => Capability::Live,
            (false, false) => Capability::Value,
        }
    }
}

/// Declared return capability of a field resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// A single value.
    Value,
    /// A live handle whose emissions are successive values of the field.
    Live,
    /// A live handle whose emissions are the elements of a list.
    Sequence,
}

/// An argument or input object field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputFieldDef {
    pub name: String,
    pub ty: TypeRef,
    /// Used when the caller leaves the input out.
    pub default_value: Option<Value>,
}

impl InputFieldDef {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            default_value: None,
        }
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// Output or input type of a field. `Named` and `List` are non-null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeRef {
    Named(String),
    Option(Box<TypeRef>),
    List(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn option(inner: TypeRef) -> Self {
        Self::Option(Box::new(inner))
    }

    pub fn list(inner: TypeRef) -> Self {
        Self::List(Box::new(inner))
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, Self::Option(_))
    }

    /// Strips a nullable wrapper, if any.
    pub fn non_null(&self) -> &TypeRef {
        match self {
            Self::Option(inner) => inner,
            other => other,
        }
    }

    /// Element type of a list, looking through a nullable wrapper.
    pub fn list_item(&self) -> Option<&TypeRef> {
        match self.non_null() {
            Self::List(inner) => Some(inner),
            _ => None,
        }
    }

    /// Innermost named type.
    pub fn named_type(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::Option(inner) | Self::List(inner) => inner.named_type(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => f.write_str(name),
            Self::Option(inner) => write!(f, "Option<{inner}>"),
            Self::List(inner) => write!(f, "List<{inner}>"),
        }
    }
}

/// Assembles a [`Schema`]. The built-in scalars are always present.
#[derive(Debug)]
pub struct SchemaBuilder {
    schema: Schema,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaBuilder {
    pub fn new() -> Self {
        let types = BUILTIN_SCALARS
            .iter()
            .map(|name| (name.to_string(), TypeDef::Scalar(name.to_string())))
            .collect();
        Self {
            schema: Schema {
                types,
                ..Schema::default()
            },
        }
    }

    pub fn query_type(mut self, name: impl Into<String>) -> Self {
        self.schema.query_type = Some(name.into());
        self
    }

    pub fn mutation_type(mut self, name: impl Into<String>) -> Self {
        self.schema.mutation_type = Some(name.into());
        self
    }

    /// Adds a type, replacing any earlier type of the same name.
    pub fn add_type(mut self, type_def: TypeDef) -> Self {
        self.schema
            .types
            .insert(type_def.name().to_string(), type_def);
        self
    }

    pub fn object(self, object: ObjectDef) -> Self {
        self.add_type(TypeDef::Object(object))
    }

    pub fn build(self) -> Schema {
        self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regions_schema() -> Schema {
        SchemaBuilder::new()
            .query_type("Query")
            .object(
                ObjectDef::new("Region")
                    .implements("Node")
                    .field(FieldDef::new("id", TypeRef::named("ID")))
                    .field(FieldDef::new("status", TypeRef::option(TypeRef::named("Int"))).live()),
            )
            .add_type(TypeDef::Interface(
                InterfaceDef::new("Node").field(FieldDef::new("id", TypeRef::named("ID"))),
            ))
            .object(
                ObjectDef::new("Query").field(
                    FieldDef::new(
                        "regions",
                        TypeRef::list(TypeRef::option(TypeRef::named("Region"))),
                    )
                    .streamable(),
                ),
            )
            .build()
    }

    #[test]
    fn test_schema_builder() {
        let schema = regions_schema();

        assert_eq!(schema.query_type.as_deref(), Some("Query"));
        assert_eq!(schema.mutation_type, None);
        assert!(schema.is_leaf_type("Int"));
        assert!(!schema.is_leaf_type("Region"));
        assert!(schema.field("Region", "status").is_some_and(|f| f.live));
        assert!(schema.field("Node", "id").is_some());
        assert!(schema.field("Region", "missing").is_none());
    }

    #[test]
    fn test_field_capability() {
        let schema = regions_schema();

        let regions = schema.field("Query", "regions").unwrap();
        assert_eq!(regions.capability(), Capability::Sequence);
        assert_eq!(
            schema.field("Region", "status").unwrap().capability(),
            Capability::Live
        );
        assert_eq!(
            schema.field("Region", "id").unwrap().capability(),
            Capability::Value
        );
    }

    #[test]
    fn test_type_ref_helpers() {
        let ty = TypeRef::option(TypeRef::list(TypeRef::named("Region")));

        assert!(ty.is_nullable());
        assert_eq!(ty.list_item(), Some(&TypeRef::named("Region")));
        assert_eq!(ty.named_type(), "Region");
        assert_eq!(ty.to_string(), "Option<List<Region>>");
        assert_eq!(TypeRef::named("Int").list_item(), None);
    }

    #[test]
    fn test_possible_types() {
        let schema = SchemaBuilder::new()
            .add_type(TypeDef::Union(UnionDef::new("Place", ["Region"])))
            .build();
        assert!(schema.is_possible_type("Place", "Region"));
        assert!(!schema.is_possible_type("Place", "Zone"));

        let schema = regions_schema();
        assert!(schema.is_abstract_type("Node"));
        assert!(schema.is_possible_type("Node", "Region"));
        assert!(!schema.is_possible_type("Node", "Query"));
        assert!(schema.is_possible_type("Region", "Region"));
    }
}
