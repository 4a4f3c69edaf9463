//! Value coercion.
//!
//! Input coercion checks argument and variable values against their declared
//! [`TypeRef`] before a resolver sees them. Output coercion checks the leaf
//! values resolvers produce against scalar and enum types.

use crate::document::{Operation, Selection};
use crate::executor::ExecutionError;
use crate::resolver::{ResolverArgs, ResolverError};
use crate::schema::{FieldDef, InputFieldDef, Schema, TypeDef, TypeRef};
use indexmap::IndexMap;
use serde_json::{Map, Number, Value};

/// Coerces the variables an operation declares.
///
/// Missing variables take their declared default. A variable without default
/// whose type is not nullable must be provided and must not be null.
pub fn coerce_variables(
    operation: &Operation,
    provided: &Map<String, Value>,
    schema: &Schema,
) -> Result<Map<String, Value>, ExecutionError> {
    let mut coerced = Map::new();
    for definition in &operation.variables {
        let value = match provided.get(&definition.name) {
            Some(value) => value,
            None => match &definition.default_value {
                Some(default) => default,
                None if definition.ty.is_nullable() => continue,
                None => return Err(ExecutionError::MissingVariable(definition.name.clone())),
            },
        };
        let value = coerce_input(value, &definition.ty, schema).map_err(|message| {
            ExecutionError::InvalidVariable {
                name: definition.name.clone(),
                message,
            }
        })?;
        coerced.insert(definition.name.clone(), value);
    }
    Ok(coerced)
}

/// Builds the arguments of a field from the selection, substituting variables.
pub fn coerce_arguments(
    field: &FieldDef,
    selection: &Selection,
    variables: &Map<String, Value>,
    schema: &Schema,
) -> Result<ResolverArgs, ResolverError> {
    let mut args = ResolverArgs::new();
    for (name, definition) in &field.arguments {
        let value = selection
            .arguments
            .get(name)
            .and_then(|value| value.substitute(variables))
            .or_else(|| definition.default_value.clone());
        match value {
            Some(value) => {
                let value = coerce_input(&value, &definition.ty, schema)
                    .map_err(|message| ResolverError::ArgumentParseError(name.clone(), message))?;
                args.set(name.clone(), value);
            }
            None if definition.ty.is_nullable() => {}
            None => return Err(ResolverError::MissingArgument(name.clone())),
        }
    }
    Ok(args)
}

/// Coerces an input value against a type.
pub fn coerce_input(value: &Value, ty: &TypeRef, schema: &Schema) -> Result<Value, String> {
    match ty {
        TypeRef::Option(_) if value.is_null() => Ok(Value::Null),
        TypeRef::Option(inner) => coerce_input(value, inner, schema),
        _ if value.is_null() => Err(format!("Expected a non-null value of type {ty}")),
        TypeRef::List(item) => match value {
            Value::Array(items) => items
                .iter()
                .map(|value| coerce_input(value, item, schema))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            // A single value is accepted where a list is expected
            single => Ok(Value::Array(vec![coerce_input(single, item, schema)?])),
        },
        TypeRef::Named(name) => match schema.get_type(name) {
            Some(TypeDef::Scalar(_)) => coerce_scalar(value, name)
                .ok_or_else(|| format!("Expected a value of type {name}, found {value}")),
            Some(TypeDef::Enum(def)) => match value.as_str() {
                Some(member) if def.has_value(member) => Ok(value.clone()),
                _ => Err(format!("Value {value} is not a member of enum {name}")),
            },
            Some(TypeDef::InputObject(def)) => coerce_input_object(value, name, &def.fields, schema),
            Some(_) => Err(format!("Type {name} is not an input type")),
            None => Err(format!("Unknown type {name}")),
        },
    }
}

fn coerce_input_object(
    value: &Value,
    type_name: &str,
    fields: &IndexMap<String, InputFieldDef>,
    schema: &Schema,
) -> Result<Value, String> {
    let Value::Object(object) = value else {
        return Err(format!("Expected an object of type {type_name}, found {value}"));
    };
    if let Some(unknown) = object.keys().find(|key| !fields.contains_key(*key)) {
        return Err(format!("Field {unknown} is not defined on {type_name}"));
    }

    let mut coerced = Map::new();
    for (name, field) in fields {
        match object.get(name).or(field.default_value.as_ref()) {
            Some(value) => {
                let value = coerce_input(value, &field.ty, schema)
                    .map_err(|message| format!("{type_name}.{name}: {message}"))?;
                coerced.insert(name.clone(), value);
            }
            None if field.ty.is_nullable() => {}
            None => return Err(format!("Missing required field {type_name}.{name}")),
        }
    }
    Ok(Value::Object(coerced))
}

/// Checks a resolved leaf value against its scalar or enum type.
pub fn coerce_leaf(value: Value, type_name: &str, schema: &Schema) -> Result<Value, ResolverError> {
    match schema.get_type(type_name) {
        Some(TypeDef::Enum(def)) => match value.as_str() {
            Some(member) if def.has_value(member) => Ok(value),
            _ => Err(ResolverError::Coercion(format!(
                "Enum {type_name} cannot represent value {value}"
            ))),
        },
        Some(TypeDef::Scalar(_)) => coerce_scalar(&value, type_name).ok_or_else(|| {
            ResolverError::Coercion(format!("{type_name} cannot represent value {value}"))
        }),
        _ => Err(ResolverError::Internal(format!(
            "{type_name} is not a leaf type"
        ))),
    }
}

/// Coerces a non-null value to a scalar; custom scalars pass through.
fn coerce_scalar(value: &Value, type_name: &str) -> Option<Value> {
    match type_name {
        "Int" => {
            let int = match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))?,
                _ => return None,
            };
            i32::try_from(int).ok().map(Value::from)
        }
        "Float" => value
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number),
        "String" => value.is_string().then(|| value.clone()),
        "Boolean" => value.is_boolean().then(|| value.clone()),
        "ID" => match value {
            Value::String(_) => Some(value.clone()),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(Value::String(n.to_string())),
            _ => None,
        },
        _ => (!value.is_null()).then(|| value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ArgValue, VariableDefinition};
    use crate::schema::{EnumDef, InputObjectDef, SchemaBuilder};
    use serde_json::json;

    fn schema() -> Schema {
        SchemaBuilder::new()
            .add_type(TypeDef::Enum(EnumDef::new("Status", ["UP", "DOWN"])))
            .add_type(TypeDef::InputObject(
                InputObjectDef::new("RegionFilter")
                    .field(InputFieldDef::new("status", TypeRef::named("Status")))
                    .field(
                        InputFieldDef::new("limit", TypeRef::option(TypeRef::named("Int")))
                            .default_value(json!(10)),
                    ),
            ))
            .build()
    }

    #[test]
    fn test_coerce_scalars() {
        let schema = schema();
        let int = TypeRef::named("Int");

        assert_eq!(coerce_input(&json!(3), &int, &schema), Ok(json!(3)));
        assert_eq!(coerce_input(&json!(3.0), &int, &schema), Ok(json!(3)));
        assert!(coerce_input(&json!(3.5), &int, &schema).is_err());
        assert!(coerce_input(&json!(i64::MAX), &int, &schema).is_err());
        assert!(coerce_input(&json!("3"), &int, &schema).is_err());
        assert_eq!(
            coerce_input(&json!(7), &TypeRef::named("ID"), &schema),
            Ok(json!("7"))
        );
        assert!(coerce_input(&Value::Null, &int, &schema).is_err());
        assert_eq!(
            coerce_input(&Value::Null, &TypeRef::option(int), &schema),
            Ok(Value::Null)
        );
    }

    #[test]
    fn test_coerce_lists_and_objects() {
        let schema = schema();
        let list = TypeRef::list(TypeRef::named("Status"));

        assert_eq!(coerce_input(&json!("UP"), &list, &schema), Ok(json!(["UP"])));
        assert!(coerce_input(&json!(["UP", "SIDEWAYS"]), &list, &schema).is_err());

        let filter = TypeRef::named("RegionFilter");
        assert_eq!(
            coerce_input(&json!({"status": "DOWN"}), &filter, &schema),
            Ok(json!({"status": "DOWN", "limit": 10}))
        );
        assert!(coerce_input(&json!({"limit": 1}), &filter, &schema).is_err());
        assert!(coerce_input(&json!({"status": "UP", "other": 1}), &filter, &schema).is_err());
    }

    #[test]
    fn test_coerce_variables() {
        let schema = schema();
        let operation = Operation::query()
            .variable(VariableDefinition::new("id", TypeRef::named("ID")))
            .variable(
                VariableDefinition::new("first", TypeRef::named("Int")).default_value(json!(2)),
            )
            .variable(VariableDefinition::new(
                "after",
                TypeRef::option(TypeRef::named("String")),
            ));

        let mut provided = Map::new();
        provided.insert("id".to_string(), json!(1));
        let coerced = coerce_variables(&operation, &provided, &schema).unwrap();
        assert_eq!(Value::Object(coerced), json!({"id": "1", "first": 2}));

        assert!(matches!(
            coerce_variables(&operation, &Map::new(), &schema),
            Err(ExecutionError::MissingVariable(name)) if name == "id"
        ));

        provided.insert("first".to_string(), json!("two"));
        assert!(matches!(
            coerce_variables(&operation, &provided, &schema),
            Err(ExecutionError::InvalidVariable { name, .. }) if name == "first"
        ));
    }

    #[test]
    fn test_coerce_arguments() {
        let schema = schema();
        let field = FieldDef::new("regions", TypeRef::list(TypeRef::named("String")))
            .argument(InputFieldDef::new("status", TypeRef::named("Status")))
            .argument(
                InputFieldDef::new("first", TypeRef::option(TypeRef::named("Int")))
                    .default_value(json!(5)),
            );

        let mut variables = Map::new();
        variables.insert("status".to_string(), json!("UP"));
        let selection = Selection::field("regions").argument("status", ArgValue::variable("status"));

        let args = coerce_arguments(&field, &selection, &variables, &schema).unwrap();
        assert_eq!(args.get("status"), Some(&json!("UP")));
        assert_eq!(args.get_as::<i64>("first"), Some(5));

        let missing = Selection::field("regions");
        assert_eq!(
            coerce_arguments(&field, &missing, &variables, &schema).unwrap_err(),
            ResolverError::MissingArgument("status".to_string())
        );
    }

    #[test]
    fn test_coerce_leaf() {
        let schema = schema();

        assert_eq!(coerce_leaf(json!("UP"), "Status", &schema), Ok(json!("UP")));
        assert!(matches!(
            coerce_leaf(json!("LEFT"), "Status", &schema),
            Err(ResolverError::Coercion(_))
        ));
        assert_eq!(coerce_leaf(json!(1.5), "Float", &schema), Ok(json!(1.5)));
        assert!(coerce_leaf(json!(true), "String", &schema).is_err());
        assert!(coerce_leaf(json!("x"), "Missing", &schema).is_err());
    }
}
