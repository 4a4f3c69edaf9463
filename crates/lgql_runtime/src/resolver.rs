//! Resolver dispatch.
//!
//! Resolvers are bound per `Type.field` in a [`ResolverMap`]. A resolver hands
//! back either a plain value or a [`LiveHandle`]; which of the two a field
//! must produce is declared by the schema (see [`Capability`]) and checked by
//! [`ResolverMap::invoke`].

use crate::document::Directives;
use crate::executor::Context;
use crate::live::LiveHandle;
use crate::response::{FieldError, Path};
use crate::schema::{Capability, FieldDef, TypeRef};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

/// Coerced field arguments, in the order the field declares them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolverArgs(IndexMap<String, Value>);

impl ResolverArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Deserializes an argument, or `None` when it is absent or has the
    /// wrong shape.
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        T::deserialize(self.0.get(name)?).ok()
    }

    /// Like [`get_as`](Self::get_as), but absence and shape mismatches are
    /// errors the resolver can propagate with `?`.
    pub fn require<T: DeserializeOwned>(&self, name: &str) -> Result<T, ResolverError> {
        let Some(value) = self.0.get(name) else {
            return Err(ResolverError::MissingArgument(name.to_string()));
        };
        T::deserialize(value)
            .map_err(|e| ResolverError::ArgumentParseError(name.to_string(), e.to_string()))
    }

    pub fn all(&self) -> &IndexMap<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for ResolverArgs {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Where in the operation a resolver is being called, and how the caller
/// asked for the field to be delivered.
#[derive(Debug, Clone)]
pub struct ResolverInfo {
    pub parent_type: String,
    pub field: String,
    /// `None` when the info was built outside an execution.
    pub return_type: Option<TypeRef>,
    /// Result path of the field, list indices included.
    pub path: Path,
    pub directives: Directives,
    /// Set when the execution has a patch sink, so delivery directives take
    /// effect.
    pub incremental: bool,
}

impl ResolverInfo {
    pub fn new(field: impl Into<String>, parent_type: impl Into<String>) -> Self {
        Self {
            parent_type: parent_type.into(),
            field: field.into(),
            return_type: None,
            path: Path::new(),
            directives: Directives::default(),
            incremental: false,
        }
    }

    pub fn returning(mut self, ty: TypeRef) -> Self {
        self.return_type = Some(ty);
        self
    }

    pub fn at(mut self, path: Path) -> Self {
        self.path = path;
        self
    }

    pub fn with_directives(mut self, directives: Directives, incremental: bool) -> Self {
        self.directives = directives;
        self.incremental = incremental;
        self
    }

    /// `Type.field`
    pub fn coordinate(&self) -> String {
        format!("{}.{}", self.parent_type, self.field)
    }

    /// True when values after the first will reach the client. A live
    /// resolver may stop producing after one value otherwise.
    pub fn is_live(&self) -> bool {
        self.incremental && self.directives.live
    }
}

/// What a resolver hands back.
#[derive(Debug)]
pub enum Resolution {
    /// An immediate value.
    Value(Value),
    /// A source of successive values (live fields) or elements (streamable fields).
    Live(LiveHandle),
}

impl Resolution {
    fn describe(&self) -> &'static str {
        match self {
            Self::Value(_) => "a value",
            Self::Live(_) => "a live handle",
        }
    }
}

impl From<Value> for Resolution {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<LiveHandle> for Resolution {
    fn from(handle: LiveHandle) -> Self {
        Self::Live(handle)
    }
}

pub type ResolverResult = Result<Resolution, ResolverError>;

pub type ResolverFuture<'a> = Pin<Box<dyn Future<Output = ResolverResult> + Send + 'a>>;

/// Error from a resolver.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolverError {
    /// No resolver is bound and there is no default.
    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    #[error("Failed to parse argument '{0}': {1}")]
    ArgumentParseError(String, String),

    #[error("Null value for non-nullable field: {0}")]
    NullValue(String),

    /// The resolved value does not fit the declared type.
    #[error("{0}")]
    Coercion(String),

    /// The resolver returned a value where a live handle was declared, or the
    /// other way round.
    #[error("Field {field} resolved to {found}, expected {expected}")]
    Capability {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Application error, reported verbatim.
    #[error("{0}")]
    Custom(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResolverError {
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }
}

impl From<ResolverError> for FieldError {
    fn from(error: ResolverError) -> Self {
        FieldError::new(error.to_string())
    }
}

/// Produces the value of one field for one parent object.
pub trait Resolver: Send + Sync {
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a>;
}

/// Adapts a synchronous closure. The closure may return anything that
/// converts into a [`Resolution`], typically a `serde_json::Value` or a
/// [`LiveHandle`].
pub struct FnResolver<F, R> {
    func: F,
    _output: PhantomData<fn() -> R>,
}

impl<F, R> FnResolver<F, R>
where
    F: Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> Result<R, ResolverError>
        + Send
        + Sync,
    R: Into<Resolution>,
{
    pub fn new(func: F) -> Self {
        Self {
            func,
            _output: PhantomData,
        }
    }
}

impl<F, R> Resolver for FnResolver<F, R>
where
    F: Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> Result<R, ResolverError>
        + Send
        + Sync,
    R: Into<Resolution>,
{
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        let outcome: ResolverResult = (self.func)(parent, args, ctx, info).map(Into::into);
        Box::pin(std::future::ready(outcome))
    }
}

/// Adapts an async closure. The closure receives owned copies of its inputs
/// so the future it returns can outlive the call.
pub struct AsyncFnResolver<F, Fut, R> {
    func: F,
    _output: PhantomData<fn() -> (Fut, R)>,
}

impl<F, Fut, R> AsyncFnResolver<F, Fut, R>
where
    F: Fn(Value, ResolverArgs, Context, ResolverInfo) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, ResolverError>> + Send + 'static,
    R: Into<Resolution>,
{
    pub fn new(func: F) -> Self {
        Self {
            func,
            _output: PhantomData,
        }
    }
}

impl<F, Fut, R> Resolver for AsyncFnResolver<F, Fut, R>
where
    F: Fn(Value, ResolverArgs, Context, ResolverInfo) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, ResolverError>> + Send + 'static,
    R: Into<Resolution>,
{
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        let pending = (self.func)(parent.clone(), args.clone(), ctx.clone(), info.clone());
        Box::pin(async move {
            let outcome: ResolverResult = pending.await.map(Into::into);
            outcome
        })
    }
}

/// Reads the field straight off the parent object, trying the snake_case
/// spelling when the exact key is absent.
pub struct PropertyResolver;

impl Resolver for PropertyResolver {
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        _args: &'a ResolverArgs,
        _ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        let outcome: ResolverResult = match parent {
            Value::Object(object) => Ok(object
                .get(&info.field)
                .or_else(|| object.get(&snake_case(&info.field)))
                .cloned()
                .unwrap_or_default()
                .into()),
            Value::Null => Ok(Value::Null.into()),
            _ => Err(ResolverError::FieldNotFound(info.coordinate())),
        };
        Box::pin(std::future::ready(outcome))
    }
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if !out.is_empty() {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// A parent value bound to its concrete object type.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverHandle {
    pub type_name: String,
    pub value: Value,
}

impl ResolverHandle {
    pub fn new(type_name: impl Into<String>, value: Value) -> Self {
        Self {
            type_name: type_name.into(),
            value,
        }
    }
}

/// Resolvers keyed by object type, then field name. Fields without a binding
/// fall back to [`PropertyResolver`] unless the fallback is removed.
pub struct ResolverMap {
    by_type: FxHashMap<String, FxHashMap<String, Box<dyn Resolver>>>,
    fallback: Option<Box<dyn Resolver>>,
}

impl Default for ResolverMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverMap {
    pub fn new() -> Self {
        Self {
            by_type: FxHashMap::default(),
            fallback: Some(Box::new(PropertyResolver)),
        }
    }

    /// Binds `resolver` to `type_name.field_name`, replacing any earlier
    /// binding.
    pub fn register<R: Resolver + 'static>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        resolver: R,
    ) {
        self.by_type
            .entry(type_name.into())
            .or_default()
            .insert(field_name.into(), Box::new(resolver));
    }

    pub fn register_fn<F, R>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        func: F,
    ) where
        F: Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> Result<R, ResolverError>
            + Send
            + Sync
            + 'static,
        R: Into<Resolution> + 'static,
    {
        self.register(type_name, field_name, FnResolver::new(func));
    }

    pub fn register_async<F, Fut, R>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        func: F,
    ) where
        F: Fn(Value, ResolverArgs, Context, ResolverInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ResolverError>> + Send + 'static,
        R: Into<Resolution> + 'static,
    {
        self.register(type_name, field_name, AsyncFnResolver::new(func));
    }

    /// The resolver bound to the field, or the fallback.
    pub fn get(&self, type_name: &str, field_name: &str) -> Option<&dyn Resolver> {
        self.by_type
            .get(type_name)
            .and_then(|fields| fields.get(field_name))
            .or(self.fallback.as_ref())
            .map(|resolver| resolver.as_ref())
    }

    pub fn set_default<R: Resolver + 'static>(&mut self, resolver: R) {
        self.fallback = Some(Box::new(resolver));
    }

    /// Unbound fields become `FieldNotFound` errors.
    pub fn remove_default(&mut self) {
        self.fallback = None;
    }

    /// Calls the resolver bound to `field` on `parent`.
    ///
    /// The resolution must match the capability the schema declares for the
    /// field: plain fields resolve to values, `live` and `streamable` fields
    /// to live handles.
    pub async fn invoke(
        &self,
        parent: &ResolverHandle,
        field: &FieldDef,
        args: &ResolverArgs,
        ctx: &Context,
        info: &ResolverInfo,
    ) -> ResolverResult {
        let coordinate = || format!("{}.{}", parent.type_name, field.name);
        let resolver = self
            .get(&parent.type_name, &field.name)
            .ok_or_else(|| ResolverError::FieldNotFound(coordinate()))?;
        let resolution = resolver.resolve(&parent.value, args, ctx, info).await?;

        let expected = field.capability();
        let fits = matches!(
            (expected, &resolution),
            (Capability::Value, Resolution::Value(_))
                | (Capability::Live | Capability::Sequence, Resolution::Live(_))
        );
        if fits {
            return Ok(resolution);
        }
        Err(ResolverError::Capability {
            field: coordinate(),
            expected: match expected {
                Capability::Value => "a value",
                Capability::Live | Capability::Sequence => "a live handle",
            },
            found: resolution.describe(),
        })
    }
}

impl fmt::Debug for ResolverMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound: usize = self.by_type.values().map(|fields| fields.len()).sum();
        f.debug_struct("ResolverMap")
            .field("bound", &bound)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn value(resolution: ResolverResult) -> Value {
        match resolution.unwrap() {
            Resolution::Value(value) => value,
            Resolution::Live(_) => panic!("expected a value"),
        }
    }

    #[test]
    fn test_resolver_args() {
        let args: ResolverArgs = [("id", json!(123)), ("name", json!("test"))]
            .into_iter()
            .collect();

        assert_eq!(args.get_as::<i64>("id"), Some(123));
        assert_eq!(args.get_as::<String>("name"), Some("test".to_string()));
        assert_eq!(args.get_as::<i64>("missing"), None);
        assert!(matches!(
            args.require::<i64>("name"),
            Err(ResolverError::ArgumentParseError(name, _)) if name == "name"
        ));
        assert_eq!(
            args.require::<i64>("limit"),
            Err(ResolverError::MissingArgument("limit".to_string()))
        );
        assert_eq!(args.all().keys().collect::<Vec<_>>(), vec!["id", "name"]);
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("delayMs"), "delay_ms");
        assert_eq!(snake_case("createdAtUtc"), "created_at_utc");
        assert_eq!(snake_case("id"), "id");
    }

    #[test]
    fn test_info_is_live() {
        let info = ResolverInfo::new("status", "Region");
        assert_eq!(info.coordinate(), "Region.status");
        assert!(!info.is_live());

        let live = Directives {
            live: true,
            ..Directives::default()
        };
        assert!(!info.clone().with_directives(live.clone(), false).is_live());
        assert!(info.with_directives(live, true).is_live());
    }

    #[tokio::test]
    async fn test_property_resolver() {
        let parent = json!({"name": "Alice", "delay_ms": 30});
        let args = ResolverArgs::new();
        let ctx = Context::new();

        let info = ResolverInfo::new("name", "Region");
        let result = PropertyResolver.resolve(&parent, &args, &ctx, &info).await;
        assert_eq!(value(result), json!("Alice"));

        let info = ResolverInfo::new("delayMs", "Region");
        let result = PropertyResolver.resolve(&parent, &args, &ctx, &info).await;
        assert_eq!(value(result), json!(30));

        let info = ResolverInfo::new("owner", "Region");
        let result = PropertyResolver.resolve(&parent, &args, &ctx, &info).await;
        assert_eq!(value(result), Value::Null);

        let result = PropertyResolver.resolve(&json!(3), &args, &ctx, &info).await;
        assert_eq!(
            result.unwrap_err(),
            ResolverError::FieldNotFound("Region.owner".to_string())
        );
    }

    #[tokio::test]
    async fn test_fn_resolver() {
        let resolver = FnResolver::new(|_parent, args, _ctx, _info| {
            let id: i64 = args.require("id")?;
            Ok(json!({"id": id, "name": "Region"}))
        });

        let mut args = ResolverArgs::new();
        args.set("id", json!(42));
        let info = ResolverInfo::new("region", "Query");

        let result = resolver.resolve(&json!({}), &args, &Context::new(), &info).await;
        assert_eq!(value(result), json!({"id": 42, "name": "Region"}));

        let result = resolver
            .resolve(&json!({}), &ResolverArgs::new(), &Context::new(), &info)
            .await;
        assert!(matches!(result, Err(ResolverError::MissingArgument(_))));
    }

    #[tokio::test]
    async fn test_async_resolver_sees_info() {
        let resolver = AsyncFnResolver::new(|parent: Value, _args, _ctx, info: ResolverInfo| async move {
            Ok(json!(format!("{} of {}", info.coordinate(), parent["id"])))
        });

        let info = ResolverInfo::new("name", "Region");
        let result = resolver
            .resolve(&json!({"id": 7}), &ResolverArgs::new(), &Context::new(), &info)
            .await;
        assert_eq!(value(result), json!("Region.name of 7"));
    }

    #[tokio::test]
    async fn test_resolver_map_lookup() {
        let mut map = ResolverMap::new();
        map.register_fn("Query", "hello", |_parent, _args, _ctx, _info| {
            Ok(json!("Hello, World!"))
        });

        let args = ResolverArgs::new();
        let ctx = Context::new();

        let resolver = map.get("Query", "hello").unwrap();
        let info = ResolverInfo::new("hello", "Query");
        let result = resolver.resolve(&json!({}), &args, &ctx, &info).await;
        assert_eq!(value(result), json!("Hello, World!"));

        // Same field name on another type goes to the fallback
        let resolver = map.get("Region", "hello").unwrap();
        let info = ResolverInfo::new("hello", "Region");
        let result = resolver.resolve(&json!({"hello": "hi"}), &args, &ctx, &info).await;
        assert_eq!(value(result), json!("hi"));
    }

    #[tokio::test]
    async fn test_invoke_checks_capability() {
        let mut map = ResolverMap::new();
        map.register_async("Region", "status", |_parent, _args, _ctx, _info| async {
            Ok(LiveHandle::once(json!(1)))
        });
        map.register_fn("Region", "name", |_parent, _args, _ctx, _info| {
            Ok(LiveHandle::once(json!("late")))
        });

        let parent = ResolverHandle::new("Region", json!({"id": "test"}));
        let args = ResolverArgs::new();
        let ctx = Context::new();

        let status = FieldDef::new("status", TypeRef::option(TypeRef::named("Int"))).live();
        let info = ResolverInfo::new("status", "Region");
        let resolution = map.invoke(&parent, &status, &args, &ctx, &info).await;
        assert!(matches!(resolution, Ok(Resolution::Live(_))));

        let name = FieldDef::new("name", TypeRef::named("String"));
        let info = ResolverInfo::new("name", "Region");
        let resolution = map.invoke(&parent, &name, &args, &ctx, &info).await;
        assert!(matches!(
            resolution,
            Err(ResolverError::Capability { found: "a live handle", .. })
        ));

        // A live field left to the fallback is a mismatch too
        let id = FieldDef::new("id", TypeRef::named("ID")).live();
        let info = ResolverInfo::new("id", "Region");
        let resolution = map.invoke(&parent, &id, &args, &ctx, &info).await;
        assert!(matches!(
            resolution,
            Err(ResolverError::Capability { expected: "a live handle", .. })
        ));
    }

    #[tokio::test]
    async fn test_invoke_without_default() {
        let mut map = ResolverMap::new();
        map.remove_default();

        let parent = ResolverHandle::new("Region", json!({"name": "Bob"}));
        let field = FieldDef::new("name", TypeRef::named("String"));
        let result = map
            .invoke(
                &parent,
                &field,
                &ResolverArgs::new(),
                &Context::new(),
                &ResolverInfo::new("name", "Region"),
            )
            .await;
        assert_eq!(
            result.unwrap_err(),
            ResolverError::FieldNotFound("Region.name".to_string())
        );
    }
}
