//! Query execution.
//!
//! [`Executor::execute`] resolves the selected operation and returns the
//! initial response as soon as every field without a delivery directive is
//! resolved. Deferred, streamed and live fields run as units on the
//! execution's [`Session`] and deliver [`Patch`]es to the patch sink; the
//! returned [`Completion`] joins them.
//!
//! Without a patch sink the delivery directives are ignored and everything
//! resolves into the initial response.

use crate::coerce::{coerce_arguments, coerce_leaf, coerce_variables};
use crate::document::{Document, Operation, OperationKind, Selection};
use crate::live::{Emission, LiveHandle};
use crate::observer::{ExecutionObserver, NoopObserver};
use crate::resolver::{Resolution, ResolverError, ResolverHandle, ResolverInfo, ResolverMap};
use crate::response::{child_path, display_path, FieldError, Patch, Path, PathSegment, Response, ResultNode};
use crate::schema::{Capability, FieldDef, Schema, TypeDef, TypeRef};
use crate::session::{patch_channel, Completion, CoordinationError, PatchSink, Session, UnitKind};
use futures::future::join_all;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, info_span, Instrument};

/// Executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum emissions delivered per live field, an inline first value included.
    pub live_emission_limit: usize,
    /// Maximum elements pulled per streamed field.
    pub stream_item_limit: Option<usize>,
    /// Bound on the lifetime of the asynchronous units of one execution.
    pub session_timeout_ms: Option<u64>,
    /// Capacity of the patch channel created by [`Executor::execute_to_end`].
    pub patch_buffer: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            live_emission_limit: 10,
            stream_item_limit: None,
            session_timeout_ms: None,
            patch_buffer: 16,
        }
    }
}

impl ExecutorConfig {
    pub fn with_live_emission_limit(mut self, limit: usize) -> Self {
        self.live_emission_limit = limit;
        self
    }

    pub fn with_stream_item_limit(mut self, limit: usize) -> Self {
        self.stream_item_limit = Some(limit);
        self
    }

    pub fn with_session_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.session_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_patch_buffer(mut self, buffer: usize) -> Self {
        self.patch_buffer = buffer;
        self
    }

    /// Returns the session timeout, if any.
    pub fn session_timeout(&self) -> Option<Duration> {
        self.session_timeout_ms.map(Duration::from_millis)
    }
}

/// Error detected before any field is resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("Unknown operation named \"{0}\"")]
    UnknownOperation(String),

    #[error("Must provide operation name if query contains multiple operations")]
    AmbiguousOperation,

    #[error("Must provide an operation")]
    NoOperation,

    #[error("Schema is not configured for {0} operations")]
    MissingRootType(&'static str),

    #[error("Variable \"${0}\" of required type was not provided")]
    MissingVariable(String),

    #[error("Variable \"${name}\" got invalid value: {message}")]
    InvalidVariable { name: String, message: String },
}

/// One operation to execute.
#[derive(Debug, Clone)]
pub struct Request {
    pub document: Arc<Document>,
    pub operation_name: Option<String>,
    pub variables: Map<String, Value>,
    /// Parent value of the root fields.
    pub root_value: Value,
    pub context: Context,
}

impl Request {
    /// Creates a request for the only operation of `document`.
    pub fn new(document: impl Into<Arc<Document>>) -> Self {
        Self {
            document: document.into(),
            operation_name: None,
            variables: Map::new(),
            root_value: Value::Object(Map::new()),
            context: Context::new(),
        }
    }

    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn root_value(mut self, value: Value) -> Self {
        self.root_value = value;
        self
    }

    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }
}

/// A started execution.
#[derive(Debug)]
pub struct Execution {
    /// The initial response, with placeholders for asynchronous fields.
    pub response: Response,
    /// Joins the asynchronous units.
    pub completion: Completion,
}

/// The query executor.
pub struct Executor {
    schema: Arc<Schema>,
    resolvers: Arc<ResolverMap>,
    config: ExecutorConfig,
    observer: Arc<dyn ExecutionObserver>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .field("resolvers", &self.resolvers)
            .finish()
    }
}

impl Executor {
    /// Creates a new executor.
    pub fn new(schema: Schema, resolvers: ResolverMap) -> Self {
        Self::with_config(schema, resolvers, ExecutorConfig::default())
    }

    /// Creates an executor with configuration.
    pub fn with_config(schema: Schema, resolvers: ResolverMap, config: ExecutorConfig) -> Self {
        Self {
            schema: Arc::new(schema),
            resolvers: Arc::new(resolvers),
            config,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Sets the execution observer.
    pub fn with_observer(mut self, observer: impl ExecutionObserver + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn resolvers(&self) -> &ResolverMap {
        &self.resolvers
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Executes an operation.
    ///
    /// Returns once the initial response is assembled. Patches go to `sink`
    /// until the returned completion reports that every unit finished.
    pub async fn execute(
        &self,
        request: Request,
        cancellation: CancellationToken,
        sink: Option<PatchSink>,
    ) -> Execution {
        let Request {
            document,
            operation_name,
            variables,
            root_value,
            mut context,
        } = request;

        let session = Session::new(cancellation, sink);
        let completion = session.completion(self.config.session_timeout());

        let (operation, root_type, variables) =
            match self.prepare(&document, operation_name.as_deref(), &variables) {
                Ok(prepared) => prepared,
                Err(error) => {
                    debug!(%error, "operation rejected");
                    return Execution {
                        response: Response::error(FieldError::new(error.to_string())),
                        completion,
                    };
                }
            };

        let incremental = session.has_sink() && operation.is_incremental();
        let operation_name = operation.name.as_deref();
        let span = info_span!(
            "graphql.execute",
            graphql.operation_name = operation_name.unwrap_or(""),
            graphql.live = incremental,
        );
        self.observer.execution_started(operation_name, incremental);

        context.variables = variables
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        context.cancellation = session.cancellation().clone();

        let shared = Arc::new(Shared {
            schema: Arc::clone(&self.schema),
            resolvers: Arc::clone(&self.resolvers),
            config: self.config.clone(),
            observer: Arc::clone(&self.observer),
            session,
            context,
            variables,
        });

        let root = ResolverHandle::new(root_type, root_value);
        let scope = Scope::default();
        let data = execute_operation(&shared, &scope, &operation, &root)
            .instrument(span)
            .await;
        let errors = scope.into_errors();
        self.observer.execution_finished(operation_name, errors.len());

        Execution {
            response: Response::data(data.unwrap_or_default()).with_errors(errors),
            completion,
        }
    }

    /// Executes an operation, collects every patch and waits for the session.
    pub async fn execute_to_end(
        &self,
        request: Request,
    ) -> Result<(Response, Vec<Patch>), CoordinationError> {
        let (sink, mut stream) = patch_channel(self.config.patch_buffer);
        let Execution {
            response,
            completion,
        } = self
            .execute(request, CancellationToken::new(), Some(sink))
            .await;

        let mut patches = Vec::new();
        let (waited, ()) = tokio::join!(completion.wait(), async {
            while let Some(patch) = stream.recv().await {
                patches.push(patch);
            }
        });
        waited?;
        Ok((response, patches))
    }

    fn prepare(
        &self,
        document: &Document,
        operation_name: Option<&str>,
        variables: &Map<String, Value>,
    ) -> Result<(Arc<Operation>, String, Map<String, Value>), ExecutionError> {
        let operation = document.operation(operation_name)?;
        let (root_type, kind) = match operation.kind {
            OperationKind::Query => (&self.schema.query_type, "query"),
            OperationKind::Mutation => (&self.schema.mutation_type, "mutation"),
        };
        let root_type = root_type
            .as_ref()
            .filter(|name| self.schema.get_type(name).is_some())
            .ok_or(ExecutionError::MissingRootType(kind))?;
        let variables = coerce_variables(operation, variables, &self.schema)?;
        Ok((Arc::clone(operation), root_type.clone(), variables))
    }
}

/// Request-scoped state handed to every resolver call.
///
/// Cloning is cheap enough for async resolvers, which receive an owned copy.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Application data, e.g. the authenticated user.
    pub data: HashMap<String, Value>,
    /// Request variables after coercion.
    pub variables: HashMap<String, Value>,
    cancellation: CancellationToken,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variables(variables: HashMap<String, Value>) -> Self {
        Self {
            variables,
            ..Self::default()
        }
    }

    /// Stores `value` under `key`. Values that fail to serialize are dropped.
    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: T) {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.data.insert(key.into(), value);
            }
            Err(e) => debug!(error = %e, "context value not stored"),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        T::deserialize(self.data.get(key)?).ok()
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn variable_as<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        T::deserialize(self.variable(name)?).ok()
    }

    /// The cancellation signal of the execution. Live producers should stop
    /// once it fires.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Completes when the execution is cancelled.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }
}

/// State shared by the initial pass and every unit of one execution.
struct Shared {
    schema: Arc<Schema>,
    resolvers: Arc<ResolverMap>,
    config: ExecutorConfig,
    observer: Arc<dyn ExecutionObserver>,
    session: Session,
    context: Context,
    variables: Map<String, Value>,
}

/// Errors of the initial response or of one patch.
#[derive(Default)]
struct Scope {
    errors: Mutex<Vec<FieldError>>,
}

impl Scope {
    async fn push(&self, error: FieldError) {
        self.errors.lock().await.push(error);
    }

    fn into_errors(self) -> Vec<FieldError> {
        self.errors.into_inner()
    }
}

/// A non-null position could not be completed; the nearest nullable
/// ancestor becomes null. The error is already recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Nulled;

type Completed = Result<ResultNode, Nulled>;

type NodeFuture<'a> = Pin<Box<dyn Future<Output = Completed> + Send + 'a>>;

type Outcome = Result<Value, ResolverError>;

/// The value of a failed position of type `ty`.
fn null_for(ty: &TypeRef) -> Completed {
    if ty.is_nullable() {
        Ok(ResultNode::Null)
    } else {
        Err(Nulled)
    }
}

/// A selected field bound to its parent and definition.
#[derive(Clone, Copy)]
struct Field<'a> {
    selection: &'a Arc<Selection>,
    parent: &'a ResolverHandle,
    definition: &'a FieldDef,
}

impl Field<'_> {
    fn coordinate(&self) -> String {
        format!("{}.{}", self.parent.type_name, self.definition.name)
    }

    fn error(&self, error: ResolverError, path: &[PathSegment]) -> FieldError {
        FieldError::from(error)
            .with_location(self.selection.location)
            .with_path(path.to_vec())
    }

    fn label(&self) -> Option<String> {
        self.selection.directives.label.clone()
    }

    fn to_unit(self) -> UnitField {
        UnitField {
            selection: Arc::clone(self.selection),
            parent: self.parent.clone(),
            definition: self.definition.clone(),
        }
    }
}

/// Owned form of [`Field`] moved into units.
struct UnitField {
    selection: Arc<Selection>,
    parent: ResolverHandle,
    definition: FieldDef,
}

impl UnitField {
    fn view(&self) -> Field<'_> {
        Field {
            selection: &self.selection,
            parent: &self.parent,
            definition: &self.definition,
        }
    }
}

async fn execute_operation(
    shared: &Arc<Shared>,
    scope: &Scope,
    operation: &Operation,
    root: &ResolverHandle,
) -> Completed {
    match operation.kind {
        OperationKind::Query => {
            execute_selection_set(shared, scope, &operation.selection_set, root, &[]).await
        }
        // Root mutation fields run one after another.
        OperationKind::Mutation => {
            let mut fields = IndexMap::new();
            for selection in applicable(&shared.schema, &operation.selection_set, root) {
                let node = execute_field(shared, scope, selection, root, &[]).await?;
                fields.insert(selection.response_key().to_string(), node);
            }
            Ok(ResultNode::Object(fields))
        }
    }
}

fn applicable<'a>(
    schema: &'a Schema,
    selections: &'a [Arc<Selection>],
    parent: &'a ResolverHandle,
) -> impl Iterator<Item = &'a Arc<Selection>> + 'a {
    selections
        .iter()
        .filter(move |selection| match &selection.type_condition {
            None => true,
            Some(condition) => {
                condition == &parent.type_name
                    || schema.is_possible_type(condition, &parent.type_name)
            }
        })
}

/// Resolves the fields of one object concurrently, keeping document order.
fn execute_selection_set<'a>(
    shared: &'a Arc<Shared>,
    scope: &'a Scope,
    selections: &'a [Arc<Selection>],
    parent: &'a ResolverHandle,
    path: &'a [PathSegment],
) -> NodeFuture<'a> {
    Box::pin(async move {
        let results = join_all(
            applicable(&shared.schema, selections, parent).map(move |selection| async move {
                let node = execute_field(shared, scope, selection, parent, path).await;
                (selection.response_key(), node)
            }),
        )
        .await;

        let mut fields = IndexMap::with_capacity(results.len());
        for (key, node) in results {
            fields.entry(key.to_string()).or_insert(node?);
        }
        Ok(ResultNode::Object(fields))
    })
}

/// Classifies a field by its delivery directives and resolves it accordingly.
async fn execute_field(
    shared: &Arc<Shared>,
    scope: &Scope,
    selection: &Arc<Selection>,
    parent: &ResolverHandle,
    path: &[PathSegment],
) -> Completed {
    let path = child_path(path, selection.response_key());

    if selection.name == "__typename" {
        return Ok(ResultNode::Scalar(Value::String(parent.type_name.clone())));
    }

    let Some(definition) = shared.schema.field(&parent.type_name, &selection.name) else {
        let error = FieldError::new(format!(
            "Cannot query field \"{}\" on type \"{}\"",
            selection.name, parent.type_name
        ))
        .with_location(selection.location)
        .with_path(path);
        scope.push(error).await;
        return Ok(ResultNode::Null);
    };

    let field = Field {
        selection,
        parent,
        definition,
    };
    let directives = &selection.directives;

    if !shared.session.has_sink() {
        return resolve_inline(shared, scope, field, &path).await;
    }
    if directives.defer {
        spawn_deferred(shared, field, path);
        return Ok(ResultNode::Null);
    }
    if directives.stream {
        return stream_field(shared, scope, field, path).await;
    }
    if directives.live && definition.capability() == Capability::Live {
        return live_field(shared, scope, field, path).await;
    }
    resolve_inline(shared, scope, field, &path).await
}

/// Calls the field's resolver.
async fn invoke(shared: &Shared, field: Field<'_>, path: &[PathSegment]) -> Result<Resolution, ResolverError> {
    let args = coerce_arguments(
        field.definition,
        field.selection,
        &shared.variables,
        &shared.schema,
    )?;
    let info = ResolverInfo::new(&field.definition.name, &field.parent.type_name)
        .returning(field.definition.ty.clone())
        .at(path.to_vec())
        .with_directives(
            field.selection.directives.clone(),
            shared.session.has_sink(),
        );

    let started = Instant::now();
    let resolution = shared
        .resolvers
        .invoke(field.parent, field.definition, &args, &shared.context, &info)
        .await;
    shared.observer.field_resolved(
        &field.parent.type_name,
        &field.definition.name,
        path,
        started.elapsed(),
    );
    resolution
}

/// Resolves a field into the current result, ignoring delivery directives.
///
/// Live fields take their first emission, streamable fields are drained.
async fn resolve_inline(
    shared: &Arc<Shared>,
    scope: &Scope,
    field: Field<'_>,
    path: &[PathSegment],
) -> Completed {
    let ty = &field.definition.ty;
    let resolution = match invoke(shared, field, path).await {
        Ok(resolution) => resolution,
        Err(error) => {
            scope.push(field.error(error, path)).await;
            return null_for(ty);
        }
    };

    match resolution {
        Resolution::Value(value) => {
            complete_value(shared, scope, field, ty, value, path.to_vec()).await
        }
        Resolution::Live(mut handle) if field.definition.capability() == Capability::Sequence => {
            let Some(item_ty) = ty.list_item() else {
                let error = ResolverError::Coercion(format!(
                    "Streamable field {} is not a list",
                    field.coordinate()
                ));
                scope.push(field.error(error, path)).await;
                return null_for(ty);
            };
            let mut items = Vec::new();
            pull(shared, &mut handle, shared.config.stream_item_limit, &mut items).await;
            let nodes = complete_items(shared, scope, field, item_ty, items, path, 0).await;
            finish_list(nodes, ty)
        }
        Resolution::Live(mut handle) => {
            let next = tokio::select! {
                biased;
                _ = shared.session.cancellation().cancelled() => {
                    debug!("live field cancelled before its first emission");
                    None
                }
                next = handle.next() => next,
            };
            match next {
                Some(Emission { outcome, .. }) => {
                    complete_outcome(shared, scope, field, ty, outcome, path.to_vec()).await
                }
                None => complete_value(shared, scope, field, ty, Value::Null, path.to_vec()).await,
            }
        }
    }
}

/// Pulls emissions until `count` outcomes are collected. Returns true if the
/// handle is exhausted or the session was cancelled.
async fn pull(
    shared: &Shared,
    handle: &mut LiveHandle,
    count: Option<usize>,
    into: &mut Vec<Outcome>,
) -> bool {
    let cancellation = shared.session.cancellation();
    while count.map_or(true, |count| into.len() < count) {
        let next = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                debug!(items = into.len(), "pull cancelled");
                return true;
            }
            next = handle.next() => next,
        };
        match next {
            Some(Emission { outcome, last }) => {
                into.push(outcome);
                if last {
                    return true;
                }
            }
            None => return true,
        }
    }
    false
}

async fn complete_outcome(
    shared: &Arc<Shared>,
    scope: &Scope,
    field: Field<'_>,
    ty: &TypeRef,
    outcome: Outcome,
    path: Path,
) -> Completed {
    match outcome {
        Ok(value) => complete_value(shared, scope, field, ty, value, path).await,
        Err(error) => {
            scope.push(field.error(error, &path)).await;
            null_for(ty)
        }
    }
}

/// Completes list elements; `offset` is the index of the first one.
async fn complete_items(
    shared: &Arc<Shared>,
    scope: &Scope,
    field: Field<'_>,
    item_ty: &TypeRef,
    items: Vec<Outcome>,
    path: &[PathSegment],
    offset: usize,
) -> Result<Vec<ResultNode>, Nulled> {
    join_all(items.into_iter().enumerate().map(|(index, outcome)| {
        complete_outcome(
            shared,
            scope,
            field,
            item_ty,
            outcome,
            child_path(path, offset + index),
        )
    }))
    .await
    .into_iter()
    .collect()
}

fn finish_list(items: Result<Vec<ResultNode>, Nulled>, ty: &TypeRef) -> Completed {
    match items {
        Ok(items) => Ok(ResultNode::List(items)),
        Err(Nulled) => null_for(ty),
    }
}

/// Completes a resolved value against its declared type.
fn complete_value<'a>(
    shared: &'a Arc<Shared>,
    scope: &'a Scope,
    field: Field<'a>,
    ty: &'a TypeRef,
    value: Value,
    path: Path,
) -> NodeFuture<'a> {
    Box::pin(async move {
        match ty {
            TypeRef::Option(_) if value.is_null() => Ok(ResultNode::Null),
            TypeRef::Option(inner) => Ok(complete_value(shared, scope, field, inner, value, path)
                .await
                .unwrap_or_default()),
            _ if value.is_null() => fail(scope, field, &path, ResolverError::NullValue(field.coordinate())).await,
            TypeRef::List(item_ty) => match value {
                Value::Array(items) => {
                    let items = items.into_iter().map(Ok).collect();
                    let nodes = complete_items(shared, scope, field, item_ty, items, &path, 0).await?;
                    Ok(ResultNode::List(nodes))
                }
                other => {
                    fail(scope, field, &path, ResolverError::Coercion(format!(
                        "Expected a list for field {}, found {other}",
                        field.coordinate()
                    )))
                    .await
                }
            },
            TypeRef::Named(name) => match shared.schema.get_type(name) {
                Some(TypeDef::Scalar(_) | TypeDef::Enum(_)) => {
                    match coerce_leaf(value, name, &shared.schema) {
                        Ok(value) => Ok(ResultNode::Scalar(value)),
                        Err(error) => fail(scope, field, &path, error).await,
                    }
                }
                Some(TypeDef::Object(_)) => {
                    let handle = ResolverHandle::new(name.clone(), value);
                    execute_selection_set(shared, scope, &field.selection.selection_set, &handle, &path)
                        .await
                }
                Some(TypeDef::Interface(_) | TypeDef::Union(_)) => {
                    match concrete_type(&shared.schema, name, &value) {
                        Ok(concrete) => {
                            let handle = ResolverHandle::new(concrete, value);
                            execute_selection_set(
                                shared,
                                scope,
                                &field.selection.selection_set,
                                &handle,
                                &path,
                            )
                            .await
                        }
                        Err(error) => fail(scope, field, &path, error).await,
                    }
                }
                Some(TypeDef::InputObject(_)) | None => {
                    fail(scope, field, &path, ResolverError::Internal(format!(
                        "{name} is not an output type"
                    )))
                    .await
                }
            },
        }
    })
}

/// Records `error` for a non-null position.
async fn fail(scope: &Scope, field: Field<'_>, path: &[PathSegment], error: ResolverError) -> Completed {
    scope.push(field.error(error, path)).await;
    Err(Nulled)
}

/// Picks the object type of a value of an interface or union type from its
/// `__typename`.
fn concrete_type(schema: &Schema, abstract_type: &str, value: &Value) -> Result<String, ResolverError> {
    let name = value
        .get("__typename")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ResolverError::Coercion(format!(
                "Abstract type {abstract_type} must resolve to an object type, value has no __typename"
            ))
        })?;
    if schema.is_possible_type(abstract_type, name) {
        Ok(name.to_string())
    } else {
        Err(ResolverError::Coercion(format!(
            "Type {name} is not a possible type of {abstract_type}"
        )))
    }
}

async fn send_patch(shared: &Shared, path: Path, data: ResultNode, scope: Scope, label: Option<String>) -> bool {
    shared
        .session
        .send(Patch::assemble(path, data, scope.into_errors(), label))
        .await
}

/// Spawns the unit resolving a deferred field into one patch.
///
/// A deferred live field delivers every emission as a patch instead.
fn spawn_deferred(shared: &Arc<Shared>, field: Field<'_>, path: Path) {
    let unit = field.to_unit();
    let task_shared = Arc::clone(shared);
    let span = debug_span!("graphql.defer", path = %display_path(&path));

    shared.session.spawn(UnitKind::Defer, span, async move {
        let shared = task_shared;
        let field = unit.view();
        let scope = Scope::default();

        let data = if field.selection.directives.live
            && field.definition.capability() == Capability::Live
        {
            match invoke(&shared, field, &path).await {
                Ok(Resolution::Live(handle)) => {
                    return follow_live(&shared, field, &path, handle, 0).await;
                }
                Ok(Resolution::Value(value)) => {
                    let ty = &field.definition.ty;
                    complete_value(&shared, &scope, field, ty, value, path.clone())
                        .await
                        .unwrap_or_default()
                }
                Err(error) => {
                    scope.push(field.error(error, &path)).await;
                    ResultNode::Null
                }
            }
        } else {
            resolve_inline(&shared, &scope, field, &path)
                .await
                .unwrap_or_default()
        };

        debug!("deferred field resolved");
        send_patch(&shared, path, data, scope, field.label()).await;
    });
}

/// Resolves a `@live` field: the first emission goes inline if it is
/// already available, the rest are followed by a live unit.
async fn live_field(shared: &Arc<Shared>, scope: &Scope, field: Field<'_>, path: Path) -> Completed {
    let ty = &field.definition.ty;
    let mut handle = match invoke(shared, field, &path).await {
        Ok(Resolution::Live(handle)) => handle,
        Ok(Resolution::Value(value)) => {
            return complete_value(shared, scope, field, ty, value, path).await
        }
        Err(error) => {
            scope.push(field.error(error, &path)).await;
            return null_for(ty);
        }
    };

    let limit = shared.config.live_emission_limit;
    if limit == 0 {
        return Ok(ResultNode::Null);
    }

    match handle.next_now() {
        Some(Some(Emission { outcome, last })) => {
            let node = complete_outcome(shared, scope, field, ty, outcome, path.clone()).await;
            if !last && limit > 1 {
                spawn_live(shared, field, path, handle, 1);
            }
            node
        }
        Some(None) => complete_value(shared, scope, field, ty, Value::Null, path).await,
        None => {
            spawn_live(shared, field, path, handle, 0);
            Ok(ResultNode::Null)
        }
    }
}

fn spawn_live(shared: &Arc<Shared>, field: Field<'_>, path: Path, handle: LiveHandle, emitted: usize) {
    let unit = field.to_unit();
    let task_shared = Arc::clone(shared);
    let span = debug_span!("graphql.live", path = %display_path(&path));

    shared.session.spawn(UnitKind::Live, span, async move {
        let shared = task_shared;
        follow_live(&shared, unit.view(), &path, handle, emitted).await;
    });
}

/// Delivers each emission of a live field as a patch at `path`.
async fn follow_live(
    shared: &Arc<Shared>,
    field: Field<'_>,
    path: &Path,
    mut handle: LiveHandle,
    mut emitted: usize,
) {
    let limit = shared.config.live_emission_limit;
    let cancellation = shared.session.cancellation();

    while emitted < limit {
        let Emission { outcome, last } = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                debug!(emitted, "live field cancelled");
                return;
            }
            next = handle.next() => match next {
                Some(emission) => emission,
                None => {
                    debug!(emitted, "live handle closed");
                    return;
                }
            },
        };
        emitted += 1;

        let scope = Scope::default();
        let data = complete_outcome(shared, &scope, field, &field.definition.ty, outcome, path.clone())
            .await
            .unwrap_or_default();
        if !send_patch(shared, path.clone(), data, scope, field.label()).await || last {
            return;
        }
    }
    debug!(limit, "live emission limit reached");
}

/// Resolves a `@stream` field: the first `initial_count` elements go inline,
/// the rest are pulled by a stream unit.
async fn stream_field(shared: &Arc<Shared>, scope: &Scope, field: Field<'_>, path: Path) -> Completed {
    let ty = &field.definition.ty;
    let Some(item_ty) = ty.list_item() else {
        let error = ResolverError::Coercion(format!(
            "Cannot stream non-list field {}",
            field.coordinate()
        ));
        scope.push(field.error(error, &path)).await;
        return null_for(ty);
    };

    let mut handle = match invoke(shared, field, &path).await {
        Ok(Resolution::Live(handle)) => handle,
        Ok(Resolution::Value(Value::Array(items))) => LiveHandle::from_values(items),
        Ok(Resolution::Value(value)) => {
            return complete_value(shared, scope, field, ty, value, path).await
        }
        Err(error) => {
            scope.push(field.error(error, &path)).await;
            return null_for(ty);
        }
    };

    let initial_count = match shared.config.stream_item_limit {
        Some(limit) => field.selection.directives.initial_count.min(limit),
        None => field.selection.directives.initial_count,
    };
    let mut initial = Vec::new();
    let exhausted = pull(shared, &mut handle, Some(initial_count), &mut initial).await;
    let start = initial.len();

    let nodes = complete_items(shared, scope, field, item_ty, initial, &path, 0).await;
    let node = finish_list(nodes, ty);
    if !exhausted && matches!(node, Ok(ResultNode::List(_))) {
        spawn_stream(shared, field, item_ty.clone(), path, handle, start);
    }
    node
}

fn spawn_stream(
    shared: &Arc<Shared>,
    field: Field<'_>,
    item_ty: TypeRef,
    path: Path,
    mut handle: LiveHandle,
    start: usize,
) {
    let unit = Arc::new(field.to_unit());
    let task_shared = Arc::clone(shared);
    let span = debug_span!("graphql.stream", path = %display_path(&path));

    shared.session.spawn(UnitKind::Stream, span, async move {
        let shared = task_shared;
        let item_ty = Arc::new(item_ty);
        let mut index = start;

        loop {
            if shared.config.stream_item_limit.is_some_and(|limit| index >= limit) {
                debug!(index, "stream item limit reached");
                break;
            }
            let Emission { outcome, last } = tokio::select! {
                biased;
                _ = shared.session.cancellation().cancelled() => {
                    debug!(index, "stream cancelled");
                    break;
                }
                next = handle.next() => match next {
                    Some(emission) => emission,
                    None => break,
                },
            };

            spawn_stream_item(
                &shared,
                Arc::clone(&unit),
                Arc::clone(&item_ty),
                child_path(&path, index),
                outcome,
            );
            index += 1;
            if last {
                break;
            }
        }
        debug!(items = index, "stream finished");
    });
}

fn spawn_stream_item(
    shared: &Arc<Shared>,
    unit: Arc<UnitField>,
    item_ty: Arc<TypeRef>,
    path: Path,
    outcome: Outcome,
) {
    let task_shared = Arc::clone(shared);
    let span = debug_span!("graphql.stream", path = %display_path(&path));

    shared.session.spawn(UnitKind::StreamItem, span, async move {
        let shared = task_shared;
        let field = unit.view();
        let scope = Scope::default();
        let data = complete_outcome(&shared, &scope, field, &item_ty, outcome, path.clone())
            .await
            .unwrap_or_default();
        send_patch(&shared, path, data, scope, field.label()).await;
    });
}
