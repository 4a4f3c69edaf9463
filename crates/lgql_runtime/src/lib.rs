//! Runtime for live GraphQL.
//!
//! This crate executes GraphQL operations whose fields may be delivered
//! after the initial response:
//! - `schema`: Schema definition and building
//! - `document`: Parsed operations and their delivery directives
//! - `coerce`: Input and leaf value coercion
//! - `resolver`: Resolver registration and dispatch
//! - `live`: Live handles for fields that produce several values
//! - `executor`: Query execution and `@defer`/`@stream`/`@live` scheduling
//! - `session`: Joining the asynchronous units of one execution
//! - `response`: Responses, patches and result paths
//! - `observer`: Execution hooks

pub mod coerce;
pub mod document;
pub mod executor;
pub mod live;
pub mod observer;
pub mod resolver;
pub mod response;
pub mod schema;
pub mod session;

pub use document::{ArgValue, Directives, Document, Operation, OperationKind, Selection};
pub use executor::{Context, Execution, ExecutionError, Executor, ExecutorConfig, Request};
pub use live::{Emission, LiveClosed, LiveHandle, LiveSender};
pub use observer::{ExecutionObserver, NoopObserver, TracingObserver};
pub use resolver::{Resolution, Resolver, ResolverArgs, ResolverError, ResolverInfo, ResolverMap};
pub use response::{FieldError, Patch, Path, PathSegment, Response, ResultNode};
pub use schema::{Capability, FieldDef, ObjectDef, Schema, SchemaBuilder, TypeDef, TypeRef};
pub use session::{patch_channel, Completion, CoordinationError, PatchSink, PatchStream, UnitKind};
