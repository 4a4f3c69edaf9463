//! Execution observers.
//!
//! Observers see execution start and end and the timing of every resolved
//! field. They are notified synchronously and have no effect on the result.

use crate::response::{display_path, PathSegment};
use std::time::Duration;

/// Hooks called by the executor.
pub trait ExecutionObserver: Send + Sync {
    /// An operation started. `incremental` is true if any selection asks for
    /// deferred, streamed or live delivery.
    fn execution_started(&self, _operation: Option<&str>, _incremental: bool) {}

    /// The initial response of an operation is ready.
    fn execution_finished(&self, _operation: Option<&str>, _error_count: usize) {}

    /// A resolver returned.
    fn field_resolved(
        &self,
        _parent_type: &str,
        _field: &str,
        _path: &[PathSegment],
        _elapsed: Duration,
    ) {
    }
}

/// Ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ExecutionObserver for NoopObserver {}

/// Forwards every hook as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ExecutionObserver for TracingObserver {
    fn execution_started(&self, operation: Option<&str>, incremental: bool) {
        tracing::info!(
            graphql.operation_name = operation.unwrap_or("<anonymous>"),
            incremental,
            "execution started"
        );
    }

    fn execution_finished(&self, operation: Option<&str>, error_count: usize) {
        tracing::info!(
            graphql.operation_name = operation.unwrap_or("<anonymous>"),
            error_count,
            "execution finished"
        );
    }

    fn field_resolved(
        &self,
        parent_type: &str,
        field: &str,
        path: &[PathSegment],
        elapsed: Duration,
    ) {
        tracing::debug!(
            graphql.field = %format_args!("{parent_type}.{field}"),
            graphql.path = %display_path(path),
            elapsed_us = elapsed.as_micros() as u64,
            "field resolved"
        );
    }
}
