//! The live-regions demo: a three-region schema whose `status` field
//! changes over time.

use lgql_runtime::{
    Document, FieldDef, LiveHandle, ObjectDef, Operation, ResolverMap, Schema, SchemaBuilder,
    Selection, TypeRef,
};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Status updates per live region before the producer stops.
const MAX_STATUS: u64 = 10;

/// Demo resolver settings.
#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// Time between status updates.
    pub interval: Duration,
    /// Ids of the regions whose status keeps changing.
    pub live_regions: Vec<String>,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            live_regions: vec!["test2".to_string()],
        }
    }
}

/// Delivery directives applied to the demo query.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryFlags {
    pub stream: bool,
    pub defer_name: bool,
    pub live_status: bool,
    pub defer_status: bool,
}

pub fn schema() -> Schema {
    SchemaBuilder::new()
        .query_type("Query")
        .object(
            ObjectDef::new("Query").field(
                FieldDef::new(
                    "regions",
                    TypeRef::option(TypeRef::list(TypeRef::option(TypeRef::named("Region")))),
                )
                .streamable()
                .description("All regions, produced one at a time"),
            ),
        )
        .object(
            ObjectDef::new("Region")
                .field(FieldDef::new("id", TypeRef::option(TypeRef::named("String"))))
                .field(FieldDef::new("name", TypeRef::option(TypeRef::named("String"))))
                .field(
                    FieldDef::new("status", TypeRef::option(TypeRef::named("Int")))
                        .live()
                        .description("Counts up once per interval"),
                ),
        )
        .build()
}

fn regions(options: &DemoOptions) -> Vec<Value> {
    [("test", 0), ("test2", 500), ("test3", 1000)]
        .into_iter()
        .map(|(id, delay_ms)| {
            json!({
                "id": id,
                "name": format!("{id} region"),
                "delayMs": delay_ms,
                "live": options.live_regions.iter().any(|live| live == id),
            })
        })
        .collect()
}

pub fn resolvers(options: &DemoOptions) -> ResolverMap {
    let mut resolvers = ResolverMap::new();

    let all = regions(options);
    resolvers.register_fn("Query", "regions", move |_parent, _args, _ctx, _info| {
        let (sender, handle) = LiveHandle::channel(1);
        let regions = all.clone();
        tokio::spawn(async move {
            for region in regions {
                if sender.send(region).await.is_err() {
                    return;
                }
            }
        });
        Ok(handle)
    });

    resolvers.register_async("Region", "name", |parent, _args, _ctx, _info| async move {
        let delay = parent["delayMs"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(parent["name"].clone())
    });

    let interval = options.interval;
    resolvers.register_fn("Region", "status", move |parent, _args, ctx, info| {
        // One value is enough when nobody follows the field
        let live = info.is_live() && parent["live"].as_bool().unwrap_or(false);
        let id = parent["id"].as_str().unwrap_or_default().to_string();
        let cancellation = ctx.cancellation().clone();
        let (sender, handle) = LiveHandle::channel(1);

        tokio::spawn(async move {
            for status in 1..=MAX_STATUS {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    _ = sender.closed() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let last = !live || status == MAX_STATUS;
                let sent = if last {
                    sender.send_last(json!(status)).await
                } else {
                    sender.send(json!(status)).await
                };
                if sent.is_err() || last {
                    break;
                }
            }
            debug!(region = %id, "status producer stopped");
        });
        Ok(handle)
    });

    resolvers
}

pub fn document(flags: QueryFlags) -> Document {
    let mut regions = Selection::field("regions");
    if flags.stream {
        regions = regions.stream();
    }

    let mut name = Selection::field("name");
    if flags.defer_name {
        name = name.defer();
    }

    let mut status = Selection::field("status");
    if flags.live_status {
        status = status.live();
    }
    if flags.defer_status {
        status = status.defer();
    }

    let regions = regions.selections([
        Selection::field("__typename"),
        Selection::field("id"),
        name,
        status,
    ]);
    Document::new().with_operation(Operation::query().named("Regions").selections([regions]))
}

/// Renders the demo query with its directives.
pub fn query_text(flags: QueryFlags) -> String {
    let directive = |on: bool, name: &str| if on { format!(" @{name}") } else { String::new() };
    format!(
        "query Regions {{ regions{} {{ __typename id name{} status{}{} }} }}",
        directive(flags.stream, "stream"),
        directive(flags.defer_name, "defer"),
        directive(flags.live_status, "live"),
        directive(flags.defer_status, "defer"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use lgql_runtime::{Executor, ExecutorConfig, Request};

    fn all_flags() -> QueryFlags {
        QueryFlags {
            stream: true,
            defer_name: true,
            live_status: true,
            defer_status: true,
        }
    }

    #[test]
    fn test_query_text() {
        assert_eq!(
            query_text(all_flags()),
            "query Regions { regions @stream { __typename id name @defer status @live @defer } }"
        );
        assert_eq!(
            query_text(QueryFlags::default()),
            "query Regions { regions { __typename id name status } }"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_demo_with_every_directive() {
        let options = DemoOptions::default();
        let executor = Executor::with_config(
            schema(),
            resolvers(&options),
            ExecutorConfig::default(),
        );

        let (response, patches) = executor
            .execute_to_end(Request::new(document(all_flags())))
            .await
            .unwrap();

        assert_eq!(response.to_json(), json!({"data": {"regions": []}}));
        // 3 regions, 3 names, 1 + 10 + 1 status updates
        assert_eq!(patches.len(), 18);
        assert!(patches.iter().all(|patch| !patch.has_errors()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_demo_without_directives() {
        let options = DemoOptions::default();
        let executor = Executor::new(schema(), resolvers(&options));

        let (response, patches) = executor
            .execute_to_end(Request::new(document(QueryFlags::default())))
            .await
            .unwrap();

        assert!(patches.is_empty());
        assert_eq!(
            response.to_json(),
            json!({"data": {"regions": [
                {"__typename": "Region", "id": "test", "name": "test region", "status": 1},
                {"__typename": "Region", "id": "test2", "name": "test2 region", "status": 1},
                {"__typename": "Region", "id": "test3", "name": "test3 region", "status": 1}
            ]}})
        );
    }
}
