//! HTTP surface
//!
//! Thin axum wrappers over [`CacheService`]; no cache logic lives here
//! beyond translating service results into status codes and bodies.
//!
//! Routes mirror the service contract: reads at `/` (optionally with a
//! path-embedded search string or form-encoded filters), updates at
//! `/update`, and a side-effect-free health check.

use crate::error::{CacheError, Result};
use crate::freshness::CacheService;
use crate::schema::TableSchema;
use axum::Router;
use axum::extract::{Form, Json, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Body served while a rebuild is in flight
const REBUILD_BODY: &str = "Rebuild data";

/// Build the application router.
pub fn router(service: CacheService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", get(read_all).post(read_filtered))
        .route("/update", get(update_current).post(update_with_schema))
        .route("/:search_text", get(read_search))
        .with_state(service)
}

/// Bind and serve until ctrl-c.
pub async fn serve(service: CacheService, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("listening on {addr}");
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        log::warn!("shutdown requested");
    }
}

async fn health() -> &'static str {
    "HEALTHY"
}

async fn read_all(State(service): State<CacheService>) -> Response {
    read(service, HashMap::new(), None).await
}

async fn read_search(
    State(service): State<CacheService>,
    Path(search_text): Path<String>,
) -> Response {
    read(service, HashMap::new(), Some(search_text)).await
}

async fn read_filtered(
    State(service): State<CacheService>,
    Form(mut filters): Form<HashMap<String, String>>,
) -> Response {
    // The reserved "searchstring" key carries the substring search; every
    // other form field is an equality filter.
    let search = filters.remove("searchstring");
    read(service, filters, search).await
}

async fn read(
    service: CacheService,
    filters: HashMap<String, String>,
    search: Option<String>,
) -> Response {
    if service.is_rebuilding() {
        return (StatusCode::SERVICE_UNAVAILABLE, REBUILD_BODY).into_response();
    }

    // Answer from the current store before kicking off any refresh: the
    // trigger flips the rebuild flag immediately, and the triggering request
    // must not reject itself.
    let result = service.query(&filters, search.as_deref()).await;

    // Staleness starts a detached refresh; only subsequent readers observe
    // the rebuilding signal.
    if service.is_stale() {
        service.trigger_rebuild_async();
    }

    match result {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => error_response(err),
    }
}

async fn update_current(State(service): State<CacheService>) -> Response {
    run_update(service, None).await
}

async fn update_with_schema(
    State(service): State<CacheService>,
    Json(body): Json<Value>,
) -> Response {
    let schema = match TableSchema::from_value(&body) {
        Ok(schema) => schema,
        Err(err) => return error_response(err),
    };
    run_update(service, Some(schema)).await
}

async fn run_update(service: CacheService, schema: Option<TableSchema>) -> Response {
    let counts = match service.rebuild_sync(schema).await {
        Ok(counts) => counts,
        Err(err) => return error_response(err),
    };

    let schema = service.schema().unwrap_or_default();
    let configured = schema
        .tables()
        .iter()
        .map(|t| format!("{}: {:?}", t.name, t.columns))
        .collect::<Vec<_>>()
        .join("\n");
    let recorded = schema
        .tables()
        .iter()
        .map(|t| format!("{}: {}", t.name, counts.get(&t.name).copied().unwrap_or(0)))
        .collect::<Vec<_>>()
        .join("\n");

    format!("OK\n\nDB configuration:\n{configured}\n\nRecorded:\n{recorded}").into_response()
}

/// Map engine errors onto the HTTP contract.
fn error_response(err: CacheError) -> Response {
    match err {
        CacheError::RebuildInProgress => {
            (StatusCode::SERVICE_UNAVAILABLE, REBUILD_BODY).into_response()
        }
        CacheError::NoMatchingColumns => {
            (StatusCode::NOT_FOUND, err.to_string()).into_response()
        }
        CacheError::InvalidIdentifier(_) | CacheError::InvalidSchema(_) => {
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
        CacheError::Remote(remote) => {
            // Propagate the remote's status/text/reason verbatim.
            let status = StatusCode::from_u16(remote.status)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, format!("{}\n{}", remote.text, remote.reason)).into_response()
        }
        other => {
            log::error!("request failed: {other}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Storage error").into_response()
        }
    }
}
