//! HTTP surface. Axum supplies the listener and transport; every request
//! is dispatched through the pattern route table, which is built once at
//! startup and immutable afterwards, so registration order is the only
//! matching precedence. Handlers answer per-endpoint; a panic anywhere
//! below is caught at this boundary and reported without detail.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::agents::{AgentRecord, Aggregator, HealthSnapshot, SessionRecord};
use crate::config::FleetConfig;
use crate::error::ApiError;
use crate::exec::read_text_file;
use crate::health::{HealthTracker, KernelHealth};
use crate::mesh::{collect_mesh, MeshDevice};
use crate::models::FleetSnapshot;
use crate::probe::Prober;
use crate::router::{parse_query, PatternRouter};
use crate::snapshot::build_fleet_snapshot;
use crate::store::AssetStore;

/// Decoded request context handed to route handlers.
pub struct ReqCtx {
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
}

type ApiFuture = BoxFuture<'static, Response>;
type ApiHandler = Box<dyn Fn(AppState, ReqCtx) -> ApiFuture + Send + Sync>;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<FleetConfig>,
    pub prober: Prober,
    pub aggregator: Arc<Aggregator>,
    pub health: HealthTracker,
    routes: Arc<PatternRouter<ApiHandler>>,
}

impl AppState {
    pub fn new(cfg: Arc<FleetConfig>) -> Self {
        Self {
            aggregator: Arc::new(Aggregator::new(cfg.coordination.clone())),
            prober: Prober::new(),
            health: HealthTracker::new(),
            routes: Arc::new(api_routes()),
            cfg,
        }
    }
}

/// Boxes an async handler fn into the route table's payload type.
fn h<F, Fut, R>(f: F) -> ApiHandler
where
    F: Fn(AppState, ReqCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    Box::new(move |state, ctx| {
        let fut = f(state, ctx);
        Box::pin(async move { fut.await.into_response() })
    })
}

fn api_routes() -> PatternRouter<ApiHandler> {
    let mut routes = PatternRouter::new();
    routes.register("GET", "/api/health", h(get_health));
    routes.register("GET", "/api/fleet", h(get_fleet));
    routes.register("GET", "/api/agents", h(get_agents));
    routes.register("GET", "/api/agents/:name", h(get_agent));
    routes.register("GET", "/api/sessions", h(list_sessions));
    routes.register("GET", "/api/sessions/:name", h(get_session));
    routes.register("GET", "/api/notes", h(get_notes));
    routes.register("GET", "/api/media", h(get_media));
    routes.register("GET", "/api/mesh", h(get_mesh));
    routes.register("POST", "/api/agents/spawn", h(post_spawn));
    routes.register("POST", "/api/agents/:name/park", h(post_park));
    routes.register("POST", "/api/agents/:name/handoff", h(post_handoff));
    routes
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(state)
        .layer(middleware::from_fn(cors))
}

/// Single entry point: preflight first, then the pattern table.
async fn dispatch(State(state): State<AppState>, req: Request) -> Response {
    if req.method() == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    let path = req.uri().path().to_string();
    let query = parse_query(req.uri().query());
    let routes = state.routes.clone();
    match routes.find(req.method().as_str(), &path) {
        Some(matched) => {
            let ctx = ReqCtx {
                params: matched.params,
                query,
            };
            let fut = (matched.handler)(state.clone(), ctx);
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(response) => response,
                Err(_) => {
                    ApiError::Internal(anyhow::anyhow!("handler panicked on {path}"))
                        .into_response()
                }
            }
        }
        None => ApiError::NotFound(format!("no route for {path}")).into_response(),
    }
}

async fn cors(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("content-type"),
    );
    response
}

/// Rejects parent-traversal in a decoded path or directory parameter.
/// The check also runs on one more decode pass, so a doubly-encoded
/// `..` does not slip through.
fn reject_traversal(value: &str) -> Result<(), ApiError> {
    let decoded = urlencoding::decode(value)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| value.to_string());
    for candidate in [value, decoded.as_str()] {
        let escapes = candidate.starts_with(['/', '\\'])
            || candidate.split(['/', '\\']).any(|segment| segment == "..");
        if escapes {
            return Err(ApiError::InvalidInput("path traversal".into()));
        }
    }
    Ok(())
}

fn parse_num(ctx: &ReqCtx, key: &str) -> Result<Option<usize>, ApiError> {
    match ctx.query.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ApiError::InvalidInput(format!("{key} must be a number"))),
    }
}

async fn get_health(state: AppState, _ctx: ReqCtx) -> Json<KernelHealth> {
    Json(
        state
            .health
            .report(state.cfg.hosts.len(), state.cfg.services.len()),
    )
}

async fn get_fleet(state: AppState, _ctx: ReqCtx) -> Json<FleetSnapshot> {
    let snapshot = build_fleet_snapshot(&state.cfg, &state.prober, &state.aggregator).await;
    state.health.mark_snapshot(snapshot.generated_at.clone());
    Json(snapshot)
}

async fn get_agents(state: AppState, _ctx: ReqCtx) -> Json<HealthSnapshot> {
    Json(state.aggregator.collect().await)
}

async fn get_agent(state: AppState, ctx: ReqCtx) -> Result<Json<AgentRecord>, ApiError> {
    let name = ctx.params.get("name").cloned().unwrap_or_default();
    let snapshot = state.aggregator.collect().await;
    snapshot
        .agents
        .into_iter()
        .find(|record| record.name == name)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("agent {name}")))
}

async fn list_sessions(state: AppState, ctx: ReqCtx) -> Result<Json<Vec<SessionRecord>>, ApiError> {
    let dir = ctx.query.get("dir").map(String::as_str);
    if let Some(dir) = dir {
        reject_traversal(dir)?;
    }
    Ok(Json(state.aggregator.sessions(dir).await))
}

async fn get_session(state: AppState, ctx: ReqCtx) -> Result<Response, ApiError> {
    let name = ctx.params.get("name").cloned().unwrap_or_default();
    reject_traversal(&name)?;
    let path = state.aggregator.session_path(&name);
    match read_text_file(&path).await {
        Some(content) => Ok(content.into_response()),
        None => Err(ApiError::NotFound(format!("session {name}"))),
    }
}

async fn get_notes(state: AppState, ctx: ReqCtx) -> Result<Json<Value>, ApiError> {
    query_store("notes", &state.cfg.stores.notes_path, &ctx)
}

async fn get_media(state: AppState, ctx: ReqCtx) -> Result<Json<Value>, ApiError> {
    query_store("media", &state.cfg.stores.media_path, &ctx)
}

fn query_store(name: &str, path: &str, ctx: &ReqCtx) -> Result<Json<Value>, ApiError> {
    let store =
        AssetStore::open(Path::new(path)).ok_or_else(|| ApiError::Unavailable(name.into()))?;
    let limit = parse_num(ctx, "limit")?;
    let offset = parse_num(ctx, "offset")?;
    let page = store.query(ctx.query.get("q").map(String::as_str), limit, offset);
    Ok(Json(json!({ "rows": page.rows, "total": page.total })))
}

async fn get_mesh(state: AppState, _ctx: ReqCtx) -> Json<Vec<MeshDevice>> {
    Json(collect_mesh(&state.cfg.mesh.status_command, state.cfg.mesh.timeout_ms).await)
}

/// Planned write actions answer 501 with the contract they will honor,
/// so clients can already code against the shape.
fn not_implemented(action: &str, target: Option<&str>, contract: Value) -> Response {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(json!({
            "error": "not_implemented",
            "action": action,
            "target": target,
            "ticket": Uuid::new_v4().to_string(),
            "planned": contract,
        })),
    )
        .into_response()
}

async fn post_spawn(_state: AppState, _ctx: ReqCtx) -> Response {
    not_implemented(
        "spawn",
        None,
        json!({
            "body": { "name": "string", "model": "string", "focus": "string" },
            "returns": "the created agent record",
        }),
    )
}

async fn post_park(_state: AppState, ctx: ReqCtx) -> Response {
    not_implemented(
        "park",
        ctx.params.get("name").map(String::as_str),
        json!({
            "effect": "sets the agent's roster status to Parked",
            "returns": "the updated agent record",
        }),
    )
}

async fn post_handoff(_state: AppState, ctx: ReqCtx) -> Response {
    not_implemented(
        "handoff",
        ctx.params.get("name").map(String::as_str),
        json!({
            "body": { "to": "string", "summary": "string" },
            "effect": "transfers the agent's focus to another identity",
            "returns": "both updated agent records",
        }),
    )
}
