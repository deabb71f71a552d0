//! Grantward REST API Server
//!
//! Run with: cargo run --features server --bin grantward-server
//!
//! Every request except `/health` and `/bootstrap` names its caller in the
//! `x-caller-id` header.
//!
//! Endpoints:
//!   GET    /health                      - Liveness
//!   POST   /bootstrap                   - Create the first administrator
//!   GET    /users                       - List users
//!   POST   /users                       - Create user
//!   GET    /users/:id                   - Get user
//!   DELETE /users/:id                   - Delete user
//!   GET    /users/:id/grants            - Effective grants
//!   PUT    /users/:id/grants            - Replace direct grants
//!   DELETE /users/:id/group             - Unassign from group
//!   GET    /groups                      - List groups with members
//!   POST   /groups                      - Create group
//!   GET    /groups/:id                  - Get group
//!   PUT    /groups/:id                  - Rename group
//!   DELETE /groups/:id                  - Delete group
//!   PUT    /groups/:id/grants           - Replace group grants
//!   PUT    /groups/:id/members          - Set members
//!   POST   /groups/:id/members/:user_id - Assign one user
//!   POST   /check                       - Evaluate a requirement for the caller

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use grantward::{
    Config, Decision, ErrorKind, GrantError, GrantRecord, PermissionService, Required, ServiceResult, Store,
};

const CALLER_HEADER: &str = "x-caller-id";

// ============================================================================
// State
// ============================================================================

#[derive(Clone)]
struct AppState {
    service: Arc<PermissionService>,
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
struct NameReq {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MembersReq {
    user_ids: Vec<String>,
}

#[derive(Serialize)]
struct HealthRes {
    status: &'static str,
    version: &'static str,
}

type Reply<T> = (StatusCode, Json<ServiceResult<T>>);

// ============================================================================
// Helpers
// ============================================================================

fn status_of(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AuthorizationDenied => StatusCode::FORBIDDEN,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn caller(headers: &HeaderMap) -> Result<String, GrantError> {
    headers
        .get(CALLER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| GrantError::validation(format!("missing {} header", CALLER_HEADER)))
}

/// Run a façade call on the blocking pool. The task runs to completion even
/// if the client goes away, so persistence and cache invalidation are never
/// split by a dropped request.
async fn run<T, F>(state: &AppState, what: &'static str, f: F) -> Reply<T>
where
    T: Send + 'static,
    F: FnOnce(&PermissionService) -> grantward::Result<T> + Send + 'static,
{
    let service = Arc::clone(&state.service);
    let r = match tokio::task::spawn_blocking(move || f(&service)).await {
        Ok(r) => r,
        Err(e) => Err(GrantError::Storage(e.to_string())),
    };
    let code = match &r {
        Ok(_) => StatusCode::OK,
        Err(e) => status_of(e.kind()),
    };
    if let (true, Err(e)) = (code.is_server_error(), &r) {
        tracing::error!(error = %e, what, "request failed");
    }
    (code, Json(ServiceResult::from_result(r, what)))
}

fn rejected<T>(e: GrantError) -> Reply<T> {
    (status_of(e.kind()), Json(ServiceResult::err(e.to_string())))
}

macro_rules! with_caller {
    ($headers:expr) => {
        match caller(&$headers) {
            Ok(c) => c,
            Err(e) => return rejected(e),
        }
    };
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<HealthRes> {
    Json(HealthRes { status: "ok", version: env!("CARGO_PKG_VERSION") })
}

async fn post_bootstrap(State(s): State<AppState>, Json(req): Json<NameReq>) -> Reply<grantward::User> {
    run(&s, "bootstrapped", move |svc| svc.bootstrap(&req.name)).await
}

// Users

async fn list_users(State(s): State<AppState>, headers: HeaderMap) -> Reply<Vec<grantward::User>> {
    let c = with_caller!(headers);
    run(&s, "users listed", move |svc| svc.list_users(&c)).await
}

async fn create_user(
    State(s): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NameReq>,
) -> Reply<grantward::User> {
    let c = with_caller!(headers);
    run(&s, "user created", move |svc| svc.create_user(&c, &req.name)).await
}

async fn get_user(State(s): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Reply<grantward::User> {
    let c = with_caller!(headers);
    run(&s, "user found", move |svc| svc.get_user(&c, &id)).await
}

async fn delete_user(State(s): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Reply<()> {
    let c = with_caller!(headers);
    run(&s, "user deleted", move |svc| svc.delete_user(&c, &id)).await
}

async fn get_effective_grants(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Reply<grantward::ResolvedGrantSet> {
    let c = with_caller!(headers);
    run(&s, "grants resolved", move |svc| svc.get_effective_grants(&c, &id).map(|r| (*r).clone())).await
}

async fn put_user_grants(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(grants): Json<Vec<GrantRecord>>,
) -> Reply<grantward::User> {
    let c = with_caller!(headers);
    run(&s, "user grants updated", move |svc| svc.update_user_grants(&c, &id, &grants)).await
}

async fn unassign_user(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Reply<grantward::UserGroup> {
    let c = with_caller!(headers);
    run(&s, "user unassigned", move |svc| svc.unassign_user_from_group(&c, &id)).await
}

// Groups

async fn list_groups(State(s): State<AppState>, headers: HeaderMap) -> Reply<Vec<grantward::UserGroupView>> {
    let c = with_caller!(headers);
    run(&s, "groups listed", move |svc| svc.list_groups(&c)).await
}

async fn create_group(
    State(s): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NameReq>,
) -> Reply<grantward::UserGroup> {
    let c = with_caller!(headers);
    run(&s, "group created", move |svc| svc.create_group(&c, &req.name)).await
}

async fn get_group(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Reply<grantward::UserGroup> {
    let c = with_caller!(headers);
    run(&s, "group found", move |svc| svc.get_group(&c, &id)).await
}

async fn rename_group(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<NameReq>,
) -> Reply<grantward::UserGroup> {
    let c = with_caller!(headers);
    run(&s, "group renamed", move |svc| svc.rename_group(&c, &id, &req.name)).await
}

async fn delete_group(State(s): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Reply<()> {
    let c = with_caller!(headers);
    run(&s, "group deleted", move |svc| svc.delete_group(&c, &id)).await
}

async fn put_group_grants(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(grants): Json<Vec<GrantRecord>>,
) -> Reply<grantward::UserGroup> {
    let c = with_caller!(headers);
    run(&s, "group grants updated", move |svc| svc.update_group_grants(&c, &id, &grants)).await
}

async fn put_members(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<MembersReq>,
) -> Reply<grantward::UserGroup> {
    let c = with_caller!(headers);
    run(&s, "members assigned", move |svc| svc.assign_members(&c, &id, &req.user_ids)).await
}

async fn assign_user(
    State(s): State<AppState>,
    headers: HeaderMap,
    Path((id, user_id)): Path<(String, String)>,
) -> Reply<grantward::UserGroup> {
    let c = with_caller!(headers);
    run(&s, "user assigned", move |svc| svc.assign_user_to_group(&c, &user_id, &id)).await
}

async fn post_check(State(s): State<AppState>, headers: HeaderMap, Json(req): Json<Required>) -> Reply<Decision> {
    let c = with_caller!(headers);
    run(&s, "checked", move |svc| svc.decide(&c, &req)).await
}

// ============================================================================
// Main
// ============================================================================

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/bootstrap", post(post_bootstrap))
        .route("/users", get(list_users).post(create_user))
        .route("/users/:id", get(get_user).delete(delete_user))
        .route("/users/:id/grants", get(get_effective_grants).put(put_user_grants))
        .route("/users/:id/group", delete(unassign_user))
        .route("/groups", get(list_groups).post(create_group))
        .route("/groups/:id", get(get_group).put(rename_group).delete(delete_group))
        .route("/groups/:id/grants", put(put_group_grants))
        .route("/groups/:id/members", put(put_members))
        .route("/groups/:id/members/:user_id", post(assign_user))
        .route("/check", post(post_check))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("grantward=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!(db = %config.db_path, "opening grant store");
    let store = Store::open(&config.db_path)?;
    let state = AppState { service: Arc::new(PermissionService::open(&store, &config)) };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "grantward server running");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
