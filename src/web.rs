//! HTTP surface of the decision engine: policy administration, the subject
//! directory and `/simulate`. Handlers are thin; every rule lives in
//! `storage` and `authz`.
use crate::authz::types::{
    AccessRequest, AddRuleRequest, AssignRequest, BindRequest, CreatePolicyRequest, Policy,
    PolicyBinding, PolicyRule, Role, SimulateRequest, SubjectType,
};
use crate::decision;
use crate::errors::ArbiterError;
use crate::settings::Settings;
use crate::storage::{self, bindings, policies, rules, subjects};
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use miette::IntoDiagnostic;
use sea_orm::DatabaseConnection;
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Identity established by the upstream authentication layer.
pub const SUBJECT_HEADER: &str = "x-subject-id";
pub const ROLE_HEADER: &str = "x-role-id";

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub db: DatabaseConnection,
}

// Security headers middleware
async fn security_headers(request: Request<Body>, next: Next) -> impl IntoResponse {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    // Decisions and policy state must never be served from a cache
    headers.insert(
        HeaderName::from_static("cache-control"),
        HeaderValue::from_static("no-store"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );

    response
}

pub fn router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.settings.server.request_timeout_secs);

    Router::new()
        .route("/healthz", get(health))
        .route("/policies", get(list_policies).post(create_policy))
        .route("/policies/{id}", get(get_policy).delete(delete_policy))
        .route("/policies/{id}/activate", post(activate_policy))
        .route("/policies/{id}/archive", post(archive_policy))
        .route("/policies/{id}/rules", get(list_rules).post(add_rule))
        .route("/policies/rules/{rule_id}", delete(remove_rule))
        .route("/policies/{id}/bindings", get(list_bindings))
        .route("/policies/{id}/bind", post(bind_policy))
        .route("/policies/{id}/assign", post(assign_policy))
        .route("/policies/bindings/{binding_id}", delete(unbind_policy))
        .route("/roles", get(list_roles))
        .route("/roles/{id}/policies", get(role_policies))
        .route("/users/{id}/policies", get(user_policies))
        .route("/simulate", post(simulate))
        .layer(middleware::from_fn(security_headers))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(settings: Settings, db: DatabaseConnection) -> miette::Result<()> {
    let state = AppState {
        settings: Arc::new(settings),
        db,
    };

    let addr: SocketAddr = state
        .settings
        .bind_addr()
        .parse()
        .map_err(|e| miette::miette!("bad listen addr: {e}"))?;
    if state.settings.authz.enforce_admin {
        tracing::info!("Administrative calls are checked against the engine");
    } else {
        tracing::warn!("Admin enforcement is DISABLED - any caller may edit policies");
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;
    tracing::info!(%addr, "Policy decision API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ArbiterError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ArbiterError::InvalidRequest(rejection.body_text()))
}

/// Check the caller against the engine itself before an administrative
/// call. A no-op unless `authz.enforce_admin` is set.
///
/// The caller is always judged under the role recorded in the directory;
/// `x-role-id` only selects the role for `/simulate`.
async fn authorize_admin(
    state: &AppState,
    headers: &HeaderMap,
    action: &str,
    resource: &str,
) -> Result<(), ArbiterError> {
    if !state.settings.authz.enforce_admin {
        return Ok(());
    }
    let subject_id = header_value(headers, SUBJECT_HEADER).ok_or(ArbiterError::Unauthenticated)?;
    let request = AccessRequest {
        subject_id: subject_id.to_string(),
        role_id: None,
        action: action.to_string(),
        resource: resource.to_string(),
        context: Value::Object(Map::new()),
    };

    let decision = match decision::evaluate(&state.db, &state.settings.storage, &request).await {
        Ok(decision) => decision,
        Err(ArbiterError::InvalidSubject(who)) => {
            return Err(ArbiterError::Forbidden(format!("unknown caller: {who}")))
        }
        Err(e) => return Err(e),
    };
    if decision.allowed {
        Ok(())
    } else {
        tracing::info!(
            subject_id = %subject_id,
            action,
            resource,
            reason = %decision.reason,
            "Administrative call denied"
        );
        Err(ArbiterError::Forbidden(decision.reason))
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// ---------- Policies ----------

async fn list_policies(State(state): State<AppState>) -> Result<Json<Vec<Policy>>, ArbiterError> {
    let list = storage::with_retry(&state.settings.storage, "list_policies", || {
        policies::list(&state.db)
    })
    .await?;
    Ok(Json(list))
}

async fn get_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Policy>, ArbiterError> {
    let policy = storage::with_retry(&state.settings.storage, "get_policy", || {
        policies::get(&state.db, &id)
    })
    .await?;
    Ok(Json(policy))
}

async fn create_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreatePolicyRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ArbiterError> {
    authorize_admin(&state, &headers, "create", "policy").await?;
    let req = body(payload)?;
    let policy =
        policies::create_draft(&state.db, req.policy_number, &req.name, req.description).await?;
    Ok((StatusCode::CREATED, Json(policy)))
}

async fn delete_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ArbiterError> {
    authorize_admin(&state, &headers, "delete", "policy").await?;
    policies::delete(&state.db, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn activate_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ArbiterError> {
    authorize_admin(&state, &headers, "activate", "policy").await?;
    Ok(Json(policies::activate(&state.db, &id).await?))
}

async fn archive_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ArbiterError> {
    authorize_admin(&state, &headers, "archive", "policy").await?;
    Ok(Json(policies::archive(&state.db, &id).await?))
}

// ---------- Rules ----------

async fn list_rules(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<PolicyRule>>, ArbiterError> {
    let list = storage::with_retry(&state.settings.storage, "list_rules", || {
        rules::list_rules(&state.db, &id)
    })
    .await?;
    Ok(Json(list))
}

async fn add_rule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<AddRuleRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ArbiterError> {
    authorize_admin(&state, &headers, "edit", "policy").await?;
    let req = body(payload)?;
    let rule = rules::add_rule(
        &state.db,
        &id,
        req.effect,
        &req.resource,
        &req.action,
        req.conditions,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn remove_rule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(rule_id): Path<String>,
) -> Result<StatusCode, ArbiterError> {
    authorize_admin(&state, &headers, "edit", "policy").await?;
    rules::remove_rule(&state.db, &rule_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------- Bindings ----------

async fn list_bindings(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<PolicyBinding>>, ArbiterError> {
    let list = storage::with_retry(&state.settings.storage, "list_bindings", || {
        bindings::list_bindings_for_policy(&state.db, &id)
    })
    .await?;
    Ok(Json(list))
}

async fn bind_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<BindRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ArbiterError> {
    authorize_admin(&state, &headers, "bind", "policy").await?;
    let req = body(payload)?;
    let binding = bindings::bind(&state.db, &id, req.subject_type, &req.subject_id).await?;
    Ok((StatusCode::CREATED, Json(binding)))
}

async fn assign_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<AssignRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ArbiterError> {
    authorize_admin(&state, &headers, "bind", "policy").await?;
    let req = body(payload)?;
    let binding = bindings::assign(&state.db, &id, &req.role_id).await?;
    Ok((StatusCode::CREATED, Json(binding)))
}

async fn unbind_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(binding_id): Path<String>,
) -> Result<StatusCode, ArbiterError> {
    authorize_admin(&state, &headers, "bind", "policy").await?;
    bindings::unbind(&state.db, &binding_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------- Subjects ----------

async fn list_roles(State(state): State<AppState>) -> Result<Json<Vec<Role>>, ArbiterError> {
    let roles = storage::with_retry(&state.settings.storage, "list_roles", || {
        subjects::list_roles(&state.db)
    })
    .await?;
    Ok(Json(roles))
}

async fn role_policies(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Policy>>, ArbiterError> {
    let list = storage::with_retry(&state.settings.storage, "role_policies", || {
        policies::list_for_subject(&state.db, SubjectType::Role, &id)
    })
    .await?;
    Ok(Json(list))
}

async fn user_policies(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Policy>>, ArbiterError> {
    let list = storage::with_retry(&state.settings.storage, "user_policies", || {
        policies::list_for_subject(&state.db, SubjectType::User, &id)
    })
    .await?;
    Ok(Json(list))
}

// ---------- Decisions ----------

async fn simulate(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SimulateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ArbiterError> {
    authorize_admin(&state, &headers, "simulate", "auth").await?;
    let req = body(payload)?;

    let subject_id = req
        .subject_id
        .or_else(|| header_value(&headers, SUBJECT_HEADER).map(str::to_string))
        .ok_or(ArbiterError::Unauthenticated)?;
    let role_id = req
        .role_id
        .or_else(|| header_value(&headers, ROLE_HEADER).map(str::to_string));

    let request = AccessRequest {
        subject_id,
        role_id,
        action: req.action,
        resource: req.resource,
        context: req.context,
    };
    let decision = decision::evaluate(&state.db, &state.settings.storage, &request).await?;
    Ok(Json(decision))
}
