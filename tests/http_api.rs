mod helpers;

use arbiter::settings::Settings;
use arbiter::web::{router, AppState};
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use helpers::{seed_role, seed_user, TestDb};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app(db: &TestDb, enforce_admin: bool) -> Router {
    let mut settings = Settings::default();
    settings.authz.enforce_admin = enforce_admin;
    router(AppState {
        settings: Arc::new(settings),
        db: db.connection().clone(),
    })
}

/// Send one request and return status plus parsed JSON body (Null if empty).
async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("Failed to build request");

    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("Router failed");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, value)
}

async fn create_policy(app: &Router, number: i32) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/policies",
        Some(json!({ "policy_number": number, "name": format!("Policy {number}") })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_str().expect("policy id").to_string()
}

#[tokio::test]
async fn test_healthz_and_security_headers() {
    let test_db = TestDb::new().await;
    let app = app(&test_db, false);

    let response = app
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert_eq!(response.headers().get("cache-control").unwrap(), "no-store");
}

#[tokio::test]
async fn test_policy_lifecycle_over_http() {
    let test_db = TestDb::new().await;
    let app = app(&test_db, false);
    seed_role(test_db.connection(), "R", 3).await;
    seed_user(test_db.connection(), "alice", "R").await;

    let id = create_policy(&app, 1).await;

    let (status, rule) = send(
        &app,
        Method::POST,
        &format!("/policies/{id}/rules"),
        Some(json!({ "effect": "allow", "resource": "users", "action": "read" })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(rule["effect"], "allow");

    let (status, binding) = send(
        &app,
        Method::POST,
        &format!("/policies/{id}/assign"),
        Some(json!({ "role_id": "R" })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(binding["subject_type"], "role");

    let (status, policy) = send(
        &app,
        Method::POST,
        &format!("/policies/{id}/activate"),
        None,
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(policy["status"], "active");
    assert_eq!(policy["allow_count"], 1);

    let (status, decision) = send(
        &app,
        Method::POST,
        "/simulate",
        Some(json!({ "subject_id": "alice", "action": "read", "resource": "users" })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decision["allowed"], true);
    assert_eq!(decision["policy_id"], id.as_str());

    // Frozen rules
    let (status, err) = send(
        &app,
        Method::POST,
        &format!("/policies/{id}/rules"),
        Some(json!({ "effect": "deny", "resource": "*", "action": "*" })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"], "immutable_policy");

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/policies/{id}/archive"),
        None,
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, rules) = send(&app, Method::GET, &format!("/policies/{id}/rules"), None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rules.as_array().unwrap().len(), 1);

    let (status, err) = send(&app, Method::DELETE, &format!("/policies/{id}"), None, &[]).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"], "invalid_state");
}

#[tokio::test]
async fn test_error_status_mapping() {
    let test_db = TestDb::new().await;
    let app = app(&test_db, false);

    let (status, body) = send(&app, Method::GET, "/policies/missing", None, &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    create_policy(&app, 1).await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/policies",
        Some(json!({ "policy_number": 1, "name": "Again" })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "duplicate_number");

    // Malformed JSON body
    let (status, body) = send(
        &app,
        Method::POST,
        "/policies",
        Some(json!({ "policy_number": "one" })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");

    let (status, body) = send(
        &app,
        Method::POST,
        "/simulate",
        Some(json!({ "subject_id": "ghost", "action": "read", "resource": "users" })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "invalid_subject");

    let (status, _) = send(
        &app,
        Method::POST,
        "/simulate",
        Some(json!({ "action": "read", "resource": "users" })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_bindings_endpoints() {
    let test_db = TestDb::new().await;
    let app = app(&test_db, false);
    let id = create_policy(&app, 1).await;

    let (status, binding) = send(
        &app,
        Method::POST,
        &format!("/policies/{id}/bind"),
        Some(json!({ "subject_type": "user", "subject_id": "alice" })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/policies/{id}/bind"),
        Some(json!({ "subject_type": "user", "subject_id": "alice" })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "duplicate_binding");

    let (status, policies) = send(&app, Method::GET, "/users/alice/policies", None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(policies[0]["id"], id.as_str());

    let binding_id = binding["id"].as_str().unwrap();
    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/policies/bindings/{binding_id}"),
        None,
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, listed) = send(&app, Method::GET, &format!("/policies/{id}/bindings"), None, &[]).await;
    assert!(listed.as_array().unwrap().is_empty());

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/policies/{id}/assign"),
        Some(json!({ "role_id": "ghost" })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_remove_rule_and_delete_draft() {
    let test_db = TestDb::new().await;
    let app = app(&test_db, false);
    let id = create_policy(&app, 1).await;

    let (_, rule) = send(
        &app,
        Method::POST,
        &format!("/policies/{id}/rules"),
        Some(json!({
            "effect": "deny",
            "resource": "payroll",
            "action": "*",
            "conditions": { "location": "remote" }
        })),
        &[],
    )
    .await;
    assert_eq!(rule["conditions"], json!({ "location": "remote" }));
    let rule_id = rule["id"].as_str().unwrap();

    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/policies/rules/{rule_id}"),
        None,
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, policy) = send(&app, Method::GET, &format!("/policies/{id}"), None, &[]).await;
    assert_eq!(policy["deny_count"], 0);

    let (status, _) = send(&app, Method::DELETE, &format!("/policies/{id}"), None, &[]).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, list) = send(&app, Method::GET, "/policies", None, &[]).await;
    assert!(list.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_roles_listing() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    seed_role(db, "staff", 5).await;
    seed_role(db, "superadmin", 0).await;
    seed_role(db, "manager", 2).await;
    let app = app(&test_db, false);

    let (status, roles) = send(&app, Method::GET, "/roles", None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = roles
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["superadmin", "manager", "staff"]);
}

#[tokio::test]
async fn test_simulate_uses_caller_headers() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    seed_role(db, "R", 3).await;
    seed_user(db, "alice", "R").await;
    let app = app(&test_db, false);

    let (status, decision) = send(
        &app,
        Method::POST,
        "/simulate",
        Some(json!({ "action": "read", "resource": "users" })),
        &[("x-subject-id", "alice")],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decision["allowed"], false);
    assert_eq!(decision["reason"], "no matching policy rule (default deny)");
    assert!(decision["policy_id"].is_null());
}

#[tokio::test]
async fn test_simulate_role_override_from_body_and_header() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    seed_role(db, "staff", 5).await;
    seed_role(db, "auditor", 4).await;
    seed_user(db, "bob", "staff").await;
    let app = app(&test_db, false);

    let id = create_policy(&app, 1).await;
    send(
        &app,
        Method::POST,
        &format!("/policies/{id}/rules"),
        Some(json!({ "effect": "allow", "resource": "ledger", "action": "read" })),
        &[],
    )
    .await;
    send(
        &app,
        Method::POST,
        &format!("/policies/{id}/assign"),
        Some(json!({ "role_id": "auditor" })),
        &[],
    )
    .await;
    send(&app, Method::POST, &format!("/policies/{id}/activate"), None, &[]).await;

    let request = json!({ "subject_id": "bob", "action": "read", "resource": "ledger" });
    let (_, own_role) = send(&app, Method::POST, "/simulate", Some(request.clone()), &[]).await;
    assert_eq!(own_role["allowed"], false);

    let (_, via_header) = send(
        &app,
        Method::POST,
        "/simulate",
        Some(request),
        &[("x-role-id", "auditor")],
    )
    .await;
    assert_eq!(via_header["allowed"], true);
    assert_eq!(
        via_header["reason"],
        format!("allowed by policy {id} rule (ledger, read)")
    );
}

#[tokio::test]
async fn test_admin_enforcement() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    seed_role(db, "admin", 1).await;
    seed_role(db, "staff", 5).await;
    seed_user(db, "root", "admin").await;
    seed_user(db, "bob", "staff").await;

    // Bootstrap with enforcement off
    let open = app(&test_db, false);
    let admin_policy = create_policy(&open, 1).await;
    send(
        &open,
        Method::POST,
        &format!("/policies/{admin_policy}/rules"),
        Some(json!({ "effect": "allow", "resource": "policy", "action": "*" })),
        &[],
    )
    .await;
    send(
        &open,
        Method::POST,
        &format!("/policies/{admin_policy}/assign"),
        Some(json!({ "role_id": "admin" })),
        &[],
    )
    .await;
    send(
        &open,
        Method::POST,
        &format!("/policies/{admin_policy}/activate"),
        None,
        &[],
    )
    .await;

    let guarded = app(&test_db, true);
    let create = json!({ "policy_number": 2, "name": "Guarded" });

    let (status, _) = send(&guarded, Method::POST, "/policies", Some(create.clone()), &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &guarded,
        Method::POST,
        "/policies",
        Some(create.clone()),
        &[("x-subject-id", "bob")],
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    // A claimed role is not trusted for administrative calls
    let (status, _) = send(
        &guarded,
        Method::POST,
        "/policies",
        Some(create.clone()),
        &[("x-subject-id", "bob"), ("x-role-id", "admin")],
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (_, list) = send(&guarded, Method::GET, "/policies", None, &[]).await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, _) = send(
        &guarded,
        Method::POST,
        "/policies",
        Some(create),
        &[("x-subject-id", "root")],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Reads are not administrative
    let (status, _) = send(&guarded, Method::GET, "/policies", None, &[]).await;
    assert_eq!(status, StatusCode::OK);

    // Simulation needs the `simulate` permission on `auth`
    let (status, _) = send(
        &guarded,
        Method::POST,
        "/simulate",
        Some(json!({ "subject_id": "bob", "action": "read", "resource": "users" })),
        &[("x-subject-id", "root")],
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
