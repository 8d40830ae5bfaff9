//! HTTP API 集成测试
//!
//! 这些请求在访问数据库之前就会被处理完（拒绝、空结果或校验失败），
//! 连接池是惰性的，不需要真实数据库。

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;

mod common;
use common::{
    create_test_app_state, create_test_config, issue_token, lazy_pool, EMERGENCY_ROLE, REPORTING_ROLE,
};

fn app() -> Router {
    let config = create_test_config();
    let state = create_test_app_state(lazy_pool(&config));
    tenant_guard::routes::create_router(state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let response = app().oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_trace_id_is_echoed() {
    let request = Request::builder()
        .uri("/health")
        .header("x-trace-id", "trace-abc")
        .body(Body::empty())
        .unwrap();

    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-trace-id"], "trace-abc");
}

#[tokio::test]
async fn test_unauthenticated_list_is_empty() {
    let response = app()
        .oneshot(get("/api/v1/tables/child_profiles/rows"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["rows"], json!([]));
    assert_eq!(json["count"], 0);
}

#[tokio::test]
async fn test_unauthenticated_get_is_not_found() {
    let uri = format!("/api/v1/tables/child_profiles/rows/{}", Uuid::new_v4());
    let response = app().oneshot(get(&uri)).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"]["message"], "Resource not found");
}

#[tokio::test]
async fn test_unauthenticated_insert_is_rejected() {
    let response = app()
        .oneshot(post_json(
            "/api/v1/tables/child_profiles/rows",
            None,
            json!({"family_id": Uuid::new_v4(), "first_name": "Emma"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_table_is_not_found() {
    let response = app()
        .oneshot(get("/api/v1/tables/payments/rows"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_limit_is_validated() {
    let response = app()
        .oneshot(get("/api/v1/tables/child_profiles/rows?limit=0"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_activity_requires_authentication() {
    let response = app().oneshot(get("/api/v1/activity")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_invalid_token_is_treated_as_anonymous() {
    let request = Request::builder()
        .uri("/api/v1/activity")
        .header("authorization", "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();

    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_report_requires_reporting_role() {
    let token = issue_token(Uuid::new_v4(), &["parent"]);

    let response = app()
        .oneshot(post_json("/api/v1/reports/child_profiles", Some(&token), json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_report_on_non_reportable_table_is_not_found() {
    let token = issue_token(Uuid::new_v4(), &[REPORTING_ROLE]);

    let response = app()
        .oneshot(post_json("/api/v1/reports/game_events", Some(&token), json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_report_rejects_filters_on_redacted_fields() {
    let token = issue_token(Uuid::new_v4(), &[REPORTING_ROLE]);

    let response = app()
        .oneshot(post_json(
            "/api/v1/reports/child_profiles",
            Some(&token),
            json!({"filters": {"first_name": "Emma"}}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_report_limit_is_bounded() {
    let token = issue_token(Uuid::new_v4(), &[REPORTING_ROLE]);

    let response = app()
        .oneshot(post_json(
            "/api/v1/reports/child_profiles",
            Some(&token),
            json!({"limit": 50_000}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_emergency_access_requires_responder_role() {
    let token = issue_token(Uuid::new_v4(), &["parent"]);

    let response = app()
        .oneshot(post_json(
            "/api/v1/emergency-access",
            Some(&token),
            json!({
                "reason": "just want to look around",
                "authorized_by": Uuid::new_v4(),
                "duration_minutes": 60
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_reporting_role_cannot_request_emergency_access() {
    let token = issue_token(Uuid::new_v4(), &[REPORTING_ROLE]);

    let response = app()
        .oneshot(post_json(
            "/api/v1/emergency-access",
            Some(&token),
            json!({
                "reason": "child safety escalation #4411",
                "authorized_by": Uuid::new_v4(),
                "duration_minutes": 30
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_emergency_access_cannot_be_self_authorized() {
    let me = Uuid::new_v4();
    let token = issue_token(me, &[EMERGENCY_ROLE]);

    let response = app()
        .oneshot(post_json(
            "/api/v1/emergency-access",
            Some(&token),
            json!({
                "reason": "child safety escalation #4411",
                "authorized_by": me,
                "duration_minutes": 30
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_emergency_access_duration_is_capped() {
    let token = issue_token(Uuid::new_v4(), &[EMERGENCY_ROLE]);

    let response = app()
        .oneshot(post_json(
            "/api/v1/emergency-access",
            Some(&token),
            json!({
                "reason": "child safety escalation #4411",
                "authorized_by": Uuid::new_v4(),
                "duration_minutes": 600
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_endpoints_require_admin_role() {
    let token = issue_token(Uuid::new_v4(), &[REPORTING_ROLE]);

    let response = app()
        .oneshot(post_json("/api/v1/admin/retention/sweep", Some(&token), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app()
        .oneshot(get("/api/v1/admin/retention-policies"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
