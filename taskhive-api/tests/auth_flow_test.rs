//! Auth integration tests: registration validation, login uniformity,
//! lockout, refresh rotation and reuse detection, blacklist fail-open /
//! fail-closed.
//!
//! Requires a Postgres instance (see `common`); the KV layer is the
//! in-process fake.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::json;

use common::{register_and_login, unique_suffix, TestContext};
use taskhive_api::config::Config;
use taskhive_shared::kv::FailingKv;

#[tokio::test]
async fn register_validates_and_conflicts_on_duplicates() {
    let ctx = TestContext::new().await.unwrap();
    let suffix = unique_suffix();
    let email = format!("dup{suffix}@test.example");

    // Bad email, short password, passwordless-digit, bad username.
    for payload in [
        json!({ "email": "not-an-email", "username": format!("u_{suffix}"), "password": "Password123" }),
        json!({ "email": &email, "username": format!("u_{suffix}"), "password": "short1" }),
        json!({ "email": &email, "username": format!("u_{suffix}"), "password": "passwordonly" }),
        json!({ "email": &email, "username": "x", "password": "Password123" }),
    ] {
        let (status, _, _) = ctx.post_json("/api/v1/register", None, payload).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    let ok = json!({ "email": &email, "username": format!("u_{suffix}"), "password": "Password123" });
    let (status, headers, body) = ctx.post_json("/api/v1/register", None, ok.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_i64().unwrap();
    assert_eq!(
        headers.get("location").unwrap().to_str().unwrap(),
        format!("/api/v1/users/{id}")
    );

    // Same email again: conflict, not validation.
    let (status, _, _) = ctx.post_json("/api/v1/register", None, ok).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn login_failure_is_uniform_and_locks_out() {
    let ctx = TestContext::new().await.unwrap();
    let user = register_and_login(&ctx).await;

    // Unknown user and wrong password are the same 401.
    let (status, _, body) = ctx
        .post_json(
            "/api/v1/login",
            None,
            json!({ "login": format!("ghost{}@test.example", unique_suffix()), "password": "Password123" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid credentials");

    // Default lockout threshold is 5. Each attempt arrives from its own
    // forwarded IP so the per-IP limiter stays quiet and the ban comes
    // from the failure counter keyed on the login itself.
    let mut last_status = StatusCode::OK;
    let mut last_headers = axum::http::HeaderMap::new();
    for attempt in 0..5 {
        let request = common::json_request(
            "POST",
            "/api/v1/login",
            None,
            &json!({ "login": user.email, "password": "WrongPass999" }),
            &[("x-forwarded-for", ["10.1.0.1", "10.1.0.2", "10.1.0.3", "10.1.0.4", "10.1.0.5"][attempt])],
        );
        let (status, headers, _) = ctx.request(request).await;
        last_status = status;
        last_headers = headers;
    }
    assert_eq!(last_status, StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = last_headers
        .get("retry-after")
        .expect("lockout sets Retry-After")
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after >= 1);

    // Even the correct password is refused while banned.
    let request = common::json_request(
        "POST",
        "/api/v1/login",
        None,
        &json!({ "login": user.email, "password": "Password123" }),
        &[("x-forwarded-for", "10.1.0.6")],
    );
    let (status, _, _) = ctx.request(request).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn per_ip_login_limiter_admits_five_then_denies() {
    let ctx = TestContext::new().await.unwrap();
    let suffix = unique_suffix();

    // Six logins for six different (unknown) accounts from one IP: the
    // default limit of 5/min admits five, the sixth gets a Retry-After.
    let mut statuses = Vec::new();
    let mut last_headers = axum::http::HeaderMap::new();
    for i in 0..6 {
        let request = common::json_request(
            "POST",
            "/api/v1/login",
            None,
            &json!({
                "login": format!("burst{i}_{suffix}@test.example"),
                "password": "Password123",
            }),
            &[("x-forwarded-for", "198.51.100.77")],
        );
        let (status, headers, _) = ctx.request(request).await;
        statuses.push(status);
        last_headers = headers;
    }

    assert!(statuses[..5].iter().all(|s| *s == StatusCode::UNAUTHORIZED));
    assert_eq!(statuses[5], StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = last_headers
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after >= 1 && retry_after <= 60);
}

#[tokio::test]
async fn refresh_rotates_and_detects_reuse() {
    let ctx = TestContext::new().await.unwrap();
    let user = register_and_login(&ctx).await;

    // Rotate: R1 -> (A2, R2).
    let (status, _, body) = ctx
        .post_json(
            "/api/v1/refresh",
            None,
            json!({ "refresh_token": user.refresh_token }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "first refresh: {body}");
    let r2 = body["refresh_token"].as_str().unwrap().to_string();
    let a2 = body["access_token"].as_str().unwrap().to_string();
    assert_ne!(r2, user.refresh_token);

    // Reuse of R1 is refused.
    let (status, _, body) = ctx
        .post_json(
            "/api/v1/refresh",
            None,
            json!({ "refresh_token": user.refresh_token }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid token");

    // R2 still rotates exactly once.
    let (status, _, body) = ctx
        .post_json("/api/v1/refresh", None, json!({ "refresh_token": r2 }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let r3 = body["refresh_token"].as_str().unwrap();
    assert_ne!(r3, r2);

    // The rotated access token works on protected routes.
    let (status, _, _) = ctx.get("/api/v1/teams", Some(&a2)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn garbage_refresh_tokens_are_unauthorized() {
    let ctx = TestContext::new().await.unwrap();

    let (status, _, _) = ctx
        .post_json("/api/v1/refresh", None, json!({ "refresh_token": "garbage" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // An access token is not a refresh token.
    let user = register_and_login(&ctx).await;
    let (status, _, _) = ctx
        .post_json(
            "/api/v1/refresh",
            None,
            json!({ "refresh_token": user.access_token }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn blacklist_outage_follows_the_configured_policy() {
    // Fail-open: a healthy context issues the token, a degraded context
    // (every KV call fails) still admits it.
    let healthy = TestContext::new().await.unwrap();
    let user = register_and_login(&healthy).await;

    let open = TestContext::with_parts(Config::default(), Some(Arc::new(FailingKv::new())), None)
        .await
        .unwrap();
    let (status, _, _) = open.get("/api/v1/teams", Some(&user.access_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        open.state
            .metrics
            .redis_degraded_count(taskhive_shared::metrics::DegradedComponent::Blacklist)
            >= 1,
        "degradation event is recorded"
    );

    // Fail-closed rejects the same token.
    let mut config = Config::default();
    config.jwt.blacklist.fail_open = false;
    let closed = TestContext::with_parts(config, Some(Arc::new(FailingKv::new())), None)
        .await
        .unwrap();
    let (status, _, _) = closed.get("/api/v1/teams", Some(&user.access_token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn revoking_all_sessions_kills_every_refresh_token() {
    let ctx = TestContext::new().await.unwrap();
    let user = register_and_login(&ctx).await;

    // A second login gives the user a second live session.
    let (status, _, second) = ctx
        .post_json(
            "/api/v1/login",
            None,
            json!({ "login": user.email, "password": "Password123" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let second_refresh = second["refresh_token"].as_str().unwrap().to_string();

    assert_eq!(ctx.state.auth.active_sessions(user.id).await.unwrap().len(), 2);

    let revoked = ctx.state.auth.revoke_all_sessions(user.id).await.unwrap();
    assert_eq!(revoked, 2);
    assert!(ctx.state.auth.active_sessions(user.id).await.unwrap().is_empty());

    // Both refresh tokens now hit revoked rows.
    for token in [user.refresh_token.as_str(), second_refresh.as_str()] {
        let (status, _, _) = ctx
            .post_json("/api/v1/refresh", None, json!({ "refresh_token": token }))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn protected_routes_need_a_bearer_token() {
    let ctx = TestContext::new().await.unwrap();

    let (status, _, _) = ctx.get("/api/v1/teams", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = ctx.get("/api/v1/teams", Some("not-a-jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Health stays public.
    let (status, _, _) = ctx.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
}
