//! Idempotency middleware integration tests: replay, payload conflicts,
//! concurrent execution, and KV-outage bypass.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::json;
use tower::ServiceExt as _;

use common::{json_request, register_and_login, unique_suffix, TestContext};
use taskhive_api::config::Config;
use taskhive_shared::kv::FailingKv;

#[tokio::test]
async fn same_key_same_payload_replays_the_first_response() {
    let ctx = TestContext::new().await.unwrap();
    let user = register_and_login(&ctx).await;
    let name = format!("idem-{}", unique_suffix());
    let key = format!("k1-{}", unique_suffix());

    let make = || {
        json_request(
            "POST",
            "/api/v1/teams",
            Some(&user.access_token),
            &json!({ "name": name }),
            &[("idempotency-key", key.as_str())],
        )
    };

    let (status, _, first) = ctx.request(make()).await;
    assert_eq!(status, StatusCode::CREATED);
    let team_id = first["id"].as_i64().unwrap();

    // The retry replays the captured 201 with the same id; no second team
    // row is created.
    let (status, _, second) = ctx.request(make()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(second["id"].as_i64(), Some(team_id));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM teams WHERE name = $1")
        .bind(&name)
        .fetch_one(&ctx.db)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn same_key_different_payload_conflicts() {
    let ctx = TestContext::new().await.unwrap();
    let user = register_and_login(&ctx).await;
    let key = format!("k2-{}", unique_suffix());

    let (status, _, _) = ctx
        .request(json_request(
            "POST",
            "/api/v1/teams",
            Some(&user.access_token),
            &json!({ "name": format!("a-{}", unique_suffix()) }),
            &[("idempotency-key", key.as_str())],
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, body) = ctx
        .request(json_request(
            "POST",
            "/api/v1/teams",
            Some(&user.access_token),
            &json!({ "name": format!("b-{}", unique_suffix()) }),
            &[("idempotency-key", key.as_str())],
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "idempotency key reused with different payload");
}

#[tokio::test]
async fn whitespace_differences_do_not_break_replay() {
    let ctx = TestContext::new().await.unwrap();
    let user = register_and_login(&ctx).await;
    let name = format!("ws-{}", unique_suffix());
    let key = format!("k3-{}", unique_suffix());

    let (status, _, _) = ctx
        .request(json_request(
            "POST",
            "/api/v1/teams",
            Some(&user.access_token),
            &serde_json::from_str::<serde_json::Value>(&format!(r#"{{"name":"{name}"}}"#)).unwrap(),
            &[("idempotency-key", key.as_str())],
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // Same semantic body, different formatting: still a replay, not a
    // conflict.
    let spaced = axum::http::Request::builder()
        .method("POST")
        .uri("/api/v1/teams")
        .header("content-type", "application/json; charset=utf-8")
        .header("authorization", format!("Bearer {}", user.access_token))
        .header("idempotency-key", key.as_str())
        .body(axum::body::Body::from(format!(
            "{{ \"name\" : \"{name}\" }}"
        )))
        .unwrap();
    let (status, _, _) = ctx.request(spaced).await;
    assert_eq!(status, StatusCode::CREATED);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM teams WHERE name = $1")
        .bind(&name)
        .fetch_one(&ctx.db)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn concurrent_identical_requests_create_one_team() {
    let ctx = TestContext::new().await.unwrap();
    let user = register_and_login(&ctx).await;
    let name = format!("race-{}", unique_suffix());
    let key = format!("k4-{}", unique_suffix());

    let req_a = json_request(
        "POST",
        "/api/v1/teams",
        Some(&user.access_token),
        &json!({ "name": name }),
        &[("idempotency-key", key.as_str())],
    );
    let req_b = json_request(
        "POST",
        "/api/v1/teams",
        Some(&user.access_token),
        &json!({ "name": name }),
        &[("idempotency-key", key.as_str())],
    );

    let (resp_a, resp_b) = tokio::join!(
        ctx.app.clone().oneshot(req_a),
        ctx.app.clone().oneshot(req_b)
    );
    let statuses = [resp_a.unwrap().status(), resp_b.unwrap().status()];

    // The handler ran at most once: the loser either replayed the stored
    // 201 or hit the in-flight lock.
    assert!(statuses.contains(&StatusCode::CREATED), "{statuses:?}");
    for status in statuses {
        assert!(
            status == StatusCode::CREATED || status == StatusCode::CONFLICT,
            "{status}"
        );
    }

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM teams WHERE name = $1")
        .bind(&name)
        .fetch_one(&ctx.db)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn requests_without_key_or_on_reads_bypass() {
    let ctx = TestContext::new().await.unwrap();
    let user = register_and_login(&ctx).await;

    // No header: two creates make two teams.
    let name = format!("plain-{}", unique_suffix());
    for _ in 0..2 {
        let (status, _, _) = ctx
            .post_json(
                "/api/v1/teams",
                Some(&user.access_token),
                json!({ "name": name }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM teams WHERE name = $1")
        .bind(&name)
        .fetch_one(&ctx.db)
        .await
        .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn kv_outage_degrades_to_at_least_once() {
    let ctx = TestContext::with_parts(Config::default(), Some(Arc::new(FailingKv::new())), None)
        .await
        .unwrap();
    let user = register_and_login(&ctx).await;
    let name = format!("degraded-{}", unique_suffix());
    let key = format!("k5-{}", unique_suffix());

    // With the KV down the middleware bypasses: both requests execute.
    for _ in 0..2 {
        let (status, _, _) = ctx
            .request(json_request(
                "POST",
                "/api/v1/teams",
                Some(&user.access_token),
                &json!({ "name": name }),
                &[("idempotency-key", key.as_str())],
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM teams WHERE name = $1")
        .bind(&name)
        .fetch_one(&ctx.db)
        .await
        .unwrap();
    assert_eq!(count, 2);
    assert!(
        ctx.state
            .metrics
            .redis_degraded_count(taskhive_shared::metrics::DegradedComponent::Idempotency)
            >= 1
    );
}
