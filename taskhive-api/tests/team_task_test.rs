//! Team, invite, task, comment, history, and stats integration tests.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::json;

use common::{create_team, register_and_login, unique_suffix, FailingMailer, RecordingMailer, TestContext};
use taskhive_api::config::Config;
use taskhive_shared::kv::MemoryKv;
use taskhive_shared::models::{TeamMember, TeamRole};

#[tokio::test]
async fn create_team_makes_the_creator_owner() {
    let ctx = TestContext::new().await.unwrap();
    let owner = register_and_login(&ctx).await;
    let team_id = create_team(&ctx, &owner, &format!("alpha-{}", unique_suffix())).await;

    let role = TeamMember::role(&ctx.db, team_id, owner.id)
        .await
        .unwrap()
        .expect("creator is a member");
    assert_eq!(role, TeamRole::Owner);

    let (status, _, body) = ctx.get("/api/v1/teams", Some(&owner.access_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["teams"]
        .as_array()
        .unwrap()
        .iter()
        .any(|t| t["id"].as_i64() == Some(team_id)));
}

#[tokio::test]
async fn invite_flow_delivers_then_inserts() {
    let mailer = Arc::new(RecordingMailer::default());
    let ctx = TestContext::with_mailer(mailer.clone()).await.unwrap();
    let owner = register_and_login(&ctx).await;
    let invitee = register_and_login(&ctx).await;
    let team_name = format!("beta-{}", unique_suffix());
    let team_id = create_team(&ctx, &owner, &team_name).await;

    let (status, _, body) = ctx
        .post_json(
            &format!("/api/v1/teams/{team_id}/invite"),
            Some(&owner.access_token),
            json!({ "email": invitee.email, "role": "member" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "invite failed: {body}");

    assert!(TeamMember::is_member(&ctx.db, team_id, invitee.id).await.unwrap());
    let sent = mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0], (invitee.email.clone(), team_name));
    drop(sent);

    // Inviting an existing member is a conflict.
    let (status, _, _) = ctx
        .post_json(
            &format!("/api/v1/teams/{team_id}/invite"),
            Some(&owner.access_token),
            json!({ "email": invitee.email }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn invite_authorization_matrix_is_enforced() {
    let ctx = TestContext::with_mailer(Arc::new(RecordingMailer::default()))
        .await
        .unwrap();
    let owner = register_and_login(&ctx).await;
    let admin = register_and_login(&ctx).await;
    let member = register_and_login(&ctx).await;
    let outsider = register_and_login(&ctx).await;
    let target = register_and_login(&ctx).await;
    let team_id = create_team(&ctx, &owner, &format!("gamma-{}", unique_suffix())).await;

    TeamMember::add(&ctx.db, team_id, admin.id, TeamRole::Admin).await.unwrap();
    TeamMember::add(&ctx.db, team_id, member.id, TeamRole::Member).await.unwrap();

    // Admin may invite members but not admins.
    let (status, _, _) = ctx
        .post_json(
            &format!("/api/v1/teams/{team_id}/invite"),
            Some(&admin.access_token),
            json!({ "email": target.email, "role": "admin" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Members invite nobody.
    let (status, _, _) = ctx
        .post_json(
            &format!("/api/v1/teams/{team_id}/invite"),
            Some(&member.access_token),
            json!({ "email": target.email }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Non-members are forbidden before role parsing matters.
    let (status, _, _) = ctx
        .post_json(
            &format!("/api/v1/teams/{team_id}/invite"),
            Some(&outsider.access_token),
            json!({ "email": target.email }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Unknown invitee email is a 404; unknown team is a 404.
    let (status, _, _) = ctx
        .post_json(
            &format!("/api/v1/teams/{team_id}/invite"),
            Some(&owner.access_token),
            json!({ "email": format!("nobody{}@test.example", unique_suffix()) }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = ctx
        .post_json(
            "/api/v1/teams/999999999/invite",
            Some(&owner.access_token),
            json!({ "email": target.email }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // "owner" is not an invitable role.
    let (status, _, _) = ctx
        .post_json(
            &format!("/api/v1/teams/{team_id}/invite"),
            Some(&owner.access_token),
            json!({ "email": target.email, "role": "owner" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invite_with_dead_email_service_is_unavailable_and_writes_nothing() {
    let ctx = TestContext::with_mailer(Arc::new(FailingMailer)).await.unwrap();
    let owner = register_and_login(&ctx).await;
    let invitee = register_and_login(&ctx).await;
    let team_id = create_team(&ctx, &owner, &format!("delta-{}", unique_suffix())).await;

    let (status, _, body) = ctx
        .post_json(
            &format!("/api/v1/teams/{team_id}/invite"),
            Some(&owner.access_token),
            json!({ "email": invitee.email }),
        )
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{body}");

    // No membership without a delivered email.
    assert!(!TeamMember::is_member(&ctx.db, team_id, invitee.id).await.unwrap());
}

async fn setup_task(ctx: &TestContext, owner: &common::TestUser, team_id: i64) -> i64 {
    let (status, _, body) = ctx
        .post_json(
            "/api/v1/tasks",
            Some(&owner.access_token),
            json!({ "team_id": team_id, "title": "ship it", "priority": "high" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "create task: {body}");
    body["id"].as_i64().unwrap()
}

#[tokio::test]
async fn member_patch_rules_are_enforced() {
    let ctx = TestContext::new().await.unwrap();
    let owner = register_and_login(&ctx).await;
    let member = register_and_login(&ctx).await;
    let outsider = register_and_login(&ctx).await;
    let team_id = create_team(&ctx, &owner, &format!("patch-{}", unique_suffix())).await;
    TeamMember::add(&ctx.db, team_id, member.id, TeamRole::Member).await.unwrap();
    let task_id = setup_task(&ctx, &owner, team_id).await;

    // A member touching title is forbidden, even combined with an
    // allowed field.
    let (status, _, _) = ctx
        .request(common::json_request(
            "PUT",
            &format!("/api/v1/tasks/{task_id}"),
            Some(&member.access_token),
            &json!({ "title": "hack", "status": "done" }),
            &[],
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Status and assignee are within a member's allow-list.
    let (status, _, _) = ctx
        .request(common::json_request(
            "PUT",
            &format!("/api/v1/tasks/{task_id}"),
            Some(&member.access_token),
            &json!({ "status": "done", "assignee_id": null }),
            &[],
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    // Assigning an outsider is a validation failure.
    let (status, _, _) = ctx
        .request(common::json_request(
            "PUT",
            &format!("/api/v1/tasks/{task_id}"),
            Some(&member.access_token),
            &json!({ "assignee_id": outsider.id }),
            &[],
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Unknown fields and empty patches are validation failures.
    let (status, _, _) = ctx
        .request(common::json_request(
            "PUT",
            &format!("/api/v1/tasks/{task_id}"),
            Some(&owner.access_token),
            &json!({ "created_by": 1 }),
            &[],
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _, _) = ctx
        .request(common::json_request(
            "PUT",
            &format!("/api/v1/tasks/{task_id}"),
            Some(&owner.access_token),
            &json!({}),
            &[],
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn update_writes_history_only_for_real_changes() {
    let ctx = TestContext::new().await.unwrap();
    let owner = register_and_login(&ctx).await;
    let team_id = create_team(&ctx, &owner, &format!("hist-{}", unique_suffix())).await;
    let task_id = setup_task(&ctx, &owner, team_id).await;

    // status changes, priority is patched to its current value.
    let (status, _, _) = ctx
        .request(common::json_request(
            "PUT",
            &format!("/api/v1/tasks/{task_id}"),
            Some(&owner.access_token),
            &json!({ "status": "done", "priority": "high", "description": "wrap up" }),
            &[],
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body) = ctx
        .get(
            &format!("/api/v1/tasks/{task_id}/history?limit=50"),
            Some(&owner.access_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let items = body["items"].as_array().unwrap();
    assert_eq!(body["total"], json!(2), "unchanged priority writes no row");

    let status_row = items
        .iter()
        .find(|i| i["field_name"] == "status")
        .expect("status change recorded");
    assert_eq!(status_row["old_value"], json!("todo"));
    assert_eq!(status_row["new_value"], json!("done"));
    assert_eq!(status_row["changed_by"].as_i64(), Some(owner.id));

    let desc_row = items
        .iter()
        .find(|i| i["field_name"] == "description")
        .expect("description change recorded");
    assert_eq!(desc_row["old_value"], json!(null));
    assert_eq!(desc_row["new_value"], json!("wrap up"));

    // A patch equal to current state is a committed no-op.
    let (status, _, _) = ctx
        .request(common::json_request(
            "PUT",
            &format!("/api/v1/tasks/{task_id}"),
            Some(&owner.access_token),
            &json!({ "status": "done" }),
            &[],
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, _, body) = ctx
        .get(
            &format!("/api/v1/tasks/{task_id}/history?limit=50"),
            Some(&owner.access_token),
        )
        .await;
    assert_eq!(body["total"], json!(2));

    // Paging bounds are strict.
    for uri in [
        format!("/api/v1/tasks/{task_id}/history?limit=0"),
        format!("/api/v1/tasks/{task_id}/history?limit=101"),
        format!("/api/v1/tasks/{task_id}/history?offset=-1"),
    ] {
        let (status, _, _) = ctx.get(&uri, Some(&owner.access_token)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
    }
}

#[tokio::test]
async fn delete_preserves_a_snapshot_and_cascades_comments() {
    let ctx = TestContext::new().await.unwrap();
    let owner = register_and_login(&ctx).await;
    let member = register_and_login(&ctx).await;
    let team_id = create_team(&ctx, &owner, &format!("del-{}", unique_suffix())).await;
    TeamMember::add(&ctx.db, team_id, member.id, TeamRole::Member).await.unwrap();
    let task_id = setup_task(&ctx, &owner, team_id).await;

    // One status change, one comment, then delete.
    ctx.request(common::json_request(
        "PUT",
        &format!("/api/v1/tasks/{task_id}"),
        Some(&owner.access_token),
        &json!({ "status": "done" }),
        &[],
    ))
    .await;
    let (status, _, _) = ctx
        .post_json(
            &format!("/api/v1/tasks/{task_id}/comments"),
            Some(&owner.access_token),
            json!({ "body": "done and dusted" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // Members cannot delete.
    let (status, _, _) = ctx
        .request(common::json_request(
            "DELETE",
            &format!("/api/v1/tasks/{task_id}"),
            Some(&member.access_token),
            &json!(null),
            &[],
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = ctx
        .request(common::json_request(
            "DELETE",
            &format!("/api/v1/tasks/{task_id}"),
            Some(&owner.access_token),
            &json!(null),
            &[],
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = ctx
        .get(&format!("/api/v1/tasks/{task_id}"), Some(&owner.access_token))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // History survives the task: status change + snapshot row.
    let rows: Vec<(String, Option<serde_json::Value>)> = sqlx::query_as(
        "SELECT field_name, old_value FROM task_history WHERE task_id = $1 ORDER BY id",
    )
    .bind(task_id)
    .fetch_all(&ctx.db)
    .await
    .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0, "status");
    assert_eq!(rows[1].0, "task_deleted");
    let snapshot = rows[1].1.as_ref().unwrap();
    assert_eq!(snapshot["id"].as_i64(), Some(task_id));
    assert_eq!(snapshot["status"], json!("done"));
    assert_eq!(snapshot["title"], json!("ship it"));

    // Comments are gone with the task.
    let remaining: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM task_comments WHERE task_id = $1")
            .bind(task_id)
            .fetch_one(&ctx.db)
            .await
            .unwrap();
    assert_eq!(remaining, 0);
}

#[tokio::test]
async fn list_tasks_filters_and_pages() {
    let ctx = TestContext::new().await.unwrap();
    let owner = register_and_login(&ctx).await;
    let team_id = create_team(&ctx, &owner, &format!("list-{}", unique_suffix())).await;

    for i in 0..3 {
        let (status, _, _) = ctx
            .post_json(
                "/api/v1/tasks",
                Some(&owner.access_token),
                json!({ "team_id": team_id, "title": format!("task {i}") }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let task_id = setup_task(&ctx, &owner, team_id).await;
    ctx.request(common::json_request(
        "PUT",
        &format!("/api/v1/tasks/{task_id}"),
        Some(&owner.access_token),
        &json!({ "status": "done" }),
        &[],
    ))
    .await;

    let (status, _, body) = ctx
        .get(
            &format!("/api/v1/tasks?team_id={team_id}&limit=2"),
            Some(&owner.access_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], json!(4));
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
    // Most recently updated first.
    assert_eq!(body["items"][0]["id"].as_i64(), Some(task_id));

    let (status, _, body) = ctx
        .get(
            &format!("/api/v1/tasks?team_id={team_id}&status=done"),
            Some(&owner.access_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], json!(1));

    // team_id is required; bad enum values are rejected.
    let (status, _, _) = ctx.get("/api/v1/tasks", Some(&owner.access_token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _, _) = ctx
        .get(
            &format!("/api/v1/tasks?team_id={team_id}&status=bogus"),
            Some(&owner.access_token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn comments_respect_author_or_privileged_rule() {
    let ctx = TestContext::new().await.unwrap();
    let owner = register_and_login(&ctx).await;
    let member_a = register_and_login(&ctx).await;
    let member_b = register_and_login(&ctx).await;
    let team_id = create_team(&ctx, &owner, &format!("cmt-{}", unique_suffix())).await;
    TeamMember::add(&ctx.db, team_id, member_a.id, TeamRole::Member).await.unwrap();
    TeamMember::add(&ctx.db, team_id, member_b.id, TeamRole::Member).await.unwrap();
    let task_id = setup_task(&ctx, &owner, team_id).await;

    let (status, _, body) = ctx
        .post_json(
            &format!("/api/v1/tasks/{task_id}/comments"),
            Some(&member_a.access_token),
            json!({ "body": "first" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let comment_id = body["id"].as_i64().unwrap();

    // Another member can neither edit nor delete someone else's comment.
    let (status, _, _) = ctx
        .request(common::json_request(
            "PATCH",
            &format!("/api/v1/comments/{comment_id}"),
            Some(&member_b.access_token),
            &json!({ "body": "hijacked" }),
            &[],
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // The author can edit; the owner can delete.
    let (status, _, _) = ctx
        .request(common::json_request(
            "PATCH",
            &format!("/api/v1/comments/{comment_id}"),
            Some(&member_a.access_token),
            &json!({ "body": "edited" }),
            &[],
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = ctx
        .request(common::json_request(
            "DELETE",
            &format!("/api/v1/comments/{comment_id}"),
            Some(&owner.access_token),
            &json!(null),
            &[],
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, _, body) = ctx
        .get(
            &format!("/api/v1/tasks/{task_id}/comments"),
            Some(&member_b.access_token),
        )
        .await;
    assert_eq!(body["items"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn stats_window_validation_and_admin_gate() {
    let mut config = Config::default();
    let ctx = TestContext::with_parts(config.clone(), Some(Arc::new(MemoryKv::new())), None)
        .await
        .unwrap();
    let user = register_and_login(&ctx).await;

    // Valid window, empty result for a user with no owned teams is fine.
    let (status, _, _) = ctx
        .get(
            "/api/v1/stats/teams/done?from=2026-01-01T00:00:00Z&to=2026-02-01T00:00:00Z",
            Some(&user.access_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // Inverted window, non-UTC offsets, oversized ranges, bad limits.
    for uri in [
        "/api/v1/stats/teams/done?from=2026-02-01T00:00:00Z&to=2026-01-01T00:00:00Z",
        "/api/v1/stats/teams/done?from=2026-01-01T00:00:00%2B02:00&to=2026-02-01T00:00:00Z",
        "/api/v1/stats/teams/done?from=2020-01-01T00:00:00Z&to=2026-02-01T00:00:00Z",
        "/api/v1/stats/teams/top-creators?from=2026-01-01T00:00:00Z&to=2026-02-01T00:00:00Z&limit=0",
        "/api/v1/stats/teams/top-creators?from=2026-01-01T00:00:00Z&to=2026-02-01T00:00:00Z&limit=11",
        "/api/v1/stats/teams/top-creators?from=2026-01-01T00:00:00Z&to=2026-02-01T00:00:00Z",
    ] {
        let (status, _, _) = ctx.get(uri, Some(&user.access_token)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
    }

    // Integrity endpoint is allow-list only.
    let (status, _, _) = ctx
        .get("/api/v1/admin/integrity/tasks", Some(&user.access_token))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // A context that allow-lists the user answers.
    config.admin.user_ids = vec![user.id];
    let admin_ctx = TestContext::with_parts(config, Some(Arc::new(MemoryKv::new())), None)
        .await
        .unwrap();
    let (status, _, body) = admin_ctx
        .get("/api/v1/admin/integrity/tasks", Some(&user.access_token))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["items"].is_array());
}

#[tokio::test]
async fn done_stats_count_members_and_done_tasks() {
    let ctx = TestContext::new().await.unwrap();
    let owner = register_and_login(&ctx).await;
    let member = register_and_login(&ctx).await;
    let team_id = create_team(&ctx, &owner, &format!("stats-{}", unique_suffix())).await;
    TeamMember::add(&ctx.db, team_id, member.id, TeamRole::Member).await.unwrap();

    let task_id = setup_task(&ctx, &owner, team_id).await;
    ctx.request(common::json_request(
        "PUT",
        &format!("/api/v1/tasks/{task_id}"),
        Some(&owner.access_token),
        &json!({ "status": "done" }),
        &[],
    ))
    .await;

    // A window around now, inside the 365-day cap.
    let now = chrono::Utc::now();
    let from = (now - chrono::Duration::days(30)).to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let to = (now + chrono::Duration::days(30)).to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

    let (status, _, body) = ctx
        .get(
            &format!("/api/v1/stats/teams/done?from={from}&to={to}"),
            Some(&owner.access_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let row = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["team_id"].as_i64() == Some(team_id))
        .expect("owned team appears");
    assert_eq!(row["members_count"], json!(2));
    assert_eq!(row["done_count"], json!(1));

    // The member (not owner/admin) sees no row for this team.
    let (status, _, body) = ctx
        .get(
            &format!("/api/v1/stats/teams/done?from={from}&to={to}"),
            Some(&member.access_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["items"]
        .as_array()
        .unwrap()
        .iter()
        .any(|r| r["team_id"].as_i64() == Some(team_id)));
}
