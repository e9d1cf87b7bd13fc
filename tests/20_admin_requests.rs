mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

use common::TestApp;

#[tokio::test]
async fn request_lifecycle_ends_in_admin() -> Result<()> {
    let app = TestApp::new();
    let student = app.sign_in("ada@campus.test").await?;
    let root = app.admin().await?;

    let res = app
        .post("/api/requests", Some(&student.token), json!({ "reason": "  I moderate the chess club " }))
        .await?;
    assert_eq!(res.status, StatusCode::CREATED);
    assert_eq!(res.data()["status"], "pending");
    assert_eq!(res.data()["reason"], "I moderate the chess club");
    assert_eq!(res.data()["requester_id"], student.id.to_string());
    assert!(res.data()["reviewer_id"].is_null());
    let request_id = res.data()["id"].clone();
    assert_eq!(app.role_of(&student).await?, "pending_admin");

    let dup = app
        .post("/api/requests", Some(&student.token), json!({ "reason": "again" }))
        .await?;
    assert_eq!(dup.status, StatusCode::BAD_REQUEST);
    assert_eq!(dup.code(), "PENDING_REQUEST_EXISTS");

    let res = app
        .patch("/api/requests", Some(&root.token), json!({ "id": request_id, "action": "approve" }))
        .await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.data()["status"], "approved");
    assert_eq!(res.data()["reviewer_id"], root.id.to_string());
    assert!(res.data()["reviewed_at"].is_string());
    assert_eq!(app.role_of(&student).await?, "admin");

    // Admins cannot ask again
    let res = app
        .post("/api/requests", Some(&student.token), json!({ "reason": "more power" }))
        .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.code(), "ALREADY_ADMIN");
    Ok(())
}

#[tokio::test]
async fn concurrent_reviews_have_one_winner() -> Result<()> {
    let app = TestApp::new();
    let student = app.sign_in("grace@campus.test").await?;
    let root = app.admin().await?;
    let second = app.sign_in("second-admin@campus.test").await?;
    app.promote(&second).await?;

    let res = app
        .post("/api/requests", Some(&student.token), json!({ "reason": "lab assistant" }))
        .await?;
    let request_id = res.data()["id"].clone();

    let (approve, deny) = tokio::join!(
        app.patch("/api/requests", Some(&root.token), json!({ "id": request_id, "action": "approve" })),
        app.patch("/api/requests", Some(&second.token), json!({ "id": request_id, "action": "deny" })),
    );
    let (approve, deny) = (approve?, deny?);

    let mut statuses = [approve.status.as_u16(), deny.status.as_u16()];
    statuses.sort_unstable();
    assert_eq!(statuses, [200, 400]);

    let (winner, loser) = if approve.status == StatusCode::OK {
        (approve, deny)
    } else {
        (deny, approve)
    };
    assert_eq!(loser.code(), "ALREADY_PROCESSED");

    let expected_role = match winner.data()["status"].as_str() {
        Some("approved") => "admin",
        _ => "student",
    };
    assert_eq!(app.role_of(&student).await?, expected_role);
    Ok(())
}

#[tokio::test]
async fn denial_returns_the_requester_to_student() -> Result<()> {
    let app = TestApp::new();
    let student = app.sign_in("linus@campus.test").await?;
    let root = app.admin().await?;

    let res = app
        .post("/api/requests", Some(&student.token), json!({ "reason": "please" }))
        .await?;
    let first_id = res.data()["id"].clone();
    let res = app
        .patch("/api/requests", Some(&root.token), json!({ "id": first_id, "action": "deny" }))
        .await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.data()["status"], "denied");
    assert_eq!(app.role_of(&student).await?, "student");

    // Deciding twice is a conflict and leaves the role alone
    let res = app
        .patch("/api/requests", Some(&root.token), json!({ "id": first_id, "action": "approve" }))
        .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.code(), "ALREADY_PROCESSED");
    assert_eq!(app.role_of(&student).await?, "student");

    // A fresh request may follow a denial
    let res = app
        .post("/api/requests", Some(&student.token), json!({ "reason": "please, again" }))
        .await?;
    assert_eq!(res.status, StatusCode::CREATED);
    assert_ne!(res.data()["id"], first_id);
    Ok(())
}

#[tokio::test]
async fn non_admins_cannot_review() -> Result<()> {
    let app = TestApp::new();
    let student = app.sign_in("margaret@campus.test").await?;
    let peer = app.sign_in("peer@campus.test").await?;

    let res = app
        .post("/api/requests", Some(&student.token), json!({ "reason": "club lead" }))
        .await?;
    let request_id = res.data()["id"].clone();

    let res = app
        .patch("/api/requests", Some(&peer.token), json!({ "id": request_id, "action": "approve" }))
        .await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    // Pending admins are not admins either
    let res = app
        .patch("/api/requests", Some(&student.token), json!({ "id": request_id, "action": "approve" }))
        .await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(app.role_of(&student).await?, "pending_admin");
    Ok(())
}

#[tokio::test]
async fn submit_validates_the_reason() -> Result<()> {
    let app = TestApp::new();
    let student = app.sign_in("barbara@campus.test").await?;

    let res = app.post("/api/requests", Some(&student.token), json!({})).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.code(), "VALIDATION_ERROR");

    let res = app.post("/api/requests", Some(&student.token), json!({ "reason": "   " })).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(app.role_of(&student).await?, "student");

    let res = app.post("/api/requests", None, json!({ "reason": "anonymous" })).await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn review_validates_its_input() -> Result<()> {
    let app = TestApp::new();
    let student = app.sign_in("edsger@campus.test").await?;
    let root = app.admin().await?;
    let res = app
        .post("/api/requests", Some(&student.token), json!({ "reason": "ta" }))
        .await?;
    let request_id = res.data()["id"].clone();

    let res = app
        .patch("/api/requests", None, json!({ "id": request_id, "action": "approve" }))
        .await?;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let res = app
        .patch("/api/requests", Some(&root.token), json!({ "id": request_id, "action": "maybe" }))
        .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert!(res.body["field_errors"]["action"].is_string());

    let res = app.patch("/api/requests", Some(&root.token), json!({ "action": "deny" })).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert!(res.body["field_errors"]["id"].is_string());

    let res = app
        .patch("/api/requests", Some(&root.token), json!({ "id": Uuid::new_v4(), "action": "deny" }))
        .await?;
    assert_eq!(res.status, StatusCode::NOT_FOUND);

    assert_eq!(app.role_of(&student).await?, "pending_admin");
    Ok(())
}

#[tokio::test]
async fn listing_is_scoped_by_role() -> Result<()> {
    let app = TestApp::new();
    let alice = app.sign_in("alice@campus.test").await?;
    let bob = app.sign_in("bob@campus.test").await?;
    let root = app.admin().await?;

    app.post("/api/requests", Some(&alice.token), json!({ "reason": "a" })).await?;
    app.post("/api/requests", Some(&bob.token), json!({ "reason": "b" })).await?;

    let mine = app.get("/api/requests", Some(&alice.token)).await?;
    assert_eq!(mine.status, StatusCode::OK);
    let mine = mine.data().as_array().cloned().unwrap_or_default();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0]["requester_id"], alice.id.to_string());

    let all = app.get("/api/requests", Some(&root.token)).await?;
    let all = all.data().as_array().cloned().unwrap_or_default();
    assert_eq!(all.len(), 2);
    // Newest first
    assert_eq!(all[0]["requester_id"], bob.id.to_string());

    assert_eq!(app.get("/api/requests", None).await?.status, StatusCode::UNAUTHORIZED);
    Ok(())
}
