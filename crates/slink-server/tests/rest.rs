mod common;

use axum::http::{Method, StatusCode};
use serde_json::{Value, json};
use uuid::Uuid;

use slink_types::models::WORLD_CHAT_ID;

use common::{test_app, test_app_with};

fn ids(list: &Value) -> Vec<String> {
    list.as_array()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn registration_returns_a_session_and_joins_world_chat() {
    let app = test_app();
    let alice = app.register("alice").await;

    let (status, body) = app
        .request(Method::GET, "/api/v1/user", Some(&alice.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["screenname"], "alice");
    assert!(body["user"].get("passwordDigest").is_none());

    let (status, body) = app
        .request(Method::GET, "/api/v1/channels", Some(&alice.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body["channels"]), vec![WORLD_CHAT_ID.to_string()]);
}

#[tokio::test]
async fn login_checks_the_password() {
    let app = test_app();
    let alice = app.register("alice").await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/session",
            None,
            Some(json!({ "screenname": "alice", "password": "hunter22!" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["id"], alice.id.to_string());
    assert!(body["token"].is_string());

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/session",
            None,
            Some(json!({ "screenname": "alice", "password": "wrong password" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["errors"][0], "unauthorized");
}

#[tokio::test]
async fn registration_is_validated() {
    let app = test_app();
    app.register("alice").await;

    let cases = [
        (json!({ "screenname": "alice", "password": "hunter22!" }), StatusCode::CONFLICT),
        (json!({ "screenname": "al", "password": "hunter22!" }), StatusCode::BAD_REQUEST),
        (json!({ "screenname": "bob", "password": "short" }), StatusCode::BAD_REQUEST),
    ];
    for (body, expected) in cases {
        let (status, response) = app
            .request(Method::POST, "/api/v1/users", None, Some(body))
            .await;
        assert_eq!(status, expected, "{response}");
        assert!(response["errors"].is_array());
    }
}

#[tokio::test]
async fn protected_routes_require_a_valid_token() {
    let app = test_app();
    let alice = app.register("alice").await;

    let (status, _) = app.request(Method::GET, "/api/v1/user", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .request(Method::GET, "/api/v1/user", Some("not-a-jwt"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .request(
            Method::GET,
            &format!("/api/v1/user?token={}", alice.token),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["id"], alice.id.to_string());
}

#[tokio::test]
async fn only_members_read_and_write_messages() {
    let app = test_app();
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;
    let channel_id = app.create_channel(&alice, "general").await;

    let (status, _) = app.post_message(&bob, channel_id, "let me in").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/api/v1/channels/{channel_id}/join"),
            Some(&bob.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["channelID"], channel_id.to_string());

    let (status, body) = app.post_message(&bob, channel_id, "hi all").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"]["userID"], bob.id.to_string());
    assert_eq!(body["message"]["channelID"], channel_id.to_string());

    let (status, body) = app
        .request(
            Method::GET,
            &format!("/api/v1/channels/{channel_id}/users"),
            Some(&alice.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let mut members = ids(&body["users"]);
    members.sort();
    let mut expected = vec![alice.id.to_string(), bob.id.to_string()];
    expected.sort();
    assert_eq!(members, expected);

    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/api/v1/channels/{channel_id}/leave"),
            Some(&bob.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/channels/{channel_id}/messages"),
            Some(&bob.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn posting_touches_the_channel() {
    let app = test_app();
    let alice = app.register("alice").await;
    let channel_id = app.create_channel(&alice, "general").await;

    let (_, posted) = app.post_message(&alice, channel_id, "hello").await;
    let (status, body) = app
        .request(
            Method::GET,
            &format!("/api/v1/channels/{channel_id}"),
            Some(&alice.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["channel"]["lastMessageSentAt"],
        posted["message"]["createdAt"]
    );
}

#[tokio::test]
async fn history_is_the_most_recent_window_oldest_first() {
    let app = test_app_with(&[("SLINK_HISTORY_LIMIT", "3")]);
    let alice = app.register("alice").await;
    let channel_id = app.create_channel(&alice, "general").await;

    for i in 0..5 {
        let (status, _) = app.post_message(&alice, channel_id, &format!("m{i}")).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = app
        .request(
            Method::GET,
            &format!("/api/v1/channels/{channel_id}/messages"),
            Some(&alice.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let bodies: Vec<&str> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["body"].as_str().unwrap())
        .collect();
    assert_eq!(bodies, vec!["m2", "m3", "m4"]);
}

#[tokio::test]
async fn message_bodies_are_validated_and_censored() {
    let app = test_app_with(&[("SLINK_CENSOR_WORDS", "darn"), ("SLINK_MAX_BODY_CHARS", "10")]);
    let alice = app.register("alice").await;
    let channel_id = app.create_channel(&alice, "general").await;

    let (status, _) = app.post_message(&alice, channel_id, "   ").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.post_message(&alice, channel_id, "far too long").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.post_message(&alice, channel_id, "Darn it").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"]["body"], "**** it");
}

#[tokio::test]
async fn missing_channels_are_not_found() {
    let app = test_app();
    let alice = app.register("alice").await;
    let missing = Uuid::new_v4();

    let (status, body) = app
        .request(
            Method::GET,
            &format!("/api/v1/channels/{missing}/messages"),
            Some(&alice.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errors"][0], "channel not found");

    let (status, _) = app.post_message(&alice, missing, "anyone?").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn chats_are_upserted_by_membership() {
    let app = test_app();
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;
    let carol = app.register("carol").await;

    let request = json!({ "userIDs": [bob.id] });
    let (status, first) = app
        .request(
            Method::POST,
            "/api/v1/channels/chats",
            Some(&alice.token),
            Some(request.clone()),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["channel"]["private"], true);
    let chat_id = first["channel"]["id"].as_str().unwrap().to_string();

    // Same members from the other side finds the same chat.
    let (status, second) = app
        .request(
            Method::POST,
            "/api/v1/channels/chats",
            Some(&bob.token),
            Some(json!({ "userIDs": [alice.id] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["channel"]["id"], chat_id.as_str());

    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/channels/{chat_id}"),
            Some(&carol.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .request(
            Method::POST,
            &format!("/api/v1/channels/{chat_id}/join"),
            Some(&carol.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn chats_with_unknown_users_are_rejected() {
    let app = test_app();
    let alice = app.register("alice").await;

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/channels/chats",
            Some(&alice.token),
            Some(json!({ "userIDs": [Uuid::new_v4()] })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
