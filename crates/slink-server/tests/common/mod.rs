#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use slink_api::{AppState, TracingJobQueue};
use slink_db::{Database, Store};
use slink_server::config::Config;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub db: Database,
}

pub fn test_app() -> TestApp {
    test_app_with(&[])
}

pub fn test_app_with(vars: &[(&str, &str)]) -> TestApp {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let config = Config::from_lookup(|key| vars.get(key).cloned()).unwrap();

    let db = Database::open_in_memory()
        .unwrap()
        .with_watch_deadline(config.watch_deadline);
    let store: Arc<dyn Store> = Arc::new(db.clone());
    let state = slink_server::build_state(&config, store, Arc::new(TracingJobQueue)).unwrap();

    TestApp {
        router: slink_server::app(state.clone()),
        state,
        db,
    }
}

pub struct TestUser {
    pub id: Uuid,
    pub token: String,
}

impl TestApp {
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    pub async fn register(&self, screenname: &str) -> TestUser {
        let (status, body) = self
            .request(
                Method::POST,
                "/api/v1/users",
                None,
                Some(json!({ "screenname": screenname, "password": "hunter22!" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        TestUser {
            id: body["user"]["id"].as_str().unwrap().parse().unwrap(),
            token: body["token"].as_str().unwrap().to_string(),
        }
    }

    pub async fn create_channel(&self, owner: &TestUser, name: &str) -> Uuid {
        let (status, body) = self
            .request(
                Method::POST,
                "/api/v1/channels",
                Some(&owner.token),
                Some(json!({ "name": name })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["channel"]["id"].as_str().unwrap().parse().unwrap()
    }

    pub async fn post_message(&self, user: &TestUser, channel_id: Uuid, body: &str) -> (StatusCode, Value) {
        self.request(
            Method::POST,
            &format!("/api/v1/channels/{channel_id}/messages"),
            Some(&user.token),
            Some(json!({ "body": body })),
        )
        .await
    }
}
