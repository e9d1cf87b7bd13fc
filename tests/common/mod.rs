#![allow(dead_code)]

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use campus_api::config::AppConfig;
use campus_api::store::Store;
use campus_api::{router, AppState};

/// Always treated as admin by the bootstrap override
pub const ADMIN_EMAIL: &str = "root@campus.test";

/// In-process app on a fresh in-memory store, driven with `oneshot`
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn data(&self) -> &Value {
        &self.body["data"]
    }

    pub fn code(&self) -> &str {
        self.body["code"].as_str().unwrap_or_default()
    }

    /// `name=value` part of the first Set-Cookie header
    pub fn cookie(&self) -> Option<String> {
        self.headers
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::to_string)
    }

    /// Every Set-Cookie header, attributes included
    pub fn cookies(&self) -> Vec<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect()
    }

    /// Full Set-Cookie headers for one cookie name
    pub fn cookies_named(&self, name: &str) -> Vec<String> {
        let prefix = format!("{}=", name);
        self.cookies().into_iter().filter(|c| c.starts_with(&prefix)).collect()
    }
}

/// A signed-in user holding a bearer token
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub token: String,
    pub refresh_token: String,
    pub session_cookie: String,
}

/// Extra credentials for one request
#[derive(Default)]
pub struct Creds<'a> {
    pub bearer: Option<&'a str>,
    pub cookie: Option<&'a str>,
    pub headers: Vec<(&'a str, &'a str)>,
}

impl<'a> Creds<'a> {
    pub fn bearer(token: &'a str) -> Self {
        Self {
            bearer: Some(token),
            ..Self::default()
        }
    }

    pub fn cookie(cookie: &'a str) -> Self {
        Self {
            cookie: Some(cookie),
            ..Self::default()
        }
    }
}

impl TestApp {
    pub fn new() -> Self {
        let mut config = AppConfig::development();
        config.security.bootstrap_admin_email = Some(ADMIN_EMAIL.to_string());
        Self::with_config(config)
    }

    pub fn with_config(config: AppConfig) -> Self {
        let state = AppState::in_memory(config).expect("in-memory state");
        Self::with_state(state)
    }

    pub fn with_store(config: AppConfig, store: Arc<dyn Store>) -> Self {
        let state = AppState::new(config, store).expect("app state");
        Self::with_state(state)
    }

    fn with_state(state: AppState) -> Self {
        Self {
            router: router(state.clone()),
            state,
        }
    }

    pub async fn send(&self, method: Method, uri: &str, creds: Creds<'_>, body: Option<Value>) -> Result<TestResponse> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = creds.bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(cookie) = creds.cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        for (name, value) in creds.headers {
            builder = builder.header(name, value);
        }

        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))?,
            None => builder.body(Body::empty())?,
        };

        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
        };

        Ok(TestResponse { status, headers, body })
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> Result<TestResponse> {
        let creds = token.map(Creds::bearer).unwrap_or_default();
        self.send(Method::GET, uri, creds, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> Result<TestResponse> {
        let creds = token.map(Creds::bearer).unwrap_or_default();
        self.send(Method::POST, uri, creds, Some(body)).await
    }

    pub async fn patch(&self, uri: &str, token: Option<&str>, body: Value) -> Result<TestResponse> {
        let creds = token.map(Creds::bearer).unwrap_or_default();
        self.send(Method::PATCH, uri, creds, Some(body)).await
    }

    pub async fn put(&self, uri: &str, token: Option<&str>, body: Value) -> Result<TestResponse> {
        let creds = token.map(Creds::bearer).unwrap_or_default();
        self.send(Method::PUT, uri, creds, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> Result<TestResponse> {
        let creds = token.map(Creds::bearer).unwrap_or_default();
        self.send(Method::DELETE, uri, creds, None).await
    }

    /// Development sign-in
    pub async fn sign_in(&self, email: &str) -> Result<User> {
        let res = self.post("/auth/token", None, serde_json::json!({ "email": email })).await?;
        anyhow::ensure!(res.status == StatusCode::OK, "sign-in failed: {} {}", res.status, res.body);

        let data = res.data();
        Ok(User {
            id: data["user"]["id"].as_str().context("user id")?.parse()?,
            email: email.to_string(),
            token: data["access_token"].as_str().context("access token")?.to_string(),
            refresh_token: data["refresh_token"].as_str().context("refresh token")?.to_string(),
            session_cookie: res.cookie().context("session cookie")?,
        })
    }

    pub async fn admin(&self) -> Result<User> {
        self.sign_in(ADMIN_EMAIL).await
    }

    pub async fn role_of(&self, user: &User) -> Result<String> {
        let res = self.get("/api/auth/whoami", Some(&user.token)).await?;
        Ok(res.data()["role"].as_str().context("role")?.to_string())
    }

    /// Takes a user through submit + approve
    pub async fn promote(&self, user: &User) -> Result<()> {
        let root = self.admin().await?;
        let submitted = self
            .post("/api/requests", Some(&user.token), serde_json::json!({ "reason": "moderation" }))
            .await?;
        anyhow::ensure!(submitted.status == StatusCode::CREATED, "submit failed: {}", submitted.body);

        let id = submitted.data()["id"].clone();
        let reviewed = self
            .patch("/api/requests", Some(&root.token), serde_json::json!({ "id": id, "action": "approve" }))
            .await?;
        anyhow::ensure!(reviewed.status == StatusCode::OK, "review failed: {}", reviewed.body);
        Ok(())
    }

    pub async fn create_group(&self, name: &str) -> Result<Uuid> {
        let root = self.admin().await?;
        let res = self
            .post("/api/groups", Some(&root.token), serde_json::json!({ "name": name }))
            .await?;
        anyhow::ensure!(res.status == StatusCode::CREATED, "group create failed: {}", res.body);
        Ok(res.data()["id"].as_str().context("group id")?.parse()?)
    }
}
