#![allow(dead_code)]

use anyhow::Context as _;
use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode},
    Router,
};
use oxidata::{api::create_router, AppState, Config};
use oxidata_edm::Edm;
use std::sync::Arc;
use tower::ServiceExt as _;

pub const MODEL: &str = include_str!("../../model/demo.json");
pub const SEED: &str = include_str!("../../model/seed.json");

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> anyhow::Result<serde_json::Value> {
        serde_json::from_slice(&self.body).with_context(|| {
            format!("response body is not JSON: {}", String::from_utf8_lossy(&self.body))
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl TestApp {
    pub fn new() -> anyhow::Result<Self> {
        Self::new_with_config(|_| {})
    }

    pub fn new_with_config(configure: impl FnOnce(&mut Config)) -> anyhow::Result<Self> {
        let mut config = Config::default();
        configure(&mut config);

        let edm = Edm::from_json_str(MODEL).context("parse demo model")?;
        let seed: serde_json::Value = serde_json::from_str(SEED).context("parse seed")?;
        let state =
            AppState::from_parts(config, Arc::new(edm), Some(seed)).context("initialize AppState")?;
        let router = create_router(state.clone());
        Ok(Self { router, state })
    }

    pub async fn get(&self, path_and_query: &str) -> anyhow::Result<TestResponse> {
        self.request(Method::GET, path_and_query, None, &[]).await
    }

    pub async fn get_with(
        &self,
        path_and_query: &str,
        headers: &[(&str, &str)],
    ) -> anyhow::Result<TestResponse> {
        self.request(Method::GET, path_and_query, None, headers).await
    }

    pub async fn send_json(
        &self,
        method: Method,
        path_and_query: &str,
        body: &serde_json::Value,
    ) -> anyhow::Result<TestResponse> {
        let body = Bytes::from(serde_json::to_vec(body)?);
        self.request(
            method,
            path_and_query,
            Some(body),
            &[("content-type", "application/json")],
        )
        .await
    }

    pub async fn request(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<Bytes>,
        extra_headers: &[(&str, &str)],
    ) -> anyhow::Result<TestResponse> {
        let mut request = Request::builder()
            .method(method)
            .uri(path_and_query)
            .header("host", "example.org")
            .body(match body {
                Some(bytes) => Body::from(bytes),
                None => Body::empty(),
            })
            .context("build request")?;

        for (name, value) in extra_headers {
            request.headers_mut().insert(
                name.parse::<HeaderName>().context("parse header name")?,
                value.parse::<HeaderValue>().context("parse header value")?,
            );
        }

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .context("dispatch request")?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .context("read response body")?;

        Ok(TestResponse {
            status,
            headers,
            body,
        })
    }
}

#[track_caller]
pub fn assert_status(response: &TestResponse, expected: StatusCode, context: &str) {
    assert_eq!(
        response.status,
        expected,
        "{context}: unexpected status, body: {}",
        response.text()
    );
}

/// Builds a `multipart/mixed` batch body from pre-formatted parts.
pub fn batch_body(boundary: &str, parts: &[String]) -> String {
    let mut body = String::new();
    for part in parts {
        body.push_str(&format!("--{boundary}\r\n{part}\r\n"));
    }
    body.push_str(&format!("--{boundary}--\r\n"));
    body
}

/// One `application/http` part; `body` may be empty.
pub fn http_part(content_id: Option<&str>, request_line: &str, body: &str) -> String {
    let mut part = String::from("Content-Type: application/http\r\nContent-Transfer-Encoding: binary\r\n");
    if let Some(id) = content_id {
        part.push_str(&format!("Content-ID: {id}\r\n"));
    }
    part.push_str("\r\n");
    part.push_str(request_line);
    part.push_str("\r\n");
    if body.is_empty() {
        part.push_str("\r\n");
    } else {
        part.push_str("Content-Type: application/json\r\n\r\n");
        part.push_str(body);
    }
    part
}

/// A changeset part wrapping `parts` under `boundary`.
pub fn changeset_part(boundary: &str, parts: &[String]) -> String {
    format!(
        "Content-Type: multipart/mixed; boundary={boundary}\r\n\r\n{}",
        batch_body(boundary, parts)
    )
}
