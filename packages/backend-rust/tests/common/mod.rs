#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use galaxy_backend::config::{Config, PlannerConfig};

pub struct TestApp {
    pub router: Router,
    pub data_dir: TempDir,
}

pub fn create_test_app() -> TestApp {
    create_test_app_with(PlannerConfig::default())
}

pub fn create_test_app_with(planner: PlannerConfig) -> TestApp {
    let data_dir = tempfile::tempdir().expect("create temp data dir");
    let mut config = Config::for_data_dir(data_dir.path());
    config.planner = planner;
    TestApp {
        router: galaxy_backend::create_app(config),
        data_dir,
    }
}

impl TestApp {
    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(body)).await
    }

    pub async fn put(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::PUT, uri, Some(body)).await
    }

    pub async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }
}
