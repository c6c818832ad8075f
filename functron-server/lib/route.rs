//! Router configuration for the functron server.
//!
//! This module handles:
//! - API route definitions
//! - Router configuration and setup
//!
//! The invocation endpoint is served both at `/`, where existing clients post to, and under
//! `/api/v1` next to the image endpoints.

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use crate::{handler, middleware as app_middleware, state::AppState};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Create a new router with the given state
pub fn create_router(state: AppState) -> Router {
    // Create REST API routes
    let rest_api = Router::new()
        .route("/invoke", post(handler::invoke))
        .route(
            "/images",
            get(handler::images_list).post(handler::image_create),
        )
        .route("/images/{name}", get(handler::image_get_by_name))
        .route("/images/id/{id}", get(handler::image_get_by_id))
        .route("/images/id/{id}/status", put(handler::image_update_status))
        .route("/build-plan", get(handler::build_plan))
        .route("/library", get(handler::library_list))
        .route("/library/{name}", delete(handler::library_delete))
        .route("/library/{name}/acquire", post(handler::library_acquire))
        .route("/library/handles/{handle}", delete(handler::library_release));

    // Combine all routes with logging middleware
    Router::new()
        .route("/", post(handler::invoke))
        .route("/health", get(handler::health))
        .nest("/api/v1", rest_api)
        .layer(middleware::from_fn(app_middleware::logging_middleware))
        .with_state(state)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
        response::Response,
    };
    use base64::{prelude::BASE64_STANDARD, Engine};
    use functron_core::{
        management::ImageStore,
        models::{FunctronImage, ImageStatus},
        runtime::testing::ShellRuntime,
    };
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;

    struct Harness {
        router: Router,
        state: AppState,
        runtime: Arc<ShellRuntime>,
        _dir: TempDir,
    }

    async fn harness(runtime: ShellRuntime) -> Harness {
        let dir = TempDir::new().unwrap();
        let config = Config::new(
            [127, 0, 0, 1].into(),
            8081,
            Some(dir.path().join("images.db")),
            Some(dir.path().join("scratch")),
            Duration::from_secs(60),
            Some(3),
        )
        .unwrap();

        let store = ImageStore::open(config.get_db_path()).await.unwrap();
        let runtime = Arc::new(runtime);
        let state = AppState::new(Arc::new(config), store, runtime.clone());

        Harness {
            router: create_router(state.clone()),
            state,
            runtime,
            _dir: dir,
        }
    }

    async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> Response {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap())),
            None => request.body(Body::empty()),
        };

        router.clone().oneshot(request.unwrap()).await.unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn tar_with_script(script: &str) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(script.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, "run.sh", script.as_bytes())
            .unwrap();
        builder.into_inner().unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn test_health() {
        let h = harness(ShellRuntime::new()).await;

        let response = send(&h.router, Method::GET, "/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["message"], "Service is healthy");
    }

    #[test_log::test(tokio::test)]
    async fn test_invoke_at_root_and_api() {
        let h = harness(ShellRuntime::new()).await;
        let request = json!({
            "DockerFile": "FROM alpine",
            "TarFile": BASE64_STANDARD.encode(tar_with_script("cat")),
            "FnName": "echo",
            "Stdin": BASE64_STANDARD.encode("ping"),
            "Timeout": 0.2,
        });

        for uri in ["/", "/api/v1/invoke"] {
            let response = send(&h.router, Method::POST, uri, Some(request.clone())).await;
            assert_eq!(response.status(), StatusCode::OK);

            let body = json_body(response).await;
            assert_eq!(body["Errors"], json!([]));
            assert_eq!(body["CmdOut"], BASE64_STANDARD.encode("ping"));
            assert!(body["TempName"]
                .as_str()
                .unwrap()
                .starts_with("functron-echo-"));
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_invoke_rejections() {
        let h = harness(ShellRuntime::new()).await;

        let response = send(&h.router, Method::POST, "/", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["Errors"], json!(["NoBody"]));
        assert!(body.get("TempName").is_none());

        let request = json!({
            "DockerFile": "FROM alpine\nRUN FAIL",
            "FnName": "broken",
            "Timeout": 0.1,
        });
        let response = send(&h.router, Method::POST, "/", Some(request)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["Errors"], json!(["BuildFailure"]));
        assert!(body["DetailedError"].is_string());
    }

    #[test_log::test(tokio::test)]
    async fn test_image_store_endpoints() {
        let h = harness(ShellRuntime::new()).await;

        let response = send(
            &h.router,
            Method::POST,
            "/api/v1/images",
            Some(json!({
                "imageName": "sum",
                "dockerInstructions": "FROM alpine",
                "preCommitScript": "echo ready",
            })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: FunctronImage = serde_json::from_value(json_body(response).await).unwrap();
        assert_eq!(created.name, "sum");
        assert_eq!(created.status, ImageStatus::Scheduled);

        let response = send(&h.router, Method::GET, "/api/v1/images", None).await;
        assert_eq!(json_body(response).await["images"], json!(["sum"]));

        let response = send(&h.router, Method::GET, "/api/v1/images/sum", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let uri = format!("/api/v1/images/id/{}", created.id);
        let response = send(&h.router, Method::GET, &uri, None).await;
        let fetched: FunctronImage = serde_json::from_value(json_body(response).await).unwrap();
        assert_eq!(fetched, created);

        let response = send(
            &h.router,
            Method::PUT,
            &format!("{}/status", uri),
            Some(json!({ "status": "preparing" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "preparing");

        let response = send(&h.router, Method::GET, "/api/v1/images/missing", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"], "not_found");

        let response = send(&h.router, Method::GET, "/api/v1/build-plan", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let plan = json_body(response).await;
        assert!(plan["nextTick"].is_string());
        assert_eq!(plan["imagesNeedingBuild"], json!([]));
    }

    #[test_log::test(tokio::test)]
    async fn test_invalid_image_name_is_rejected() {
        let h = harness(ShellRuntime::new()).await;

        let response = send(
            &h.router,
            Method::POST,
            "/api/v1/images",
            Some(json!({ "imageName": "Not Valid", "dockerInstructions": "FROM alpine" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "validation_error");
    }

    #[test_log::test(tokio::test)]
    async fn test_duplicate_image_name_conflicts() {
        let h = harness(ShellRuntime::new()).await;
        let body = json!({ "imageName": "dup", "dockerInstructions": "FROM alpine" });

        let response = send(&h.router, Method::POST, "/api/v1/images", Some(body.clone())).await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = send(&h.router, Method::POST, "/api/v1/images", Some(body)).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let error = json_body(response).await;
        assert_eq!(error["error"], "conflict");
        assert_eq!(error["message"], "conflict: image 'dup' already exists");

        let response = send(&h.router, Method::GET, "/api/v1/images", None).await;
        assert_eq!(json_body(response).await["images"], json!(["dup"]));
    }

    #[test_log::test(tokio::test)]
    async fn test_library_endpoints() {
        let h = harness(ShellRuntime::with_images(["functron-sum:latest"])).await;

        let response = send(&h.router, Method::GET, "/api/v1/library", None).await;
        assert_eq!(json_body(response).await["images"], json!(["sum"]));

        let response = send(&h.router, Method::POST, "/api/v1/library/sum/acquire", None).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert_eq!(body["references"], 1);
        let handle = body["handle"].as_u64().unwrap();

        let response = send(&h.router, Method::DELETE, "/api/v1/library/sum", None).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(h.runtime.has_image("functron-sum"));

        let release = format!("/api/v1/library/handles/{}", handle);
        let response = send(&h.router, Method::DELETE, &release, None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&h.router, Method::DELETE, &release, None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(&h.router, Method::DELETE, "/api/v1/library/sum", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!h.runtime.has_image("functron-sum"));
        assert_eq!(h.state.get_library().reference_count("sum").await, 0);

        let response = send(&h.router, Method::POST, "/api/v1/library/sum/acquire", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test_log::test(tokio::test)]
    async fn test_persisted_image_is_built_by_scheduler() {
        let h = harness(ShellRuntime::new()).await;

        let response = send(
            &h.router,
            Method::POST,
            "/api/v1/images",
            Some(json!({ "imageName": "sum", "dockerInstructions": "FROM alpine" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let report = h.state.build_scheduler().tick().await.unwrap();
        assert_eq!(
            report.get_built(),
            &vec![("sum".to_string(), ImageStatus::Completed)]
        );

        let response = send(&h.router, Method::GET, "/api/v1/library", None).await;
        assert_eq!(json_body(response).await["images"], json!(["sum"]));
    }
}
