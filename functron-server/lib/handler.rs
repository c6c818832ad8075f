//! Request handlers for the functron server.
//!
//! This module implements:
//! - The invocation endpoint
//! - Image store endpoints
//! - Image library endpoints
//!
//! Handlers stay thin: they extract parameters, call into `functron-core` and turn the result
//! into a response. Core errors become [`crate::ServerError`]s through `From`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use functron_core::models::{ImageHandle, NewImage};

use crate::{
    payload::{HandleResponse, ImageListResponse, RegularMessageResponse, StatusUpdateRequest},
    state::AppState,
    ServerResult,
};

//--------------------------------------------------------------------------------------------------
// Functions: Invocation Handlers
//--------------------------------------------------------------------------------------------------

/// Handler for one-shot function invocations
///
/// The body is read raw so that an empty body is reported in the invocation response format
/// rather than as an extractor rejection.
pub async fn invoke(State(state): State<AppState>, body: Bytes) -> Response {
    let outcome = state.get_invoker().invoke_raw(&body).await;

    let status = StatusCode::from_u16(outcome.status.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    tracing::info!(
        "invocation {} finished with {} ({} error(s))",
        outcome.response.temp_name.as_deref().unwrap_or("<none>"),
        status,
        outcome.response.errors.len()
    );

    (status, Json(outcome.response)).into_response()
}

//--------------------------------------------------------------------------------------------------
// Functions: REST API Handlers
//--------------------------------------------------------------------------------------------------

/// Handler for health check
pub async fn health() -> ServerResult<impl IntoResponse> {
    Ok((
        StatusCode::OK,
        Json(RegularMessageResponse {
            message: "Service is healthy".to_string(),
        }),
    ))
}

/// Handler listing the names of every persisted image
pub async fn images_list(State(state): State<AppState>) -> ServerResult<impl IntoResponse> {
    let images = state.get_store().retrieve_images().await?;
    Ok(Json(ImageListResponse { images }))
}

/// Handler persisting a new image for build
pub async fn image_create(
    State(state): State<AppState>,
    Json(payload): Json<NewImage>,
) -> ServerResult<impl IntoResponse> {
    let image = state.get_store().persist_image_for_build(&payload).await?;
    state.wake_scheduler();
    Ok((StatusCode::CREATED, Json(image)))
}

/// Handler fetching an image record by name
pub async fn image_get_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ServerResult<impl IntoResponse> {
    let image = state.get_store().retrieve_image_by_name(&name).await?;
    Ok(Json(image))
}

/// Handler fetching an image record by id
pub async fn image_get_by_id(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ServerResult<impl IntoResponse> {
    let image = state.get_store().retrieve_image_by_id(id).await?;
    Ok(Json(image))
}

/// Handler overwriting an image's status
///
/// This is the unvalidated administrative update; the build scheduler uses validated
/// transitions.
pub async fn image_update_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<StatusUpdateRequest>,
) -> ServerResult<impl IntoResponse> {
    let store = state.get_store();
    let image = store.retrieve_image_by_id(id).await?;
    let image = store.update_status(&image, payload.status).await?;
    tracing::info!("status of image {} set to {}", id, image.status);
    Ok(Json(image))
}

/// Handler returning the current build plan
pub async fn build_plan(State(state): State<AppState>) -> ServerResult<impl IntoResponse> {
    let plan = state.get_store().retrieve_build_plan().await?;
    Ok(Json(plan))
}

/// Handler listing built library images
pub async fn library_list(State(state): State<AppState>) -> ServerResult<impl IntoResponse> {
    let images = state.get_library().get_images().await?;
    Ok(Json(ImageListResponse { images }))
}

/// Handler acquiring a handle on a built library image
pub async fn library_acquire(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ServerResult<impl IntoResponse> {
    let library = state.get_library();
    let handle = library.acquire_image(&name).await?;
    let references = library.reference_count(&name).await;

    Ok((
        StatusCode::CREATED,
        Json(HandleResponse {
            handle,
            image: name,
            references,
        }),
    ))
}

/// Handler releasing a library image handle
pub async fn library_release(
    State(state): State<AppState>,
    Path(handle): Path<u64>,
) -> ServerResult<impl IntoResponse> {
    let handle = ImageHandle::new(handle);
    state.get_library().release_image(handle).await?;

    Ok(Json(RegularMessageResponse {
        message: format!("Handle {} released", handle),
    }))
}

/// Handler deleting a built library image
pub async fn library_delete(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ServerResult<impl IntoResponse> {
    state.get_library().delete_image(&name).await?;

    Ok(Json(RegularMessageResponse {
        message: format!("Image {} deleted", name),
    }))
}
