//! Endpoints of HTTP server.
//!
use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartError, Multipart, Query},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Extension, Json,
};
use bytes::Bytes;
use common::{detection::Detection, status::StatusReport};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::{
    error::DetectError,
    meter::METER,
    session::{Completion, Outcome},
    shell::AppState,
};

/// Multipart field carrying the uploaded image.
pub const IMAGE_FIELD: &str = "image";

const INDEX_PAGE: &str = include_str!("index.html");

/// Errors answered to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("upload has no `image` field")]
    MissingImage,
    #[error("malformed upload: {0}")]
    Upload(#[from] MultipartError),
    #[error("cannot decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error("superseded by a newer image")]
    Superseded,
    #[error("no overlay for the current image")]
    NoOverlay,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::MissingImage | ApiError::Upload(_) | ApiError::Decode(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Detect(DetectError::ModelInit(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Detect(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Superseded => StatusCode::CONFLICT,
            ApiError::NoOverlay => StatusCode::NOT_FOUND,
        };
        log::warn!("{status}: {self}");

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// What `/detect` answers with.
#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Png,
    Json,
}

#[derive(Debug, Deserialize)]
pub struct DetectParams {
    #[serde(default)]
    format: ResponseFormat,
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

/// Upload page.
pub async fn index(Extension(state): Extension<Arc<AppState>>) -> Html<String> {
    Html(INDEX_PAGE.replace("{{BASE}}", &state.base_path))
}

pub async fn status(Extension(state): Extension<Arc<AppState>>) -> Json<StatusReport> {
    Json(state.session().status_report())
}

/// Detections of the current image, `null` while there are none.
pub async fn detections(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<Option<Vec<Detection>>> {
    Json(state.session().detections().map(<[_]>::to_vec))
}

/// Rendered overlay of the current image.
pub async fn overlay(Extension(state): Extension<Arc<AppState>>) -> Result<Response, ApiError> {
    let png = state.session().overlay().ok_or(ApiError::NoOverlay)?;

    Ok(png_response(png))
}

/// Run detection on an uploaded image.
///
/// Answers with the rendered overlay, or with the detections for `?format=json`
/// and when the server runs without a drawable surface.
pub async fn detect(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<DetectParams>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    METER.tick_upload();

    let data = loop {
        match multipart.next_field().await? {
            Some(field) if field.name() == Some(IMAGE_FIELD) => break field.bytes().await?,
            Some(field) => log::debug!("Ignoring upload field {:?}", field.name()),
            None => return Err(ApiError::MissingImage),
        }
    };

    let image = match image::load_from_memory(&data) {
        Ok(image) => Arc::new(image.to_rgb8()),
        Err(e) => {
            let e = ApiError::Decode(e);
            state.session().reject(e.to_string());
            METER.tick_failure();
            return Err(e);
        }
    };
    log::info!(
        "Received {}x{} image ({} bytes)",
        image.width(),
        image.height(),
        data.len()
    );

    let ticket = state.session().select();
    let result = state.orchestrator.detect(Arc::clone(&image), state.threshold).await;

    let current = state.session().is_current(ticket);
    let result = match (result, &state.surface) {
        (Ok(detections), Some(surface)) if current => {
            match surface.paint(image, detections.clone()).await {
                Ok(png) => Ok(Outcome {
                    detections,
                    overlay: Some(Bytes::from(png)),
                }),
                Err(e) => Err(DetectError::Render(format!("{e:#}"))),
            }
        }
        (result, _) => result.map(|detections| Outcome {
            detections,
            overlay: None,
        }),
    };

    let mut session = state.session();
    match session.complete(ticket, result) {
        Completion::Superseded => Err(ApiError::Superseded),
        Completion::Failed(e) => {
            METER.tick_failure();
            Err(e.into())
        }
        Completion::Rendered => {
            METER.tick_detection();
            match (params.format, session.overlay()) {
                (ResponseFormat::Png, Some(png)) => Ok(png_response(png)),
                _ => Ok(Json(session.detections().map(<[_]>::to_vec)).into_response()),
            }
        }
    }
}

fn png_response(png: Bytes) -> Response {
    ([(header::CONTENT_TYPE, "image/png")], png).into_response()
}
