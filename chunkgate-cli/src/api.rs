//! HTTP front of the router.
//!
//! Every operation carries its parameters as request headers rather than
//! URL parameters; bodies are raw fragment bytes. The handlers stay thin:
//! parse and validate, dispatch to the routing core or the metadata store,
//! shape the response.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use serde_json::json;
use tracing::{error, info};

use chunkgate_core::error::RouterError;
use chunkgate_core::types::{FragmentKey, FragmentLocation, RegistryVersion};
use chunkgate_core::Router;
use chunkgate_meta::{MetaError, MetaStore};

const HEADER_PATH: &str = "Path";
const HEADER_SOURCE_PATH: &str = "Source-Path";
const HEADER_DEST_PATH: &str = "Dest-Path";
const HEADER_INDEX: &str = "Fragment-Index";
const HEADER_RANGE: &str = "Bytes-Range";
const HEADER_IS_LAST: &str = "Is-Last";
const HEADER_VERSION: &str = "Registry-Version";

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    /// The routing core.
    pub router: Arc<Router>,
    /// The metadata store collaborator.
    pub meta: Arc<dyn MetaStore>,
}

/// Builds the full route table over the given state. Unknown routes fall
/// through to axum's 404.
pub fn api_routes(state: ApiState) -> axum::Router {
    let body_limit = state.router.config().max_body_bytes;
    axum::Router::new()
        .route(
            "/api/v1/file",
            post(upload_file).get(download_file).delete(delete_file),
        )
        .route("/api/v1/fileinfo", get(file_info))
        .route("/api/v1/list_directory", get(list_directory))
        .route("/api/v1/list_descendant", get(list_descendant))
        .route("/api/v1/move", post(move_file))
        .route("/api/v1/_ping", post(ping))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Request failures mapped onto HTTP statuses; the body carries the error
/// text verbatim.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed headers or a body that does not match its range.
    BadRequest(String),
    /// The requested fragment, listing, or descendant set is empty.
    NotFound(String),
    /// Routing, replication, or metadata failure.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, message).into_response()
    }
}

impl From<RouterError> for ApiError {
    fn from(err: RouterError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<MetaError> for ApiError {
    fn from(err: MetaError) -> Self {
        Self::Internal(err.to_string())
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

fn parse_index(raw: &str) -> Result<u64, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid Fragment-Index: {raw:?}")))
}

fn split_range(raw: &str) -> Result<(u64, u64), ApiError> {
    let invalid = || ApiError::BadRequest(format!("invalid Bytes-Range: {raw:?}"));
    let (start, end) = raw.split_once('-').ok_or_else(invalid)?;
    let start: u64 = start.parse().map_err(|_| invalid())?;
    let end: u64 = end.parse().map_err(|_| invalid())?;
    if start >= end {
        return Err(invalid());
    }
    Ok((start, end))
}

fn fragment_key(headers: &HeaderMap) -> Result<FragmentKey, ApiError> {
    let path = header_value(headers, HEADER_PATH).to_string();
    let index = parse_index(header_value(headers, HEADER_INDEX))?;
    let (start, end) = split_range(header_value(headers, HEADER_RANGE))?;
    Ok(FragmentKey::new(path, index, start, end))
}

async fn upload_file(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let key = fragment_key(&headers)?;
    let is_last = header_value(&headers, HEADER_IS_LAST).eq_ignore_ascii_case("true");
    let version = RegistryVersion::parse(header_value(&headers, HEADER_VERSION));

    if body.len() as u64 != key.size() {
        return Err(ApiError::BadRequest(format!(
            "body length {} does not match range {}-{}",
            body.len(),
            key.start,
            key.end
        )));
    }

    info!(
        path = %key.path,
        index = key.index,
        start = key.start,
        end = key.end,
        is_last,
        "upload fragment"
    );

    let (group_id, servers) = state.router.select_group(key.size()).map_err(|err| {
        error!(path = %key.path, error = %err, "group selection failed");
        err
    })?;
    let file_id = state.router.next_fid().await?;
    state.router.store_fragment(&servers, file_id, body).await?;

    let location = FragmentLocation {
        key,
        file_id,
        group_id,
        is_last,
    };
    match version {
        RegistryVersion::V1 => state.meta.store_v1(&location).await?,
        RegistryVersion::V2 => state.meta.store_v2(&location).await?,
    }

    info!(path = %location.key.path, file_id, group_id, "upload complete");
    Ok(StatusCode::OK)
}

async fn download_file(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let key = fragment_key(&headers)?;
    info!(path = %key.path, index = key.index, "download fragment");

    let location = state
        .meta
        .fragment(&key)
        .await?
        .ok_or_else(|| ApiError::NotFound("fragment metainfo not found".to_string()))?;
    let data = state.router.fetch_fragment(&location).await.map_err(|err| {
        error!(path = %key.path, file_id = location.file_id, error = %err, "download failed");
        err
    })?;

    Ok(([(header::CONTENT_TYPE, "octet-stream")], data).into_response())
}

async fn delete_file(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let path = header_value(&headers, HEADER_PATH);
    let version = RegistryVersion::parse(header_value(&headers, HEADER_VERSION));
    info!(path, ?version, "delete file");

    match version {
        RegistryVersion::V1 => state.meta.delete_v1(path).await?,
        RegistryVersion::V2 => state.meta.delete_v2(path).await?,
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn file_info(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let path = header_value(&headers, HEADER_PATH);
    let fragments = state.meta.file_fragments(path).await?;
    if fragments.is_empty() {
        return Err(ApiError::NotFound(format!("no metainfo for {path}")));
    }
    Ok(Json(json!({ "fragment-info": fragments })))
}

async fn list_directory(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let path = header_value(&headers, HEADER_PATH);
    let entries = state.meta.list_directory(path).await?;
    if entries.is_empty() {
        return Err(ApiError::NotFound(format!("directory {path} is empty")));
    }
    Ok(Json(json!({ "file-list": entries })))
}

async fn list_descendant(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let path = header_value(&headers, HEADER_PATH);
    let entries = state.meta.list_descendants(path).await?;
    if entries.is_empty() {
        return Err(ApiError::NotFound(format!("no descendants under {path}")));
    }
    Ok(Json(json!({ "path-descendant": entries })))
}

async fn move_file(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let source = header_value(&headers, HEADER_SOURCE_PATH);
    let dest = header_value(&headers, HEADER_DEST_PATH);
    info!(source, dest, "move file");
    state.meta.move_file(source, dest).await?;
    Ok(StatusCode::OK)
}

async fn ping() -> &'static str {
    "{OK}"
}
