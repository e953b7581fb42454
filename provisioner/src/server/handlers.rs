//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequest, FromRequestParts, Path, Query, Request, State,
    },
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use control_api::{
    DeleteBody, DeployBody, DeployResponse, DeploymentQuery, DeploymentSummary, ErrorResponse,
    LogsResponse, MissingConfigResponse, SecretBody, StatusResponse, SuccessResponse, UpdateBody,
    VmActionBody,
};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, warn};

use crate::app::state::AppState;
use crate::errors::{ClawError, ErrorKind};
use crate::lifecycle::ConfigChanges;
use crate::models::DeploymentRequest;
use crate::utils::version_info;

/// A [`ClawError`] rendered as `{error}` with a matching status code
#[derive(Debug)]
pub struct ApiError(pub ClawError);

impl From<ClawError> for ApiError {
    fn from(err: ClawError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(ClawError::ValidationError(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError(ClawError::ValidationError(rejection.body_text()))
    }
}

/// [`Json`] body that rejects with an `{error}` document
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

/// [`Query`] string that rejects with an `{error}` document
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(ApiQuery(value))
    }
}

pub fn status_code(err: &ClawError) -> StatusCode {
    match err.kind() {
        ErrorKind::Validation | ErrorKind::UnknownRegistryId => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Transport => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::StartupTimeout | ErrorKind::HealthCheckFailed => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::InstallFailed
        | ErrorKind::Cloud
        | ErrorKind::Storage
        | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_code(&self.0);
        if status.is_server_error() {
            error!("request failed: {}", self.0);
        } else {
            warn!("request rejected: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn success() -> Json<SuccessResponse> {
    Json(SuccessResponse {
        success: true,
        warnings: Vec::new(),
    })
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "clawctl".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

/// Run the provisioning pipeline for a new or existing deployment
pub async fn deploy_handler(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<DeployBody>,
) -> ApiResult<DeployResponse> {
    let request = DeploymentRequest::from(body);
    let report = state.pipeline.deploy(&request).await?;
    Ok(Json(DeployResponse::from(report)))
}

pub async fn update_handler(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<UpdateBody>,
) -> ApiResult<SuccessResponse> {
    let id = body.deployment_id.clone();
    state.lifecycle.update(&id, ConfigChanges::from(body)).await?;
    Ok(success())
}

pub async fn vm_handler(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<VmActionBody>,
) -> ApiResult<SuccessResponse> {
    state.lifecycle.power(&body.deployment_id, body.action).await?;
    Ok(success())
}

pub async fn delete_handler(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<DeleteBody>,
) -> ApiResult<SuccessResponse> {
    let outcome = state
        .lifecycle
        .delete(&body.deployment_id, body.purge)
        .await?;
    Ok(Json(SuccessResponse {
        success: true,
        warnings: outcome.warnings,
    }))
}

pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<DeploymentQuery>,
) -> ApiResult<StatusResponse> {
    let live = state.lifecycle.status(&query.deployment_id).await?;
    Ok(Json(StatusResponse::from(live)))
}

pub async fn logs_handler(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<DeploymentQuery>,
) -> ApiResult<LogsResponse> {
    let output = state.lifecycle.logs(&query.deployment_id).await?;
    Ok(Json(LogsResponse { output }))
}

pub async fn secret_handler(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<SecretBody>,
) -> ApiResult<SuccessResponse> {
    let value = SecretString::from(body.value);
    state
        .lifecycle
        .create_secret(&body.deployment_id, &body.secret_name, &value)
        .await?;
    Ok(success())
}

pub async fn deployments_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<DeploymentSummary>> {
    let records = state.lifecycle.list().await?;
    Ok(Json(records.iter().map(|r| r.summary()).collect()))
}

pub async fn missing_config_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<MissingConfigResponse> {
    let missing = state.lifecycle.missing_configuration(&id).await?;
    Ok(Json(MissingConfigResponse { missing }))
}
