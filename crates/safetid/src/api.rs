//! HTTP API for safetid.
//!
//! Owner routes are keyed by the owner id the identity provider issued.
//! The provider route is keyed by the share token that the QR code encodes.

use std::future::Future;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequest, Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::credential::{AccessCredential, ValidationOutcome};
use crate::error::{Error, Result};
use crate::profile::{MedicalProfile, ProfileFields};
use crate::service::{AccessService, AccountDeletion, SharedView};
use crate::storage::DocumentStore;

/// Body of a profile save.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveProfileRequest {
    /// The editable profile fields.
    #[serde(flatten)]
    pub fields: ProfileFields,
    /// Version the client last read; omitted for last-writer-wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<u64>,
}

/// Body carrying an access code.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CodeRequest {
    /// The five-digit code as typed.
    pub code: String,
}

/// An error on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            Error::InvalidInput { message } => (StatusCode::BAD_REQUEST, message.clone()),
            e @ Error::NotFound { .. } => (StatusCode::NOT_FOUND, e.to_string()),
            e @ Error::Conflict { .. } => (StatusCode::CONFLICT, e.to_string()),
            e if e.is_retryable() => {
                warn!(error = %e, "Storage unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "storage is temporarily unavailable, retry the request".to_string(),
                )
            }
            e => {
                error!(error = %e, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "status": "error",
            "message": message,
        }));

        (status, body).into_response()
    }
}

/// JSON request body whose rejections answer like every other bad input.
#[derive(Debug)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(Error::invalid_input(rejection.body_text()).into()),
        }
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;
type AppState<S> = State<Arc<AccessService<S>>>;

/// Build the router over a shared service.
pub fn router<S>(service: Arc<AccessService<S>>) -> Router
where
    S: DocumentStore + Clone + 'static,
{
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/profiles/:owner_id",
            get(get_profile_handler::<S>)
                .post(save_profile_handler::<S>)
                .delete(delete_account_handler::<S>),
        )
        .route("/credentials/:owner_id", get(get_credential_handler::<S>))
        .route("/credentials/:owner_id/issue", post(issue_handler::<S>))
        .route("/credentials/:owner_id/rotate", post(rotate_handler::<S>))
        .route(
            "/credentials/:owner_id/deactivate",
            post(deactivate_handler::<S>),
        )
        .route(
            "/credentials/:owner_id/validate",
            post(validate_handler::<S>),
        )
        .route("/medical-info/:share_token", post(open_shared_handler::<S>))
        .with_state(service)
        .layer(TraceLayer::new_for_http())
}

/// Serve the API on an already-bound listener until `shutdown` resolves.
///
/// # Errors
///
/// Returns an I/O error if the server fails.
pub async fn serve<S, F>(
    listener: TcpListener,
    service: Arc<AccessService<S>>,
    shutdown: F,
) -> Result<()>
where
    S: DocumentStore + Clone + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    info!("HTTP API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("HTTP API stopped");
    Ok(())
}

/// Resolves when the process receives Ctrl-C.
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
    }
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn get_profile_handler<S>(
    State(service): AppState<S>,
    Path(owner_id): Path<String>,
) -> ApiResult<Json<MedicalProfile>>
where
    S: DocumentStore + Clone + 'static,
{
    let owner_id = service.owner_id(&owner_id)?;
    Ok(Json(service.profiles().get_profile(&owner_id).await?))
}

async fn save_profile_handler<S>(
    State(service): AppState<S>,
    Path(owner_id): Path<String>,
    JsonBody(request): JsonBody<SaveProfileRequest>,
) -> ApiResult<Json<MedicalProfile>>
where
    S: DocumentStore + Clone + 'static,
{
    let owner_id = service.owner_id(&owner_id)?;
    let profile = service
        .profiles()
        .save_profile(&owner_id, request.fields, request.expected_version)
        .await?;
    Ok(Json(profile))
}

async fn delete_account_handler<S>(
    State(service): AppState<S>,
    Path(owner_id): Path<String>,
) -> ApiResult<Json<AccountDeletion>>
where
    S: DocumentStore + Clone + 'static,
{
    let owner_id = service.owner_id(&owner_id)?;
    Ok(Json(service.delete_account(&owner_id).await?))
}

async fn get_credential_handler<S>(
    State(service): AppState<S>,
    Path(owner_id): Path<String>,
) -> ApiResult<Json<AccessCredential>>
where
    S: DocumentStore + Clone + 'static,
{
    let owner_id = service.owner_id(&owner_id)?;
    Ok(Json(service.credentials().get_credential(&owner_id).await?))
}

async fn issue_handler<S>(
    State(service): AppState<S>,
    Path(owner_id): Path<String>,
) -> ApiResult<Json<AccessCredential>>
where
    S: DocumentStore + Clone + 'static,
{
    let owner_id = service.owner_id(&owner_id)?;
    Ok(Json(service.credentials().issue(&owner_id).await?))
}

async fn rotate_handler<S>(
    State(service): AppState<S>,
    Path(owner_id): Path<String>,
) -> ApiResult<Json<AccessCredential>>
where
    S: DocumentStore + Clone + 'static,
{
    let owner_id = service.owner_id(&owner_id)?;
    Ok(Json(service.credentials().rotate(&owner_id).await?))
}

async fn deactivate_handler<S>(
    State(service): AppState<S>,
    Path(owner_id): Path<String>,
) -> ApiResult<StatusCode>
where
    S: DocumentStore + Clone + 'static,
{
    let owner_id = service.owner_id(&owner_id)?;
    service.credentials().deactivate(&owner_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn validate_handler<S>(
    State(service): AppState<S>,
    Path(owner_id): Path<String>,
    JsonBody(request): JsonBody<CodeRequest>,
) -> ApiResult<Json<ValidationOutcome>>
where
    S: DocumentStore + Clone + 'static,
{
    let owner_id = service.owner_id(&owner_id)?;
    let outcome = service
        .credentials()
        .validate(&owner_id, &request.code)
        .await?;
    Ok(Json(outcome))
}

async fn open_shared_handler<S>(
    State(service): AppState<S>,
    Path(share_token): Path<String>,
    JsonBody(request): JsonBody<CodeRequest>,
) -> ApiResult<Json<SharedView>>
where
    S: DocumentStore + Clone + 'static,
{
    let view = service
        .open_shared_profile(&share_token, &request.code)
        .await?;
    Ok(Json(view))
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::header::CONTENT_TYPE;

    use super::*;
    use crate::error::RecordKind;

    async fn response_parts(error: Error) -> (StatusCode, Value) {
        let response = ApiError::from(error).into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_invalid_input_maps_to_bad_request() {
        let (status, body) = response_parts(Error::invalid_input("bad code")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "bad code");
    }

    #[tokio::test]
    async fn test_not_found_maps_to_404() {
        let (status, _) = response_parts(Error::NotFound {
            kind: RecordKind::Profile,
            owner_id: "u1".to_string(),
        })
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_conflict_maps_to_409() {
        let (status, _) = response_parts(Error::Conflict {
            owner_id: "u1".to_string(),
            expected: 1,
            actual: 2,
        })
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_storage_failure_maps_to_503_without_details() {
        let (status, body) = response_parts(Error::Io(std::io::Error::other("disk gone"))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body["message"].as_str().unwrap().contains("disk gone"));
    }

    #[tokio::test]
    async fn test_internal_error_maps_to_500() {
        let (status, body) = response_parts(Error::internal("boom")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "internal error");
    }

    async fn extract_code(body: &'static str) -> std::result::Result<CodeRequest, ApiError> {
        let request = Request::builder()
            .method("POST")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();
        JsonBody::<CodeRequest>::from_request(request, &())
            .await
            .map(|JsonBody(code)| code)
    }

    #[tokio::test]
    async fn test_json_body_accepts_code() {
        let request = extract_code(r#"{"code":"48213"}"#).await.unwrap();
        assert_eq!(request.code, "48213");
    }

    #[tokio::test]
    async fn test_json_body_rejections_are_invalid_input() {
        for body in ["{}", r#"{"code":12345}"#, "not json"] {
            let err = extract_code(body).await.unwrap_err();
            assert!(err.0.is_invalid_input(), "body {body:?}");

            let response = err.into_response();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let json: Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(json["status"], "error");
        }
    }

    #[test]
    fn test_save_request_flattens_fields() {
        let request: SaveProfileRequest = serde_json::from_value(json!({
            "allergies": "Peanuts",
            "personalInfo": {"bloodType": "O-"},
            "expectedVersion": 3
        }))
        .unwrap();
        assert_eq!(request.fields.allergies, "Peanuts");
        assert_eq!(request.expected_version, Some(3));
    }

    #[test]
    fn test_save_request_without_version() {
        let request: SaveProfileRequest = serde_json::from_value(json!({})).unwrap();
        assert_eq!(request.expected_version, None);
        assert_eq!(request.fields, ProfileFields::default());
    }
}
