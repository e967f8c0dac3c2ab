use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use tracing::error;

use crate::auth::VerifyError;
use crate::feedback::NotifierError;
use crate::repo::RepoError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

/// Failures of a service operation. `NotFound`/`Conflict` are business outcomes,
/// `Storage`/`Notifier` are infrastructure faults.
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("invalid input: {0}")] Validation(String),
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("storage: {0}")] Storage(String),
    #[error(transparent)] Notifier(#[from] NotifierError),
}

impl From<RepoError> for ServiceError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ServiceError::NotFound,
            RepoError::Conflict => ServiceError::Conflict,
            RepoError::Internal(msg) => ServiceError::Storage(msg),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("{0}")] Unprocessable(String),
    #[error("{0}")] Unauthorized(VerifyError),
    #[error("internal error")] Internal,
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Validation(msg) => ApiError::Unprocessable(msg),
            ServiceError::NotFound => ApiError::NotFound,
            ServiceError::Conflict => ApiError::Conflict,
            ServiceError::Storage(msg) => {
                error!(%msg, "storage failure");
                ApiError::Internal
            }
            ServiceError::Notifier(e) => {
                error!(error = %e, "recommender failure");
                ApiError::Internal
            }
        }
    }
}

impl From<VerifyError> for ApiError {
    fn from(e: VerifyError) -> Self { ApiError::Unauthorized(e) }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            // status codes clients of the token service already handle
            ApiError::Unauthorized(VerifyError::Malformed) => StatusCode::NOT_ACCEPTABLE,
            ApiError::Unauthorized(VerifyError::Expired) => StatusCode::REQUEST_TIMEOUT,
            ApiError::Unauthorized(VerifyError::Invalid) => StatusCode::BAD_REQUEST,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ApiErrorBody { error: self.to_string() })
    }
}
