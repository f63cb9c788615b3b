use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        FromRequest, Request, State,
    },
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use sqlx::postgres::PgDatabaseError;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::state::AppState;

pub type AppResult<T> = Result<T, AppError>;

const GENERIC_MESSAGE: &str = "Something went very wrong!";

/// The one error type handlers return. Every variant except `Internal` is
/// operational: its message is safe to show to the caller.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    DuplicateKey(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("Webhook error: {0}")]
    PaymentWebhook(String),
    /// Server-side failure whose message is still meant for the client.
    #[error("{0}")]
    ServerFault(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Collected field-validator messages; empty means valid.
    pub fn check_input(errors: Vec<String>) -> AppResult<()> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Self::Validation(format!(
                "Invalid input data. {}",
                errors.join(". ")
            )))
        }
    }

    pub fn no_document() -> Self {
        Self::NotFound("No document found with that ID".into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::DuplicateKey(_) | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::PaymentWebhook(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::ServerFault(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_operational(&self) -> bool {
        !matches!(self, AppError::Internal(_))
    }

    fn public_message(&self) -> String {
        if self.is_operational() {
            self.to_string()
        } else {
            GENERIC_MESSAGE.to_string()
        }
    }
}

/// Uniform error body: `{status, statusCode, message}` plus `error` in development.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status: &'static str,
    pub status_code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn status_word(status: StatusCode) -> &'static str {
    if status.is_client_error() {
        "fail"
    } else {
        "error"
    }
}

/// Full detail of a non-operational failure, carried on the response so the
/// development-mode middleware can expose it.
#[derive(Debug, Clone)]
struct ErrorDetail {
    message: String,
    debug: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            AppError::Internal(e) => error!(error = ?e, "unhandled error"),
            AppError::ServerFault(msg) => error!(message = %msg, "server fault"),
            AppError::Unauthorized(msg) | AppError::Forbidden(msg) => {
                warn!(%status, message = %msg, "access denied")
            }
            other => debug!(%status, error = %other, "request failed"),
        }

        let body = ErrorBody {
            status: status_word(status),
            status_code: status.as_u16(),
            message: self.public_message(),
            error: None,
        };
        let mut res = (status, Json(body)).into_response();
        if let AppError::Internal(e) = &self {
            res.extensions_mut().insert(ErrorDetail {
                message: e.to_string(),
                debug: format!("{e:?}"),
            });
        }
        res
    }
}

/// Rewrites generic 500 bodies with the underlying detail when running in
/// development mode. Production responses pass through untouched.
pub async fn expose_details(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let mut res = next.run(req).await;
    if !state.config.environment.is_development() {
        return res;
    }
    let Some(detail) = res.extensions_mut().remove::<ErrorDetail>() else {
        return res;
    };
    let status = res.status();
    let body = ErrorBody {
        status: status_word(status),
        status_code: status.as_u16(),
        message: detail.message,
        error: Some(detail.debug),
    };
    (status, Json(body)).into_response()
}

lazy_static! {
    static ref DUP_DETAIL_RE: Regex =
        Regex::new(r"^Key \((?P<fields>[^)]*)\)=\((?P<value>.*)\) already exists").unwrap();
}

/// Builds the client message for a unique violation from the Postgres detail
/// line, e.g. `Key (email)=(a@b.io) already exists.`
pub(crate) fn duplicate_message(detail: Option<&str>) -> String {
    let value = detail
        .and_then(|d| DUP_DETAIL_RE.captures(d))
        .and_then(|c| c.name("value").map(|m| m.as_str().to_string()));
    match value {
        Some(v) => format!("Duplicate field value: \"{v}\". Please use another value!"),
        None => "Duplicate field value. Please use another value!".to_string(),
    }
}

/// Maps a Postgres SQLSTATE onto the operational variants.
pub(crate) fn classify_database_error(
    code: Option<&str>,
    message: &str,
    detail: Option<&str>,
    constraint: Option<&str>,
    column: Option<&str>,
) -> Option<AppError> {
    match code? {
        "23505" => Some(AppError::DuplicateKey(duplicate_message(detail))),
        "23514" => Some(AppError::Validation(format!(
            "Invalid input data. \"{}\"",
            constraint.unwrap_or(message)
        ))),
        "23502" => Some(AppError::Validation(format!(
            "Invalid input data. \"{} is required\"",
            column.unwrap_or("field")
        ))),
        "23503" => Some(AppError::Validation(format!(
            "Invalid input data. \"{}\"",
            detail.unwrap_or("referenced record does not exist")
        ))),
        "22P02" | "22007" | "22008" => Some(AppError::BadRequest(format!("Invalid input: {message}."))),
        _ => None,
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => return AppError::no_document(),
            sqlx::Error::Database(db_err) => {
                let pg = db_err.try_downcast_ref::<PgDatabaseError>();
                let code = db_err.code();
                let classified = classify_database_error(
                    code.as_deref(),
                    db_err.message(),
                    pg.and_then(|p| p.detail()),
                    db_err.constraint(),
                    pg.and_then(|p| p.column()),
                );
                if let Some(app_err) = classified {
                    return app_err;
                }
            }
            _ => {}
        }
        AppError::Internal(anyhow::Error::new(err).context("database error"))
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartRejection> for AppError {
    fn from(rejection: MultipartRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::BadRequest(err.body_text())
    }
}

/// `Json` whose rejection goes through the uniform error shape.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);
