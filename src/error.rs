use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<tokio_postgres::Error> for AppError {
    fn from(e: tokio_postgres::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for AppError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<db_pool::DbPoolError> for AppError {
    fn from(e: db_pool::DbPoolError) -> Self {
        AppError::Database(e.to_string())
    }
}

const PUBLIC_MESSAGE: &str = "Internal Server Error";
const PUBLIC_DETAILS: &str = "Internal Server Error. Please try again later.";

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    // Internal details stay in the log; clients get a fixed message.
    fn error_response(&self) -> HttpResponse {
        tracing::error!(error = %self, "request failed");

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "message": PUBLIC_MESSAGE,
                "details": PUBLIC_DETAILS,
            }
        }))
    }
}
