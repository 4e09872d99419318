use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ordbok_lib::{CatalogError, SearchError};
use serde::Serialize;
use thiserror::Error;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("no dictionary {0}-{1}")]
    NoDictionary(String, String),

    #[error("invalid language pair {0:?}")]
    InvalidPair(String),

    #[error("dictionary {0} is not loaded on this server")]
    NotLoaded(String),

    #[error("no trie file {0:?}")]
    NoFile(String),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::NoDictionary(l1, l2) => ApiError::NoDictionary(l1, l2),
            CatalogError::InvalidPair(pair) => ApiError::InvalidPair(pair),
            other => ApiError::InvalidPair(other.to_string()),
        }
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NoDictionary(..) | ApiError::NotLoaded(_) | ApiError::NoFile(_) => StatusCode::NOT_FOUND,
            // the language-pair route only matches ISO 639-3 codes
            ApiError::InvalidPair(_) => StatusCode::NOT_FOUND,
            ApiError::Search(_) | ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}
