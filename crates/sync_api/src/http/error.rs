use axum::{http::StatusCode, response::IntoResponse, Json};
use common::domain::{DomainError, EntryErrorKind};
use serde::{Deserialize, Serialize};

pub type AppResult<T> = Result<T, AppError>;

/// JSON error body for request-level failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppError {
    #[serde(with = "status_code_number")]
    pub status: StatusCode,
    pub detail: Option<String>,
}

impl AppError {
    pub fn new(status: StatusCode, detail: impl ToString) -> Self {
        Self {
            status,
            detail: Some(detail.to_string()),
        }
    }

    pub fn bad_request(detail: impl ToString) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self)).into_response()
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        let status = match err.entry_error_kind() {
            EntryErrorKind::NotFound => StatusCode::NOT_FOUND,
            EntryErrorKind::Validation | EntryErrorKind::InvalidEntry => StatusCode::BAD_REQUEST,
            EntryErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err)
    }
}

mod status_code_number {
    use axum::http::StatusCode;
    use serde::{de::Unexpected, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(status: &StatusCode, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u16(status.as_u16())
    }

    pub fn deserialize<'de, D>(de: D) -> Result<StatusCode, D::Error>
    where
        D: Deserializer<'de>,
    {
        let code = u16::deserialize(de)?;
        StatusCode::from_u16(code).map_err(|_| {
            serde::de::Error::invalid_value(
                Unexpected::Unsigned(code as u64),
                &"a valid http status code",
            )
        })
    }
}
