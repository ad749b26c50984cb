use axum::{extract::rejection::JsonRejection, response::IntoResponse, Json};

use super::ErrorResponse;
use crate::{error::AppError, validation::FieldErrors};

/// Field key used when a decode error carries no JSON path.
const BODY_FIELD: &str = "body";

pub(crate) fn into_response(err: AppError) -> axum::response::Response {
    let body = Json(ErrorResponse {
        error: err.message,
        code: err.code.to_string(),
        fields: err.fields,
    });
    let mut response = (err.status, body).into_response();
    if let Some(headers) = err.headers.as_deref() {
        for (name, value) in headers.iter() {
            response.headers_mut().insert(name.clone(), value.clone());
        }
    }
    response
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        into_response(self)
    }
}

/// A body that is valid JSON but has a field of the wrong shape is a
/// validation failure keyed by that field. Anything else is a plain 400.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(err) => {
                let (field, message) = decode_error_field(&err.body_text());
                let mut fields = FieldErrors::new();
                fields.insert(field, message);
                AppError::validation(fields)
            }
            other => AppError::bad_request(other.body_text()),
        }
    }
}

/// Splits axum's "<context>: <path>: <message>" decode text.
fn decode_error_field(text: &str) -> (String, String) {
    let detail = text.split_once(": ").map_or(text, |(_, rest)| rest);
    match detail.split_once(": ") {
        Some((path, message))
            if !path.is_empty() && path != "." && !path.contains(char::is_whitespace) =>
        {
            (path.to_string(), message.to_string())
        }
        _ => (BODY_FIELD.to_string(), detail.to_string()),
    }
}
