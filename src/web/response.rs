//! Success envelopes and request-body extraction.

use crate::error::{AppError, AppResult};
use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Map, Value};

/// `{"message": ..., ...data}` with a status code.
#[derive(Debug)]
pub struct ApiResponse {
    status: StatusCode,
    body: Value,
}

impl ApiResponse {
    pub fn message(message: &str) -> Self {
        Self {
            status: StatusCode::OK,
            body: json!({ "message": message }),
        }
    }

    /// Flattens the fields of `data` next to `message`. Non-object data is
    /// placed under `data`.
    pub fn with<T: Serialize>(message: &str, data: &T) -> AppResult<Self> {
        let value = serde_json::to_value(data).map_err(anyhow::Error::from)?;
        let mut body = Map::new();
        body.insert("message".to_string(), Value::String(message.to_string()));
        match value {
            Value::Object(fields) => body.extend(fields),
            other => {
                body.insert("data".to_string(), other);
            }
        }
        Ok(Self {
            status: StatusCode::OK,
            body: Value::Object(body),
        })
    }

    /// Wraps a list as `{"message", "<key>": [...]}`.
    pub fn list<T: Serialize>(message: &str, key: &str, items: &[T]) -> AppResult<Self> {
        let mut wrapped = Map::new();
        wrapped.insert(
            key.to_string(),
            serde_json::to_value(items).map_err(anyhow::Error::from)?,
        );
        Self::with(message, &wrapped)
    }

    pub fn created(mut self) -> Self {
        self.status = StatusCode::CREATED;
        self
    }

    pub fn body(&self) -> &Value {
        &self.body
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// `Json<T>` whose rejection is a `Validation` error in the API error shape.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(rejection_to_validation(rejection)),
        }
    }
}

fn rejection_to_validation(rejection: JsonRejection) -> AppError {
    AppError::validation_with("Validation error", json!({ "body": [rejection.body_text()] }))
}

/// Per-field validation messages, rendered as `{"field": ["message", ...]}`.
#[derive(Debug, Default)]
pub struct FieldErrors(Map<String, Value>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        let entry = self
            .0
            .entry(field.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(messages) = entry {
            messages.push(Value::String(message.into()));
        }
    }

    pub fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.add(field, message);
        }
    }

    pub fn into_result(self) -> AppResult<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(AppError::validation_with("Validation error", Value::Object(self.0)))
        }
    }
}

pub fn valid_length(value: &str, min: usize, max: usize) -> bool {
    (min..=max).contains(&value.trim().chars().count())
}

pub fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Thing {
        id: i64,
        name: &'static str,
    }

    #[test]
    fn data_fields_are_flattened_after_message() {
        let response = ApiResponse::with("Created", &Thing { id: 4, name: "x" }).unwrap();
        let keys: Vec<&String> = response.body().as_object().unwrap().keys().collect();
        assert_eq!(keys, ["message", "id", "name"]);
        assert_eq!(response.body()["id"], 4);
    }

    #[test]
    fn lists_are_wrapped_under_their_key() {
        let response = ApiResponse::list("OK", "submissions", &[1, 2, 3]).unwrap();
        assert_eq!(response.body()["submissions"], json!([1, 2, 3]));
    }

    #[test]
    fn field_errors_collect_per_field() {
        let mut errors = FieldErrors::new();
        errors.check(valid_length("ab", 3, 50), "name", "Name must be 3 to 50 characters");
        errors.check(looks_like_email("nobody"), "email", "Invalid email");
        errors.check(looks_like_email("a@b.io"), "email", "unreachable");
        match errors.into_result() {
            Err(AppError::Validation { data: Some(data), .. }) => {
                assert_eq!(data["name"].as_array().unwrap().len(), 1);
                assert_eq!(data["email"][0], "Invalid email");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(FieldErrors::new().into_result().is_ok());
    }
}
