//! Maps aggregation outcomes to HTTP responses. Error bodies are fixed
//! messages; internal detail never reaches the client.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use crate::aggregate::Outcome;

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Vec<Value>),
    Text(String),
}

pub fn to_response(outcome: Outcome, username: &str) -> (StatusCode, ResponseBody) {
    match outcome {
        Outcome::Found(products) => (StatusCode::OK, ResponseBody::Json(products)),
        Outcome::NotFound => (
            StatusCode::NOT_FOUND,
            ResponseBody::Text(format!(
                "User with username of '{}' was not found",
                username
            )),
        ),
        Outcome::UpstreamError => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ResponseBody::Text("Unexpected response from remote service".to_string()),
        ),
        Outcome::InternalError(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ResponseBody::Text("Server Error".to_string()),
        ),
    }
}

pub fn render(outcome: Outcome, username: &str) -> Response {
    let (status, body) = to_response(outcome, username);
    match body {
        ResponseBody::Json(products) => (status, Json(products)).into_response(),
        ResponseBody::Text(message) => (status, message).into_response(),
    }
}
