//! JSON response builders for the API.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

/// Build a JSON response with a status code.
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|e| {
        serde_json::json!({
            "error": {
                "message": format!("Serialization error: {}", e),
                "status": 500
            }
        })
        .to_string()
    });

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(json)))
        .expect("response builder should not fail")
}

/// Build a 200 OK JSON response.
pub fn ok<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, body)
}

/// Build a 202 Accepted JSON response.
pub fn accepted<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::ACCEPTED, body)
}

/// Build an error response with the given status and message.
pub fn error(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(
        status,
        &serde_json::json!({
            "error": {
                "message": message,
                "status": status.as_u16()
            }
        }),
    )
}

/// Build a 404 Not Found response.
pub fn not_found(message: &str) -> Response<Full<Bytes>> {
    error(StatusCode::NOT_FOUND, message)
}

/// Build a 400 Bad Request response.
pub fn bad_request(message: &str) -> Response<Full<Bytes>> {
    error(StatusCode::BAD_REQUEST, message)
}
