//! Classification of service responses.

use emtl_session::{Error, Result};
use serde_json::Value;
use tracing::{error, warn};

/// `Status` value meaning the validation key is no longer accepted.
const STATUS_EXPIRED: i64 = -2;

/// `Status` value meaning the request failed.
const STATUS_FAILED: i64 = -1;

/// Map a transport failure into an API error.
pub(crate) fn transport_error(e: reqwest::Error) -> Error {
    Error::Api {
        status: e.status().map(|s| s.as_u16()),
        message: format!("HTTP error: {e}"),
        response: None,
    }
}

/// Check a response and return its JSON body, if it has one.
///
/// - image bodies are accepted as-is
/// - a non-200 status is [`Error::Api`]
/// - `Status == -2` is [`Error::SessionExpired`]
/// - `Status == -1` is [`Error::Api`]
pub(crate) fn check_response(status: u16, content_type: &str, body: &[u8]) -> Result<Option<Value>> {
    if content_type.contains("image") {
        return Ok(None);
    }

    let text = String::from_utf8_lossy(body);
    if status != 200 {
        error!(status, response = %text, "Request failed");
        return Err(Error::Api {
            status: Some(status),
            message: format!("HTTP error: {status}"),
            response: Some(text.into_owned()),
        });
    }

    let json = serde_json::from_slice::<Value>(body).ok();
    match json.as_ref().and_then(status_code) {
        Some(STATUS_EXPIRED) => {
            warn!(response = %text, "Session expired");
            Err(Error::SessionExpired(text.into_owned()))
        }
        Some(STATUS_FAILED) => {
            error!(status, response = %text, "Request rejected");
            Err(Error::Api {
                status: Some(status),
                message: format!("API error: {}", message(json.as_ref())),
                response: Some(text.into_owned()),
            })
        }
        _ => Ok(json),
    }
}

/// The service-level `Status` field of a JSON body.
pub(crate) fn status_code(json: &Value) -> Option<i64> {
    json.get("Status").and_then(Value::as_i64)
}

/// The service-level `Message` field, or a placeholder.
pub(crate) fn message(json: Option<&Value>) -> String {
    json.and_then(|j| j.get("Message"))
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string()
}
