//! JSON envelope encoding shared by every plugin route.
//!
//! Bodies are written the way the daemon's Go client expects them: compact JSON
//! followed by a single newline. Decoding ignores unknown fields so newer daemons
//! can add fields without breaking older plugins.

use bytes::Bytes;
use http::{header, HeaderValue, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};

use crate::error::HandlerError;

/// Media type sent on every plugin response.
pub const CONTENT_TYPE_V1_1: &str = "application/vnd.docker.plugins.v1.1+json";
/// Newer media type accepted by recent daemons.
pub const CONTENT_TYPE_V1_2: &str = "application/vnd.docker.plugins.v1.2+json";

pub type HttpRequest = http::Request<Bytes>;
pub type HttpResponse = Response<Bytes>;

/// The single error shape the daemon understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "Err")]
    pub err: String,
}

pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, HandlerError> {
    let mut buf = serde_json::to_vec(value)
        .map_err(|err| HandlerError::internal(format!("failed to encode response: {err}")))?;
    buf.push(b'\n');
    Ok(Bytes::from(buf))
}

pub fn encode_error(message: &str) -> Bytes {
    let envelope = ErrorResponse {
        err: message.to_owned(),
    };
    // A struct holding a single string always serializes.
    let mut buf = serde_json::to_vec(&envelope).unwrap_or_default();
    buf.push(b'\n');
    Bytes::from(buf)
}

/// Decodes a request body; any failure is the caller's fault.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, HandlerError> {
    serde_json::from_slice(body)
        .map_err(|err| HandlerError::bad_request(format!("invalid request body: {err}")))
}

/// Builds a 200 response with `value` as the JSON body.
pub fn json_response<T: Serialize>(value: &T) -> Result<HttpResponse, HandlerError> {
    Ok(response_with(StatusCode::OK, encode(value)?))
}

pub fn empty_response() -> HttpResponse {
    response_with(StatusCode::OK, Bytes::from_static(b"{}\n"))
}

pub fn error_response(err: &HandlerError) -> HttpResponse {
    response_with(err.status(), encode_error(err.message()))
}

fn response_with(status: StatusCode, body: Bytes) -> HttpResponse {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(CONTENT_TYPE_V1_1),
    );
    response
}

/// Deserializes JSON `null` as the type's default; Go peers send nil maps and
/// slices that way.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Volume {
        #[serde(rename = "Name")]
        name: String,
        #[serde(rename = "Tags", default, deserialize_with = "null_as_default")]
        tags: Vec<String>,
    }

    #[test]
    fn error_envelope_has_trailing_newline() {
        assert_eq!(
            encode_error("I CAN HAZ ERRORZ"),
            Bytes::from_static(b"{\"Err\":\"I CAN HAZ ERRORZ\"}\n")
        );
    }

    #[test]
    fn empty_payload_encodes_as_object() {
        assert_eq!(empty_response().body(), &Bytes::from_static(b"{}\n"));
    }

    #[test]
    fn decode_tolerates_unknown_fields() {
        let volume: Volume = decode(br#"{"Name":"a","Extra":{"x":1}}"#).unwrap();
        assert_eq!(volume.name, "a");
        assert!(volume.tags.is_empty());
    }

    #[test]
    fn decode_maps_null_to_default() {
        let volume: Volume = decode(br#"{"Name":"a","Tags":null}"#).unwrap();
        assert!(volume.tags.is_empty());
    }

    #[test]
    fn decode_failure_is_a_client_error() {
        let err = decode::<Volume>(br#"{"Tags":[]}"#).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.message().contains("Name"));

        let err = decode::<Volume>(b"").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn responses_carry_plugin_media_type() {
        let response = error_response(&HandlerError::not_found("/Nope"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            HeaderValue::from_static(CONTENT_TYPE_V1_1)
        );
    }
}
