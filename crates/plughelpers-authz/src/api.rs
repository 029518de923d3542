use std::{collections::HashMap, sync::Arc};

use plughelpers_sdk::{
    blocking, codec, codec::null_as_default, Handler, HandlerError, HttpRequest, Manifest,
};
use serde::{Deserialize, Serialize};

use crate::encoding;

/// Name advertised in the activation manifest.
pub const IMPLEMENTATION_NAME: &str = "authz";
pub const AUTHZ_REQUEST_PATH: &str = "/AuthZPlugin.AuthZReq";
pub const AUTHZ_RESPONSE_PATH: &str = "/AuthZPlugin.AuthZRes";

/// Snapshot of a daemon API call, and of its response for `AuthZRes`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "User", default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(rename = "UserAuthNMethod", default, skip_serializing_if = "String::is_empty")]
    pub user_authn_method: String,
    #[serde(rename = "RequestMethod")]
    pub request_method: String,
    #[serde(rename = "RequestURI")]
    pub request_uri: String,
    #[serde(
        rename = "RequestBody",
        default,
        with = "encoding",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub request_body: Vec<u8>,
    #[serde(
        rename = "RequestHeaders",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub request_headers: HashMap<String, String>,
    #[serde(
        rename = "RequestPeerCertificates",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub request_peer_certificates: Vec<PeerCertificate>,
    #[serde(
        rename = "ResponseBody",
        default,
        with = "encoding",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub response_body: Vec<u8>,
    #[serde(
        rename = "ResponseHeaders",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub response_headers: HashMap<String, String>,
    #[serde(rename = "ResponseStatusCode", default, skip_serializing_if = "is_zero")]
    pub response_status_code: u16,
}

fn is_zero(code: &u16) -> bool {
    *code == 0
}

/// DER bytes of a client certificate presented to the daemon. Never parsed here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerCertificate(#[serde(with = "encoding")] pub Vec<u8>);

impl PeerCertificate {
    pub fn der(&self) -> &[u8] {
        &self.0
    }
}

/// Decision returned by an [`Authorizer`].
///
/// A non-empty `err` marks the call as failed: the daemon receives an error
/// envelope instead of the decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "Allow")]
    pub allow: bool,
    #[serde(rename = "Msg", default)]
    pub msg: String,
    #[serde(rename = "Err", default)]
    pub err: String,
}

impl Response {
    pub fn allow() -> Self {
        Self {
            allow: true,
            ..Self::default()
        }
    }

    pub fn deny(msg: impl Into<String>) -> Self {
        Self {
            allow: false,
            msg: msg.into(),
            err: String::new(),
        }
    }

    pub fn error(err: impl Into<String>) -> Self {
        Self {
            err: err.into(),
            ..Self::default()
        }
    }
}

/// Policy hooks called for every daemon API request and response.
///
/// Calls run on the blocking pool and may run concurrently.
pub trait Authorizer: Send + Sync + 'static {
    fn authorize_request(&self, request: &Request) -> Response;
    fn authorize_response(&self, request: &Request) -> Response;
}

/// Builds a plugin handler serving `authorizer` on the `AuthZPlugin` routes.
pub fn handler<A: Authorizer>(authorizer: A) -> Handler {
    let authorizer = Arc::new(authorizer);
    let mut handler = Handler::new(Manifest::new([IMPLEMENTATION_NAME]));
    register(&mut handler, AUTHZ_REQUEST_PATH, &authorizer, A::authorize_request);
    register(&mut handler, AUTHZ_RESPONSE_PATH, &authorizer, A::authorize_response);
    handler
}

fn register<A, F>(handler: &mut Handler, path: &'static str, authorizer: &Arc<A>, call: F)
where
    A: Authorizer,
    F: Fn(&A, &Request) -> Response + Copy + Send + Sync + 'static,
{
    let authorizer = Arc::clone(authorizer);
    handler.handle(path, move |req: HttpRequest| {
        let authorizer = Arc::clone(&authorizer);
        async move {
            let request: Request = codec::decode(req.body())?;
            let user = request.user.clone();
            let uri = request.request_uri.clone();
            let response = blocking(move || Ok(call(&authorizer, &request))).await?;
            tracing::debug!(
                path,
                %user,
                %uri,
                allow = response.allow,
                failed = !response.err.is_empty(),
                "authorization decision"
            );
            if !response.err.is_empty() {
                return Err(HandlerError::internal(response.err));
            }
            codec::json_response(&response)
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_daemon_request_ignoring_unknown_fields() {
        let raw = br#"{"User":"bob","UserAuthNMethod":"","RequestMethod":"POST","RequestURI":"http://127.0.0.1/v.1.23/containers/json","RequestBody":"","RequestHeader":"","RequestStatusCode":"","ResponseBody":"","ResponseHeader":"","ResponseStatusCode":200}"#;
        let request: Request = codec::decode(raw).unwrap();
        assert_eq!(request.user, "bob");
        assert_eq!(request.request_method, "POST");
        assert!(request.request_body.is_empty());
        assert_eq!(request.response_status_code, 200);
    }

    #[test]
    fn method_and_uri_are_required() {
        let err = codec::decode::<Request>(br#"{"User":"bob"}"#).unwrap_err();
        assert_eq!(err.status().as_u16(), 400);
    }

    #[test]
    fn bodies_and_certificates_travel_as_base64() {
        let request = Request {
            request_method: "POST".into(),
            request_uri: "/v1.41/containers/create".into(),
            request_body: br#"{"Image":"alpine"}"#.to_vec(),
            request_headers: HashMap::from([("Content-Type".into(), "application/json".into())]),
            request_peer_certificates: vec![PeerCertificate(vec![0x30, 0x82, 0x01])],
            ..Request::default()
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["RequestBody"], "eyJJbWFnZSI6ImFscGluZSJ9");
        assert_eq!(json["RequestPeerCertificates"][0], "MIIB");

        let decoded: Request = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.request_peer_certificates[0].der(), &[0x30, 0x82, 0x01]);
    }

    #[test]
    fn response_always_carries_all_fields() {
        let body = codec::encode(&Response::deny("You are not authorized")).unwrap();
        assert_eq!(
            body,
            "{\"Allow\":false,\"Msg\":\"You are not authorized\",\"Err\":\"\"}\n"
        );
    }
}
