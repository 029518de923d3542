//! Authorization plugin category (`AuthZPlugin.*`).
//!
//! Implement [`Authorizer`] and hand it to [`handler`]; the returned
//! [`plughelpers_sdk::Handler`] can then be served on any transport.

mod api;
mod encoding;

pub use api::{
    handler, Authorizer, PeerCertificate, Request, Response, AUTHZ_REQUEST_PATH,
    AUTHZ_RESPONSE_PATH, IMPLEMENTATION_NAME,
};
