//! Core of a Docker Engine plugin: activation, routing, the JSON envelope
//! convention and the transports the daemon connects through.

pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod router;
pub mod tls;
pub mod transport;

pub use codec::{HttpRequest, HttpResponse};
pub use error::HandlerError;
pub use handler::{blocking, Handler};
pub use router::{Manifest, ACTIVATE_PATH};
