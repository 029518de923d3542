//! Request pipeline wrapped around every route.
//!
//! [`standard_chain`] lists the stages outermost first:
//! content-type, error-envelope, panic-recovery.

use std::any::Any;

use http::{header, HeaderValue};
use tower::{layer::layer_fn, service_fn, Layer, ServiceExt};

use crate::{
    codec::{self, HttpRequest, HttpResponse, CONTENT_TYPE_V1_1},
    error::{HandlerError, PANIC_MESSAGE},
};

pub type PluginService = tower::util::BoxCloneSyncService<HttpRequest, HttpResponse, HandlerError>;
pub type DynLayer = Box<dyn Layer<PluginService, Service = PluginService> + Send + Sync>;

/// Identifies a stage of the standard chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ContentType,
    ErrorEnvelope,
    RecoverPanics,
}

impl Stage {
    pub fn layer(self) -> DynLayer {
        match self {
            Stage::ContentType => content_type(),
            Stage::ErrorEnvelope => error_envelope(),
            Stage::RecoverPanics => recover_panics(),
        }
    }
}

/// Stages wrapped around the router, outermost first.
pub const STANDARD_CHAIN: [Stage; 3] = [
    Stage::ContentType,
    Stage::ErrorEnvelope,
    Stage::RecoverPanics,
];

pub fn standard_chain() -> Vec<DynLayer> {
    STANDARD_CHAIN.iter().map(|stage| stage.layer()).collect()
}

/// Wraps `inner` with `layers`, the first layer ending up outermost.
pub fn compose(inner: PluginService, layers: &[DynLayer]) -> PluginService {
    layers
        .iter()
        .rev()
        .fold(inner, |service, layer| layer.layer(service))
}

/// Forces the plugin media type on every response.
pub fn content_type() -> DynLayer {
    Box::new(layer_fn(|inner: PluginService| {
        PluginService::new(inner.map_response(|mut response: HttpResponse| {
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(CONTENT_TYPE_V1_1),
            );
            response
        }))
    }))
}

/// Turns a failed call into `{"Err": ...}` with the status the failure carries.
pub fn error_envelope() -> DynLayer {
    Box::new(layer_fn(|inner: PluginService| {
        PluginService::new(inner.map_result(into_envelope))
    }))
}

fn into_envelope(
    result: Result<HttpResponse, HandlerError>,
) -> Result<HttpResponse, HandlerError> {
    result.or_else(|err| {
        tracing::debug!(status = err.status().as_u16(), error = %err, "request failed");
        Ok(codec::error_response(&err))
    })
}

/// Runs the wrapped chain on its own task so a panic becomes a failure
/// instead of tearing down the connection.
pub fn recover_panics() -> DynLayer {
    Box::new(layer_fn(|inner: PluginService| {
        PluginService::new(service_fn(move |request: HttpRequest| {
            let call = inner.clone().oneshot(request);
            async move {
                match tokio::spawn(call).await {
                    Ok(result) => result,
                    Err(err) if err.is_panic() => {
                        let payload = err.into_panic();
                        let message = panic_message(payload.as_ref());
                        tracing::error!(panic = message, "handler panicked");
                        metrics::counter!("plughelpers_panics_total").increment(1);
                        Err(HandlerError::internal(PANIC_MESSAGE))
                    }
                    Err(err) => Err(HandlerError::internal(err.to_string())),
                }
            }
        }))
    }))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::{Request, Response, StatusCode};

    use super::*;

    fn request() -> HttpRequest {
        Request::builder()
            .uri("/NetworkDriver.CreateNetwork")
            .body(Bytes::new())
            .unwrap()
    }

    fn stack<F, Fut>(f: F) -> PluginService
    where
        F: Fn(HttpRequest) -> Fut + Clone + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<HttpResponse, HandlerError>> + Send + 'static,
    {
        compose(PluginService::new(service_fn(f)), &standard_chain())
    }

    #[tokio::test]
    async fn plain_responses_get_plugin_content_type() {
        let service = stack(|_req| async { Ok(Response::new(Bytes::from_static(b"{}\n"))) });
        let response = service.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], CONTENT_TYPE_V1_1);
    }

    #[tokio::test]
    async fn failures_become_error_envelopes() {
        let service = stack(|_req| async { Err(HandlerError::internal("boom")) });
        let response = service.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[header::CONTENT_TYPE], CONTENT_TYPE_V1_1);
        assert_eq!(response.body(), &Bytes::from_static(b"{\"Err\":\"boom\"}\n"));
    }

    #[tokio::test]
    async fn explicit_status_is_kept() {
        let service = stack(|_req| async {
            Err(HandlerError::internal("conflict").with_status(StatusCode::CONFLICT))
        });
        let response = service.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn panics_are_answered_with_generic_failure() {
        let service = stack(|_req| async {
            if true {
                panic!("driver exploded");
            }
            Ok(Response::new(Bytes::new()))
        });
        let response = service.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[header::CONTENT_TYPE], CONTENT_TYPE_V1_1);
        assert_eq!(
            response.body(),
            &Bytes::from(format!("{{\"Err\":\"{PANIC_MESSAGE}\"}}\n"))
        );
    }

    #[test]
    fn chain_order_is_fixed() {
        assert_eq!(
            STANDARD_CHAIN,
            [Stage::ContentType, Stage::ErrorEnvelope, Stage::RecoverPanics]
        );
    }
}
