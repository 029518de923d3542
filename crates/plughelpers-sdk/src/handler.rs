use std::{
    convert::Infallible,
    future::Future,
    io,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use tower::ServiceExt;
use tracing::Instrument;

use crate::{
    codec::{self, HttpRequest, HttpResponse},
    config::ServeConfig,
    error::HandlerError,
    middleware::{self, DynLayer, PluginService},
    router::{Manifest, Router},
    transport::{self, Accept, Binding, BoxedConnection, PipeOptions, SocketOptions, TcpOptions},
};

/// Pause after a failed accept, so running out of descriptors does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Composition root of a plugin: routes, middleware and the serving loop.
pub struct Handler {
    router: Router,
    layers: Vec<DynLayer>,
}

impl Handler {
    /// Creates a handler answering `Plugin.Activate` with `manifest`.
    pub fn new(manifest: Manifest) -> Self {
        Self {
            router: Router::new(manifest),
            layers: Vec::new(),
        }
    }

    /// Registers a route. Failures returned by `handler` are encoded as error
    /// envelopes by the middleware chain.
    pub fn handle<F, Fut>(&mut self, path: &str, handler: F)
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, HandlerError>> + Send + 'static,
    {
        self.router.route(path, handler);
    }

    /// Adds a middleware outside the standard chain; the last one added runs first.
    pub fn layer(&mut self, layer: DynLayer) {
        self.layers.insert(0, layer);
    }

    pub fn into_service(self) -> PluginService {
        let mut layers = self.layers;
        layers.extend(middleware::standard_chain());
        middleware::compose(self.router.into_service(), &layers)
    }

    /// Serves `binding` until `shutdown` resolves.
    ///
    /// Accept errors are logged and retried. The binding's discovery artifact
    /// is removed before this returns.
    pub async fn serve<F>(self, binding: Binding, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let service = self.into_service();
        let Binding {
            mut listener,
            artifact,
            description,
        } = binding;
        let _artifact = artifact;
        accept_loop(&mut listener, service, &description, shutdown).await;
        Ok(())
    }

    pub async fn serve_tcp<F>(self, options: &TcpOptions, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let binding = transport::bind_tcp(options).await?;
        self.serve(binding, shutdown).await
    }

    pub async fn serve_socket<F>(self, options: &SocketOptions, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let binding = transport::bind_socket(options).await?;
        self.serve(binding, shutdown).await
    }

    pub async fn serve_pipe<F>(self, options: &PipeOptions, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let binding = transport::bind_pipe(options).await?;
        self.serve(binding, shutdown).await
    }

    pub async fn serve_config<F>(self, config: &ServeConfig, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        config.validate()?;
        let binding = config.bind().await?;
        self.serve(binding, shutdown).await
    }
}

/// Runs a driver call on the blocking pool.
///
/// A panic inside `call` is resumed on the calling task, where the
/// panic-recovery middleware answers it.
pub async fn blocking<T, F>(call: F) -> Result<T, HandlerError>
where
    F: FnOnce() -> Result<T, HandlerError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(call).await {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => Err(HandlerError::internal(err.to_string())),
    }
}

async fn accept_loop<L, F>(
    listener: &mut L,
    service: PluginService,
    description: &str,
    shutdown: F,
)
where
    L: Accept,
    F: Future<Output = ()> + Send,
{
    tracing::info!(listener = %description, "listener ready");
    let mut last_error = None::<io::ErrorKind>;

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!(listener = %description, "listener shutting down");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok(accepted) => {
                    last_error = None;
                    let service = service.clone();
                    tokio::spawn(async move {
                        let peer = accepted.peer.clone();
                        let result = match accepted.establish().await {
                            Ok(stream) => serve_connection(stream, service).await,
                            Err(err) => Err(err),
                        };
                        if let Err(err) = result {
                            tracing::warn!(error = %err, %peer, "connection closed with error");
                        }
                    });
                }
                Err(err) => {
                    if last_error != Some(err.kind()) {
                        tracing::warn!(listener = %description, error = %err, "accept failed");
                    }
                    last_error = Some(err.kind());
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }
}

async fn serve_connection(stream: BoxedConnection, service: PluginService) -> Result<()> {
    let hyper_service = service_fn(move |req: Request<Incoming>| {
        let service = service.clone();
        async move { Ok::<_, Infallible>(handle_request(service, req).await) }
    });
    http1::Builder::new()
        .serve_connection(TokioIo::new(stream), hyper_service)
        .await
        .context("connection handling failed")
}

async fn handle_request(service: PluginService, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let start = Instant::now();
    let span = tracing::info_span!(
        "request",
        method = %req.method(),
        path = %req.uri().path(),
        status = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    );

    async move {
        let (parts, body) = req.into_parts();
        let response = match body.collect().await {
            Ok(collected) => {
                let request = Request::from_parts(parts, collected.to_bytes());
                match service.oneshot(request).await {
                    Ok(response) => response,
                    Err(err) => codec::error_response(&err),
                }
            }
            Err(err) => codec::error_response(&HandlerError::bad_request(format!(
                "failed to read request body: {err}"
            ))),
        };

        let span = tracing::Span::current();
        span.record("status", response.status().as_u16());
        span.record("duration_ms", start.elapsed().as_millis() as u64);
        if response.status() == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::warn!("request failed");
        }
        response.map(Full::new)
    }
    .instrument(span)
    .await
}
