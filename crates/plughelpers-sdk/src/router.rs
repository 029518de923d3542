use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use serde::{Deserialize, Serialize};
use tower::service_fn;

use crate::{
    codec::{self, HttpRequest, HttpResponse},
    error::HandlerError,
    middleware::PluginService,
};

/// Fixed route every plugin answers, whatever its category.
pub const ACTIVATE_PATH: &str = "/Plugin.Activate";

pub type RouteFuture = Pin<Box<dyn Future<Output = Result<HttpResponse, HandlerError>> + Send>>;
type RouteFn = Arc<dyn Fn(HttpRequest) -> RouteFuture + Send + Sync>;

/// Protocol categories a plugin implements, sent verbatim on activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "Implements")]
    implements: Vec<String>,
}

impl Manifest {
    pub fn new<I, S>(implements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            implements: implements.into_iter().map(Into::into).collect(),
        }
    }

    pub fn implements(&self) -> &[String] {
        &self.implements
    }
}

/// Maps a request path to its handler. Routes are matched on the exact path;
/// the HTTP method is not checked, the daemon only ever POSTs.
#[derive(Clone)]
pub struct Router {
    routes: HashMap<String, RouteFn>,
}

impl Router {
    pub fn new(manifest: Manifest) -> Self {
        if manifest.implements.is_empty() {
            tracing::warn!("plugin manifest does not implement any category");
        }
        let mut router = Self {
            routes: HashMap::new(),
        };
        let manifest = Arc::new(manifest);
        router.route(ACTIVATE_PATH, move |_req| {
            let manifest = Arc::clone(&manifest);
            async move { codec::json_response(manifest.as_ref()) }
        });
        router
    }

    /// Registers `handler` for `path`, replacing any previous handler.
    pub fn route<F, Fut>(&mut self, path: &str, handler: F)
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, HandlerError>> + Send + 'static,
    {
        let route: RouteFn = Arc::new(move |req| Box::pin(handler(req)));
        if self.routes.insert(path.to_owned(), route).is_some() {
            tracing::debug!(path, "route handler replaced");
        }
    }

    pub fn has_route(&self, path: &str) -> bool {
        self.routes.contains_key(path)
    }

    pub fn dispatch(&self, req: HttpRequest) -> RouteFuture {
        let path = req.uri().path().to_owned();
        match self.routes.get(&path) {
            Some(route) => {
                metrics::counter!("plughelpers_requests_total", "route" => path, "outcome" => "hit")
                    .increment(1);
                route(req)
            }
            None => {
                metrics::counter!("plughelpers_requests_total", "outcome" => "miss").increment(1);
                Box::pin(async move { Err(HandlerError::not_found(&path)) })
            }
        }
    }

    pub fn into_service(self) -> PluginService {
        let router = Arc::new(self);
        PluginService::new(service_fn(move |req: HttpRequest| router.dispatch(req)))
    }
}
