use std::sync::Arc;

use anyhow::Result;
use plughelpers_sdk::{blocking, codec, Handler, HandlerError, HttpRequest, Manifest};
use serde::{de::DeserializeOwned, Serialize};

use crate::types::*;

/// Name advertised in the activation manifest.
pub const IMPLEMENTATION_NAME: &str = "NetworkDriver";

pub const CAPABILITIES_PATH: &str = "/NetworkDriver.GetCapabilities";
pub const CREATE_NETWORK_PATH: &str = "/NetworkDriver.CreateNetwork";
pub const ALLOCATE_NETWORK_PATH: &str = "/NetworkDriver.AllocateNetwork";
pub const DELETE_NETWORK_PATH: &str = "/NetworkDriver.DeleteNetwork";
pub const FREE_NETWORK_PATH: &str = "/NetworkDriver.FreeNetwork";
pub const CREATE_ENDPOINT_PATH: &str = "/NetworkDriver.CreateEndpoint";
pub const DELETE_ENDPOINT_PATH: &str = "/NetworkDriver.DeleteEndpoint";
pub const ENDPOINT_INFO_PATH: &str = "/NetworkDriver.EndpointOperInfo";
pub const JOIN_PATH: &str = "/NetworkDriver.Join";
pub const LEAVE_PATH: &str = "/NetworkDriver.Leave";
pub const DISCOVER_NEW_PATH: &str = "/NetworkDriver.DiscoverNew";
pub const DISCOVER_DELETE_PATH: &str = "/NetworkDriver.DiscoverDelete";
pub const PROGRAM_EXTERNAL_CONNECTIVITY_PATH: &str = "/NetworkDriver.ProgramExternalConnectivity";
pub const REVOKE_EXTERNAL_CONNECTIVITY_PATH: &str = "/NetworkDriver.RevokeExternalConnectivity";

/// Network lifecycle operations a remote network driver must provide.
///
/// The same instance serves every request concurrently, each call on its own
/// blocking worker. Serializing calls, where a driver needs it, is up to the
/// driver. An `Err` reaches the daemon as `{"Err": "<message>"}` with status 500.
pub trait NetworkDriver: Send + Sync + 'static {
    fn get_capabilities(&self) -> Result<CapabilitiesResponse>;
    fn create_network(&self, request: &CreateNetworkRequest) -> Result<()>;
    fn allocate_network(
        &self,
        request: &AllocateNetworkRequest,
    ) -> Result<AllocateNetworkResponse>;
    fn delete_network(&self, request: &DeleteNetworkRequest) -> Result<()>;
    fn free_network(&self, request: &FreeNetworkRequest) -> Result<()>;
    fn create_endpoint(&self, request: &CreateEndpointRequest) -> Result<CreateEndpointResponse>;
    fn delete_endpoint(&self, request: &DeleteEndpointRequest) -> Result<()>;
    fn endpoint_info(&self, request: &InfoRequest) -> Result<InfoResponse>;
    fn join(&self, request: &JoinRequest) -> Result<JoinResponse>;
    fn leave(&self, request: &LeaveRequest) -> Result<()>;
    fn discover_new(&self, notification: &DiscoveryNotification) -> Result<()>;
    fn discover_delete(&self, notification: &DiscoveryNotification) -> Result<()>;
    fn program_external_connectivity(
        &self,
        request: &ProgramExternalConnectivityRequest,
    ) -> Result<()>;
    fn revoke_external_connectivity(
        &self,
        request: &RevokeExternalConnectivityRequest,
    ) -> Result<()>;
}

/// Builds a plugin handler serving `driver` on every `NetworkDriver` route.
pub fn handler<D: NetworkDriver>(driver: D) -> Handler {
    let driver = Arc::new(driver);
    let mut handler = Handler::new(Manifest::new([IMPLEMENTATION_NAME]));

    let capabilities = Arc::clone(&driver);
    handler.handle(CAPABILITIES_PATH, move |_req: HttpRequest| {
        let driver = Arc::clone(&capabilities);
        async move {
            let response = call(move || driver.get_capabilities()).await?;
            codec::json_response(&response)
        }
    });

    ack(&mut handler, CREATE_NETWORK_PATH, &driver, D::create_network);
    reply(&mut handler, ALLOCATE_NETWORK_PATH, &driver, D::allocate_network);
    ack(&mut handler, DELETE_NETWORK_PATH, &driver, D::delete_network);
    ack(&mut handler, FREE_NETWORK_PATH, &driver, D::free_network);
    reply(&mut handler, CREATE_ENDPOINT_PATH, &driver, D::create_endpoint);
    ack(&mut handler, DELETE_ENDPOINT_PATH, &driver, D::delete_endpoint);
    reply(&mut handler, ENDPOINT_INFO_PATH, &driver, D::endpoint_info);
    reply(&mut handler, JOIN_PATH, &driver, D::join);
    ack(&mut handler, LEAVE_PATH, &driver, D::leave);
    ack(&mut handler, DISCOVER_NEW_PATH, &driver, D::discover_new);
    ack(&mut handler, DISCOVER_DELETE_PATH, &driver, D::discover_delete);
    ack(
        &mut handler,
        PROGRAM_EXTERNAL_CONNECTIVITY_PATH,
        &driver,
        D::program_external_connectivity,
    );
    ack(
        &mut handler,
        REVOKE_EXTERNAL_CONNECTIVITY_PATH,
        &driver,
        D::revoke_external_connectivity,
    );

    handler
}

async fn call<T, F>(op: F) -> Result<T, HandlerError>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    blocking(move || op().map_err(HandlerError::from_driver)).await
}

/// Registers an operation whose success payload is sent back as JSON.
///
/// `()` encodes as `null`, so operations without a payload go through [`ack`].
fn reply<D, Req, Resp, F>(handler: &mut Handler, path: &'static str, driver: &Arc<D>, op: F)
where
    D: NetworkDriver,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(&D, &Req) -> Result<Resp> + Copy + Send + Sync + 'static,
{
    let driver = Arc::clone(driver);
    handler.handle(path, move |req: HttpRequest| {
        let driver = Arc::clone(&driver);
        async move {
            let request: Req = codec::decode(req.body())?;
            let response = call(move || op(&driver, &request)).await?;
            tracing::trace!(path, "driver call succeeded");
            codec::json_response(&response)
        }
    });
}

/// Registers an operation that answers `{}` on success.
fn ack<D, Req, F>(handler: &mut Handler, path: &'static str, driver: &Arc<D>, op: F)
where
    D: NetworkDriver,
    Req: DeserializeOwned + Send + 'static,
    F: Fn(&D, &Req) -> Result<()> + Copy + Send + Sync + 'static,
{
    let driver = Arc::clone(driver);
    handler.handle(path, move |req: HttpRequest| {
        let driver = Arc::clone(&driver);
        async move {
            let request: Req = codec::decode(req.body())?;
            call(move || op(&driver, &request)).await?;
            tracing::trace!(path, "driver call succeeded");
            Ok(codec::empty_response())
        }
    });
}
