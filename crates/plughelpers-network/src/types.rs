//! Request and response records of the `NetworkDriver` protocol.
//!
//! Field names match the daemon's JSON exactly. Identifiers are required;
//! everything else defaults when absent or `null`.

use std::collections::HashMap;

use plughelpers_sdk::codec::null_as_default;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form driver options; passed through without interpretation.
pub type Options = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Local,
    Global,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitiesResponse {
    #[serde(rename = "Scope")]
    pub scope: Scope,
    #[serde(rename = "ConnectivityScope", default, skip_serializing_if = "Option::is_none")]
    pub connectivity_scope: Option<Scope>,
}

/// Address pool handed to the driver by IPAM.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpamData {
    #[serde(rename = "AddressSpace", default)]
    pub address_space: String,
    #[serde(rename = "Pool", default)]
    pub pool: String,
    #[serde(rename = "Gateway", default)]
    pub gateway: String,
    #[serde(
        rename = "AuxAddresses",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Options::is_empty"
    )]
    pub aux_addresses: Options,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateNetworkRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "Options", default, deserialize_with = "null_as_default")]
    pub options: Options,
    #[serde(rename = "IPv4Data", default, deserialize_with = "null_as_default")]
    pub ipv4_data: Vec<IpamData>,
    #[serde(rename = "IPv6Data", default, deserialize_with = "null_as_default")]
    pub ipv6_data: Vec<IpamData>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteNetworkRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
}

/// Swarm-scoped allocation, issued on managers only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocateNetworkRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "Options", default, deserialize_with = "null_as_default")]
    pub options: HashMap<String, String>,
    #[serde(rename = "IPv4Data", default, deserialize_with = "null_as_default")]
    pub ipv4_data: Vec<IpamData>,
    #[serde(rename = "IPv6Data", default, deserialize_with = "null_as_default")]
    pub ipv6_data: Vec<IpamData>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateNetworkResponse {
    #[serde(
        rename = "Options",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub options: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeNetworkRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInterface {
    #[serde(rename = "Address", default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(rename = "AddressIPv6", default, skip_serializing_if = "String::is_empty")]
    pub address_ipv6: String,
    #[serde(rename = "MacAddress", default, skip_serializing_if = "String::is_empty")]
    pub mac_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateEndpointRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    #[serde(rename = "Interface", default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<EndpointInterface>,
    #[serde(rename = "Options", default, deserialize_with = "null_as_default")]
    pub options: Options,
}

/// The driver only fills `interface` when it assigned addresses itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEndpointResponse {
    #[serde(rename = "Interface", default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<EndpointInterface>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteEndpointRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoResponse {
    #[serde(
        rename = "Value",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub value: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    #[serde(rename = "SandboxKey", default)]
    pub sandbox_key: String,
    #[serde(rename = "Options", default, deserialize_with = "null_as_default")]
    pub options: Options,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceName {
    #[serde(rename = "SrcName")]
    pub src_name: String,
    #[serde(rename = "DstPrefix", default)]
    pub dst_prefix: String,
}

/// Route types understood by the daemon.
pub const ROUTE_NEXT_HOP: u8 = 0;
pub const ROUTE_CONNECTED: u8 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRoute {
    #[serde(rename = "Destination")]
    pub destination: String,
    #[serde(rename = "RouteType", default)]
    pub route_type: u8,
    #[serde(rename = "NextHop", default, skip_serializing_if = "String::is_empty")]
    pub next_hop: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResponse {
    #[serde(rename = "InterfaceName", default, skip_serializing_if = "Option::is_none")]
    pub interface_name: Option<InterfaceName>,
    #[serde(rename = "Gateway", default, skip_serializing_if = "String::is_empty")]
    pub gateway: String,
    #[serde(rename = "GatewayIPv6", default, skip_serializing_if = "String::is_empty")]
    pub gateway_ipv6: String,
    #[serde(
        rename = "StaticRoutes",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub static_routes: Vec<StaticRoute>,
    #[serde(
        rename = "DisableGatewayService",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub disable_gateway_service: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
}

/// `DiscoveryType` of node discovery events.
pub const NODE_DISCOVERY: i32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryNotification {
    #[serde(rename = "DiscoveryType")]
    pub discovery_type: i32,
    #[serde(rename = "DiscoveryData", default)]
    pub discovery_data: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramExternalConnectivityRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    #[serde(rename = "Options", default, deserialize_with = "null_as_default")]
    pub options: Options,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeExternalConnectivityRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
}

#[cfg(test)]
mod tests {
    use plughelpers_sdk::codec;
    use serde_json::json;

    use super::*;

    const CREATE_NETWORK: &[u8] = br#"{"NetworkID":"d76cfa51738e8a12c5eca71ee69e9d65010a4b48eaad74adab439be7e61b9aaf","Options":{"com.docker.network.generic":{}},"IPv4Data":[{"AddressSpace":"","Gateway":"172.18.0.1/16","Pool":"172.18.0.0/16"}],"IPv6Data":[]}"#;

    #[test]
    fn create_network_request_decodes() {
        let request: CreateNetworkRequest = codec::decode(CREATE_NETWORK).unwrap();
        assert_eq!(request.ipv4_data.len(), 1);
        assert_eq!(request.ipv4_data[0].pool, "172.18.0.0/16");
        assert_eq!(request.ipv4_data[0].gateway, "172.18.0.1/16");
        assert_eq!(request.options["com.docker.network.generic"], json!({}));
        assert!(request.ipv6_data.is_empty());
    }

    #[test]
    fn nested_options_survive_a_round_trip() {
        let request = CreateNetworkRequest {
            network_id: "net".into(),
            options: json!({
                "com.docker.network.generic": {"mtu": 1450, "labels": ["a", null, true, 2.5]},
            })
            .as_object()
            .cloned()
            .unwrap(),
            ..CreateNetworkRequest::default()
        };
        let decoded: CreateNetworkRequest =
            codec::decode(&codec::encode(&request).unwrap()).unwrap();
        assert_eq!(decoded, request);
        assert!(decoded.options["com.docker.network.generic"]["mtu"].is_u64());
    }

    #[test]
    fn null_collections_decode_as_empty() {
        let body = br#"{"NetworkID":"n","Options":null,"IPv4Data":null,"IPv6Data":null}"#;
        let request: CreateNetworkRequest = codec::decode(body).unwrap();
        assert!(request.options.is_empty());
        assert!(request.ipv4_data.is_empty());
    }

    #[test]
    fn missing_identifier_is_rejected() {
        let body = br#"{"NetworkID":"n","SandboxKey":"/var/run/netns/1"}"#;
        let err = codec::decode::<JoinRequest>(body).unwrap_err();
        assert_eq!(err.status().as_u16(), 400);
        assert!(err.message().contains("EndpointID"));
    }

    #[test]
    fn capabilities_encode_like_the_daemon_expects() {
        let body = codec::encode(&CapabilitiesResponse {
            scope: Scope::Local,
            connectivity_scope: Some(Scope::Global),
        })
        .unwrap();
        assert_eq!(body, "{\"Scope\":\"local\",\"ConnectivityScope\":\"global\"}\n");
    }

    #[test]
    fn join_response_omits_unset_fields() {
        let response = JoinResponse {
            interface_name: Some(InterfaceName {
                src_name: "veth0".into(),
                dst_prefix: "eth".into(),
            }),
            gateway: "172.18.0.1".into(),
            ..JoinResponse::default()
        };
        assert_eq!(
            codec::encode(&response).unwrap(),
            concat!(
                "{\"InterfaceName\":{\"SrcName\":\"veth0\",\"DstPrefix\":\"eth\"},",
                "\"Gateway\":\"172.18.0.1\"}\n"
            )
        );

        let disabled = JoinResponse {
            disable_gateway_service: true,
            ..JoinResponse::default()
        };
        assert_eq!(
            codec::encode(&disabled).unwrap(),
            "{\"DisableGatewayService\":true}\n"
        );
    }

    #[test]
    fn empty_responses_encode_as_empty_objects() {
        assert_eq!(codec::encode(&JoinResponse::default()).unwrap(), "{}\n");
        assert_eq!(codec::encode(&InfoResponse::default()).unwrap(), "{}\n");
        assert_eq!(codec::encode(&CreateEndpointResponse::default()).unwrap(), "{}\n");
        assert_eq!(
            codec::encode(&AllocateNetworkResponse::default()).unwrap(),
            "{}\n"
        );
    }
}
