//! Typed views over the port options the daemon puts in option maps.
//!
//! Option values arrive as untyped JSON. Protocol numbers and ports are only
//! accepted when they are integral and in range: `6` and `6.0` both read as
//! TCP, while `6.5` or `70000` fail instead of being truncated.

use anyhow::{Context, Result};
use serde::{
    de::{self, DeserializeOwned},
    Deserialize, Deserializer, Serialize,
};
use serde_json::Number;

use crate::types::{Options, ProgramExternalConnectivityRequest};

pub const EXPOSED_PORTS_OPTION: &str = "com.docker.network.endpoint.exposedports";
pub const PORT_MAP_OPTION: &str = "com.docker.network.portmap";
pub const GENERIC_OPTION: &str = "com.docker.network.generic";

/// IP protocol number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Protocol(pub u8);

impl<'de> Deserialize<'de> for Protocol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        integral(deserializer).map(Protocol)
    }
}

impl Protocol {
    pub const ICMP: Protocol = Protocol(1);
    pub const TCP: Protocol = Protocol(6);
    pub const UDP: Protocol = Protocol(17);
    pub const SCTP: Protocol = Protocol(132);

    pub fn name(self) -> Option<&'static str> {
        match self {
            Protocol::ICMP => Some("icmp"),
            Protocol::TCP => Some("tcp"),
            Protocol::UDP => Some("udp"),
            Protocol::SCTP => Some("sctp"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportPort {
    #[serde(rename = "Proto")]
    pub proto: Protocol,
    #[serde(rename = "Port", deserialize_with = "integral")]
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    #[serde(rename = "Proto")]
    pub proto: Protocol,
    #[serde(rename = "IP", default)]
    pub ip: String,
    #[serde(rename = "Port", deserialize_with = "integral")]
    pub port: u16,
    #[serde(rename = "HostIP", default)]
    pub host_ip: String,
    #[serde(rename = "HostPort", default, deserialize_with = "integral")]
    pub host_port: u16,
    #[serde(rename = "HostPortEnd", default, deserialize_with = "integral")]
    pub host_port_end: u16,
}

/// Ports the container exposes; empty when the option is absent.
pub fn exposed_ports(options: &Options) -> Result<Vec<TransportPort>> {
    typed_option(options, EXPOSED_PORTS_OPTION)
}

/// Host port mappings; empty when the option is absent.
pub fn port_bindings(options: &Options) -> Result<Vec<PortBinding>> {
    typed_option(options, PORT_MAP_OPTION)
}

/// Reads a JSON number that is integral and fits `T`, whether written as `70` or `70.0`.
fn integral<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    let number = Number::deserialize(deserializer)?;
    let whole = number.as_u64().or_else(|| {
        number
            .as_f64()
            .filter(|value| value.fract() == 0.0 && (0.0..=u64::MAX as f64).contains(value))
            .map(|value| value as u64)
    });
    whole
        .and_then(|value| T::try_from(value).ok())
        .ok_or_else(|| de::Error::custom(format!("{number} is not an integral value in range")))
}

fn typed_option<T: DeserializeOwned>(options: &Options, key: &str) -> Result<Vec<T>> {
    match options.get(key) {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(value) => {
            Vec::<T>::deserialize(value).with_context(|| format!("invalid {key} option"))
        }
    }
}

impl ProgramExternalConnectivityRequest {
    pub fn exposed_ports(&self) -> Result<Vec<TransportPort>> {
        exposed_ports(&self.options)
    }

    pub fn port_bindings(&self) -> Result<Vec<PortBinding>> {
        port_bindings(&self.options)
    }
}
