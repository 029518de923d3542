use std::{path::Path, path::PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    tls::TlsFiles,
    transport::{self, Binding, PipeConfig, PipeOptions, SocketOptions, TcpOptions},
};

/// Startup configuration deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeConfig {
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    Tcp {
        bind: String,
        #[serde(default)]
        plugin_name: Option<String>,
        #[serde(default)]
        daemon_root: Option<PathBuf>,
        #[serde(default)]
        tls: Option<TlsFiles>,
    },
    Socket {
        path: PathBuf,
        #[serde(default)]
        group: Option<u32>,
    },
    Pipe {
        path: String,
        #[serde(default)]
        plugin_name: Option<String>,
        #[serde(default)]
        daemon_root: Option<PathBuf>,
        #[serde(default)]
        in_buffer_size: Option<u32>,
        #[serde(default)]
        out_buffer_size: Option<u32>,
        #[serde(default)]
        reject_remote_clients: bool,
    },
}

impl ServeConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("failed to parse serve config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Checks structural invariants and gives actionable error messages.
    pub fn validate(&self) -> Result<()> {
        match &self.transport {
            TransportConfig::Tcp { bind, tls, .. } => {
                if bind.trim().is_empty() {
                    bail!("tcp transport requires a bind address");
                }
                if let Some(tls) = tls {
                    tls.validate()?;
                }
            }
            TransportConfig::Socket { path, .. } => {
                if path.as_os_str().is_empty() {
                    bail!("socket transport requires a path");
                }
            }
            TransportConfig::Pipe { path, .. } => {
                if path.trim().is_empty() {
                    bail!("pipe transport requires a pipe path");
                }
            }
        }
        Ok(())
    }

    pub async fn bind(&self) -> Result<Binding> {
        match &self.transport {
            TransportConfig::Tcp {
                bind,
                plugin_name,
                daemon_root,
                tls,
            } => {
                let options = TcpOptions {
                    addr: normalize_bind(bind),
                    plugin_name: plugin_name.clone(),
                    daemon_root: daemon_root.clone(),
                    tls: tls.as_ref().map(TlsFiles::server_config).transpose()?,
                };
                transport::bind_tcp(&options).await
            }
            TransportConfig::Socket { path, group } => {
                let options = SocketOptions {
                    path: path.clone(),
                    group: *group,
                };
                transport::bind_socket(&options).await
            }
            TransportConfig::Pipe {
                path,
                plugin_name,
                daemon_root,
                in_buffer_size,
                out_buffer_size,
                reject_remote_clients,
            } => {
                let options = PipeOptions {
                    path: path.clone(),
                    plugin_name: plugin_name.clone(),
                    daemon_root: daemon_root.clone(),
                    config: PipeConfig {
                        in_buffer_size: *in_buffer_size,
                        out_buffer_size: *out_buffer_size,
                        reject_remote_clients: *reject_remote_clients,
                    },
                };
                transport::bind_pipe(&options).await
            }
        }
    }
}

/// `:PORT` means every interface.
pub fn normalize_bind(bind: &str) -> String {
    if bind.starts_with(':') {
        format!("0.0.0.0{bind}")
    } else {
        bind.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_shorthand_defaults_to_all_interfaces() {
        assert_eq!(normalize_bind(":8080"), "0.0.0.0:8080");
        assert_eq!(normalize_bind("localhost:32234"), "localhost:32234");
    }

    #[test]
    fn parses_tcp_transport() {
        let config = ServeConfig::from_toml_str(
            r#"
            [transport]
            kind = "tcp"
            bind = "127.0.0.1:32234"
            plugin_name = "weave"
            daemon_root = "/etc/docker"
            "#,
        )
        .unwrap();
        match config.transport {
            TransportConfig::Tcp {
                bind, plugin_name, tls, ..
            } => {
                assert_eq!(bind, "127.0.0.1:32234");
                assert_eq!(plugin_name.as_deref(), Some("weave"));
                assert!(tls.is_none());
            }
            other => panic!("unexpected transport {other:?}"),
        }
    }

    #[test]
    fn parses_socket_transport_with_group() {
        let config = ServeConfig::from_toml_str(
            r#"
            [transport]
            kind = "socket"
            path = "/run/docker/plugins/weave.sock"
            group = 999
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.transport,
            TransportConfig::Socket { group: Some(999), .. }
        ));
    }

    #[test]
    fn empty_bind_is_rejected() {
        let err = ServeConfig::from_toml_str(
            r#"
            [transport]
            kind = "tcp"
            bind = ""
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("bind address"));
    }

    #[test]
    fn tls_paths_are_validated() {
        let err = ServeConfig::from_toml_str(
            r#"
            [transport]
            kind = "tcp"
            bind = ":8443"
            [transport.tls]
            cert = "cert.pem"
            key = ""
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("tls cert and key"));
    }

    #[tokio::test]
    async fn binds_from_config() {
        let root = tempfile::tempdir().unwrap();
        let config = ServeConfig {
            transport: TransportConfig::Tcp {
                bind: "127.0.0.1:0".into(),
                plugin_name: Some("cfg".into()),
                daemon_root: Some(root.path().to_path_buf()),
                tls: None,
            },
        };
        let binding = config.bind().await.unwrap();
        assert!(root.path().join("plugins/cfg.spec").exists());
        assert!(binding.local_addr().is_some());
    }
}
