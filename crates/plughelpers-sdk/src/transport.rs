//! Listener setup and the discovery artifacts the daemon reads to find a plugin.
//!
//! Every `bind_*` function returns a [`Binding`]. The binding owns the
//! discovery artifact it created and removes it when dropped, so a serving call
//! that returns, by error or shutdown, never leaves a stale entry behind.

use std::{
    fs,
    future::Future,
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use rustls::ServerConfig;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
};
use tokio_rustls::TlsAcceptor;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
#[cfg(unix)]
use tokio::net::UnixListener;
#[cfg(windows)]
use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};

/// Directory the daemon scans for plugin sockets.
pub const SOCKET_DIR: &str = "/run/docker/plugins";

#[cfg(unix)]
const SOCKET_MODE: u32 = 0o660;

/// Byte stream of an accepted connection, whatever the transport.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

pub type BoxedConnection = Box<dyn Connection>;

/// Data root of the local daemon; spec files live under its `plugins` directory.
pub fn default_daemon_root() -> PathBuf {
    #[cfg(windows)]
    {
        let program_data =
            std::env::var_os("ProgramData").unwrap_or_else(|| r"C:\ProgramData".into());
        PathBuf::from(program_data).join("docker")
    }
    #[cfg(not(windows))]
    {
        PathBuf::from("/etc/docker")
    }
}

/// Conventional socket location for `plugin_name`.
pub fn socket_path(plugin_name: &str) -> PathBuf {
    Path::new(SOCKET_DIR).join(format!("{plugin_name}.sock"))
}

/// Location of the spec file for `plugin_name` under `daemon_root`.
pub fn spec_path(daemon_root: &Path, plugin_name: &str) -> PathBuf {
    daemon_root.join("plugins").join(format!("{plugin_name}.spec"))
}

/// Spec file to write, if both a non-empty name and daemon root were given.
fn discovery_path(plugin_name: Option<&str>, daemon_root: Option<&Path>) -> Option<PathBuf> {
    match (plugin_name, daemon_root) {
        (Some(name), Some(root)) if !name.is_empty() && !root.as_os_str().is_empty() => {
            Some(spec_path(root, name))
        }
        _ => None,
    }
}

#[derive(Clone, Default)]
pub struct TcpOptions {
    pub addr: String,
    /// Spec files are only written when both the name and the daemon root are set.
    pub plugin_name: Option<String>,
    pub daemon_root: Option<PathBuf>,
    pub tls: Option<Arc<ServerConfig>>,
}

impl TcpOptions {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Self::default()
        }
    }

    pub fn with_discovery(
        mut self,
        plugin_name: impl Into<String>,
        daemon_root: impl Into<PathBuf>,
    ) -> Self {
        self.plugin_name = Some(plugin_name.into());
        self.daemon_root = Some(daemon_root.into());
        self
    }

    pub fn with_tls(mut self, config: Arc<ServerConfig>) -> Self {
        self.tls = Some(config);
        self
    }

    fn discovery(&self) -> Option<PathBuf> {
        discovery_path(self.plugin_name.as_deref(), self.daemon_root.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct SocketOptions {
    pub path: PathBuf,
    /// Group given ownership of the socket file.
    pub group: Option<u32>,
}

impl SocketOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            group: None,
        }
    }

    /// Socket at the conventional location for `plugin_name`.
    pub fn for_plugin(plugin_name: &str) -> Self {
        Self::new(socket_path(plugin_name))
    }

    pub fn with_group(mut self, gid: u32) -> Self {
        self.group = Some(gid);
        self
    }
}

/// Named pipe tuning applied to every pipe instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipeConfig {
    pub in_buffer_size: Option<u32>,
    pub out_buffer_size: Option<u32>,
    pub reject_remote_clients: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PipeOptions {
    /// Full pipe name, e.g. `\\.\pipe\my-plugin`.
    pub path: String,
    pub plugin_name: Option<String>,
    pub daemon_root: Option<PathBuf>,
    pub config: PipeConfig,
}

impl PipeOptions {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_discovery(
        mut self,
        plugin_name: impl Into<String>,
        daemon_root: impl Into<PathBuf>,
    ) -> Self {
        self.plugin_name = Some(plugin_name.into());
        self.daemon_root = Some(daemon_root.into());
        self
    }

    pub fn with_config(mut self, config: PipeConfig) -> Self {
        self.config = config;
        self
    }

    #[cfg_attr(not(windows), allow(dead_code))]
    fn discovery(&self) -> Option<PathBuf> {
        discovery_path(self.plugin_name.as_deref(), self.daemon_root.as_deref())
    }
}

/// Filesystem entry the daemon reads to locate the plugin, removed on drop.
#[derive(Debug)]
pub struct DiscoveryArtifact {
    path: PathBuf,
}

impl DiscoveryArtifact {
    fn write_spec(path: PathBuf, address: &str) -> Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create plugin spec dir {}", dir.display()))?;
        }
        fs::write(&path, address)
            .with_context(|| format!("failed to write plugin spec {}", path.display()))?;
        tracing::info!(path = %path.display(), address, "plugin spec written");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DiscoveryArtifact {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "discovery artifact removed"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(
                path = %self.path.display(),
                error = %err,
                "failed to remove discovery artifact"
            ),
        }
    }
}

pub enum PluginListener {
    Tcp {
        listener: TcpListener,
        tls: Option<TlsAcceptor>,
    },
    #[cfg(unix)]
    Unix(UnixListener),
    #[cfg(windows)]
    Pipe {
        name: String,
        config: PipeConfig,
        next: NamedPipeServer,
    },
}

/// Connection accepted by a [`PluginListener`]; TLS, if any, is not yet negotiated.
pub struct Accepted {
    pub stream: BoxedConnection,
    pub tls: Option<TlsAcceptor>,
    pub peer: String,
}

impl Accepted {
    /// Completes the TLS handshake when the listener requires one.
    pub async fn establish(self) -> Result<BoxedConnection> {
        match self.tls {
            Some(acceptor) => {
                let tls = acceptor
                    .accept(self.stream)
                    .await
                    .with_context(|| format!("TLS handshake with {} failed", self.peer))?;
                Ok(Box::new(tls))
            }
            None => Ok(self.stream),
        }
    }
}

/// Source of incoming connections for the serving loop.
pub trait Accept {
    fn accept(&mut self) -> impl Future<Output = io::Result<Accepted>> + Send;
}

impl Accept for PluginListener {
    async fn accept(&mut self) -> io::Result<Accepted> {
        match self {
            PluginListener::Tcp { listener, tls } => {
                let (stream, peer) = listener.accept().await?;
                Ok(Accepted {
                    stream: Box::new(stream),
                    tls: tls.clone(),
                    peer: peer.to_string(),
                })
            }
            #[cfg(unix)]
            PluginListener::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Accepted {
                    stream: Box::new(stream),
                    tls: None,
                    peer: "unix".to_owned(),
                })
            }
            #[cfg(windows)]
            PluginListener::Pipe { name, config, next } => {
                next.connect().await?;
                let fresh = pipe_options(config, false).create(name.as_str())?;
                let connected = std::mem::replace(next, fresh);
                Ok(Accepted {
                    stream: Box::new(connected),
                    tls: None,
                    peer: name.clone(),
                })
            }
        }
    }
}

impl PluginListener {
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            PluginListener::Tcp { listener, .. } => listener.local_addr().ok(),
            #[cfg(unix)]
            PluginListener::Unix(_) => None,
            #[cfg(windows)]
            PluginListener::Pipe { .. } => None,
        }
    }
}

/// A bound listener together with the discovery artifact it owns.
pub struct Binding {
    pub listener: PluginListener,
    pub artifact: Option<DiscoveryArtifact>,
    pub description: String,
}

impl Binding {
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn artifact_path(&self) -> Option<&Path> {
        self.artifact.as_ref().map(DiscoveryArtifact::path)
    }
}

pub async fn bind_tcp(options: &TcpOptions) -> Result<Binding> {
    let listener = TcpListener::bind(options.addr.as_str())
        .await
        .with_context(|| format!("failed to bind tcp listener on {}", options.addr))?;
    let addr = listener
        .local_addr()
        .context("failed to read bound tcp address")?;

    let artifact = match options.discovery() {
        Some(path) => Some(DiscoveryArtifact::write_spec(path, &format!("tcp://{addr}"))?),
        None => {
            tracing::debug!(%addr, "no plugin name or daemon root, skipping spec file");
            None
        }
    };

    Ok(Binding {
        listener: PluginListener::Tcp {
            listener,
            tls: options.tls.clone().map(TlsAcceptor::from),
        },
        artifact,
        description: format!("tcp://{addr}"),
    })
}

#[cfg(unix)]
pub async fn bind_socket(options: &SocketOptions) -> Result<Binding> {
    let path = options.path.as_path();
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create socket dir {}", dir.display()))?;
    }

    let listener = match UnixListener::bind(path) {
        Ok(listener) => listener,
        Err(err) if err.kind() == io::ErrorKind::AddrInUse && is_stale_socket(path) => {
            tracing::info!(path = %path.display(), "removing stale plugin socket");
            fs::remove_file(path)
                .with_context(|| format!("failed to remove stale socket {}", path.display()))?;
            UnixListener::bind(path)
                .with_context(|| format!("failed to bind unix socket {}", path.display()))?
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to bind unix socket {}", path.display()));
        }
    };
    // Owned from here on: any failure below removes the socket file.
    let artifact = DiscoveryArtifact {
        path: path.to_path_buf(),
    };

    if let Some(gid) = options.group {
        std::os::unix::fs::chown(path, None, Some(gid))
            .with_context(|| format!("failed to set group {gid} on {}", path.display()))?;
    }
    fs::set_permissions(path, fs::Permissions::from_mode(SOCKET_MODE))
        .with_context(|| format!("failed to set permissions on {}", path.display()))?;

    Ok(Binding {
        listener: PluginListener::Unix(listener),
        artifact: Some(artifact),
        description: format!("unix://{}", path.display()),
    })
}

#[cfg(not(unix))]
pub async fn bind_socket(options: &SocketOptions) -> Result<Binding> {
    anyhow::bail!(
        "unix sockets are not supported on this platform ({})",
        options.path.display()
    )
}

/// A socket file nobody accepts on is left over from a previous run.
#[cfg(unix)]
fn is_stale_socket(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;

    let is_socket = fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_socket())
        .unwrap_or(false);
    is_socket
        && matches!(
            std::os::unix::net::UnixStream::connect(path),
            Err(err) if err.kind() == io::ErrorKind::ConnectionRefused
        )
}

#[cfg(windows)]
fn pipe_options(config: &PipeConfig, first: bool) -> ServerOptions {
    let mut options = ServerOptions::new();
    options
        .first_pipe_instance(first)
        .reject_remote_clients(config.reject_remote_clients);
    if let Some(size) = config.in_buffer_size {
        options.in_buffer_size(size);
    }
    if let Some(size) = config.out_buffer_size {
        options.out_buffer_size(size);
    }
    options
}

#[cfg(windows)]
pub async fn bind_pipe(options: &PipeOptions) -> Result<Binding> {
    let first = pipe_options(&options.config, true)
        .create(options.path.as_str())
        .with_context(|| format!("failed to create named pipe {}", options.path))?;

    let address = format!("npipe://{}", options.path);
    let artifact = match options.discovery() {
        Some(path) => Some(DiscoveryArtifact::write_spec(path, &address)?),
        None => {
            tracing::debug!(%address, "no plugin name or daemon root, skipping spec file");
            None
        }
    };

    Ok(Binding {
        listener: PluginListener::Pipe {
            name: options.path.clone(),
            config: options.config,
            next: first,
        },
        artifact,
        description: address,
    })
}

#[cfg(not(windows))]
pub async fn bind_pipe(options: &PipeOptions) -> Result<Binding> {
    anyhow::bail!(
        "named pipes are only supported on Windows ({})",
        options.path
    )
}
