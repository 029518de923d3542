use std::{path::Path, sync::Arc};

use anyhow::{anyhow, Context, Result};
use rustls::{
    server::AllowAnyAuthenticatedClient, Certificate, PrivateKey, RootCertStore, ServerConfig,
};
use serde::{Deserialize, Serialize};

/// PEM files making up a listener's TLS identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsFiles {
    pub cert: String,
    pub key: String,
    /// Clients must present a certificate signed by one of these CAs.
    #[serde(default)]
    pub client_ca: Option<String>,
}

impl TlsFiles {
    pub fn validate(&self) -> Result<()> {
        if self.cert.trim().is_empty() || self.key.trim().is_empty() {
            anyhow::bail!("tls cert and key paths must be provided");
        }
        if matches!(&self.client_ca, Some(ca) if ca.trim().is_empty()) {
            anyhow::bail!("tls client_ca path must not be empty when set");
        }
        Ok(())
    }

    pub fn server_config(&self) -> Result<Arc<ServerConfig>> {
        build_server_config(self).map(Arc::new)
    }
}

pub fn build_server_config(files: &TlsFiles) -> Result<ServerConfig> {
    let certs = load_certs(Path::new(&files.cert))?;
    let key = load_private_key(Path::new(&files.key))?;
    let builder = ServerConfig::builder().with_safe_defaults();
    let config = match &files.client_ca {
        Some(ca) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(Path::new(ca))? {
                roots
                    .add(&cert)
                    .with_context(|| format!("invalid client CA certificate in {ca}"))?;
            }
            builder.with_client_cert_verifier(AllowAnyAuthenticatedClient::new(roots).boxed())
        }
        None => builder.with_no_client_auth(),
    };
    config
        .with_single_cert(certs, key)
        .context("invalid certificate/key pair")
}

pub fn load_certs(path: &Path) -> Result<Vec<Certificate>> {
    let data = std::fs::read(path)
        .with_context(|| format!("failed to read cert {}", path.display()))?;
    let mut reader = std::io::Cursor::new(data);
    let raw =
        rustls_pemfile::certs(&mut reader).map_err(|_| anyhow!("invalid certificate data"))?;
    if raw.is_empty() {
        anyhow::bail!("no certificates found in {}", path.display());
    }
    Ok(raw.into_iter().map(Certificate).collect())
}

pub fn load_private_key(path: &Path) -> Result<PrivateKey> {
    let data = std::fs::read(path)
        .with_context(|| format!("failed to read key {}", path.display()))?;
    let mut reader = std::io::Cursor::new(data);
    while let Some(item) =
        rustls_pemfile::read_one(&mut reader).map_err(|_| anyhow!("invalid key format"))?
    {
        match item {
            rustls_pemfile::Item::PKCS8Key(key)
            | rustls_pemfile::Item::RSAKey(key)
            | rustls_pemfile::Item::ECKey(key) => return Ok(PrivateKey(key)),
            _ => continue,
        }
    }
    anyhow::bail!("no usable private keys found in {}", path.display())
}
