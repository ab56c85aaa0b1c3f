//! TCP and optional TLS transport for the bouncer connection.
//!
//! TLS is an inert toggle: the client protocol is identical either way, the
//! `tls` feature only adds a stream variant wrapped by `tokio-rustls`.

use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// Unified stream type that can be either plain TCP or TLS
pub enum IoStream {
    /// Plain TCP stream
    Plain(TcpStream),
    /// TLS client stream
    #[cfg(feature = "tls")]
    TlsClient(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for IoStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            IoStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            IoStream::TlsClient(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for IoStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        match self.get_mut() {
            IoStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            IoStream::TlsClient(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        match self.get_mut() {
            IoStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(feature = "tls")]
            IoStream::TlsClient(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        match self.get_mut() {
            IoStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            IoStream::TlsClient(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

impl IoStream {
    /// Get the peer address of the underlying stream
    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        match self {
            IoStream::Plain(stream) => stream.peer_addr(),
            #[cfg(feature = "tls")]
            IoStream::TlsClient(stream) => stream.get_ref().0.peer_addr(),
        }
    }
}

/// Connect to a TCP address
pub async fn connect_tcp(addr: SocketAddr) -> tokio::io::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

// TLS-specific functionality
#[cfg(feature = "tls")]
/// TLS wrapping for the bouncer connection
pub mod tls {
    use super::*;
    use anyhow::{Context as AnyhowContext, Result};
    use rustls::pki_types::{CertificateDer, ServerName};
    use rustls::{ClientConfig, RootCertStore};
    use std::sync::Arc;
    use tokio_rustls::TlsConnector;
    use tracing::{debug, info};

    /// TLS settings for the outbound connection
    #[derive(Clone)]
    pub struct TlsClientConfig {
        /// rustls client configuration
        pub client_config: ClientConfig,
        /// Name presented via SNI and checked against the certificate
        pub server_name: String,
    }

    /// Create a TLS client configuration trusting the given CA bundle
    pub fn make_client_config(ca_pem: &str) -> Result<ClientConfig> {
        info!("Creating TLS client configuration");

        // Install default crypto provider if not already set
        let _ = rustls::crypto::ring::default_provider().install_default();

        let mut roots = RootCertStore::empty();
        let ca_results: Result<Vec<_>, _> = rustls_pemfile::certs(&mut ca_pem.as_bytes()).collect();
        let ca_certs = ca_results.context("Failed to parse CA certificates")?;
        if ca_certs.is_empty() {
            anyhow::bail!("No CA certificates found");
        }

        for ca_cert in ca_certs {
            roots
                .add(CertificateDer::from(ca_cert))
                .context("Failed to add CA certificate to root store")?;
        }

        // The bouncer authenticates us through the login packet, not a client cert
        Ok(ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth())
    }

    /// Wrap an established TCP stream in TLS
    pub async fn connect_tls(tls: &TlsClientConfig, tcp_stream: TcpStream) -> Result<IoStream> {
        let sni = tls.server_name.as_str();
        let peer_addr = tcp_stream.peer_addr()?;
        debug!("Connecting via TLS to {} (SNI: {})", peer_addr, sni);

        let connector = TlsConnector::from(Arc::new(tls.client_config.clone()));
        let server_name = ServerName::try_from(sni.to_owned())
            .map_err(|_| anyhow::anyhow!("Invalid server name: {}", sni))?;

        let tls_stream = connector
            .connect(server_name, tcp_stream)
            .await
            .with_context(|| format!("TLS handshake failed with {} (SNI: {})", peer_addr, sni))?;

        debug!("TLS connection established with {}", peer_addr);
        Ok(IoStream::TlsClient(Box::new(tls_stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_connect() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let listener = TcpListener::bind(addr).await.unwrap();
        let bound_addr = listener.local_addr().unwrap();

        let stream = connect_tcp(bound_addr).await.unwrap();
        let io_stream = IoStream::Plain(stream);
        assert_eq!(io_stream.peer_addr().unwrap(), bound_addr);
    }

    #[cfg(feature = "tls")]
    #[test]
    fn test_client_config_requires_ca() {
        assert!(tls::make_client_config("").is_err());
    }
}
