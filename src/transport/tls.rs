//! TLS connector for the camera socket.
//!
//! The printer presents a self-signed certificate whose subject is the
//! printer serial number, so the default policy is `VerifyMode::Disabled`:
//! the TLS channel is encrypted but the peer is not authenticated. Integrators
//! that have provisioned the device CA can select `VerifyMode::CustomCa`
//! (and usually a `server_name` override matching the serial).
//!
//! # Example
//!
//! ```ignore
//! let endpoint = parse_camera_endpoint("192.168.1.50", DEFAULT_PORT)?;
//! let connector = TlsConnector::new(endpoint, &TlsSettings::default())?;
//! let stream = connector.connect()?;
//! ```

use anyhow::{anyhow, Context, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{aws_lc_rs, verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme,
    StreamOwned,
};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::Connector;

/// Server certificate verification policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VerifyMode {
    /// Accept any server certificate. Handshake signatures are still checked,
    /// but the peer identity is not. Matches the device's self-signed cert.
    #[default]
    Disabled,

    /// Verify against the bundled webpki root store.
    WebPki,

    /// Verify against a caller-supplied PEM CA bundle.
    CustomCa,
}

impl FromStr for VerifyMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" | "disabled" | "insecure" | "off" => Ok(Self::Disabled),
            "webpki" | "system" | "roots" => Ok(Self::WebPki),
            "ca" | "custom_ca" | "customca" | "pinned" => Ok(Self::CustomCa),
            other => Err(anyhow!(
                "unknown TLS verify mode '{}': expected 'none', 'webpki' or 'ca'",
                other
            )),
        }
    }
}

impl std::fmt::Display for VerifyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "none"),
            Self::WebPki => write!(f, "webpki"),
            Self::CustomCa => write!(f, "ca"),
        }
    }
}

/// TLS settings for camera connections.
#[derive(Clone, Debug, Default)]
pub struct TlsSettings {
    pub verify: VerifyMode,

    /// PEM-encoded CA bundle. Required for `VerifyMode::CustomCa`.
    pub ca_pem: Option<Vec<u8>>,

    /// Name presented for SNI and checked against the certificate.
    /// Defaults to the endpoint host.
    pub server_name: Option<String>,
}

impl TlsSettings {
    /// Load settings, reading the CA bundle from disk when one is given.
    ///
    /// A CA path only makes sense with `VerifyMode::CustomCa`, and that mode
    /// requires one.
    pub fn load(
        verify: VerifyMode,
        ca_path: Option<&PathBuf>,
        server_name: Option<String>,
    ) -> Result<Self> {
        let ca_pem = match (verify, ca_path) {
            (VerifyMode::CustomCa, Some(path)) => Some(
                std::fs::read(path)
                    .with_context(|| format!("failed to read camera TLS CA '{}'", path.display()))?,
            ),
            (VerifyMode::CustomCa, None) => {
                return Err(anyhow!("TLS verify mode 'ca' requires a CA certificate path"))
            }
            (_, Some(path)) => {
                return Err(anyhow!(
                    "camera TLS CA '{}' given but verify mode is '{}'; use 'ca' to verify with it",
                    path.display(),
                    verify
                ))
            }
            (_, None) => None,
        };
        Ok(Self {
            verify,
            ca_pem,
            server_name,
        })
    }

    /// Build the rustls client configuration for this policy.
    pub fn client_config(&self) -> Result<Arc<ClientConfig>> {
        let provider = Arc::new(aws_lc_rs::default_provider());
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| anyhow!("failed to configure TLS versions: {}", e))?;

        let config = match self.verify {
            VerifyMode::Disabled => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
                .with_no_client_auth(),
            VerifyMode::WebPki => {
                let mut roots = RootCertStore::empty();
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                builder.with_root_certificates(roots).with_no_client_auth()
            }
            VerifyMode::CustomCa => {
                let pem = self
                    .ca_pem
                    .as_ref()
                    .ok_or_else(|| anyhow!("TLS verify mode 'ca' requires a CA certificate"))?;
                let certs = rustls_pemfile::certs(&mut pem.as_slice())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| anyhow!("failed to parse CA certificate from PEM: {}", e))?;
                if certs.is_empty() {
                    return Err(anyhow!("no certificates found in CA PEM"));
                }
                let mut roots = RootCertStore::empty();
                for cert in certs {
                    roots
                        .add(cert)
                        .map_err(|e| anyhow!("failed to add CA certificate: {}", e))?;
                }
                builder.with_root_certificates(roots).with_no_client_auth()
            }
        };
        Ok(Arc::new(config))
    }
}

/// Certificate verifier for `VerifyMode::Disabled`.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Camera host and port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraEndpoint {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for CameraEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parse a camera address.
///
/// Supports formats:
/// - `host` (uses `default_port`)
/// - `host:port`
/// - `[ipv6]` or `[ipv6]:port`
/// - bare `ipv6` (uses `default_port`)
pub fn parse_camera_endpoint(addr: &str, default_port: u16) -> Result<CameraEndpoint> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(anyhow!("camera host must not be empty"));
    }

    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid camera address: {}", addr))?;
        let port = match rest.strip_prefix(':') {
            Some(port) => parse_port(port, addr)?,
            None if rest.is_empty() => default_port,
            None => return Err(anyhow!("invalid camera address: {}", addr)),
        };
        return Ok(CameraEndpoint {
            host: host.to_string(),
            port,
        });
    }

    match addr.matches(':').count() {
        0 => Ok(CameraEndpoint {
            host: addr.to_string(),
            port: default_port,
        }),
        1 => {
            let (host, port) = addr
                .split_once(':')
                .ok_or_else(|| anyhow!("invalid camera address: {}", addr))?;
            if host.is_empty() {
                return Err(anyhow!("camera host must not be empty"));
            }
            Ok(CameraEndpoint {
                host: host.to_string(),
                port: parse_port(port, addr)?,
            })
        }
        _ => Ok(CameraEndpoint {
            host: addr.to_string(),
            port: default_port,
        }),
    }
}

fn parse_port(port: &str, addr: &str) -> Result<u16> {
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid camera port in {}", addr))?;
    if port == 0 {
        return Err(anyhow!("camera port must be non-zero in {}", addr));
    }
    Ok(port)
}

/// rustls-over-TCP connector.
#[derive(Clone, Debug)]
pub struct TlsConnector {
    endpoint: CameraEndpoint,
    config: Arc<ClientConfig>,
    server_name: ServerName<'static>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
}

impl TlsConnector {
    pub fn new(endpoint: CameraEndpoint, settings: &TlsSettings) -> Result<Self> {
        let name = settings
            .server_name
            .clone()
            .unwrap_or_else(|| endpoint.host.clone());
        let server_name = ServerName::try_from(name.clone())
            .map_err(|e| anyhow!("invalid TLS server name '{}': {}", name, e))?;
        Ok(Self {
            endpoint,
            config: settings.client_config()?,
            server_name,
            connect_timeout: None,
            read_timeout: None,
        })
    }

    /// Bound TCP connection establishment.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bound each socket read. A streaming session treats a timed-out read as
    /// a chance to re-check its stop flag.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &CameraEndpoint {
        &self.endpoint
    }

    fn connect_tcp(&self) -> Result<TcpStream> {
        let target = (self.endpoint.host.as_str(), self.endpoint.port);
        let Some(timeout) = self.connect_timeout else {
            return TcpStream::connect(target)
                .with_context(|| format!("connect to camera at {}", self.endpoint));
        };

        let addrs = target
            .to_socket_addrs()
            .with_context(|| format!("resolve camera host {}", self.endpoint.host))?;
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Ok(stream),
                Err(err) => last_err = Some(err),
            }
        }
        match last_err {
            Some(err) => {
                Err(err).with_context(|| format!("connect to camera at {}", self.endpoint))
            }
            None => Err(anyhow!("camera host {} resolved to no addresses", self.endpoint.host)),
        }
    }
}

impl Connector for TlsConnector {
    type Stream = StreamOwned<ClientConnection, TcpStream>;

    fn connect(&self) -> Result<Self::Stream> {
        let sock = self.connect_tcp()?;
        sock.set_nodelay(true).context("set TCP_NODELAY")?;
        sock.set_read_timeout(self.read_timeout)
            .context("set camera read timeout")?;

        let conn = ClientConnection::new(self.config.clone(), self.server_name.clone())
            .map_err(|e| anyhow!("failed to create TLS session: {}", e))?;
        let mut tls = StreamOwned::new(conn, sock);
        while tls.conn.is_handshaking() {
            tls.conn
                .complete_io(&mut tls.sock)
                .with_context(|| format!("TLS handshake with {}", self.endpoint))?;
        }
        Ok(tls)
    }

    fn peer(&self) -> String {
        self.endpoint.to_string()
    }
}
