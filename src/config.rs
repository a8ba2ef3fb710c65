use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::Credentials;
use crate::transport::{
    parse_camera_endpoint, CameraEndpoint, TlsConnector, TlsSettings, VerifyMode,
};
use crate::DEFAULT_PORT;

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    host: Option<String>,
    access_code: Option<String>,
    port: Option<u16>,
    tls: Option<TlsConfigFile>,
    timeouts: Option<TimeoutConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct TlsConfigFile {
    verify: Option<String>,
    ca_path: Option<PathBuf>,
    server_name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TimeoutConfigFile {
    connect_secs: Option<u64>,
    read_ms: Option<u64>,
}

#[derive(Clone)]
pub struct CameraConfig {
    pub host: String,
    pub access_code: String,
    pub port: u16,
    pub tls: TlsOptions,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    pub verify: VerifyMode,
    pub ca_path: Option<PathBuf>,
    pub server_name: Option<String>,
}

/// Values that take precedence over both the config file and environment,
/// typically command-line flags.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub access_code: Option<String>,
    pub port: Option<u16>,
    pub tls_verify: Option<VerifyMode>,
    pub tls_ca_path: Option<PathBuf>,
    pub tls_server_name: Option<String>,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
}

impl CameraConfig {
    pub fn new(host: &str, access_code: &str) -> Self {
        Self {
            host: host.to_string(),
            access_code: access_code.to_string(),
            port: DEFAULT_PORT,
            tls: TlsOptions::default(),
            connect_timeout: None,
            read_timeout: None,
        }
    }

    /// Load from `BAMBU_CAMERA_CONFIG` (JSON, optional) and the environment.
    pub fn load() -> Result<Self> {
        Self::load_with(ConfigOverrides::default())
    }

    pub fn load_with(overrides: ConfigOverrides) -> Result<Self> {
        let config_path = std::env::var("BAMBU_CAMERA_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.apply_overrides(overrides);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CameraConfigFile) -> Result<Self> {
        let tls = match file.tls {
            Some(tls) => TlsOptions {
                verify: match tls.verify.as_deref() {
                    Some(mode) => mode.parse()?,
                    None => VerifyMode::default(),
                },
                ca_path: tls.ca_path,
                server_name: tls.server_name,
            },
            None => TlsOptions::default(),
        };
        let connect_timeout = file
            .timeouts
            .as_ref()
            .and_then(|timeouts| timeouts.connect_secs)
            .map(Duration::from_secs);
        let read_timeout = file
            .timeouts
            .and_then(|timeouts| timeouts.read_ms)
            .map(Duration::from_millis);
        Ok(Self {
            host: file.host.unwrap_or_default(),
            access_code: file.access_code.unwrap_or_default(),
            port: file.port.unwrap_or(DEFAULT_PORT),
            tls,
            connect_timeout,
            read_timeout,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("BAMBU_HOST") {
            if !host.trim().is_empty() {
                self.host = host;
            }
        }
        if let Ok(code) = std::env::var("BAMBU_ACCESS_CODE") {
            if !code.trim().is_empty() {
                self.access_code = code;
            }
        }
        if let Ok(port) = std::env::var("BAMBU_CAMERA_PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| anyhow!("BAMBU_CAMERA_PORT must be a port number"))?;
        }
        if let Ok(mode) = std::env::var("BAMBU_CAMERA_TLS_VERIFY") {
            if !mode.trim().is_empty() {
                self.tls.verify = mode.trim().parse()?;
            }
        }
        if let Ok(path) = std::env::var("BAMBU_CAMERA_TLS_CA_PATH") {
            if !path.trim().is_empty() {
                self.tls.ca_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(name) = std::env::var("BAMBU_CAMERA_TLS_SERVER_NAME") {
            if !name.trim().is_empty() {
                self.tls.server_name = Some(name);
            }
        }
        if let Ok(secs) = std::env::var("BAMBU_CAMERA_CONNECT_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                anyhow!("BAMBU_CAMERA_CONNECT_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.connect_timeout = Some(Duration::from_secs(secs));
        }
        if let Ok(ms) = std::env::var("BAMBU_CAMERA_READ_TIMEOUT_MS") {
            let ms: u64 = ms.trim().parse().map_err(|_| {
                anyhow!("BAMBU_CAMERA_READ_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.read_timeout = Some(Duration::from_millis(ms));
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(host) = overrides.host {
            self.host = host;
        }
        if let Some(code) = overrides.access_code {
            self.access_code = code;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(verify) = overrides.tls_verify {
            self.tls.verify = verify;
        }
        if let Some(path) = overrides.tls_ca_path {
            self.tls.ca_path = Some(path);
        }
        if let Some(name) = overrides.tls_server_name {
            self.tls.server_name = Some(name);
        }
        if let Some(timeout) = overrides.connect_timeout {
            self.connect_timeout = Some(timeout);
        }
        if let Some(timeout) = overrides.read_timeout {
            self.read_timeout = Some(timeout);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!(
                "camera host is required (set BAMBU_HOST or \"host\" in the config file)"
            ));
        }
        if self.access_code.is_empty() {
            return Err(anyhow!(
                "camera access code is required (set BAMBU_ACCESS_CODE or \"access_code\")"
            ));
        }
        Credentials::new(&self.access_code)?;
        if self.port == 0 {
            return Err(anyhow!("camera port must be non-zero"));
        }
        self.endpoint()?;
        if self.tls.verify == VerifyMode::CustomCa && self.tls.ca_path.is_none() {
            return Err(anyhow!("TLS verify mode 'ca' requires a CA certificate path"));
        }
        if self.connect_timeout.is_some_and(|t| t.is_zero()) {
            return Err(anyhow!("connect timeout must be greater than zero"));
        }
        if self.read_timeout.is_some_and(|t| t.is_zero()) {
            return Err(anyhow!("read timeout must be greater than zero"));
        }
        Ok(())
    }

    /// Endpoint from `host`, which may carry its own port.
    pub fn endpoint(&self) -> Result<CameraEndpoint> {
        parse_camera_endpoint(&self.host, self.port)
    }

    pub fn tls_settings(&self) -> Result<TlsSettings> {
        TlsSettings::load(
            self.tls.verify,
            self.tls.ca_path.as_ref(),
            self.tls.server_name.clone(),
        )
    }

    pub fn connector(&self) -> Result<TlsConnector> {
        Ok(TlsConnector::new(self.endpoint()?, &self.tls_settings()?)?
            .with_connect_timeout(self.connect_timeout)
            .with_read_timeout(self.read_timeout))
    }
}

impl std::fmt::Debug for CameraConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraConfig")
            .field("host", &self.host)
            .field("access_code", &"<redacted>")
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

fn read_config_file(path: &Path) -> Result<CameraConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
