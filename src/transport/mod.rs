//! Transport layer for camera connections.
//!
//! `Connector` is the seam between sessions and the network: sessions only
//! need a blocking byte stream. `TlsConnector` is the production connector
//! (rustls over TCP); tests substitute in-memory streams.

mod tls;

use anyhow::Result;
use std::io::{Read, Write};

pub use tls::{parse_camera_endpoint, CameraEndpoint, TlsConnector, TlsSettings, VerifyMode};

/// Opens a fresh byte stream to the camera for each session.
pub trait Connector: Send + Sync + 'static {
    type Stream: Read + Write + Send + 'static;

    fn connect(&self) -> Result<Self::Stream>;

    /// Human readable peer description for logs.
    fn peer(&self) -> String;
}
