//! Bambu Lab camera client.
//!
//! The printer camera is served as a motion-JPEG byte stream on a TLS socket
//! (port 6000). A client connects, sends a fixed 96-byte credential packet,
//! and then reads back-to-back JPEG images delimited by their markers.
//!
//! # Module Structure
//!
//! - `auth`: credentials and the handshake packet
//! - `frame`: JPEG frame extraction from the byte stream
//! - `transport`: `Connector` seam, rustls connector, endpoint parsing
//! - `session`: one authenticated connection (single frame or stream)
//! - `client`: `CameraClient`, which owns the background stream thread
//! - `config`: file + environment configuration for the CLI
//!
//! # Example
//!
//! ```ignore
//! let mut client = CameraClient::new("192.168.1.50", "12345678", DEFAULT_PORT)?;
//! if let Some(frame) = client.capture_frame()? {
//!     std::fs::write("snapshot.jpg", frame.as_bytes())?;
//! }
//!
//! client.start_stream(
//!     |frame| log::info!("frame: {} bytes", frame.len()),
//!     |reason| log::warn!("camera went away: {}", reason),
//! )?;
//! // ...
//! client.stop_stream()?;
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod frame;
pub mod session;
pub mod transport;

/// Default camera port on the printer.
pub const DEFAULT_PORT: u16 = 6000;

pub use auth::{Credentials, HandshakePacket, CAMERA_USERNAME, HANDSHAKE_PACKET_LEN};
pub use client::{CameraClient, StreamEvent};
pub use config::{CameraConfig, ConfigOverrides};
pub use frame::{extract_frame, Frame, FrameBuffer, JPEG_END, JPEG_START};
pub use session::{CloseReason, Session, StreamState, READ_CHUNK_SIZE};
pub use transport::{
    parse_camera_endpoint, CameraEndpoint, Connector, TlsConnector, TlsSettings, VerifyMode,
};
