//! Camera authentication handshake.
//!
//! The camera socket expects a single 96-byte credential packet immediately
//! after the TLS handshake completes:
//!
//! ```text
//! offset  size  field
//! 0       4     0x40    (u32 LE)
//! 4       4     0x3000  (u32 LE)
//! 8       4     0       (u32 LE)
//! 12      4     0       (u32 LE)
//! 16      32    username, ASCII, zero padded
//! 48      32    access code, ASCII, zero padded
//! ```
//!
//! The device does not answer a malformed packet. It just never sends frames,
//! which looks exactly like a network stall.

use anyhow::{anyhow, Result};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Fixed username accepted by the camera service.
pub const CAMERA_USERNAME: &str = "bblp";

/// Total size of the credential packet.
pub const HANDSHAKE_PACKET_LEN: usize = 96;

/// Width of each zero-padded credential field.
pub const CREDENTIAL_FIELD_LEN: usize = 32;

const HEADER_WORDS: [u32; 4] = [0x40, 0x3000, 0, 0];
const HEADER_LEN: usize = 16;

/// Camera credentials. The access code is cleared from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    username: String,
    access_code: String,
}

impl Credentials {
    /// Build credentials for the fixed `bblp` user.
    pub fn new(access_code: &str) -> Result<Self> {
        Self::with_username(CAMERA_USERNAME, access_code)
    }

    pub(crate) fn with_username(username: &str, access_code: &str) -> Result<Self> {
        validate_field("username", username)?;
        validate_field("access code", access_code)?;
        Ok(Self {
            username: username.to_string(),
            access_code: access_code.to_string(),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Encode the credential packet for these credentials.
    pub fn handshake_packet(&self) -> HandshakePacket {
        HandshakePacket::build(self)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("access_code", &"<redacted>")
            .finish()
    }
}

fn validate_field(name: &str, value: &str) -> Result<()> {
    if !value.is_ascii() {
        return Err(anyhow!("{} must be ASCII", name));
    }
    if value.len() > CREDENTIAL_FIELD_LEN {
        return Err(anyhow!(
            "{} is {} bytes; at most {} bytes fit in the handshake packet",
            name,
            value.len(),
            CREDENTIAL_FIELD_LEN
        ));
    }
    Ok(())
}

/// The 96-byte credential packet sent once per connection.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct HandshakePacket {
    bytes: [u8; HANDSHAKE_PACKET_LEN],
}

impl HandshakePacket {
    fn build(credentials: &Credentials) -> Self {
        let mut bytes = [0u8; HANDSHAKE_PACKET_LEN];
        for (i, word) in HEADER_WORDS.iter().enumerate() {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        let user_start = HEADER_LEN;
        let code_start = HEADER_LEN + CREDENTIAL_FIELD_LEN;
        // Lengths were checked in Credentials::with_username.
        let username = credentials.username.as_bytes();
        let access_code = credentials.access_code.as_bytes();
        bytes[user_start..user_start + username.len()].copy_from_slice(username);
        bytes[code_start..code_start + access_code.len()].copy_from_slice(access_code);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for HandshakePacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakePacket")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}
