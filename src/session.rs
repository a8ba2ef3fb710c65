//! Camera sessions: one connection, one handshake, one frame buffer.
//!
//! A `Session` is opened through a `Connector`, sends the credential packet
//! once, and then reads the stream in `READ_CHUNK_SIZE` chunks. It is consumed
//! either by `capture_frame` (first frame, then the connection drops) or by
//! `capture_stream` (every frame until stopped or the peer goes away).
//!
//! Cancellation is cooperative. `capture_stream` checks the `StreamState`
//! flags between reads, so a stop request takes effect once the pending read
//! returns (or times out, when the connector sets a read timeout).

use anyhow::{anyhow, Context, Result};
use std::any::Any;
use std::io::{ErrorKind, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::auth::HandshakePacket;
use crate::frame::{Frame, FrameBuffer};
use crate::transport::Connector;

/// Maximum bytes requested per socket read.
pub const READ_CHUNK_SIZE: usize = 4096;

const IDLE: u8 = 0;
const STREAMING: u8 = 1;
const STOPPING: u8 = 2;

/// Run state shared between a stream's owner and its background session.
///
/// One atomic word holds the whole state: `IDLE`, `STREAMING`, or `STOPPING`
/// (the owner asked for the stop). Transitions use compare-and-swap, so a
/// stop request either lands on a running session or is reported as too late.
#[derive(Clone, Debug, Default)]
pub struct StreamState {
    state: Arc<AtomicU8>,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_streaming(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STREAMING
    }

    pub fn is_stopping(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STOPPING
    }

    /// Mark a session as starting.
    pub fn begin(&self) {
        self.state.store(STREAMING, Ordering::SeqCst);
    }

    /// Ask the running session to exit after its current read.
    ///
    /// Returns false if no session was streaming, including one that exited
    /// on its own just before the request.
    pub fn request_stop(&self) -> bool {
        self.state
            .compare_exchange(STREAMING, STOPPING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Return to idle. Returns whether the stop was requested by the owner.
    pub fn finish(&self) -> bool {
        self.state.swap(IDLE, Ordering::SeqCst) == STOPPING
    }
}

/// Why a stream ended without a stop request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the connection.
    PeerClosed,
    /// A read failed; the message is the rendered error chain.
    ReadError(String),
    /// The frame callback panicked; the message is the panic payload.
    CallbackPanicked(String),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "connection closed by camera"),
            Self::ReadError(err) => write!(f, "camera read failed: {}", err),
            Self::CallbackPanicked(msg) => write!(f, "frame callback panicked: {}", msg),
        }
    }
}

enum ReadOutcome {
    Data,
    Closed,
    TimedOut,
}

enum StreamEnd {
    Stopped,
    PeerClosed,
}

/// An authenticated connection to the camera.
pub struct Session<S> {
    stream: S,
    buffer: FrameBuffer,
    chunk: Vec<u8>,
    peer: String,
    frames_delivered: u64,
}

impl<S: Read + Write> Session<S> {
    /// Connect and authenticate.
    pub fn open<C>(connector: &C, packet: &HandshakePacket) -> Result<Self>
    where
        C: Connector<Stream = S>,
    {
        let stream = connector.connect()?;
        Self::handshake(stream, packet, connector.peer())
    }

    /// Authenticate an already connected stream.
    pub fn handshake(mut stream: S, packet: &HandshakePacket, peer: String) -> Result<Self> {
        stream
            .write_all(packet.as_bytes())
            .with_context(|| format!("send camera handshake to {}", peer))?;
        stream
            .flush()
            .with_context(|| format!("flush camera handshake to {}", peer))?;
        log::info!("camera session: connected to {}", peer);
        Ok(Self {
            stream,
            buffer: FrameBuffer::new(),
            chunk: vec![0u8; READ_CHUNK_SIZE],
            peer,
            frames_delivered: 0,
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Read until one frame is complete.
    ///
    /// Returns `Ok(None)` if the camera closes the connection first. The
    /// connection is dropped on return.
    pub fn capture_frame(mut self) -> Result<Option<Frame>> {
        loop {
            match self.read_chunk()? {
                ReadOutcome::Closed => {
                    log::warn!(
                        "camera session: {} closed before a complete frame ({} bytes buffered)",
                        self.peer,
                        self.buffer.len()
                    );
                    return Ok(None);
                }
                ReadOutcome::TimedOut => {
                    return Err(anyhow!("timed out waiting for camera frame from {}", self.peer))
                }
                ReadOutcome::Data => {
                    if let Some(frame) = self.buffer.next_frame() {
                        log::debug!("camera session: captured frame of {} bytes", frame.len());
                        return Ok(Some(frame));
                    }
                }
            }
        }
    }

    /// Deliver frames to `on_frame` while `state` says streaming.
    ///
    /// All complete frames in the buffer are delivered after each read. On
    /// exit the connection is dropped, `state` is reset, and
    /// `on_unexpected_close` runs only if the owner did not request the stop.
    pub fn capture_stream<F, U>(
        mut self,
        state: &StreamState,
        mut on_frame: F,
        on_unexpected_close: U,
    ) where
        F: FnMut(Frame),
        U: FnOnce(CloseReason),
    {
        let pumped = panic::catch_unwind(AssertUnwindSafe(|| {
            self.pump_frames(state, &mut on_frame)
        }));
        let reason = match pumped {
            Ok(Ok(StreamEnd::Stopped)) => None,
            Ok(Ok(StreamEnd::PeerClosed)) => Some(CloseReason::PeerClosed),
            Ok(Err(err)) => {
                log::warn!("camera session: stream from {} failed: {:#}", self.peer, err);
                Some(CloseReason::ReadError(format!("{:#}", err)))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::error!("camera session: frame callback panicked: {}", message);
                Some(CloseReason::CallbackPanicked(message))
            }
        };
        log::info!(
            "camera session: stream from {} ended after {} frames",
            self.peer,
            self.frames_delivered
        );
        drop(self);

        let deliberate = state.finish();
        if deliberate {
            return;
        }
        let reason = reason.unwrap_or(CloseReason::PeerClosed);
        log::warn!("camera stream closed unexpectedly: {}", reason);
        on_unexpected_close(reason);
    }

    fn pump_frames<F: FnMut(Frame)>(
        &mut self,
        state: &StreamState,
        on_frame: &mut F,
    ) -> Result<StreamEnd> {
        while state.is_streaming() {
            match self.read_chunk()? {
                ReadOutcome::Closed => return Ok(StreamEnd::PeerClosed),
                ReadOutcome::TimedOut => continue,
                ReadOutcome::Data => {
                    while let Some(frame) = self.buffer.next_frame() {
                        if !state.is_streaming() {
                            break;
                        }
                        log::debug!("camera session: frame of {} bytes", frame.len());
                        self.frames_delivered += 1;
                        on_frame(frame);
                    }
                }
            }
        }
        Ok(StreamEnd::Stopped)
    }

    fn read_chunk(&mut self) -> Result<ReadOutcome> {
        loop {
            match self.stream.read(&mut self.chunk) {
                Ok(0) => return Ok(ReadOutcome::Closed),
                Ok(n) => {
                    self.buffer.extend(&self.chunk[..n]);
                    return Ok(ReadOutcome::Data);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(ReadOutcome::TimedOut)
                }
                // TLS peers that drop the socket without close_notify.
                Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                    log::debug!("camera session: {} closed without TLS close_notify", self.peer);
                    return Ok(ReadOutcome::Closed);
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("read camera stream from {}", self.peer))
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
