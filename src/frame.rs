//! JPEG frame extraction from the camera byte stream.
//!
//! The camera sends back-to-back JPEG images with no framing beyond the JPEG
//! markers themselves:
//!
//! - start: SOI + APP0 (`FF D8 FF E0`)
//! - end: EOI (`FF D9`)
//!
//! `extract_frame` is the pure scanning step. `FrameBuffer` owns the bytes
//! received on one connection and applies `extract_frame` in place.
//!
//! Payload bytes are never decoded or validated here.

use sha2::{Digest, Sha256};

/// JPEG SOI followed by the APP0 marker.
pub const JPEG_START: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xE0];

/// JPEG EOI marker.
pub const JPEG_END: [u8; 2] = [0xFF, 0xD9];

/// One complete JPEG image, markers included.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
}

impl Frame {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Hex SHA-256 of the frame bytes, for logging without exposing content.
    pub fn sha256_hex(&self) -> String {
        hex::encode(Sha256::digest(&self.data))
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame").field("len", &self.data.len()).finish()
    }
}

/// Split the first complete frame out of `buf`.
///
/// The end marker is searched for only after the end of the start marker.
/// Returns `(None, buf)` unchanged when either marker is missing, so bytes in
/// front of an unmatched start marker stay put until more data arrives.
pub fn extract_frame<'a>(
    buf: &'a [u8],
    start_marker: &[u8],
    end_marker: &[u8],
) -> (Option<Frame>, &'a [u8]) {
    match find_frame_bounds(buf, start_marker, end_marker) {
        Some((start, end)) => (Some(Frame::new(buf[start..end].to_vec())), &buf[end..]),
        None => (None, buf),
    }
}

/// Byte range `[start, end)` of the first complete frame.
fn find_frame_bounds(
    buf: &[u8],
    start_marker: &[u8],
    end_marker: &[u8],
) -> Option<(usize, usize)> {
    let start = find_marker(buf, start_marker)?;
    let search_from = start + start_marker.len();
    let end_rel = find_marker(&buf[search_from..], end_marker)?;
    Some((start, search_from + end_rel + end_marker.len()))
}

fn find_marker(haystack: &[u8], marker: &[u8]) -> Option<usize> {
    if marker.is_empty() {
        return None;
    }
    haystack.windows(marker.len()).position(|w| w == marker)
}

/// Bytes received on one connection that have not yet formed a frame.
///
/// Scanning resumes where the previous call stopped, so a large frame that
/// arrives in many chunks is searched once rather than once per chunk.
/// Growth is unbounded: a peer that never sends an end marker grows the
/// buffer until the connection closes.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: Vec<u8>,
    /// Offset of the current frame's start marker, once found.
    frame_start: Option<usize>,
    /// Where the next marker search begins.
    scan_from: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(64 * 1024),
            frame_start: None,
            scan_from: 0,
        }
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Remove and return the first complete frame, if any.
    pub fn next_frame(&mut self) -> Option<Frame> {
        let start = match self.frame_start {
            Some(start) => start,
            None => match find_marker(&self.buffer[self.scan_from..], &JPEG_START) {
                Some(offset) => {
                    let start = self.scan_from + offset;
                    self.frame_start = Some(start);
                    self.scan_from = start + JPEG_START.len();
                    start
                }
                None => {
                    self.scan_from = self.resume_offset(JPEG_START.len());
                    return None;
                }
            },
        };

        let Some(offset) = find_marker(&self.buffer[self.scan_from..], &JPEG_END) else {
            self.scan_from = self.resume_offset(JPEG_END.len());
            return None;
        };
        let end = self.scan_from + offset + JPEG_END.len();
        let frame = Frame::new(self.buffer[start..end].to_vec());
        self.buffer.drain(..end);
        self.frame_start = None;
        self.scan_from = 0;
        Some(frame)
    }

    // A marker split across chunks may begin in the last `marker_len - 1`
    // bytes already scanned.
    fn resume_offset(&self, marker_len: usize) -> usize {
        self.buffer
            .len()
            .saturating_sub(marker_len - 1)
            .max(self.scan_from)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
}
