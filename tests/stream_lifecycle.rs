//! Stream lifecycle tests against a scripted in-memory camera.
//!
//! These tests verify that:
//! 1. stop before start and double start are harmless no-ops
//! 2. a requested stop never reports an unexpected close
//! 3. a peer close reports exactly once and leaves the client idle
//! 4. connection failures surface from start_stream and capture_frame
//! 5. no frames are delivered after stop_stream returns
//! 6. a panicking frame callback is reported as a close and does not block a restart

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use bambu_camera::{
    CameraClient, CloseReason, Connector, Credentials, StreamEvent, JPEG_END, JPEG_START,
};

const WAIT: Duration = Duration::from_secs(5);

fn jpeg(payload: &[u8]) -> Vec<u8> {
    let mut out = JPEG_START.to_vec();
    out.extend_from_slice(payload);
    out.extend_from_slice(&JPEG_END);
    out
}

/// What the scripted camera does once its chunks run out.
#[derive(Clone)]
enum Tail {
    Close,
    Repeat { chunk: Vec<u8>, delay: Duration },
}

#[derive(Clone)]
struct ScriptedConnector {
    chunks: Vec<Vec<u8>>,
    tail: Tail,
    refuse: bool,
    connects: Arc<AtomicUsize>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl ScriptedConnector {
    fn new(chunks: Vec<Vec<u8>>, tail: Tail) -> Self {
        Self {
            chunks,
            tail,
            refuse: false,
            connects: Arc::new(AtomicUsize::new(0)),
            written: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn endless() -> Self {
        Self::new(
            vec![],
            Tail::Repeat {
                chunk: jpeg(b"live"),
                delay: Duration::from_millis(5),
            },
        )
    }

    fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::new(vec![], Tail::Close)
        }
    }
}

struct ScriptedStream {
    chunks: VecDeque<Vec<u8>>,
    tail: Tail,
    written: Arc<Mutex<Vec<u8>>>,
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let chunk = match self.chunks.pop_front() {
            Some(chunk) => chunk,
            None => match &self.tail {
                Tail::Close => return Ok(0),
                Tail::Repeat { chunk, delay } => {
                    std::thread::sleep(*delay);
                    chunk.clone()
                }
            },
        };
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Connector for ScriptedConnector {
    type Stream = ScriptedStream;

    fn connect(&self) -> Result<ScriptedStream> {
        if self.refuse {
            bail!("connection refused");
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedStream {
            chunks: self.chunks.clone().into(),
            tail: self.tail.clone(),
            written: self.written.clone(),
        })
    }

    fn peer(&self) -> String {
        "scripted:6000".to_string()
    }
}

fn client(connector: ScriptedConnector) -> CameraClient<ScriptedConnector> {
    CameraClient::with_connector(connector, &Credentials::new("12345678").unwrap())
}

/// Callbacks that count into shared counters and signal frames/closes.
struct Counters {
    frames: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    frame_rx: mpsc::Receiver<()>,
    close_rx: mpsc::Receiver<CloseReason>,
}

fn start_counting(client: &mut CameraClient<ScriptedConnector>) -> Result<Counters> {
    let frames = Arc::new(AtomicUsize::new(0));
    let closes = Arc::new(AtomicUsize::new(0));
    let (frame_tx, frame_rx) = mpsc::channel();
    let (close_tx, close_rx) = mpsc::channel();
    let frame_count = frames.clone();
    let close_count = closes.clone();
    client.start_stream(
        move |_frame| {
            frame_count.fetch_add(1, Ordering::SeqCst);
            let _ = frame_tx.send(());
        },
        move |reason| {
            close_count.fetch_add(1, Ordering::SeqCst);
            let _ = close_tx.send(reason);
        },
    )?;
    Ok(Counters {
        frames,
        closes,
        frame_rx,
        close_rx,
    })
}

#[test]
fn stop_before_start_is_a_noop() {
    let connector = ScriptedConnector::endless();
    let connects = connector.connects.clone();
    let mut client = client(connector);

    client.stop_stream().expect("stop on idle client");
    assert!(!client.is_streaming());
    assert_eq!(connects.load(Ordering::SeqCst), 0);
}

#[test]
fn second_start_does_not_open_another_session() {
    let connector = ScriptedConnector::endless();
    let connects = connector.connects.clone();
    let mut client = client(connector);

    let counters = start_counting(&mut client).expect("first start");
    start_counting(&mut client).expect("second start is a no-op");
    counters.frame_rx.recv_timeout(WAIT).expect("frame");

    assert!(client.is_streaming());
    assert_eq!(connects.load(Ordering::SeqCst), 1);

    client.stop_stream().expect("stop");
    assert_eq!(counters.closes.load(Ordering::SeqCst), 0);
}

#[test]
fn deliberate_stop_never_reports_close() {
    let mut client = client(ScriptedConnector::endless());
    let counters = start_counting(&mut client).expect("start");
    counters.frame_rx.recv_timeout(WAIT).expect("first frame");

    client.stop_stream().expect("stop");
    assert!(!client.is_streaming());
    assert_eq!(counters.closes.load(Ordering::SeqCst), 0);

    let delivered = counters.frames.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(counters.frames.load(Ordering::SeqCst), delivered);
    assert!(counters.close_rx.try_recv().is_err());
}

#[test]
fn peer_close_reports_once_and_leaves_client_idle() {
    let mut first = jpeg(b"a");
    first.extend_from_slice(&jpeg(b"b"));
    let connector = ScriptedConnector::new(vec![first, jpeg(b"c")], Tail::Close);
    let mut client = client(connector);

    let counters = start_counting(&mut client).expect("start");
    let reason = counters.close_rx.recv_timeout(WAIT).expect("close callback");
    assert_eq!(reason, CloseReason::PeerClosed);
    assert!(!client.is_streaming());

    client.stop_stream().expect("stop after close is a no-op");
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    assert_eq!(counters.frames.load(Ordering::SeqCst), 3);
}

#[test]
fn stream_can_restart_after_peer_close() {
    let connector = ScriptedConnector::new(vec![jpeg(b"a")], Tail::Close);
    let connects = connector.connects.clone();
    let mut client = client(connector);

    let first = start_counting(&mut client).expect("first start");
    first.close_rx.recv_timeout(WAIT).expect("first close");

    let second = start_counting(&mut client).expect("restart");
    second.close_rx.recv_timeout(WAIT).expect("second close");

    assert_eq!(connects.load(Ordering::SeqCst), 2);
    assert_eq!(first.closes.load(Ordering::SeqCst), 1);
    assert_eq!(second.frames.load(Ordering::SeqCst), 1);
}

#[test]
fn panicking_frame_callback_reports_close_and_allows_restart() {
    let connector = ScriptedConnector::new(vec![jpeg(b"a")], Tail::Close);
    let connects = connector.connects.clone();
    let mut client = client(connector);

    let closes = Arc::new(AtomicUsize::new(0));
    let (close_tx, close_rx) = mpsc::channel();
    let close_count = closes.clone();
    client
        .start_stream(
            |_frame| panic!("callback boom"),
            move |reason| {
                close_count.fetch_add(1, Ordering::SeqCst);
                let _ = close_tx.send(reason);
            },
        )
        .expect("start");

    let reason = close_rx.recv_timeout(WAIT).expect("close callback");
    assert_eq!(
        reason,
        CloseReason::CallbackPanicked("callback boom".to_string())
    );
    assert!(!client.is_streaming());

    let restarted = start_counting(&mut client).expect("restart after panic");
    restarted.close_rx.recv_timeout(WAIT).expect("second close");
    assert_eq!(restarted.frames.load(Ordering::SeqCst), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(connects.load(Ordering::SeqCst), 2);
}

#[test]
fn connect_failure_surfaces_from_start_stream() {
    let mut client = client(ScriptedConnector::refusing());

    let err = start_counting(&mut client).err().expect("start must fail");
    assert!(err.to_string().contains("connection refused"));
    assert!(!client.is_streaming());

    client.stop_stream().expect("client stays usable");
}

#[test]
fn capture_frame_sends_handshake_and_returns_first_frame() {
    let connector = ScriptedConnector::new(
        vec![b"garbage".to_vec(), jpeg(b"first"), jpeg(b"second")],
        Tail::Close,
    );
    let written = connector.written.clone();
    let client = client(connector);

    let frame = client.capture_frame().expect("capture").expect("frame");
    assert_eq!(frame.as_bytes(), jpeg(b"first").as_slice());

    let expected = Credentials::new("12345678").unwrap().handshake_packet();
    assert_eq!(written.lock().unwrap().as_slice(), expected.as_bytes());
}

#[test]
fn capture_frame_returns_none_when_camera_closes_early() {
    let mut partial = JPEG_START.to_vec();
    partial.extend_from_slice(b"never finished");
    let client = client(ScriptedConnector::new(vec![partial], Tail::Close));

    assert!(client.capture_frame().expect("capture").is_none());
}

#[test]
fn capture_frame_propagates_connect_failure() {
    let client = client(ScriptedConnector::refusing());
    assert!(client.capture_frame().is_err());
}

#[test]
fn event_channel_ends_with_closed() {
    let connector = ScriptedConnector::new(vec![jpeg(b"a"), jpeg(b"b")], Tail::Close);
    let mut client = client(connector);

    let events = client.start_stream_events().expect("start");
    let mut frames = 0;
    loop {
        match events.recv_timeout(WAIT).expect("event") {
            StreamEvent::Frame(frame) => {
                assert!(frame.as_bytes().starts_with(&JPEG_START));
                frames += 1;
            }
            StreamEvent::Closed(reason) => {
                assert_eq!(reason, CloseReason::PeerClosed);
                break;
            }
        }
    }
    assert_eq!(frames, 2);
}

#[test]
fn dropping_client_stops_stream() {
    let mut client = client(ScriptedConnector::endless());
    let counters = start_counting(&mut client).expect("start");
    counters.frame_rx.recv_timeout(WAIT).expect("frame");

    drop(client);

    let delivered = counters.frames.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(counters.frames.load(Ordering::SeqCst), delivered);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 0);
}
