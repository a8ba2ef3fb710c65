//! Camera client: single-frame capture and a managed background stream.
//!
//! `CameraClient` owns at most one streaming thread. `start_stream` launches
//! it, `stop_stream` signals it and joins, so no callback runs after
//! `stop_stream` returns and two sessions never overlap on one client.

use anyhow::{anyhow, Context, Result};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::auth::{Credentials, HandshakePacket};
use crate::config::CameraConfig;
use crate::frame::Frame;
use crate::session::{CloseReason, Session, StreamState};
use crate::transport::{CameraEndpoint, Connector, TlsConnector, TlsSettings};

/// Event delivered by `CameraClient::start_stream_events`.
#[derive(Debug)]
pub enum StreamEvent {
    Frame(Frame),
    /// The stream ended without `stop_stream`. Always the last event.
    Closed(CloseReason),
}

pub struct CameraClient<C: Connector = TlsConnector> {
    connector: Arc<C>,
    packet: HandshakePacket,
    state: StreamState,
    stream_thread: Option<JoinHandle<()>>,
}

impl CameraClient<TlsConnector> {
    /// Client for `hostname:port` with certificate verification disabled.
    pub fn new(hostname: &str, access_code: &str, port: u16) -> Result<Self> {
        let credentials = Credentials::new(access_code)?;
        let endpoint = CameraEndpoint {
            host: hostname.to_string(),
            port,
        };
        let connector = TlsConnector::new(endpoint, &TlsSettings::default())?;
        Ok(Self::with_connector(connector, &credentials))
    }

    pub fn from_config(config: &CameraConfig) -> Result<Self> {
        let credentials = Credentials::new(&config.access_code)?;
        Ok(Self::with_connector(config.connector()?, &credentials))
    }
}

impl<C: Connector> CameraClient<C> {
    pub fn with_connector(connector: C, credentials: &Credentials) -> Self {
        Self {
            connector: Arc::new(connector),
            packet: credentials.handshake_packet(),
            state: StreamState::new(),
            stream_thread: None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.state.is_streaming()
    }

    pub fn peer(&self) -> String {
        self.connector.peer()
    }

    /// Fetch a single frame on the calling thread.
    ///
    /// Returns `Ok(None)` if the camera closes the connection before a
    /// complete frame arrives. Connection failures are returned, not retried.
    pub fn capture_frame(&self) -> Result<Option<Frame>> {
        Session::open(self.connector.as_ref(), &self.packet)?.capture_frame()
    }

    /// Start streaming on a background thread.
    ///
    /// `on_frame` runs for every frame; `on_unexpected_close` runs at most
    /// once, only when the stream ends without `stop_stream`. Both run on the
    /// stream thread. Does nothing (with a warning) if a stream is already
    /// running.
    ///
    /// The connection is made on the stream thread, but this call waits for
    /// the outcome: a connect or handshake failure is returned here, leaves
    /// the client idle, and does not invoke `on_unexpected_close`.
    pub fn start_stream<F, U>(&mut self, on_frame: F, on_unexpected_close: U) -> Result<()>
    where
        F: FnMut(Frame) + Send + 'static,
        U: FnOnce(CloseReason) + Send + 'static,
    {
        if self.state.is_streaming() {
            log::warn!("camera stream already running");
            return Ok(());
        }
        // A panic on the previous stream thread must not block a restart.
        if let Err(err) = self.reap_stream_thread() {
            log::warn!("previous camera stream: {:#}", err);
        }

        self.state.begin();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);
        let connector = self.connector.clone();
        let packet = self.packet.clone();
        let state = self.state.clone();

        let spawned = std::thread::Builder::new()
            .name("camera-stream".to_string())
            .spawn(move || {
                let session = match Session::open(connector.as_ref(), &packet) {
                    Ok(session) => session,
                    Err(err) => {
                        state.finish();
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                session.capture_stream(&state, on_frame, on_unexpected_close);
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                self.state.finish();
                return Err(err).context("spawn camera stream thread");
            }
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!("camera stream started from {}", self.connector.peer());
                self.stream_thread = Some(handle);
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(_) => {
                self.state.finish();
                let _ = handle.join();
                Err(anyhow!("camera stream thread exited before connecting"))
            }
        }
    }

    /// Start streaming and receive frames over a channel.
    ///
    /// If a stream is already running nothing is started and the returned
    /// receiver is immediately disconnected.
    pub fn start_stream_events(&mut self) -> Result<Receiver<StreamEvent>> {
        let (tx, rx) = mpsc::channel();
        let close_tx = tx.clone();
        self.start_stream(
            move |frame| {
                let _ = tx.send(StreamEvent::Frame(frame));
            },
            move |reason| {
                let _ = close_tx.send(StreamEvent::Closed(reason));
            },
        )?;
        Ok(rx)
    }

    /// Stop the stream and wait for its thread to exit.
    ///
    /// Does nothing (with a warning) if no stream is running. The wait lasts
    /// until the thread's pending read returns.
    pub fn stop_stream(&mut self) -> Result<()> {
        if !self.state.request_stop() {
            log::warn!("camera stream is not running");
            return self.reap_stream_thread();
        }
        self.reap_stream_thread()?;
        log::info!("camera stream stopped");
        Ok(())
    }

    fn reap_stream_thread(&mut self) -> Result<()> {
        if let Some(handle) = self.stream_thread.take() {
            handle
                .join()
                .map_err(|_| anyhow!("camera stream thread panicked"))?;
        }
        Ok(())
    }
}

impl<C: Connector> Drop for CameraClient<C> {
    fn drop(&mut self) {
        self.state.request_stop();
        if let Err(err) = self.reap_stream_thread() {
            log::error!("{}", err);
        }
    }
}

impl<C: Connector> std::fmt::Debug for CameraClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraClient")
            .field("peer", &self.connector.peer())
            .field("streaming", &self.state.is_streaming())
            .finish_non_exhaustive()
    }
}
