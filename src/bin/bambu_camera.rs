//! bambu-camera - Capture frames from a Bambu Lab printer camera.
//!
//! Subcommands:
//! 1. `snapshot`: fetch one frame and write it to a file
//! 2. `stream`: write frames to a directory until Ctrl-C, a frame limit, or
//!    the camera closes the connection
//!
//! Connection settings come from `BAMBU_CAMERA_CONFIG` / environment and can
//! be overridden by the flags below.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use bambu_camera::{CameraClient, CameraConfig, ConfigOverrides, StreamEvent, VerifyMode};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Capture JPEG frames from a Bambu Lab printer camera"
)]
struct Args {
    /// Printer address (`host` or `host:port`). Env: BAMBU_HOST.
    #[arg(long, global = true)]
    host: Option<String>,

    /// LAN access code shown on the printer. Env: BAMBU_ACCESS_CODE.
    #[arg(long, global = true)]
    access_code: Option<String>,

    /// Camera port. Env: BAMBU_CAMERA_PORT.
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Server certificate verification: none, webpki or ca.
    #[arg(long, global = true)]
    tls_verify: Option<VerifyMode>,

    /// PEM CA bundle for `--tls-verify ca`.
    #[arg(long, global = true)]
    tls_ca_path: Option<PathBuf>,

    /// TLS server name to verify (the printer serial for device certificates).
    #[arg(long, global = true)]
    tls_server_name: Option<String>,

    /// TCP connect timeout in seconds.
    #[arg(long, global = true)]
    connect_timeout_secs: Option<u64>,

    /// Socket read timeout in milliseconds.
    #[arg(long, global = true)]
    read_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture a single frame.
    Snapshot {
        /// Output JPEG path.
        #[arg(long, default_value = "snapshot.jpg")]
        out: PathBuf,
    },
    /// Stream frames into a directory.
    Stream {
        /// Directory for frame_NNNNNN.jpg files.
        #[arg(long)]
        out_dir: PathBuf,

        /// Stop after this many frames.
        #[arg(long)]
        max_frames: Option<u64>,
    },
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host.clone(),
            access_code: self.access_code.clone(),
            port: self.port,
            tls_verify: self.tls_verify,
            tls_ca_path: self.tls_ca_path.clone(),
            tls_server_name: self.tls_server_name.clone(),
            connect_timeout: self.connect_timeout_secs.map(Duration::from_secs),
            read_timeout: self.read_timeout_ms.map(Duration::from_millis),
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = CameraConfig::load_with(args.overrides())?;
    if config.tls.verify == VerifyMode::Disabled {
        log::info!(
            "camera TLS certificate verification disabled (device uses a self-signed certificate)"
        );
    }
    let mut client = CameraClient::from_config(&config)?;

    match args.command {
        Command::Snapshot { out } => snapshot(&client, &out),
        Command::Stream {
            out_dir,
            max_frames,
        } => stream(&mut client, &out_dir, max_frames),
    }
}

fn snapshot(client: &CameraClient, out: &Path) -> Result<()> {
    let frame = client
        .capture_frame()?
        .ok_or_else(|| anyhow!("camera closed the connection before a complete frame arrived"))?;
    std::fs::write(out, frame.as_bytes())
        .with_context(|| format!("failed to write {}", out.display()))?;
    log::info!(
        "wrote {} ({} bytes, sha256 {})",
        out.display(),
        frame.len(),
        frame.sha256_hex()
    );
    Ok(())
}

fn stream(client: &mut CameraClient, out_dir: &Path, max_frames: Option<u64>) -> Result<()> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_handler = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_handler.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let events = client.start_stream_events()?;
    log::info!("streaming from {} (Ctrl-C to stop)", client.peer());

    let mut written = 0u64;
    let outcome = loop {
        if interrupted.load(Ordering::SeqCst) {
            log::info!("shutdown signal received, stopping stream...");
            break Ok(());
        }
        if max_frames.is_some_and(|max| written >= max) {
            break Ok(());
        }
        match events.recv_timeout(POLL_INTERVAL) {
            Ok(StreamEvent::Frame(frame)) => {
                written += 1;
                let path = out_dir.join(format!("frame_{:06}.jpg", written));
                if let Err(err) = std::fs::write(&path, frame.as_bytes())
                    .with_context(|| format!("failed to write {}", path.display()))
                {
                    break Err(err);
                }
                log::debug!("wrote {} ({} bytes)", path.display(), frame.len());
            }
            Ok(StreamEvent::Closed(reason)) => {
                break Err(anyhow!("camera stream ended unexpectedly: {}", reason));
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break Ok(()),
        }
    };

    if client.is_streaming() {
        client.stop_stream()?;
    }
    log::info!("wrote {} frames to {}", written, out_dir.display());
    outcome
}
