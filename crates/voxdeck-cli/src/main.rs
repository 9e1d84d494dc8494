use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use voxdeck_core::UiStore;
use voxdeck_core::config::Config;
use voxdeck_media::capture::CaptureConfig;
use voxdeck_media::devices::list_input_devices;
use voxdeck_media::level::{DetectorConfig, VoiceLevelDetector};
use voxdeck_realtime::{ConnectOptions, RealtimeSession, SpeakerSink};

#[derive(Parser)]
#[command(
    name = "voxdeck",
    about = "Realtime voice assistant client — live voice session driving card widgets",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect a live voice session
    Connect {
        /// Voice selector passed to the credential endpoint
        #[arg(long)]
        voice: Option<String>,

        /// Override the credential endpoint URL
        #[arg(long)]
        session_url: Option<String>,

        /// Override the realtime model id
        #[arg(long)]
        model: Option<String>,
    },

    /// Run the microphone level meter
    Listen {
        /// Level threshold below which the meter reads zero
        #[arg(long)]
        sensitivity: Option<f32>,

        /// Smoothing factor across frames
        #[arg(long)]
        smoothing: Option<f32>,
    },

    /// List audio input devices
    Devices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    match cli.command {
        Commands::Connect {
            voice,
            session_url,
            model,
        } => cmd_connect(config, voice, session_url, model).await,
        Commands::Listen {
            sensitivity,
            smoothing,
        } => cmd_listen(config, sensitivity, smoothing).await,
        Commands::Devices => cmd_devices(),
    }
}

async fn cmd_connect(
    config: Config,
    voice: Option<String>,
    session_url: Option<String>,
    model: Option<String>,
) -> anyhow::Result<()> {
    let mut realtime = config.realtime();
    if session_url.is_some() {
        realtime.session_url = session_url;
    }
    if model.is_some() {
        realtime.model = model;
    }

    let capture = CaptureConfig {
        device: config.audio().input_device,
        ..CaptureConfig::default()
    };

    let store = UiStore::shared();
    let session = RealtimeSession::new(realtime, Arc::clone(&store), Arc::new(SpeakerSink::new()))
        .with_capture_config(capture);

    let mut status_rx = session.status();
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = *status_rx.borrow();
            println!("status: {status}");
        }
    });

    session.connect(ConnectOptions { voice }).await?;
    info!("Press Ctrl-C to disconnect");

    // Render newly created widgets until interrupted.
    let mut rendered = 0usize;
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let store = store.read().await;
                if store.len() > rendered {
                    for item in &store.items()[rendered..] {
                        let title = item
                            .props
                            .get("title")
                            .and_then(Value::as_str)
                            .unwrap_or("-");
                        println!("  + [{}] {}: {}", item.kind, item.id, title);
                    }
                    rendered = store.len();
                }
            }
        }
    }

    session.disconnect().await;
    Ok(())
}

async fn cmd_listen(
    config: Config,
    sensitivity: Option<f32>,
    smoothing: Option<f32>,
) -> anyhow::Result<()> {
    let mut detector_config = DetectorConfig::from_audio_config(&config.audio());
    if let Some(sensitivity) = sensitivity {
        detector_config.sensitivity = sensitivity;
    }
    if let Some(smoothing) = smoothing {
        detector_config.smoothing = smoothing;
    }

    let detector = VoiceLevelDetector::new(detector_config);
    detector.start_listening().await?;
    info!("Listening, press Ctrl-C to stop");

    let mut level_rx = detector.audio_level();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = level_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let level = *level_rx.borrow();
                let filled = (level * 40.0).round() as usize;
                print!("\r[{}{}] {level:.2}", "#".repeat(filled), " ".repeat(40 - filled));
                std::io::stdout().flush()?;
            }
        }
    }

    detector.stop_listening().await;
    println!();
    Ok(())
}

fn cmd_devices() -> anyhow::Result<()> {
    let devices = list_input_devices()?;
    if devices.is_empty() {
        println!("No input devices found");
        return Ok(());
    }
    for name in devices {
        println!("{name}");
    }
    Ok(())
}
