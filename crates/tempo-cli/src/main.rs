//! # Tempo
//!
//! Plays one source through a `ManagedPlayer` backed by the native engine,
//! then exits.

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::{unbounded, RecvTimeoutError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tempo_audio::{EngineConfig, ManagedPlayer, NativeBackend};
use tempo_core::DataSource;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Interval between progress lines while playing.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "tempo", version, about = "Play a local file or URL")]
struct Args {
    /// File path, or a file://, http:// or https:// URI.
    #[arg(required_unless_present = "list_devices")]
    source: Option<String>,

    /// Start playback at this offset, in seconds.
    #[arg(long, value_name = "SECS")]
    seek: Option<f64>,

    /// Output volume between 0.0 and 1.0.
    #[arg(long)]
    volume: Option<f32>,

    /// Extra HTTP request header, repeatable.
    #[arg(long = "header", value_name = "KEY:VALUE", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Output device name.
    #[arg(long)]
    device: Option<String>,

    /// JSON file with engine settings.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print output device names and exit.
    #[arg(long)]
    list_devices: bool,
}

enum Outcome {
    Completed,
    Failed(String),
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected KEY:VALUE, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty header name in `{raw}`"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

fn data_source(raw: &str, headers: Vec<(String, String)>) -> Result<DataSource> {
    if raw.contains("://") {
        let headers: HashMap<_, _> = headers.into_iter().collect();
        return Ok(DataSource::uri_with_headers(raw, headers)?);
    }
    if !headers.is_empty() {
        warn!("Ignoring --header for a local file");
    }
    Ok(DataSource::Path(PathBuf::from(raw)))
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    if let Some(device) = &args.device {
        config.device = Some(device.clone());
    }
    if let Some(volume) = args.volume {
        config.volume = volume;
    }
    Ok(config)
}

fn seek_offset(seek: Option<f64>) -> Result<Option<Duration>> {
    match seek {
        None => Ok(None),
        Some(secs) if secs.is_finite() && secs >= 0.0 => Ok(Some(Duration::from_secs_f64(secs))),
        Some(secs) => bail!("--seek must be a non-negative number of seconds, got {secs}"),
    }
}

fn failure_kind(error: &tempo_core::Error) -> &'static str {
    if error.is_source_error() {
        "source"
    } else if error.is_engine_error() {
        "audio engine"
    } else {
        "player"
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tempo=info,tempo_audio=info".into()),
        )
        .init();

    let args = Args::parse();

    if args.list_devices {
        for name in tempo_audio::output::list_output_devices()? {
            println!("{name}");
        }
        return Ok(());
    }

    let Some(raw_source) = args.source.clone() else {
        bail!("no source given");
    };
    let seek = seek_offset(args.seek)?;
    let config = load_config(&args)?;
    let source = data_source(&raw_source, args.headers)?;

    info!("Starting Tempo v{}", env!("CARGO_PKG_VERSION"));

    let backend = NativeBackend::with_config(config).context("opening audio output")?;
    let player = ManagedPlayer::new(backend);

    let (done_tx, done_rx) = unbounded();

    player.set_on_prepared(move |p| {
        info!("Prepared, duration {:.1}s", p.duration().as_secs_f64());
        p.start();
        if let Some(offset) = seek {
            p.seek_to(offset);
        }
    });

    let completed_tx = done_tx.clone();
    player.set_on_completion(move |_| {
        let _ = completed_tx.send(Outcome::Completed);
    });

    player.set_on_error(move |_, e| {
        error!("Playback failed ({}): {e}", failure_kind(e));
        let _ = done_tx.send(Outcome::Failed(e.to_string()));
        false
    });

    player
        .set_data_source(source)
        .with_context(|| format!("opening {raw_source}"))?;
    player.prepare_async();

    let outcome = loop {
        match done_rx.recv_timeout(PROGRESS_INTERVAL) {
            Ok(outcome) => break outcome,
            Err(RecvTimeoutError::Timeout) => {
                if player.is_playing() {
                    info!(
                        "{:.1}s / {:.1}s",
                        player.current_position().as_secs_f64(),
                        player.duration().as_secs_f64()
                    );
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                break Outcome::Failed("player callbacks dropped".into())
            }
        }
    };

    player.reset();

    match outcome {
        Outcome::Completed => {
            info!("Finished {raw_source}");
            Ok(())
        }
        Outcome::Failed(reason) => bail!("playback of {raw_source} failed: {reason}"),
    }
}
