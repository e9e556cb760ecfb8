use anyhow::{anyhow, bail, Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use serde::Serialize;
use serde_json::Value;
use shield_core::forensic::{self, PixelBuffer, WatermarkPayload};
use shield_core::tiling::{self, MaskSurface, VisibleWatermark, MAX_MASK_SIDE};
use shield_core::{
    fingerprint, FileStore, ProcessHost, ProtectionConfig, ProtectionOrchestrator, SettingsBus,
    SystemClock, TokioScheduler, ViolationEvent,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const APP_QUALIFIER: &str = "net";
const APP_ORG: &str = "darklock";
const APP_NAME: &str = "DarklockShield";

#[derive(Parser, Debug)]
#[command(name = "shieldctl")]
#[command(author, version, about = "Darklock Shield content protection tools", long_about = None)]
struct Cli {
    /// Directory holding the shared protection config
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a session fingerprint for this machine
    Fingerprint,

    /// Write a forensic watermark overlay as raw RGBA
    Embed {
        #[arg(long)]
        payload: String,
        #[arg(long)]
        width: u32,
        #[arg(long)]
        height: u32,
        #[arg(long)]
        out: PathBuf,
    },

    /// Recover the payload from a raw RGBA overlay
    Decode {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        width: u32,
        #[arg(long)]
        height: u32,
    },

    /// Print the visible watermark layout for a surface
    Layout {
        #[arg(long)]
        width: f64,
        #[arg(long)]
        height: f64,
        #[arg(long, default_value = "PROTECTED")]
        text: String,
        #[arg(long, default_value_t = 0.15)]
        opacity: f64,
        #[arg(long, default_value_t = -30.0, allow_hyphen_values = true)]
        rotation: f64,
        /// One centered instance instead of a tiled grid
        #[arg(long)]
        single: bool,
        /// Also rasterize the layout as a raw RGBA alpha mask
        #[arg(long)]
        mask: Option<PathBuf>,
    },

    /// Inspect or change the shared protection config
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run a live protection session and stream violations as JSON lines
    Session {
        /// Stop after this many seconds; runs until interrupted when omitted
        #[arg(long)]
        seconds: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the current config
    Show,
    /// Set one or more camelCase keys, e.g. screenshotBlocking=false
    Set {
        #[arg(required = true)]
        assignments: Vec<String>,
    },
    /// Restore defaults
    Reset,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedReport<'a> {
    payload: &'a str,
    width: u32,
    height: u32,
    frame_bits: usize,
    capacity_bits: usize,
    fits: bool,
    out: &'a Path,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ViolationLine {
    #[serde(flatten)]
    event: ViolationEvent,
    severity: shield_core::Severity,
    at: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Fingerprint => {
            let fingerprint = fingerprint::generate(&ProcessHost, &SystemClock);
            println!("{fingerprint}");
        }
        Commands::Embed {
            payload,
            width,
            height,
            out,
        } => embed_command(&payload, width, height, &out)?,
        Commands::Decode {
            input,
            width,
            height,
        } => {
            let data = std::fs::read(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let buffer = PixelBuffer::from_rgba(width, height, data)?;
            println!("{}", forensic::decode(&buffer));
        }
        Commands::Layout {
            width,
            height,
            text,
            opacity,
            rotation,
            single,
            mask,
        } => {
            let watermark = VisibleWatermark {
                text,
                opacity,
                rotation_degrees: rotation,
                repeated: !single,
                ..VisibleWatermark::default()
            };
            let mask_size = match mask {
                Some(ref path) => Some((path, mask_dimensions(width, height)?)),
                None => None,
            };
            let layout = tiling::layout(width, height, &watermark);
            println!("{}", serde_json::to_string_pretty(&layout)?);
            if let Some((path, (mask_width, mask_height))) = mask_size {
                let mut surface = MaskSurface::new(mask_width, mask_height);
                tiling::render(&mut surface, &watermark);
                std::fs::write(path, surface.to_pixels().as_bytes())
                    .with_context(|| format!("writing {}", path.display()))?;
            }
        }
        Commands::Config { action } => {
            let bus = open_bus(cli.data_dir)?;
            match action {
                ConfigAction::Show => {}
                ConfigAction::Set { assignments } => {
                    let updated = apply_assignments(&bus.current(), &assignments)?;
                    bus.publish(updated)?;
                }
                ConfigAction::Reset => bus.publish(ProtectionConfig::default())?,
            }
            println!("{}", serde_json::to_string_pretty(&bus.current())?);
        }
        Commands::Session { seconds } => {
            let bus = open_bus(cli.data_dir)?;
            run_session(bus, seconds.map(Duration::from_secs)).await?;
        }
    }
    Ok(())
}

fn data_dir(override_dir: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = override_dir {
        return Ok(dir);
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

fn open_bus(override_dir: Option<PathBuf>) -> Result<SettingsBus> {
    let dir = data_dir(override_dir)?;
    let store = FileStore::new(&dir)
        .with_context(|| format!("opening config store at {}", dir.display()))?;
    let bus = SettingsBus::new(Arc::new(store));
    bus.bootstrap()?;
    Ok(bus)
}

/// Pixel size of the mask raster for a `width` x `height` layout.
fn mask_dimensions(width: f64, height: f64) -> Result<(u32, u32)> {
    let side = |value: f64, name: &str| -> Result<u32> {
        if !value.is_finite() || value < 0.0 || value > f64::from(MAX_MASK_SIDE) {
            bail!("mask {name} must be between 0 and {MAX_MASK_SIDE} pixels, got {value}");
        }
        Ok(value as u32)
    };
    Ok((side(width, "width")?, side(height, "height")?))
}

fn embed_command(payload: &str, width: u32, height: u32, out: &Path) -> Result<()> {
    let payload = WatermarkPayload::new(payload)?;
    let fits = forensic::fits(&payload, width, height);
    if !fits {
        warn!(width, height, "overlay too small to carry the whole payload");
    }
    let overlay = forensic::encode(&payload, width, height);
    std::fs::write(out, overlay.as_bytes())
        .with_context(|| format!("writing {}", out.display()))?;
    let report = EmbedReport {
        payload: payload.as_str(),
        width,
        height,
        frame_bits: payload.frame_bits(),
        capacity_bits: forensic::capacity_bits(width, height),
        fits,
        out,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Apply `key=value` pairs to `config`. Keys are the persisted camelCase
/// names; values must match the existing field's type.
fn apply_assignments(config: &ProtectionConfig, assignments: &[String]) -> Result<ProtectionConfig> {
    let mut value = serde_json::to_value(config)?;
    let fields = value
        .as_object_mut()
        .ok_or_else(|| anyhow!("protection config is not an object"))?;
    for assignment in assignments {
        let (key, raw) = assignment
            .split_once('=')
            .ok_or_else(|| anyhow!("expected key=value, got {assignment:?}"))?;
        let parsed = match fields.get(key) {
            Some(Value::Bool(_)) => Value::Bool(
                raw.parse()
                    .with_context(|| format!("{key} expects true or false"))?,
            ),
            Some(Value::Number(_)) => Value::from(
                raw.parse::<u64>()
                    .with_context(|| format!("{key} expects a number of milliseconds"))?,
            ),
            Some(_) => bail!("{key} cannot be set from the command line"),
            None => bail!("unknown setting {key:?}"),
        };
        fields.insert(key.to_string(), parsed);
    }
    Ok(serde_json::from_value(value)?)
}

async fn run_session(bus: SettingsBus, limit: Option<Duration>) -> Result<()> {
    let scheduler = TokioScheduler::current().ok_or_else(|| anyhow!("no async runtime"))?;
    let orchestrator = ProtectionOrchestrator::new(
        Arc::new(ProcessHost),
        Arc::new(scheduler),
        Arc::new(SystemClock),
    );
    orchestrator.init(bus.current())?;
    orchestrator.attach_settings_bus(&bus);
    let mut violations = orchestrator.subscribe_violations();
    if let Some(fingerprint) = orchestrator.fingerprint() {
        info!(%fingerprint, "session started");
    }

    let deadline = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            received = violations.recv() => match received {
                Ok(event) => println!("{}", serde_json::to_string(&violation_line(event))?),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "violation stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    orchestrator.teardown();
    info!(recorded = orchestrator.violations().len(), "session ended");
    Ok(())
}

fn violation_line(event: ViolationEvent) -> ViolationLine {
    let at = Utc
        .timestamp_millis_opt(event.timestamp as i64)
        .single()
        .map(|t| t.to_rfc3339());
    ViolationLine {
        event,
        severity: event.kind.severity(),
        at,
    }
}
