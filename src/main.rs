//! lapse: interval screen capture rendered into a timelapse.
//!
//! Usage:
//!   lapse sources [--json]     List capturable screens and windows
//!   lapse config               Show the settings file and its contents
//!   lapse record [OPTIONS]     Record, controlled by commands on stdin

use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use lapse::capture::{DesktopSources, SourceSelector};
use lapse::config::{Settings, SettingsPatch, SettingsService, SettingsStore};
use lapse::encoder::FfmpegEncoder;
use lapse::frames::FrameStore;
use lapse::logging;
use lapse::notify::DesktopNotifier;
use lapse::recording::{AppContext, PowerEvent, SessionController, StopOutcome};
use lapse::surface::{ConsoleTray, DialogSavePrompt, TimerCountdown, TraySurface};

const COMMANDS_HELP: &str = "Commands: pause, resume, stop, cancel, retake, status, \
sleep, wake, lock, unlock, help";

#[derive(Parser)]
#[command(name = "lapse", about = "Interval screen capture rendered into timelapse videos", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List capturable screens and windows
    Sources {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the settings file location and current settings
    Config,

    /// Start a recording session
    Record {
        /// Source id from `lapse sources` (defaults to the primary screen)
        #[arg(short, long)]
        source: Option<String>,

        /// Seconds between frames; saved as the new default
        #[arg(short, long)]
        interval: Option<u64>,

        /// Skip the countdown before the first frame; saved as the new default
        #[arg(long)]
        no_countdown: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _logging = logging::init_logging(Settings::log_dir().as_deref())?;

    match cli.command {
        Commands::Sources { json } => list_sources(json),
        Commands::Config => show_config(),
        Commands::Record {
            source,
            interval,
            no_countdown,
        } => record(source, interval, no_countdown).await,
    }
}

fn list_sources(json: bool) -> Result<()> {
    let sources = DesktopSources::new().list_sources()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&sources)?);
        return Ok(());
    }
    for source in sources {
        println!(
            "{:<16} {:<7} {:>5}x{:<5} {}",
            source.id,
            source.kind.display_name(),
            source.width,
            source.height,
            source.name
        );
    }
    Ok(())
}

fn show_config() -> Result<()> {
    let service = SettingsService::load()?;
    if let Some(path) = service.path() {
        println!("# {}", path.display());
    }
    println!("{}", toml::to_string_pretty(&service.snapshot()?)?);
    Ok(())
}

async fn record(source: Option<String>, interval: Option<u64>, no_countdown: bool) -> Result<()> {
    let settings = Arc::new(SettingsService::load()?);
    let patch = SettingsPatch {
        interval_secs: interval,
        countdown: no_countdown.then_some(false),
        ..SettingsPatch::default()
    };
    if patch != SettingsPatch::default() {
        settings.update(patch)?;
    }
    let snapshot = settings.snapshot()?;

    let encoder = FfmpegEncoder::from_settings(&snapshot);
    if let Err(e) = encoder.version().await {
        tracing::warn!("{e}; rendering will fail until ffmpeg is installed");
    }

    let sources = match source {
        Some(id) => DesktopSources::with_preferred(id),
        None => DesktopSources::new(),
    };
    let tray: Arc<dyn TraySurface> = Arc::new(ConsoleTray::new());
    let ctx = AppContext {
        settings: settings.clone(),
        sources: Arc::new(sources),
        frames: FrameStore::system_temp(),
        encoder: Arc::new(encoder),
        notifier: Arc::new(DesktopNotifier::new()),
        tray: tray.clone(),
        countdown: Arc::new(TimerCountdown::new(tray)),
        save_prompt: Arc::new(DialogSavePrompt),
    };
    let controller = Arc::new(SessionController::new(ctx));

    eprintln!("{COMMANDS_HELP}");
    let mut start = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.start().await })
    };
    let mut starting = true;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            joined = &mut start, if starting => {
                starting = false;
                joined.map_err(|e| anyhow!("start task failed: {e}"))??;
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!();
                controller.cancel().await;
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) => {
                    if run_command(&controller, line.trim()).await? {
                        break;
                    }
                }
                // stdin closed: render whatever was captured
                None => {
                    run_command(&controller, "stop").await?;
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Handles one stdin command. Returns `true` once the session is over.
async fn run_command(controller: &SessionController, command: &str) -> Result<bool> {
    match command {
        "" => {}
        "pause" => {
            if !controller.pause().await {
                eprintln!("Not recording");
            }
        }
        "resume" => {
            if !controller.resume().await {
                eprintln!("Not paused");
            }
        }
        "stop" => match controller.stop().await? {
            StopOutcome::Rendered(path) => {
                println!("Saved {}", path.display());
                return Ok(true);
            }
            StopOutcome::Discarded => {
                eprintln!("Recording discarded");
                return Ok(true);
            }
            StopOutcome::Failed(message) => {
                eprintln!("Render failed: {message}");
                return Ok(true);
            }
            StopOutcome::Ignored => eprintln!("Not recording"),
        },
        "cancel" => {
            if controller.cancel().await {
                eprintln!("Recording discarded");
                return Ok(true);
            }
            eprintln!("Not recording");
        }
        "retake" => {
            if let Err(e) = controller.retake().await {
                eprintln!("{e}");
            }
        }
        "status" => println!("{}", serde_json::to_string_pretty(&controller.status())?),
        "help" => eprintln!("{COMMANDS_HELP}"),
        other => match PowerEvent::from_name(other) {
            Some(event) => {
                controller.on_power_event(event).await;
            }
            None => eprintln!("Unknown command {other:?}. {COMMANDS_HELP}"),
        },
    }
    Ok(false)
}
