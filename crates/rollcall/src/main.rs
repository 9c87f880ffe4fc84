use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_attendance::{read_table, CsvAttendanceStore, PresenceTracker};
use rollcall_core::{load_roster, DistanceMatcher, Identifier, OnnxAnalyzer};
use rollcall_hw::Camera;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;
mod overlay;
mod session;

use config::{Config, DEFAULT_CONFIG_PATH};
use session::LoopOptions;

#[derive(Parser)]
#[command(name = "rollcall", about = "Webcam attendance logger")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize faces from the webcam and log attendance
    Run {
        /// Stop after this many frames
        #[arg(long)]
        max_frames: Option<u64>,
        /// Do not open the attendance file when finished
        #[arg(long)]
        no_viewer: bool,
        /// Keep rows already in the attendance file
        #[arg(long)]
        preserve: bool,
        /// Allow more than one entry/exit pair per person per day
        #[arg(long)]
        multiple_sessions: bool,
    },
    /// Load the roster and print the enrolled identities
    Roster,
    /// Print the attendance table
    Show,
    /// List V4L2 capture devices
    Devices,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            max_frames,
            no_viewer,
            preserve,
            multiple_sessions,
        } => {
            let mut config = Config::load(&cli.config)?;
            config.max_frames = max_frames.or(config.max_frames);
            config.open_viewer &= !no_viewer;
            config.preserve_attendance |= preserve;
            config.allow_multiple_sessions |= multiple_sessions;
            run(config)
        }
        Commands::Roster => {
            let config = Config::load(&cli.config)?;
            let mut analyzer = OnnxAnalyzer::load(&config.model_dir).context("loading face models")?;
            let roster = load_roster(&mut analyzer, &config.roster.image_dir, &config.roster.entries)?;
            println!("{}", serde_json::to_string_pretty(&roster)?);
            Ok(())
        }
        Commands::Show => {
            let config = Config::load(&cli.config)?;
            show(&config)
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}\t{}\t{}\t{}", d.path, d.name, d.driver, d.bus);
            }
            Ok(())
        }
    }
}

fn run(config: Config) -> Result<()> {
    tracing::info!(?config, "rollcall starting");

    let mut analyzer = OnnxAnalyzer::load(&config.model_dir).context("loading face models")?;
    let roster = load_roster(&mut analyzer, &config.roster.image_dir, &config.roster.entries)?;
    if roster.is_empty() {
        tracing::warn!("roster is empty; every face will be reported as Unknown");
    }

    let mut identifier = Identifier::new(analyzer, roster, DistanceMatcher::new(config.tolerance))
        .with_downscale(config.downscale);

    let mut store = CsvAttendanceStore::open(
        &config.attendance_file,
        config.session_policy(),
        config.preserve_attendance,
    )
    .with_context(|| format!("opening attendance table {}", config.attendance_file.display()))?;
    let mut tracker = PresenceTracker::new(config.presence());

    let camera = Camera::open(&config.camera_device)
        .with_context(|| format!("could not open webcam {}", config.camera_device))?;
    let mut stream = camera.stream()?;

    let quit = session::spawn_quit_listener()?;
    println!("Camera started. Type 'q' and press Enter to quit.");

    let options = LoopOptions {
        max_frames: config.max_frames,
        preview_path: config.preview_path.clone(),
    };
    let summary = session::run_capture(
        &mut stream,
        &mut identifier,
        &mut tracker,
        &mut store,
        &quit,
        &options,
        || chrono::Local::now().naive_local(),
    )?;
    drop(stream);
    drop(camera);

    tracing::info!(
        frames = summary.frames,
        entries = summary.entries,
        exits = summary.exits,
        suppressed = summary.suppressed,
        still_present = tracker.present_count(),
        rows = store.len(),
        "session finished"
    );

    if config.open_viewer {
        session::open_in_viewer(store.path());
    }
    Ok(())
}

fn show(config: &Config) -> Result<()> {
    let path = &config.attendance_file;
    if !path.exists() {
        println!("No attendance table at {}", path.display());
        return Ok(());
    }

    let records = read_table(path)?;
    println!("{:<16} {:<14} {:<10} {:<10} {:<10}", "Name", "Roll Number", "Date", "Entry", "Exit");
    for r in &records {
        println!(
            "{:<16} {:<14} {:<10} {:<10} {:<10}",
            r.name,
            r.roll_number,
            r.date.format("%Y-%m-%d").to_string(),
            r.entry_time.format("%H:%M:%S").to_string(),
            r.exit_time.map(|t| t.format("%H:%M:%S").to_string()).unwrap_or_default(),
        );
    }
    println!("{} row(s)", records.len());
    Ok(())
}
