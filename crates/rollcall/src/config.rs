use anyhow::{bail, Context, Result};
use rollcall_attendance::{PresenceConfig, SessionPolicy, DEFAULT_DEBOUNCE_SECS};
use rollcall_core::identify::DEFAULT_DOWNSCALE;
use rollcall_core::DistanceMatcher;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "rollcall.toml";

/// Runtime configuration: TOML file, then `ROLLCALL_*` environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    /// Directory holding `det_10g.onnx` and `w600k_r50.onnx`.
    pub model_dir: PathBuf,
    /// Attendance table (CSV).
    pub attendance_file: PathBuf,
    /// Maximum embedding distance for a match. Lower = stricter.
    pub tolerance: f32,
    /// Seconds after an entry before a recognition counts as an exit.
    pub debounce_secs: u32,
    /// Frame scale factor applied before detection.
    pub downscale: f32,
    /// Keep existing rows in the attendance file instead of recreating it.
    pub preserve_attendance: bool,
    /// Allow more than one entry/exit pair per person per day.
    pub allow_multiple_sessions: bool,
    /// Open the attendance file in the system viewer after a normal exit.
    pub open_viewer: bool,
    /// Where to write the annotated frame, if anywhere.
    pub preview_path: Option<PathBuf>,
    /// Stop after this many frames.
    pub max_frames: Option<u64>,
    pub roster: RosterConfig,
}

/// Enrollment images and their labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterConfig {
    pub image_dir: PathBuf,
    /// Image file name → `"Name RollNumber"`.
    pub entries: BTreeMap<String, String>,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from("images"),
            entries: BTreeMap::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: PathBuf::from("models"),
            attendance_file: PathBuf::from("attendance_log.csv"),
            tolerance: DistanceMatcher::DEFAULT_TOLERANCE,
            debounce_secs: DEFAULT_DEBOUNCE_SECS,
            downscale: DEFAULT_DOWNSCALE,
            preserve_attendance: false,
            allow_multiple_sessions: false,
            open_viewer: true,
            preview_path: None,
            max_frames: None,
            roster: RosterConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path` (defaults if the file is absent), apply environment
    /// overrides, and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            toml::from_str::<Config>(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        } else {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `ROLLCALL_*` overrides using `lookup` to read variables.
    pub(crate) fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_ATTENDANCE_FILE") {
            self.attendance_file = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_IMAGE_DIR") {
            self.roster.image_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_PREVIEW_PATH") {
            self.preview_path = Some(PathBuf::from(v)).filter(|p| !p.as_os_str().is_empty());
        }
        override_parsed(&lookup, "ROLLCALL_TOLERANCE", &mut self.tolerance);
        override_parsed(&lookup, "ROLLCALL_DEBOUNCE_SECS", &mut self.debounce_secs);
        override_parsed(&lookup, "ROLLCALL_DOWNSCALE", &mut self.downscale);
        override_flag(&lookup, "ROLLCALL_PRESERVE_ATTENDANCE", &mut self.preserve_attendance);
        override_flag(&lookup, "ROLLCALL_ALLOW_MULTIPLE_SESSIONS", &mut self.allow_multiple_sessions);
        override_flag(&lookup, "ROLLCALL_OPEN_VIEWER", &mut self.open_viewer);
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance > 0.0) {
            bail!("tolerance must be positive, got {}", self.tolerance);
        }
        if !(self.downscale > 0.0 && self.downscale <= 1.0) {
            bail!("downscale must be in (0, 1], got {}", self.downscale);
        }
        Ok(())
    }

    pub fn presence(&self) -> PresenceConfig {
        PresenceConfig::new(self.debounce_secs, self.allow_multiple_sessions)
    }

    pub fn session_policy(&self) -> SessionPolicy {
        if self.allow_multiple_sessions {
            SessionPolicy::Multiple
        } else {
            SessionPolicy::OncePerDay
        }
    }
}

fn override_parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(v) => *target = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable environment override"),
    }
}

/// "0", "false", "no" and "off" are false; anything else is true.
fn override_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut bool) {
    if let Some(raw) = lookup(key) {
        *target = !matches!(raw.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off");
    }
}
