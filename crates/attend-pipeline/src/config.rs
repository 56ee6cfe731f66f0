use crate::session::{DurationBounds, SamplingPolicy, SessionOptions};
use attend_core::DEFAULT_TOLERANCE;
use attend_store::{Database, MarkMode, ReviewSink, StoreError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Pipeline configuration: TOML file values, then `ATTEND_*` environment
/// overrides, then defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file holding the face gallery.
    pub faces_db: PathBuf,
    /// SQLite file holding the attendance ledger.
    pub attendance_db: PathBuf,
    /// Directory receiving crops of unrecognized faces.
    pub review_dir: PathBuf,
    /// Maximum Euclidean distance for a match. Lower is stricter.
    pub tolerance: f64,
    /// Shortest accepted video, in seconds.
    pub min_video_secs: f64,
    /// Longest accepted video, in seconds.
    pub max_video_secs: f64,
    /// Dedup policy for marks made by sessions.
    pub session_mode: MarkMode,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            faces_db: data_dir.join("faces.db"),
            attendance_db: data_dir.join("attendance.db"),
            review_dir: data_dir.join("undetected_faces"),
            tolerance: DEFAULT_TOLERANCE,
            min_video_secs: 0.0,
            max_video_secs: 20.0,
            session_mode: MarkMode::OncePerDay,
        }
    }
}

impl Config {
    /// Defaults with `ATTEND_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Read a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = toml::from_str(&raw)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Unparseable values are ignored and the current value kept.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("ATTEND_FACES_DB") {
            self.faces_db = PathBuf::from(v);
        }
        if let Some(v) = lookup("ATTEND_ATTENDANCE_DB") {
            self.attendance_db = PathBuf::from(v);
        }
        if let Some(v) = lookup("ATTEND_REVIEW_DIR") {
            self.review_dir = PathBuf::from(v);
        }
        self.tolerance = parse_or(&lookup, "ATTEND_TOLERANCE", self.tolerance);
        self.min_video_secs = parse_or(&lookup, "ATTEND_MIN_VIDEO_SECS", self.min_video_secs);
        self.max_video_secs = parse_or(&lookup, "ATTEND_MAX_VIDEO_SECS", self.max_video_secs);
        self.session_mode = parse_or(&lookup, "ATTEND_SESSION_MODE", self.session_mode);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "tolerance must be a positive number, got {}",
                self.tolerance
            )));
        }
        if self.min_video_secs < 0.0 || self.min_video_secs > self.max_video_secs {
            return Err(ConfigError::Invalid(format!(
                "video duration range {}..{} is empty",
                self.min_video_secs, self.max_video_secs
            )));
        }
        Ok(())
    }

    pub fn open_database(&self) -> Result<Database, StoreError> {
        Database::open(&self.faces_db, &self.attendance_db)
    }

    pub fn review_sink(&self) -> ReviewSink {
        ReviewSink::new(&self.review_dir)
    }

    /// Options for a live camera session: every frame, no duration limit.
    pub fn live_options(&self) -> SessionOptions {
        SessionOptions {
            tolerance: self.tolerance,
            mode: self.session_mode,
            sampling: SamplingPolicy::EveryFrame,
            duration: None,
        }
    }

    /// Options for a recorded video: about one frame per second, bounded length.
    pub fn video_options(&self) -> SessionOptions {
        SessionOptions {
            tolerance: self.tolerance,
            mode: self.session_mode,
            sampling: SamplingPolicy::OncePerSecond,
            duration: Some(DurationBounds {
                min_secs: self.min_video_secs,
                max_secs: self.max_video_secs,
            }),
        }
    }
}

/// `$ATTEND_DATA_DIR`, else `$XDG_DATA_HOME/attend`, else `~/.local/share/attend`.
pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("ATTEND_DATA_DIR") {
        return PathBuf::from(dir);
    }
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("attend")
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, current: T) -> T {
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable override");
                current
            }
        },
        None => current,
    }
}
