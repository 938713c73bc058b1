use std::path::PathBuf;
use std::time::Duration;

use rollcall_core::{CooldownPolicy, LivenessConfig, LivenessMode, PipelineConfig};

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the serialized gallery file.
    pub gallery_path: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Unix socket of the external face analyzer helper.
    pub analyzer_socket: PathBuf,
    /// Euclidean distance threshold for a positive match.
    pub match_threshold: f32,
    /// Liveness variant: "blink", "movement" or "composite".
    pub liveness_mode: LivenessMode,
    /// Blinks required before the blink variant passes.
    pub min_blinks: u32,
    /// Eye-openness hysteresis thresholds.
    pub closed_threshold: f32,
    pub open_threshold: f32,
    /// Liveness time budget in seconds.
    pub liveness_budget_secs: u64,
    /// Fraction of no-face frames above which an attempt fails liveness.
    pub max_no_face_fraction: f32,
    /// Cooldown policy: "rolling" or "calendar-day".
    pub cooldown_calendar_day: bool,
    /// Rolling cooldown window in hours.
    pub cooldown_hours: i64,
    /// Accepted burst size range.
    pub min_frames: usize,
    pub max_frames: usize,
    /// Overall per-attempt timeout in seconds.
    pub attempt_timeout_secs: u64,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let gallery_path = std::env::var("ROLLCALL_GALLERY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("gallery.json"));

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        let analyzer_socket = std::env::var("ROLLCALL_ANALYZER_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/run/rollcall/analyzer.sock"));

        let liveness_mode = match std::env::var("ROLLCALL_LIVENESS_MODE").as_deref() {
            Ok("movement") => LivenessMode::Movement,
            Ok("composite") => LivenessMode::Composite,
            _ => LivenessMode::Blink,
        };

        let cooldown_calendar_day = matches!(
            std::env::var("ROLLCALL_COOLDOWN_POLICY").as_deref(),
            Ok("calendar-day")
        );

        Self {
            gallery_path,
            db_path,
            analyzer_socket,
            match_threshold: env_f32("ROLLCALL_MATCH_THRESHOLD", 0.6),
            liveness_mode,
            min_blinks: env_u32("ROLLCALL_MIN_BLINKS", 1),
            closed_threshold: env_f32("ROLLCALL_CLOSED_THRESHOLD", 0.21),
            open_threshold: env_f32("ROLLCALL_OPEN_THRESHOLD", 0.25),
            liveness_budget_secs: env_u64("ROLLCALL_LIVENESS_BUDGET_SECS", 8),
            max_no_face_fraction: env_f32("ROLLCALL_MAX_NO_FACE_FRACTION", 0.5),
            cooldown_calendar_day,
            cooldown_hours: env_u64("ROLLCALL_COOLDOWN_HOURS", 24) as i64,
            min_frames: env_usize("ROLLCALL_MIN_FRAMES", 3),
            max_frames: env_usize("ROLLCALL_MAX_FRAMES", 64),
            attempt_timeout_secs: env_u64("ROLLCALL_ATTEMPT_TIMEOUT_SECS", 15),
        }
    }

    /// Assemble the pipeline configuration from the loaded values.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            min_frames: self.min_frames,
            max_frames: self.max_frames,
            match_threshold: self.match_threshold,
            liveness: LivenessConfig {
                mode: self.liveness_mode,
                min_blinks: self.min_blinks,
                closed_threshold: self.closed_threshold,
                open_threshold: self.open_threshold,
                time_budget: Duration::from_secs(self.liveness_budget_secs),
                max_no_face_fraction: self.max_no_face_fraction,
                ..LivenessConfig::default()
            },
            cooldown: if self.cooldown_calendar_day {
                CooldownPolicy::CalendarDay
            } else {
                CooldownPolicy::Rolling(chrono::Duration::hours(self.cooldown_hours))
            },
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
