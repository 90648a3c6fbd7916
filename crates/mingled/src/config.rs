use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the JSON user store.
    pub store_path: PathBuf,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Base URL of the hosted face-recognition service.
    pub face_api_url: String,
    /// Base URL of the generative MC service.
    pub mc_api_url: String,
    /// Base URL of the spreadsheet feed API.
    pub feeds_url: String,
    /// API key shared by the face and MC services.
    pub api_key: String,
    /// Euclidean distance threshold for a positive face match.
    pub match_threshold: f32,
    /// RMS level above which a chunk counts as speech.
    pub speech_threshold: f32,
    /// Milliseconds of silence that close an utterance.
    pub silence_window_ms: u64,
    /// Minimum encoded utterance size worth transcribing.
    pub min_payload_bytes: usize,
    /// World chat refresh interval in seconds.
    pub poll_interval_secs: u64,
    /// Floating-field dimensions in pixels.
    pub field_width: f32,
    pub field_height: f32,
}

impl Config {
    /// Load configuration from `MINGLE_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("mingle");

        let store_path = std::env::var("MINGLE_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("users.json"));

        Self {
            store_path,
            camera_device: std::env::var("MINGLE_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            face_api_url: std::env::var("MINGLE_FACE_API_URL")
                .unwrap_or_else(|_| "https://face.mingle.local".to_string()),
            mc_api_url: std::env::var("MINGLE_MC_API_URL")
                .unwrap_or_else(|_| "https://mc.mingle.local".to_string()),
            feeds_url: std::env::var("MINGLE_FEEDS_URL")
                .unwrap_or_else(|_| "https://feeds.mingle.local".to_string()),
            api_key: std::env::var("MINGLE_API_KEY").unwrap_or_default(),
            match_threshold: env_f32(
                "MINGLE_MATCH_THRESHOLD",
                mingle_core::DEFAULT_MATCH_THRESHOLD,
            ),
            speech_threshold: env_f32(
                "MINGLE_SPEECH_THRESHOLD",
                mingle_session::voice::DEFAULT_SPEECH_THRESHOLD,
            ),
            silence_window_ms: env_u64(
                "MINGLE_SILENCE_WINDOW_MS",
                mingle_session::voice::DEFAULT_SILENCE_WINDOW.as_millis() as u64,
            ),
            min_payload_bytes: env_usize(
                "MINGLE_MIN_PAYLOAD_BYTES",
                mingle_session::voice::DEFAULT_MIN_PAYLOAD_BYTES,
            ),
            poll_interval_secs: env_u64("MINGLE_POLL_INTERVAL_SECS", 3),
            field_width: env_f32("MINGLE_FIELD_WIDTH", 1920.0),
            field_height: env_f32("MINGLE_FIELD_HEIGHT", 1080.0),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn silence_window(&self) -> Duration {
        Duration::from_millis(self.silence_window_ms)
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
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
