//! Application-level configuration loading.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "WAVECAST_BACK_CONFIG_PATH";
/// Resolved stream URLs are refreshed after this long. External URLs are
/// signed and typically live ~6h; we refresh far more conservatively.
const DEFAULT_STREAM_URL_TTL_SECS: u64 = 300;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Directory holding the offline fallback music library.
    pub library_dir: PathBuf,
    /// Core-owned cache directory (synthesized announcements live below it).
    pub cache_dir: PathBuf,
    /// Extractor binary resolving external video URLs to direct audio URLs.
    pub extractor_program: String,
    /// Optional TTS command template with `{text}` and `{out}` placeholders.
    /// When absent, announcements degrade to text-only.
    pub tts_command: Option<String>,
    /// Absolute expiry applied to resolved stream URLs.
    pub stream_url_ttl: Duration,
    /// Optional JSON seed file loaded into the in-memory store at startup.
    pub seed_path: Option<PathBuf>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in
    /// defaults when the file is absent or malformed.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(path = %path.display(), "loaded configuration");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Directory where synthesized announcement audio is cached.
    pub fn announcement_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("announcements")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            library_dir: PathBuf::from("library"),
            cache_dir: PathBuf::from("cache"),
            extractor_program: "yt-dlp".to_string(),
            tts_command: None,
            stream_url_ttl: Duration::from_secs(DEFAULT_STREAM_URL_TTL_SECS),
            seed_path: None,
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde(default)]
    library_dir: Option<PathBuf>,
    #[serde(default)]
    cache_dir: Option<PathBuf>,
    #[serde(default)]
    extractor_program: Option<String>,
    #[serde(default)]
    tts_command: Option<String>,
    #[serde(default)]
    stream_url_ttl_secs: Option<u64>,
    #[serde(default)]
    seed_path: Option<PathBuf>,
}

impl From<RawConfig> for AppConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = AppConfig::default();
        Self {
            library_dir: raw.library_dir.unwrap_or(defaults.library_dir),
            cache_dir: raw.cache_dir.unwrap_or(defaults.cache_dir),
            extractor_program: raw.extractor_program.unwrap_or(defaults.extractor_program),
            tts_command: raw.tts_command,
            stream_url_ttl: raw
                .stream_url_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.stream_url_ttl),
            seed_path: raw.seed_path,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
