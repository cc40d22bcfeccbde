use anyhow::{anyhow, bail, Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::session::SessionOptions;
use crate::types::{AudioFormat, ResponseShape};

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_CONFIG_PATH: &str = "STUDIO_CONFIG_PATH";
const ENV_BACKEND_URL: &str = "STUDIO_BACKEND_URL";
const ENV_DEFAULT_MODEL: &str = "STUDIO_DEFAULT_MODEL";
const ENV_RESPONSE_SHAPE: &str = "STUDIO_RESPONSE_SHAPE";
const ENV_AUDIO_FORMAT: &str = "STUDIO_AUDIO_FORMAT";
const ENV_REQUEST_TIMEOUT: &str = "STUDIO_REQUEST_TIMEOUT";
const ENV_EXPORT_DIR: &str = "STUDIO_EXPORT_DIR";

#[derive(Debug, Clone)]
pub struct AppConfig {
    backend_url: Option<String>,
    default_model_id: Option<String>,
    response_shape: ResponseShape,
    audio_format: AudioFormat,
    request_timeout_secs: u64,
    audio_retry_delay_ms: u64,
    extend_seconds: u32,
    export_dir: PathBuf,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        let path = match config_file_override() {
            Some(path) => path,
            None => Self::default_config_path()?,
        };
        if path.exists() {
            let partial = read_partial(&path)?;
            config.apply_partial(partial)?;
        }

        config.apply_env()?;
        Ok(config)
    }

    pub fn backend_url(&self) -> Option<&str> {
        self.backend_url.as_deref()
    }

    /// Model selected automatically once the registry is fetched.
    pub fn default_model_id(&self) -> Option<&str> {
        self.default_model_id.as_deref()
    }

    pub fn response_shape(&self) -> ResponseShape {
        self.response_shape
    }

    pub fn audio_format(&self) -> AudioFormat {
        self.audio_format
    }

    pub fn export_dir(&self) -> &PathBuf {
        &self.export_dir
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            audio_retry_delay: Duration::from_millis(self.audio_retry_delay_ms),
            extend_seconds: self.extend_seconds,
            export_dir: self.export_dir.clone(),
            audio_format: self.audio_format,
        }
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("com", "Studio", "Studio")
            .ok_or_else(|| anyhow!("unable to determine config directory"))?;
        Ok(dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    fn apply_partial(&mut self, partial: PartialConfig) -> Result<()> {
        if let Some(url) = partial.backend_url {
            self.backend_url = Some(url);
        }
        if let Some(model_id) = partial.default_model_id {
            self.default_model_id = Some(model_id);
        }
        if let Some(shape) = partial.response_shape {
            self.response_shape = parse_response_shape(&shape)?;
        }
        if let Some(format) = partial.audio_format {
            self.audio_format = parse_audio_format(&format)?;
        }
        if let Some(secs) = partial.request_timeout_secs {
            self.request_timeout_secs = validate_timeout(secs)?;
        }
        if let Some(delay) = partial.audio_retry_delay_ms {
            self.audio_retry_delay_ms = delay;
        }
        if let Some(seconds) = partial.extend_seconds {
            if seconds == 0 {
                bail!("extend_seconds must be at least 1");
            }
            self.extend_seconds = seconds;
        }
        if let Some(dir) = partial.export_dir {
            self.export_dir = dir;
        }
        Ok(())
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = env::var(ENV_BACKEND_URL) {
            if value.trim().is_empty() {
                self.backend_url = None;
            } else {
                self.backend_url = Some(value);
            }
        }
        if let Ok(value) = env::var(ENV_DEFAULT_MODEL) {
            if value.trim().is_empty() {
                self.default_model_id = None;
            } else {
                self.default_model_id = Some(value);
            }
        }
        if let Some(value) = non_empty_env(ENV_RESPONSE_SHAPE) {
            self.response_shape = parse_response_shape(&value)?;
        }
        if let Some(value) = non_empty_env(ENV_AUDIO_FORMAT) {
            self.audio_format = parse_audio_format(&value)?;
        }
        if let Some(value) = non_empty_env(ENV_REQUEST_TIMEOUT) {
            let parsed = value
                .trim()
                .parse::<u64>()
                .context("STUDIO_REQUEST_TIMEOUT must be a whole number of seconds")?;
            self.request_timeout_secs = validate_timeout(parsed)?;
        }
        if let Some(value) = non_empty_env(ENV_EXPORT_DIR) {
            self.export_dir = PathBuf::from(value);
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            default_model_id: None,
            response_shape: ResponseShape::Auto,
            audio_format: AudioFormat::Wav,
            request_timeout_secs: 300,
            audio_retry_delay_ms: 1500,
            extend_seconds: 10,
            export_dir: default_export_dir(),
        }
    }
}

fn config_file_override() -> Option<PathBuf> {
    let value = env::var_os(ENV_CONFIG_PATH)?;
    if value.is_empty() {
        return None;
    }
    let path = PathBuf::from(value);
    if path.is_dir() {
        return Some(path.join(CONFIG_FILE_NAME));
    }
    Some(path)
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_partial(path: &Path) -> Result<PartialConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let partial: PartialConfig =
        toml::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(partial)
}

fn parse_response_shape(value: &str) -> Result<ResponseShape> {
    match value.trim().to_ascii_lowercase().as_str() {
        "auto" => Ok(ResponseShape::Auto),
        "inline" => Ok(ResponseShape::Inline),
        "identifier" | "id" => Ok(ResponseShape::Identifier),
        other => bail!("unknown response shape {other:?} (expected auto, inline or identifier)"),
    }
}

fn parse_audio_format(value: &str) -> Result<AudioFormat> {
    match value.trim().to_ascii_lowercase().as_str() {
        "wav" => Ok(AudioFormat::Wav),
        "mp3" => Ok(AudioFormat::Mp3),
        other => bail!("unknown audio format {other:?} (expected wav or mp3)"),
    }
}

fn validate_timeout(secs: u64) -> Result<u64> {
    if secs == 0 {
        bail!("request timeout must be at least one second");
    }
    Ok(secs)
}

fn default_export_dir() -> PathBuf {
    env::var_os("HOME")
        .map(PathBuf::from)
        .map(|home| home.join("Music").join("Studio"))
        .unwrap_or_else(|| PathBuf::from("./exports"))
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PartialConfig {
    backend_url: Option<String>,
    default_model_id: Option<String>,
    response_shape: Option<String>,
    audio_format: Option<String>,
    request_timeout_secs: Option<u64>,
    audio_retry_delay_ms: Option<u64>,
    extend_seconds: Option<u32>,
    export_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let partial: PartialConfig = toml::from_str(
            r#"
            backend_url = "http://gpu-box:5000"
            default_model_id = "musicgen-small"
            response_shape = "identifier"
            audio_format = "mp3"
            request_timeout_secs = 120
            export_dir = "/tmp/studio"
            "#,
        )
        .unwrap();
        let mut config = AppConfig::default();
        config.apply_partial(partial).unwrap();

        assert_eq!(config.backend_url(), Some("http://gpu-box:5000"));
        assert_eq!(config.default_model_id(), Some("musicgen-small"));
        assert_eq!(config.response_shape(), ResponseShape::Identifier);
        assert_eq!(config.audio_format(), AudioFormat::Mp3);

        let options = config.session_options();
        assert_eq!(options.request_timeout, Duration::from_secs(120));
        assert_eq!(options.audio_retry_delay, Duration::from_millis(1500));
        assert_eq!(options.export_dir, PathBuf::from("/tmp/studio"));
    }

    #[test]
    fn missing_keys_keep_defaults() {
        let partial: PartialConfig = toml::from_str("").unwrap();
        let mut config = AppConfig::default();
        config.apply_partial(partial).unwrap();
        assert_eq!(config.response_shape(), ResponseShape::Auto);
        assert_eq!(config.session_options().extend_seconds, 10);
    }

    #[test]
    fn rejects_unknown_enums_and_zero_timeout() {
        assert!(parse_response_shape("stream").is_err());
        assert!(parse_audio_format("flac").is_err());
        assert!(validate_timeout(0).is_err());
        assert_eq!(parse_response_shape(" Inline ").unwrap(), ResponseShape::Inline);
    }
}
