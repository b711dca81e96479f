//! TOML configuration file loading
//!
//! Supports `~/.config/parley/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ParleyConfigFile {
    /// Agent connection configuration
    #[serde(default)]
    pub connection: ConnectionFileConfig,

    /// Microphone capture configuration
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Playback configuration
    #[serde(default)]
    pub playback: PlaybackFileConfig,
}

/// Connection-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct ConnectionFileConfig {
    /// WebSocket endpoint of the voice agent
    pub endpoint: Option<String>,

    /// OAuth token endpoint used with a secret key
    pub token_url: Option<String>,

    /// Agent configuration identifier
    pub config_id: Option<String>,

    /// API key
    pub api_key: Option<String>,

    /// Secret key (enables the client-credentials exchange)
    pub secret_key: Option<String>,

    /// Seconds to wait for the channel to open
    pub connect_timeout_secs: Option<u64>,
}

/// Microphone capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    /// Outbound sample rate in Hz
    pub sample_rate: Option<u32>,

    /// Frame flush interval in milliseconds
    pub frame_interval_ms: Option<u64>,

    pub echo_cancellation: Option<bool>,
    pub noise_suppression: Option<bool>,
    pub auto_gain_control: Option<bool>,

    /// Start sessions with the microphone muted
    pub start_muted: Option<bool>,
}

/// Playback configuration
#[derive(Debug, Default, Deserialize)]
pub struct PlaybackFileConfig {
    /// Sample rate assumed for inbound segments without a `fmt ` chunk
    pub source_sample_rate: Option<u32>,

    /// Crossfade length at segment boundaries in milliseconds
    pub crossfade_ms: Option<u64>,

    /// Interruption fade-out length in milliseconds
    pub fade_out_ms: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ParleyConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ParleyConfigFile {
    let Some(path) = config_file_path() else {
        return ParleyConfigFile::default();
    };

    load_config_file_from(&path)
}

/// Load a TOML config file from an explicit path
///
/// Same fallback rules as [`load_config_file`].
pub fn load_config_file_from(path: &Path) -> ParleyConfigFile {
    if !path.exists() {
        return ParleyConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ParleyConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ParleyConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/parley/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("parley").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_file() {
        let file: ParleyConfigFile = toml::from_str(
            r#"
            [connection]
            config_id = "abc"

            [capture]
            start_muted = true
            "#,
        )
        .unwrap();

        assert_eq!(file.connection.config_id.as_deref(), Some("abc"));
        assert_eq!(file.capture.start_muted, Some(true));
        assert!(file.playback.crossfade_ms.is_none());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = load_config_file_from(&dir.path().join("nope.toml"));
        assert!(file.connection.endpoint.is_none());
    }

    #[test]
    fn garbage_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();

        let file = load_config_file_from(&path);
        assert!(file.capture.sample_rate.is_none());
    }
}
