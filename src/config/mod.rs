//! Configuration management for Parley
//!
//! Values come from the TOML file (see [`file`]) with environment variables
//! taking precedence.

pub mod file;

use std::time::Duration;

use crate::transport::Credentials;
use crate::{Error, Result};

pub use file::{ParleyConfigFile, config_file_path, load_config_file};

/// Default voice agent WebSocket endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://api.hume.ai/v0/evi/chat";

/// Default OAuth token endpoint
pub const DEFAULT_TOKEN_URL: &str = "https://api.hume.ai/oauth2-cc/token";

/// Time allowed for the channel to signal open or error
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Outbound capture rate (16kHz for speech)
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Interval between outbound microphone frames
pub const CAPTURE_FRAME_INTERVAL: Duration = Duration::from_millis(100);

/// Sample rate of synthesized speech segments
pub const SOURCE_SAMPLE_RATE: u32 = 44_100;

/// Crossfade applied at every internal segment boundary
pub const CROSSFADE: Duration = Duration::from_millis(5);

/// Gain ramp used when the user barges in
pub const FADE_OUT: Duration = Duration::from_millis(50);

/// Delay between the end of the fade and the hard stop
pub const STOP_DELAY: Duration = Duration::from_millis(10);

/// Parley configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Agent connection
    pub connection: ConnectionConfig,

    /// Microphone capture
    pub capture: CaptureConfig,

    /// Playback
    pub playback: PlaybackConfig,
}

/// Agent connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket endpoint
    pub endpoint: String,

    /// OAuth token endpoint for the client-credentials exchange
    pub token_url: String,

    /// Agent configuration identifier, forwarded as `config_id`
    pub config_id: Option<String>,

    /// How to authenticate
    pub credentials: Credentials,

    /// Watchdog limit for the Connecting state
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            config_id: None,
            credentials: Credentials::None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Microphone capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Outbound sample rate in Hz
    pub sample_rate: u32,

    /// Outbound channel count
    pub channels: u16,

    /// Frame flush interval
    pub frame_interval: Duration,

    /// Request acoustic echo cancellation
    pub echo_cancellation: bool,

    /// Request noise suppression
    pub noise_suppression: bool,

    /// Request automatic gain control
    pub auto_gain_control: bool,

    /// Start sessions muted
    pub start_muted: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            channels: 1,
            frame_interval: CAPTURE_FRAME_INTERVAL,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            start_muted: false,
        }
    }
}

/// Playback configuration
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Rate assumed for inbound PCM without a `fmt ` chunk
    pub source_sample_rate: u32,

    /// Boundary crossfade length
    pub crossfade: Duration,

    /// Interruption gain ramp length
    pub fade_out: Duration,

    /// Delay between ramp end and hard stop
    pub stop_delay: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            source_sample_rate: SOURCE_SAMPLE_RATE,
            crossfade: CROSSFADE,
            fade_out: FADE_OUT,
            stop_delay: STOP_DELAY,
        }
    }
}

impl Config {
    /// Load configuration from the config file and environment
    ///
    /// Environment variables:
    /// - `PARLEY_ENDPOINT`, `PARLEY_TOKEN_URL`, `PARLEY_CONFIG_ID`
    /// - `PARLEY_API_KEY`, `PARLEY_SECRET_KEY` (falling back to `HUME_API_KEY`,
    ///   `HUME_SECRET_KEY`)
    /// - `PARLEY_CONNECT_TIMEOUT` (seconds)
    /// - `PARLEY_START_MUTED`
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn load() -> Result<Self> {
        let fc = load_config_file();
        let config = Self::resolve(fc, |key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Merge a parsed config file with an environment lookup
    #[must_use]
    pub fn resolve(fc: ParleyConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let api_key = env("PARLEY_API_KEY")
            .or_else(|| env("HUME_API_KEY"))
            .or(fc.connection.api_key);
        let secret_key = env("PARLEY_SECRET_KEY")
            .or_else(|| env("HUME_SECRET_KEY"))
            .or(fc.connection.secret_key);
        let credentials = match (api_key, secret_key) {
            (Some(api_key), Some(secret_key)) => Credentials::ClientCredentials {
                api_key,
                secret_key,
            },
            (Some(api_key), None) => Credentials::ApiKey(api_key),
            _ => Credentials::None,
        };

        let connection = ConnectionConfig {
            endpoint: env("PARLEY_ENDPOINT")
                .or(fc.connection.endpoint)
                .unwrap_or(defaults.connection.endpoint),
            token_url: env("PARLEY_TOKEN_URL")
                .or(fc.connection.token_url)
                .unwrap_or(defaults.connection.token_url),
            config_id: env("PARLEY_CONFIG_ID").or(fc.connection.config_id),
            credentials,
            connect_timeout: env("PARLEY_CONNECT_TIMEOUT")
                .and_then(|v| v.parse().ok())
                .or(fc.connection.connect_timeout_secs)
                .map_or(defaults.connection.connect_timeout, Duration::from_secs),
        };

        let capture = CaptureConfig {
            sample_rate: fc.capture.sample_rate.unwrap_or(defaults.capture.sample_rate),
            channels: defaults.capture.channels,
            frame_interval: fc
                .capture
                .frame_interval_ms
                .map_or(defaults.capture.frame_interval, Duration::from_millis),
            echo_cancellation: fc
                .capture
                .echo_cancellation
                .unwrap_or(defaults.capture.echo_cancellation),
            noise_suppression: fc
                .capture
                .noise_suppression
                .unwrap_or(defaults.capture.noise_suppression),
            auto_gain_control: fc
                .capture
                .auto_gain_control
                .unwrap_or(defaults.capture.auto_gain_control),
            start_muted: env("PARLEY_START_MUTED")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .or(fc.capture.start_muted)
                .unwrap_or(defaults.capture.start_muted),
        };

        let playback = PlaybackConfig {
            source_sample_rate: fc
                .playback
                .source_sample_rate
                .unwrap_or(defaults.playback.source_sample_rate),
            crossfade: fc
                .playback
                .crossfade_ms
                .map_or(defaults.playback.crossfade, Duration::from_millis),
            fade_out: fc
                .playback
                .fade_out_ms
                .map_or(defaults.playback.fade_out, Duration::from_millis),
            stop_delay: defaults.playback.stop_delay,
        };

        Self {
            connection,
            capture,
            playback,
        }
    }

    /// Check values that would wedge the pipeline
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.capture.sample_rate == 0 {
            return Err(Error::Config("capture.sample_rate must be > 0".to_string()));
        }
        if self.capture.frame_interval.is_zero() {
            return Err(Error::Config(
                "capture.frame_interval_ms must be > 0".to_string(),
            ));
        }
        if self.playback.source_sample_rate == 0 {
            return Err(Error::Config(
                "playback.source_sample_rate must be > 0".to_string(),
            ));
        }
        if self.connection.connect_timeout.is_zero() {
            return Err(Error::Config(
                "connection.connect_timeout_secs must be > 0".to_string(),
            ));
        }
        url::Url::parse(&self.connection.endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint: {e}")))?;
        Ok(())
    }
}
