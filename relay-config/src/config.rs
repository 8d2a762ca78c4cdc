use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::HumanDuration;

/// The public Instrumental collector.
const DEFAULT_HOST: &str = "collector.instrumentalapp.com";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Statsite listens on the StatsD port for its own input.
const DEFAULT_FEEDBACK_HOST: &str = "127.0.0.1";
const DEFAULT_FEEDBACK_PORT: u16 = 8125;

/// Matches the token limit of a default line scanner.
const DEFAULT_MAX_LINE_SIZE: usize = 64 * 1024;

/// Defines the source of a config error
#[derive(Debug)]
enum ConfigErrorSource {
    /// An error occurring independently.
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var, or a CLI parameter).
    FieldOverride(String),
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    inner: Option<Box<dyn Error + Send + Sync>>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            inner: None,
        }
    }

    #[inline]
    fn wrap<E>(inner: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            source: ConfigErrorSource::None,
            kind,
            inner: Some(Box::new(inner)),
        }
    }

    #[inline]
    fn for_field<E>(inner: E, field: &'static str) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::wrap(inner, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file<P: AsRef<Path>>(mut self, p: P) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.source = ConfigErrorSource::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ConfigErrorSource::None => fmt::Display::fmt(&self.kind, f),
            ConfigErrorSource::File(file_name) => {
                write!(f, "{} (file {})", self.kind, file_name.display())
            }
            ConfigErrorSource::FieldOverride(name) => write!(f, "{} (field {})", self.kind, name),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner
            .as_ref()
            .map(|inner| inner.as_ref() as &(dyn Error + 'static))
    }
}

/// Indicates config related errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config file")]
    BadJson,
    /// Invalid config value
    #[error("invalid config value")]
    InvalidValue,
}

/// The action sent upstream for statsite's `timers` records.
///
/// Statsite reports timer summaries such as `timers.request.p95` and `timers.request.mean`.
/// Depending on how they are graphed, the collector either averages them (`gauge`) or keeps the
/// last reported value (`gauge_absolute`).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerAction {
    /// Report timers with `gauge`.
    #[default]
    Gauge,
    /// Report timers with `gauge_absolute`.
    GaugeAbsolute,
}

impl fmt::Display for TimerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gauge => f.write_str("gauge"),
            Self::GaugeAbsolute => f.write_str("gauge_absolute"),
        }
    }
}

/// Raised if a [`TimerAction`] cannot be parsed from a string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("expected one of 'gauge', 'gauge_absolute'")]
pub struct ParseTimerActionError;

impl FromStr for TimerAction {
    type Err = ParseTimerActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(Self::Gauge),
            "gauge_absolute" => Ok(Self::GaugeAbsolute),
            _ => Err(ParseTimerActionError),
        }
    }
}

/// Structure used to hold information about configuration overrides via
/// CLI parameters or environment variables
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The host name of the collector.
    pub host: Option<String>,
    /// The port of the collector.
    pub port: Option<String>,
    /// The authentication token sent in the handshake.
    pub token: Option<String>,
    /// The I/O budget of the collector connection.
    pub timeout: Option<String>,
    /// Prepended to all keys.
    pub prefix: Option<String>,
    /// Appended to all keys.
    pub postfix: Option<String>,
    /// The action for timer records.
    pub timers: Option<String>,
    /// The host statsite listens on for gauge feedback.
    pub feedback_host: Option<String>,
    /// The statsite port for gauge feedback, `0` to disable.
    pub feedback_port: Option<String>,
    /// The log level.
    pub log_level: Option<String>,
    /// The log format.
    pub log_format: Option<String>,
}

/// Connection to the remote collector.
#[derive(Serialize, Deserialize)]
#[serde(default)]
struct Upstream {
    /// Host name or IP address of the collector.
    host: String,
    /// TCP port of the collector.
    port: u16,
    /// The API token. Required to run, but has no default.
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    /// Dial timeout and total I/O budget of the session.
    timeout: HumanDuration,
}

impl Default for Upstream {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            token: None,
            timeout: HumanDuration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl fmt::Debug for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upstream")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("token", &self.token.as_ref().map(|_| "[redacted]"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Rewriting of metric keys.
#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(default)]
struct Keys {
    prefix: String,
    postfix: String,
    timers: TimerAction,
}

/// Gauge feedback into statsite.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Feedback {
    host: String,
    /// `0` disables feedback.
    port: u16,
}

impl Default for Feedback {
    fn default() -> Self {
        Self {
            host: DEFAULT_FEEDBACK_HOST.to_owned(),
            port: DEFAULT_FEEDBACK_PORT,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Limits {
    /// The maximum length of an input line in bytes, excluding the line terminator.
    max_line_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_line_size: DEFAULT_MAX_LINE_SIZE,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct ConfigValues {
    #[serde(default)]
    upstream: Upstream,
    #[serde(default)]
    keys: Keys,
    #[serde(default)]
    feedback: Feedback,
    #[serde(default)]
    limits: Limits,
    #[serde(default)]
    logging: relay_log::LogConfig,
}

impl ConfigValues {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let f = fs::File::open(path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(path))?;

        serde_yaml::from_reader(io::BufReader::new(f))
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(path))
    }
}

/// Config struct.
#[derive(Default)]
pub struct Config {
    values: ConfigValues,
    path: Option<PathBuf>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Config {
    /// Loads a config from the given YAML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = path.as_ref();

        Ok(Config {
            values: ConfigValues::load(path)?,
            path: Some(path.to_path_buf()),
        })
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        Ok(Config {
            values: serde_json::from_value(value)
                .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadJson))?,
            path: None,
        })
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters)
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        let upstream = &mut self.values.upstream;

        if let Some(host) = overrides.host {
            if host.is_empty() {
                return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("host"));
            }
            upstream.host = host;
        }

        if let Some(port) = overrides.port {
            upstream.port = port
                .parse()
                .map_err(|err| ConfigError::for_field(err, "port"))?;
        }

        if let Some(token) = overrides.token {
            upstream.token = Some(token);
        }

        if let Some(timeout) = overrides.timeout {
            upstream.timeout = timeout
                .parse()
                .map_err(|err| ConfigError::for_field(err, "timeout"))?;
        }

        let keys = &mut self.values.keys;

        if let Some(prefix) = overrides.prefix {
            keys.prefix = prefix;
        }

        if let Some(postfix) = overrides.postfix {
            keys.postfix = postfix;
        }

        if let Some(timers) = overrides.timers {
            keys.timers = timers
                .parse()
                .map_err(|err| ConfigError::for_field(err, "timers"))?;
        }

        let feedback = &mut self.values.feedback;

        if let Some(host) = overrides.feedback_host {
            feedback.host = host;
        }

        if let Some(port) = overrides.feedback_port {
            feedback.port = port
                .parse()
                .map_err(|err| ConfigError::for_field(err, "statsite_port"))?;
        }

        let logging = &mut self.values.logging;

        if let Some(level) = overrides.log_level {
            logging.level = level
                .parse()
                .map_err(|err| ConfigError::for_field(err, "log_level"))?;
        }

        if let Some(format) = overrides.log_format {
            logging.format = format
                .parse()
                .map_err(|err| ConfigError::for_field(err, "log_format"))?;
        }

        Ok(self)
    }

    /// Returns the path of the config file, if the config was loaded from one.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the host name of the collector.
    pub fn upstream_host(&self) -> &str {
        &self.values.upstream.host
    }

    /// Returns the TCP port of the collector.
    pub fn upstream_port(&self) -> u16 {
        self.values.upstream.port
    }

    /// Returns the authentication token, if one is configured.
    ///
    /// An empty token is treated as missing.
    pub fn token(&self) -> Option<&str> {
        self.values
            .upstream
            .token
            .as_deref()
            .filter(|token| !token.is_empty())
    }

    /// Returns the dial timeout, which is also the total I/O budget of a collector session.
    pub fn timeout(&self) -> Duration {
        self.values.upstream.timeout.as_duration()
    }

    /// Returns the string prepended to every key sent upstream.
    pub fn key_prefix(&self) -> &str {
        &self.values.keys.prefix
    }

    /// Returns the string appended to every key sent upstream.
    pub fn key_postfix(&self) -> &str {
        &self.values.keys.postfix
    }

    /// Returns the action used for statsite's `timers` records.
    pub fn timer_action(&self) -> TimerAction {
        self.values.keys.timers
    }

    /// Returns the statsite address for gauge feedback, or `None` if feedback is disabled.
    pub fn feedback_addr(&self) -> Option<(&str, u16)> {
        let feedback = &self.values.feedback;
        match feedback.port {
            0 => None,
            port => Some((feedback.host.as_str(), port)),
        }
    }

    /// Returns the maximum size of an input line in bytes.
    pub fn max_line_size(&self) -> usize {
        self.values.limits.max_line_size
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &relay_log::LogConfig {
        &self.values.logging
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.upstream_host(), "collector.instrumentalapp.com");
        assert_eq!(config.upstream_port(), 8000);
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert_eq!(config.token(), None);
        assert_eq!(config.key_prefix(), "");
        assert_eq!(config.key_postfix(), "");
        assert_eq!(config.timer_action(), TimerAction::Gauge);
        assert_eq!(config.feedback_addr(), Some(("127.0.0.1", 8125)));
        assert_eq!(config.max_line_size(), 65536);
        assert!(config.path().is_none());
    }

    #[test]
    fn test_from_json_value() {
        let config = Config::from_json_value(serde_json::json!({
            "upstream": {"host": "localhost", "token": "abc", "timeout": "5s"},
            "keys": {"prefix": "blarg.", "postfix": ".baz", "timers": "gauge_absolute"},
            "feedback": {"port": 0},
        }))
        .unwrap();

        assert_eq!(config.upstream_host(), "localhost");
        assert_eq!(config.upstream_port(), 8000);
        assert_eq!(config.token(), Some("abc"));
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.key_prefix(), "blarg.");
        assert_eq!(config.key_postfix(), ".baz");
        assert_eq!(config.timer_action(), TimerAction::GaugeAbsolute);
        assert_eq!(config.feedback_addr(), None);
    }

    #[test]
    fn test_empty_token_is_missing() {
        let config = Config::from_json_value(serde_json::json!({
            "upstream": {"token": ""},
        }))
        .unwrap();

        assert_eq!(config.token(), None);
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "upstream:\n  port: 9000\n  timeout: 1m30s\nfeedback:\n  host: localhost\nlogging:\n  level: debug"
        )
        .unwrap();

        let config = Config::from_path(file.path()).unwrap();
        assert_eq!(config.upstream_port(), 9000);
        assert_eq!(config.timeout(), Duration::from_secs(90));
        assert_eq!(config.feedback_addr(), Some(("localhost", 8125)));
        assert_eq!(config.logging().level, relay_log::Level::Debug);
        assert_eq!(config.path(), Some(file.path()));
    }

    #[test]
    fn test_from_path_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");

        let error = Config::from_path(&path).unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::CouldNotOpenFile);
        assert!(error.source().is_some());
        assert_eq!(
            error.to_string(),
            format!("could not open config file (file {})", path.display())
        );
    }

    #[test]
    fn test_from_path_bad_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "upstream:\n  port: not-a-port").unwrap();

        let error = Config::from_path(file.path()).unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::BadYaml);
    }

    #[test]
    fn test_apply_override() {
        let mut config = Config::default();
        config
            .apply_override(OverridableConfig {
                host: Some("localhost".to_owned()),
                port: Some("8001".to_owned()),
                token: Some("secret".to_owned()),
                timeout: Some("10s".to_owned()),
                prefix: Some("blarg.".to_owned()),
                timers: Some("gauge_absolute".to_owned()),
                feedback_port: Some("0".to_owned()),
                log_level: Some("trace".to_owned()),
                log_format: Some("json".to_owned()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(config.upstream_host(), "localhost");
        assert_eq!(config.upstream_port(), 8001);
        assert_eq!(config.token(), Some("secret"));
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.key_prefix(), "blarg.");
        assert_eq!(config.key_postfix(), "");
        assert_eq!(config.timer_action(), TimerAction::GaugeAbsolute);
        assert_eq!(config.feedback_addr(), None);
        assert_eq!(config.logging().level, relay_log::Level::Trace);
        assert_eq!(config.logging().format, relay_log::LogFormat::Json);
    }

    #[test]
    fn test_apply_override_invalid() {
        let mut config = Config::default();
        let error = config
            .apply_override(OverridableConfig {
                port: Some("eighty".to_owned()),
                ..Default::default()
            })
            .unwrap_err();

        assert_eq!(error.kind(), ConfigErrorKind::InvalidValue);
        assert_eq!(error.to_string(), "invalid config value (field port)");

        let error = config
            .apply_override(OverridableConfig {
                timers: Some("increment".to_owned()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(error.to_string(), "invalid config value (field timers)");

        let error = config
            .apply_override(OverridableConfig {
                timeout: Some("18446744073709551615".to_owned()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(error.to_string(), "invalid config value (field timeout)");
        assert_eq!(config.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = Config::from_json_value(serde_json::json!({
            "upstream": {"token": "hunter2"},
        }))
        .unwrap();

        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[redacted]"));
    }
}
