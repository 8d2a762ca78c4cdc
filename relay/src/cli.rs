use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use relay_config::{Config, OverridableConfig};

use crate::setup;

/// Forwards statsite sink output to an Instrumental collector.
///
/// Reads statsite records from stdin, sends them to the collector and reports forwarded gauges
/// back to statsite. Every option can also be set through the environment.
#[derive(Debug, Parser)]
#[command(name = "statsite-relay", version, max_term_width = 79)]
struct Cli {
    /// The authentication token of the collector project.
    #[arg(env = "STATSITE_RELAY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Path to a YAML config file.
    #[arg(short, long, value_name = "PATH", env = "STATSITE_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// The host name of the collector.
    #[arg(long, env = "STATSITE_RELAY_HOST")]
    host: Option<String>,

    /// The TCP port of the collector.
    #[arg(long, env = "STATSITE_RELAY_PORT")]
    port: Option<String>,

    /// The I/O budget of a collector session, for example `30s` or `1m30s`.
    #[arg(long, env = "STATSITE_RELAY_TIMEOUT")]
    timeout: Option<String>,

    /// The UDP port statsite listens on for gauge feedback, `0` disables feedback.
    #[arg(long, value_name = "PORT", env = "STATSITE_RELAY_STATSITE_PORT")]
    statsite_port: Option<String>,

    /// The host statsite listens on for gauge feedback.
    #[arg(long, value_name = "HOST", env = "STATSITE_RELAY_STATSITE_HOST")]
    statsite_host: Option<String>,

    /// Prepended to every metric key.
    #[arg(long, env = "STATSITE_RELAY_PREFIX")]
    prefix: Option<String>,

    /// Appended to every metric key.
    #[arg(long, env = "STATSITE_RELAY_POSTFIX")]
    postfix: Option<String>,

    /// The collector verb for timers: `gauge` or `gauge_absolute`.
    #[arg(long, value_name = "VERB", env = "STATSITE_RELAY_TIMERS")]
    timers: Option<String>,

    /// The log level: `error`, `warn`, `info`, `debug`, `trace` or `off`.
    #[arg(long, value_name = "LEVEL", env = "STATSITE_RELAY_LOG_LEVEL")]
    log_level: Option<String>,

    /// The log format: `auto`, `pretty`, `simplified` or `json`.
    #[arg(long, value_name = "FORMAT", env = "STATSITE_RELAY_LOG_FORMAT")]
    log_format: Option<String>,
}

impl Cli {
    /// Loads the config file, if any, and applies all command line overrides on top.
    fn load_config(self) -> Result<Config> {
        let mut config = match self.config {
            Some(ref path) => Config::from_path(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => Config::default(),
        };

        config.apply_override(OverridableConfig {
            host: self.host,
            port: self.port,
            token: self.token,
            timeout: self.timeout,
            prefix: self.prefix,
            postfix: self.postfix,
            timers: self.timers,
            feedback_host: self.statsite_host,
            feedback_port: self.statsite_port,
            log_level: self.log_level,
            log_format: self.log_format,
        })?;

        Ok(config)
    }
}

/// Prints a message for the user and terminates with a failure status.
#[allow(clippy::print_stderr)]
fn exit_with(message: impl fmt::Display) -> ! {
    eprintln!("{message}");
    process::exit(1);
}

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let config = Cli::parse().load_config()?;

    let Some(token) = config.token() else {
        let usage = Cli::command().render_usage();
        exit_with(format_args!("Missing authentication token\n\n{usage}"));
    };

    setup::init_logging(&config);
    setup::dump_spawn_infos(&config);

    match relay_bridge::run(&config, io::stdin().lock()) {
        Ok(_) => Ok(()),
        Err(error) if error.is_authentication_failure() => {
            exit_with(format_args!("Authentication with token {token} was declined"))
        }
        Err(error) => Err(error.into()),
    }
}
