use relay_config::Config;

/// Initializes logging from the `logging` section of the config.
pub fn init_logging(config: &Config) {
    relay_log::init(config.logging());
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    match config.path() {
        Some(path) => relay_log::info!("launching statsite relay with config {}", path.display()),
        None => relay_log::info!("launching statsite relay without config file"),
    }

    relay_log::info!(
        "  collector: {}:{}",
        config.upstream_host(),
        config.upstream_port()
    );
    relay_log::info!("  timeout: {:?}", config.timeout());
    relay_log::info!("  timers: {}", config.timer_action());

    match config.feedback_addr() {
        Some((host, port)) => relay_log::info!("  feedback: {host}:{port}"),
        None => relay_log::info!("  feedback: -"),
    }

    relay_log::info!("  log level: {}", config.logging().level);
}
