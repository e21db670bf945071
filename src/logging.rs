// logging.rs
// tracing subscriber setup shared by the server and the CLI

use tracing::Level;

use crate::config_loader::LogConfig;

/// Parse a level name, defaulting to INFO for anything unrecognised.
pub fn parse_level(name: &str) -> Level {
    match name.trim().to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(config: &LogConfig) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(parse_level(&config.level))
        .with_target(true)
        .try_init();
}
