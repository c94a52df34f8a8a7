//! ConsoleCast - capture and streaming daemon
//!
//! ## Transports
//!
//! - **USB**: vendor-class device-serial channel; the host selects streams with
//!   a 4-byte request code
//! - **TCP**: video on port 9911, audio on port 9922, one client each

use consolecast::app::ConsoleCastApp;
use consolecast::config::AppConfig;
use consolecast::error::{Error, Result};
use std::env;

/// Default configuration file location
const DEFAULT_CONFIG_PATH: &str = "/etc/consolecast.toml";

/// Parse config path from command line arguments.
///
/// Supports:
/// - `consolecast <path>` (positional)
/// - `consolecast --config <path>` (flag-based)
/// - `consolecast -c <path>` (short flag)
///
/// Returns `None` if not specified.
fn parse_config_path(args: &[String]) -> Option<String> {
    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return Some(args[1].clone());
    }

    None
}

fn load_config(args: &[String]) -> Result<AppConfig> {
    match parse_config_path(args) {
        // An explicitly named file must exist
        Some(path) => AppConfig::from_file(&path),
        None => AppConfig::load_or_default(DEFAULT_CONFIG_PATH),
    }
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let config = load_config(&args)?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("ConsoleCast v{} starting...", env!("CARGO_PKG_VERSION"));
    log::info!("Transport mode: {:?}", config.daemon.mode);

    let mut app = ConsoleCastApp::new(config);

    let running = app.running();
    let hub = app.hub();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        running.stop();
        hub.force_unlock_all();
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    log::info!("ConsoleCast running. Press Ctrl-C to stop.");
    app.run()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_config_path() {
        assert_eq!(parse_config_path(&args(&["consolecast"])), None);
        assert_eq!(
            parse_config_path(&args(&["consolecast", "/tmp/a.toml"])),
            Some("/tmp/a.toml".to_string())
        );
        assert_eq!(
            parse_config_path(&args(&["consolecast", "--config", "/tmp/b.toml"])),
            Some("/tmp/b.toml".to_string())
        );
        assert_eq!(
            parse_config_path(&args(&["consolecast", "-v", "-c", "/tmp/c.toml"])),
            Some("/tmp/c.toml".to_string())
        );
        assert_eq!(parse_config_path(&args(&["consolecast", "-c"])), None);
    }
}
