pub mod serial;
pub mod registers;
pub mod device;
pub mod modbus;
pub mod config;
pub mod controller;
pub mod commands;

use std::path::PathBuf;

use anyhow::Context;
use config::AppSettings;

/// Settings file used when no path is given on the command line
pub const DEFAULT_SETTINGS_FILE: &str = "modbus-slave.json";

pub fn run() -> anyhow::Result<()> {
  let settings_path = std::env::args()
    .nth(1)
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
  let settings = AppSettings::load(&settings_path)
    .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;

  // RUST_LOG wins over the level in the settings file
  env_logger::Builder::new()
    .filter_level(settings.level_filter())
    .parse_default_env()
    .init();
  log::info!("Modbus slave starting, settings at {}", settings_path.display());

  let runtime = tokio::runtime::Runtime::new().context("Failed to start the async runtime")?;
  runtime.block_on(commands::run_console(settings, settings_path))
}
