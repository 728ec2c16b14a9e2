use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;

use crate::config::LogLevel;
use crate::error::{ReporterError, Result};

fn level_filter(level: &LogLevel) -> LevelFilter {
    match level {
        LogLevel::Error => LevelFilter::Error,
        LogLevel::Warn => LevelFilter::Warn,
        LogLevel::Info => LevelFilter::Info,
        LogLevel::Debug => LevelFilter::Debug,
        LogLevel::Trace => LevelFilter::Trace,
    }
}

/// Initialize the logging system.
/// `RUST_LOG`, when set, refines the configured level per module.
pub fn init(level: &LogLevel) -> Result<()> {
    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .filter(None, level_filter(level))
        .parse_default_env();

    builder
        .try_init()
        .map_err(|e| ReporterError::Config(format!("Failed to initialise logging: {}", e)))?;
    Ok(())
}
