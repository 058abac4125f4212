//! Logging setup for the GPU mode switcher

use fern::Dispatch;
use log::LevelFilter;

/// Map the number of `-v` flags to a level filter
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Setup logging with the specified verbosity level
///
/// Log lines go to stderr so command output on stdout stays clean.
pub fn setup(verbosity: u8) -> Result<(), fern::InitError> {
    Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level_for(verbosity))
        // zbus is chatty at debug level
        .level_for("zbus", LevelFilter::Warn)
        .chain(std::io::stderr())
        .apply()?;

    Ok(())
}
