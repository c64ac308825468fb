/*
 * Console Logger
 *
 * Prints every record at or above the configured level as
 * `[LEVEL] message` on stdout, so library logging of both simulated cores
 * shows up interleaved with the demo output.
 */

use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};

/// Logger writing to the process console.
struct ConsoleLogger;

impl log::Log for ConsoleLogger {
    /// Checks if the given log level is enabled.
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    /// Logs the record by printing it to the console.
    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            if record.level() <= Level::Info {
                println!("[{}] {}", record.level(), record.args());
            } else {
                println!("[{}] {}: {}", record.level(), record.target(), record.args());
            }
        }
    }

    /// Flushes the logger (no-op in this case).
    fn flush(&self) {}
}

/// The ConsoleLogger instance used for logging.
static LOGGER: ConsoleLogger = ConsoleLogger;

/// Installs the logger with `level` as the maximum level.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER).map(|()| log::set_max_level(level))
}
