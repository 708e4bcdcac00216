//! Diagnostic console
//!
//! Board code attaches a `DebugPrint` sink (UART, RTT, semihosting) to the
//! global `CONSOLE`; `print!`/`println!` and the `log` facade both end up
//! there. With no sink attached, output is dropped.

use alloc::boxed::Box;
use core::fmt;
use lazy_static::lazy_static;
use log::{LevelFilter, Metadata, Record};
use spin::Mutex;

/// Line-oriented output sink supplied by the board
pub trait DebugPrint: Send {
    fn print(&mut self, s: &str);
}

/// Console state behind the global lock
pub struct Console {
    sink: Option<Box<dyn DebugPrint>>,
}

impl Console {
    const fn new() -> Self {
        Self { sink: None }
    }

    /// Route output to `sink`, returning the previous one
    pub fn attach(&mut self, sink: Box<dyn DebugPrint>) -> Option<Box<dyn DebugPrint>> {
        self.sink.replace(sink)
    }

    /// Stop routing output anywhere
    pub fn detach(&mut self) -> Option<Box<dyn DebugPrint>> {
        self.sink.take()
    }

    pub fn is_attached(&self) -> bool {
        self.sink.is_some()
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if let Some(sink) = self.sink.as_mut() {
            sink.print(s);
        }
        Ok(())
    }
}

lazy_static! {
    pub static ref CONSOLE: Mutex<Console> = Mutex::new(Console::new());
}

/// `log` backend that forwards records to the console
pub struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl ConsoleLogger {
    /// Behaves like env-logger RUST_LOG, but at compile time
    pub fn max_log_level_from_env() -> LevelFilter {
        match option_env!("NETIF_LOG") {
            Some("off") => LevelFilter::Off,
            Some("error") => LevelFilter::Error,
            Some("warn") => LevelFilter::Warn,
            Some("info") => LevelFilter::Info,
            Some("debug") => LevelFilter::Debug,
            Some("trace") => LevelFilter::Trace,
            _ => LevelFilter::Info,
        }
    }
}

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level().to_level_filter() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            crate::println!("{}: {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Install `ConsoleLogger` as the global logger
///
/// Fails if another logger was installed first.
pub fn init_logger(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    log::set_logger(&LOGGER).map(|()| log::set_max_level(level))
}

/// Install `ConsoleLogger` with the level from `NETIF_LOG`
pub fn init_logger_from_env() -> Result<(), log::SetLoggerError> {
    init_logger(ConsoleLogger::max_log_level_from_env())
}
