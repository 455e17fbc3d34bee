use lazy_static::lazy_static;
use log::{self, Level, LevelFilter, Log, Metadata, Record};
use std::fmt;
use std::thread;
use std::time::Instant;

lazy_static! {
    static ref START: Instant = Instant::now();
}

// print with color!
// e.g.: \x1b[31mhello world\x1b[0m
// ERROR: red, 31
// WARN: yellow, 93
// INFO: blue, 34
// DEBUG: green, 32
// TRACE: grey, 90
// level: ERROR > WARN > INFO > DEBUG > TRACE
pub fn init(level: Option<&str>) {
    static LOGGER: SimpleLogger = SimpleLogger;
    lazy_static::initialize(&START);
    // 已经安装过 logger 时只调整级别
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(parse_level(level.or(option_env!("LOG"))));
}

/// Parses a level name; unknown or missing names fall back to `INFO`.
pub fn parse_level(level: Option<&str>) -> LevelFilter {
    match level.map(str::to_ascii_uppercase).as_deref() {
        Some("ERROR") => LevelFilter::Error,
        Some("WARN") => LevelFilter::Warn,
        Some("INFO") => LevelFilter::Info,
        Some("DEBUG") => LevelFilter::Debug,
        Some("TRACE") => LevelFilter::Trace,
        Some("OFF") => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

/// Add escape sequence to print with color in Linux console
macro_rules! with_color {
    ($args: ident, $color_code: ident) => {{
        format_args!("\u{1B}[{}m{}\u{1B}[0m", $color_code as u8, $args)
    }};
}

fn print_in_color(args: fmt::Arguments, color_code: u8) {
    eprintln!("{}", with_color!(args, color_code));
}

struct SimpleLogger;

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }
    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // 线程名即进程名 (pid<N>), 相当于内核日志里的 cpu id
        let current = thread::current();
        print_in_color(
            format_args!(
                "[{:>5}][{}][{:>9.4}] {}",
                record.level(),
                current.name().unwrap_or("?"),
                START.elapsed().as_secs_f64(),
                record.args()
            ),
            level_to_color_code(record.level()),
        );
    }
    fn flush(&self) {}
}

fn level_to_color_code(level: Level) -> u8 {
    match level {
        Level::Error => 31, // Red
        Level::Warn => 93,  // Yellow
        Level::Info => 34,  // Blue
        Level::Debug => 32, // Green
        Level::Trace => 90, // Grey
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names() {
        assert_eq!(parse_level(Some("trace")), LevelFilter::Trace);
        assert_eq!(parse_level(Some("OFF")), LevelFilter::Off);
        assert_eq!(parse_level(Some("verbose")), LevelFilter::Info);
        assert_eq!(parse_level(None), LevelFilter::Info);
    }
}
