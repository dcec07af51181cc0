use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, set_logger, set_max_level};
use spin::Once;

/// Sink that puts one formatted line on the kernel console.
pub type ConsoleFn = fn(core::fmt::Arguments);

pub struct Logger {
    console: Once<ConsoleFn>,
}

static LOGGER: Logger = Logger {
    console: Once::new(),
};

impl Log for Logger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        self.console.is_completed()
    }

    fn log(&self, record: &Record) {
        let Some(console) = self.console.get() else {
            return;
        };
        let color = match record.level() {
            Level::Error => 31, // Red
            Level::Warn => 93,  // BrightYellow
            Level::Info => 20,  // White
            Level::Debug => 32, // Green
            Level::Trace => 90, // BrightBlack
        };
        console(format_args!(
            "\u{1B}[{}m[{:}] {}\u{1B}[0m\n",
            color,
            record.level(),
            record.args(),
        ));
    }

    fn flush(&self) {}
}

/// Route the `log` facade to `console`. Fails if another logger was installed first.
pub fn init(console: ConsoleFn, level: LevelFilter) -> Result<(), SetLoggerError> {
    LOGGER.console.call_once(|| console);
    set_logger(&LOGGER)?;
    set_max_level(level);
    Ok(())
}

/// Improved debug macro,
/// only compiled in debug mode.
macro_rules! debug_ex {
    // debug_ex!(target: "my_target", "a {} event", "log")
    (target: $target:expr, $($arg:tt)+) => {
        #[cfg(debug_assertions)]
        {
            ::log::log!(target: $target, ::log::Level::Debug, $($arg)+)
        }
    };

    // debug_ex!("a {} event", "log")
    ($($arg:tt)+) => {
        #[cfg(debug_assertions)]
        {
            ::log::log!(::log::Level::Debug, $($arg)+)
        }
    };
}
pub(crate) use debug_ex;

#[cfg(test)]
mod tests {
    use super::*;
    use std::{string::String, vec::Vec};

    static CAPTURED: spin::Mutex<Vec<String>> = spin::Mutex::new(Vec::new());

    fn capture(args: core::fmt::Arguments) {
        CAPTURED.lock().push(std::format!("{}", args));
    }

    #[test]
    fn logger_prints_colored_lines() {
        init(capture, LevelFilter::Debug).unwrap();
        log::warn!("relation type {} is NOT IMPLEMENTED", 6);
        debug_ex!("debug {}", "trace");
        let lines = CAPTURED.lock();
        assert!(
            lines
                .iter()
                .any(|l| l.starts_with("\u{1B}[93m[WARN] relation type 6"))
        );
        #[cfg(debug_assertions)]
        assert!(lines.iter().any(|l| l.contains("[DEBUG] debug trace")));
    }
}
