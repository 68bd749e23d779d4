//! Logging macros. The first argument is the logger; an optional
//! `target: "..."` overrides the module path as the record target.

#[macro_export]
macro_rules! trace {
    ($logger:expr, target: $target:expr, $($arg:tt)*) => {
        $crate::log!($logger, target: $target, $crate::Level::Trace, $($arg)*)
    };
    ($logger:expr, $($arg:tt)*) => {
        $crate::log!($logger, $crate::Level::Trace, $($arg)*)
    };
}

#[macro_export]
macro_rules! debug {
    ($logger:expr, target: $target:expr, $($arg:tt)*) => {
        $crate::log!($logger, target: $target, $crate::Level::Debug, $($arg)*)
    };
    ($logger:expr, $($arg:tt)*) => {
        $crate::log!($logger, $crate::Level::Debug, $($arg)*)
    };
}

#[macro_export]
macro_rules! info {
    ($logger:expr, target: $target:expr, $($arg:tt)*) => {
        $crate::log!($logger, target: $target, $crate::Level::Info, $($arg)*)
    };
    ($logger:expr, $($arg:tt)*) => {
        $crate::log!($logger, $crate::Level::Info, $($arg)*)
    };
}

#[macro_export]
macro_rules! warn {
    ($logger:expr, target: $target:expr, $($arg:tt)*) => {
        $crate::log!($logger, target: $target, $crate::Level::Warn, $($arg)*)
    };
    ($logger:expr, $($arg:tt)*) => {
        $crate::log!($logger, $crate::Level::Warn, $($arg)*)
    };
}

#[macro_export]
macro_rules! error {
    ($logger:expr, target: $target:expr, $($arg:tt)*) => {
        $crate::log!($logger, target: $target, $crate::Level::Error, $($arg)*)
    };
    ($logger:expr, $($arg:tt)*) => {
        $crate::log!($logger, $crate::Level::Error, $($arg)*)
    };
}

#[macro_export]
macro_rules! log {
    ($logger:expr, target: $target:expr, $level:expr, $($arg:tt)*) => {{
        // Only format when the level is enabled
        if $logger.is_enabled($level) {
            let message = ::std::format!($($arg)*);
            $logger.log($level, $target, message);
        }
    }};
    ($logger:expr, $level:expr, $($arg:tt)*) => {
        $crate::log!($logger, target: ::std::module_path!(), $level, $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use crate::{Level, LogRingBuffer, Logger};

    #[test]
    fn test_trace_macro() {
        let ring = LogRingBuffer::new(100);
        let logger = Logger::new(Level::Trace).with_sink(ring.clone());

        trace!(logger, "test trace");
        trace!(logger, "formatted {}", "value");

        let records = ring.dump_records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.level == Level::Trace));
    }

    #[test]
    fn test_level_filtering_in_macros() {
        let ring = LogRingBuffer::new(100);
        let logger = Logger::new(Level::Warn).with_sink(ring.clone());

        trace!(logger, "trace msg");
        debug!(logger, "debug msg");
        info!(logger, "info msg");
        warn!(logger, "warn msg");
        error!(logger, "error msg");

        let records = ring.dump_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].level, Level::Warn);
        assert_eq!(records[1].level, Level::Error);
    }

    #[test]
    fn test_target_is_module_path() {
        let ring = LogRingBuffer::new(4);
        let logger = Logger::new(Level::Debug).with_sink(ring.clone());

        debug!(logger, "sections = {}", 6);

        let records = ring.dump_records();
        assert_eq!(records[0].target, module_path!());
        assert_eq!(records[0].message, "sections = 6");
    }

    #[test]
    fn test_explicit_target() {
        let ring = LogRingBuffer::new(4);
        let logger = Logger::new(Level::Trace).with_sink(ring.clone());

        trace!(logger, target: "smx::reader", "section {}", ".code");

        let records = ring.dump_records();
        assert_eq!(records[0].target, "smx::reader");
        assert_eq!(records[0].message, "section .code");
    }
}
