//! 日志能力接口。
//!
//! 分发层不直接依赖全局日志器，而是在构造服务器时注入一个 `Logger`。
//! 未注入时使用 `ConsoleLogger`，它转发到 `log` 门面，由 log4rs 决定输出目的地。

use std::fmt;

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Log,
    Error,
    Fatal,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Log => write!(f, "LOG"),
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Fatal => write!(f, "FATAL"),
        }
    }
}

/// 分级日志接口。实现者不得 panic。
#[cfg_attr(test, mockall::automock)]
pub trait Logger: Send + Sync {
    fn write(&self, level: LogLevel, message: &str);

    fn trace(&self, message: &str) {
        self.write(LogLevel::Trace, message)
    }

    fn debug(&self, message: &str) {
        self.write(LogLevel::Debug, message)
    }

    fn info(&self, message: &str) {
        self.write(LogLevel::Info, message)
    }

    fn log(&self, message: &str) {
        self.write(LogLevel::Log, message)
    }

    fn error(&self, message: &str) {
        self.write(LogLevel::Error, message)
    }

    fn fatal(&self, message: &str) {
        self.write(LogLevel::Fatal, message)
    }
}

/// 转发到 `log` 门面的默认实现
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleLogger;

impl Logger for ConsoleLogger {
    fn write(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => log::trace!("{}", message),
            LogLevel::Debug => log::debug!("{}", message),
            LogLevel::Info | LogLevel::Log => log::info!("{}", message),
            LogLevel::Error => log::error!("{}", message),
            LogLevel::Fatal => log::error!("FATAL {}", message),
        }
    }
}

/// 丢弃所有日志
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn write(&self, _level: LogLevel, _message: &str) {}
}
