//! Progress reporting for a book run.
//!
//! Steps announce phases and skips, the artifact store reports adopted or
//! edited files and the pipeline reports status transitions. All of it goes
//! through a [`LogSink`] so the core never picks a logging backend itself.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::message::Message;

pub const MESSAGE_LOG_FILE_NAME: &str = "messages.txt";

/// How loud a progress line is. `Debug` is per-line chatter while drafting
/// chapters, `Warn` flags artifacts the store could not take at face value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress line, e.g. "Chapter 3 already exists. Skipping."
#[derive(Clone, Debug, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

/// Receives the progress of a book run. Stores, steps and the pipeline
/// borrow one; the CLI hands them a [`FacadeLogSink`].
pub trait LogSink: Send + Sync {
    fn log(&self, record: LogRecord);
}

pub type SharedLogSink = Arc<dyn LogSink>;

/// Drops everything. Used when a store is opened without a reporter.
#[derive(Clone, Copy, Default)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn log(&self, _record: LogRecord) {}
}

/// Keeps every record in memory so tests can assert on skips and warnings.
#[derive(Default)]
pub struct VecLogSink {
    records: Mutex<Vec<LogRecord>>,
}

impl VecLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.lock().clone()
    }

    /// Messages logged at `level` or above.
    pub fn messages_at_least(&self, level: LogLevel) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|record| record.level >= level)
            .map(|record| record.message.clone())
            .collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lock()
            .iter()
            .any(|record| record.message.contains(needle))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LogRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LogSink for VecLogSink {
    fn log(&self, record: LogRecord) {
        self.lock().push(record);
    }
}

/// Sends progress to the `log` facade, where the CLI's subscriber prints it.
#[derive(Clone)]
pub struct FacadeLogSink {
    target: &'static str,
}

impl FacadeLogSink {
    pub fn new(target: &'static str) -> Self {
        Self { target }
    }
}

impl Default for FacadeLogSink {
    fn default() -> Self {
        Self::new("book")
    }
}

impl LogSink for FacadeLogSink {
    fn log(&self, record: LogRecord) {
        let level = log::Level::from(record.level);
        log::log!(target: self.target, level, "{}", record.message);
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageLogMode {
    /// Truncate the log the first time it is written during this process.
    Overwrite,
    /// Always append to whatever is already there.
    Persistent,
}

/// Mirror of every request and answer exchanged with a model.
#[derive(Debug)]
pub struct MessageLog {
    path: PathBuf,
    mode: MessageLogMode,
    truncated: AtomicBool,
    lock: Mutex<()>,
}

impl MessageLog {
    pub fn new(path: impl Into<PathBuf>, mode: MessageLogMode) -> Self {
        Self {
            path: path.into(),
            mode,
            truncated: AtomicBool::new(false),
            lock: Mutex::new(()),
        }
    }

    pub fn in_dir(dir: &Path, mode: MessageLogMode) -> Self {
        Self::new(dir.join(MESSAGE_LOG_FILE_NAME), mode)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> MessageLogMode {
        self.mode
    }

    pub fn write_messages(
        &self,
        label: &str,
        messages: &[Message],
        request_tokens: usize,
    ) -> io::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut file = self.open()?;
        for message in messages {
            writeln!(file, "{label}: {}: {}", message.role, message.content)?;
        }
        writeln!(file, "Length of message in tokens: {request_tokens}\n")?;
        file.flush()
    }

    fn open(&self) -> io::Result<File> {
        let truncate = self.mode == MessageLogMode::Overwrite
            && !self.truncated.swap(true, Ordering::SeqCst);
        let mut options = OpenOptions::new();
        options.create(true);
        if truncate {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        options.open(&self.path)
    }
}
