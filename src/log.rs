//! The access log: one line per completed exchange.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone};

use crate::date::ClfDate;

/// Where to put the access log.
#[derive(Debug)]
pub enum LogSink {
    Stdout,
    File(File),
}

impl LogSink {
    /// Open `path` for appending, creating it if needed.
    pub fn file(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        Ok(Self::File(file))
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        match self {
            Self::Stdout => {
                let stdout = std::io::stdout();
                let mut stdout = stdout.lock();
                stdout.write_all(line.as_bytes())?;
                stdout.flush()
            }
            Self::File(file) => {
                file.write_all(line.as_bytes())?;
                file.flush()
            }
        }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::Stdout
    }
}

/// The fields of one access log line, except the timestamp, which is taken when the line is
/// written.
#[derive(Debug, Clone, Copy)]
pub struct AccessLogEntry<'a> {
    pub client: IpAddr,
    /// `None` if no user was authenticated.
    pub username: Option<&'a str>,
    pub method: &'a str,
    pub identifier: &'a str,
    pub version: &'a str,
    pub status: u16,
    pub bytes: u64,
}

impl<'a> AccessLogEntry<'a> {
    /// Format the complete line, including the trailing newline.
    pub fn line<Tz: TimeZone>(&self, now: DateTime<Tz>) -> String
    where
        Tz::Offset: fmt::Display,
    {
        format!(
            "{} - {} {} {} {} {} {} {}\n",
            self.client,
            LogEncoded(self.username.unwrap_or("-")),
            ClfDate(now),
            LogEncoded(or_dash(self.method)),
            LogEncoded(or_dash(self.identifier)),
            LogEncoded(or_dash(self.version)),
            self.status,
            self.bytes,
        )
    }
}

/// Fields missing from a bad request are logged as `-`.
fn or_dash(field: &str) -> &str {
    if field.is_empty() {
        "-"
    } else {
        field
    }
}

/// Shared access log. Every line is written with a single call while holding the lock, so lines
/// from concurrent connections never interleave.
#[derive(Debug, Default)]
pub struct AccessLog {
    sink: Mutex<LogSink>,
}

impl AccessLog {
    pub fn new(sink: LogSink) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    /// Append `entry`, stamped with the current local time.
    pub fn record(&self, entry: &AccessLogEntry) -> Result<()> {
        let line = entry.line(ClfDate::now().0);
        let mut sink = self
            .sink
            .lock()
            .map_err(|_| anyhow!("access log lock poisoned"))?;
        sink.write_line(&line)
            .context("failed to write access log")
    }
}

/// Encode string for logging. Logs should not contain control characters, spaces or double
/// quotes.
pub struct LogEncoded<'a>(pub &'a str);

impl<'a> fmt::Display for LogEncoded<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.0.chars() {
            if !c.is_ascii() || c.is_ascii_control() || c == '"' || c == ' ' {
                let mut buf = [0; 4];
                c.encode_utf8(&mut buf);
                for b in buf.iter().take(c.len_utf8()) {
                    write!(f, "%{:02X}", b)?;
                }
            } else {
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}
