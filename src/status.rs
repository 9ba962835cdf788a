//! Operator-facing status lines.
//!
//! Every unit of work reports what happened as a `StatusLine`. Lines travel over
//! an unbounded channel so background jobs never block on the terminal, and the
//! front end renders them in arrival order with a wall-clock prefix.

use std::fmt;

use chrono::Local;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Ok,
    Warn,
    Fail,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusLine {
    pub level: Level,
    pub message: String,
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            Level::Ok => write!(f, "✓ {}", self.message),
            Level::Warn => write!(f, "⚠ {}", self.message),
            Level::Fail => write!(f, "✗ {}", self.message),
            Level::Info => write!(f, "{}", self.message),
        }
    }
}

impl StatusLine {
    /// `[HH:MM:SS] <line>` using local time.
    pub fn render(&self) -> String {
        format!("[{}] {}", Local::now().format("%H:%M:%S"), self)
    }
}

/// Sending half of the status channel. Cheap to clone into workers.
#[derive(Debug, Clone)]
pub struct StatusLog {
    tx: mpsc::UnboundedSender<StatusLine>,
}

impl StatusLog {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StatusLine>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// A log whose lines go nowhere (still traced).
    pub fn sink() -> Self {
        let (log, _rx) = Self::channel();
        log
    }

    pub fn emit(&self, level: Level, message: impl Into<String>) {
        let line = StatusLine {
            level,
            message: message.into(),
        };
        debug!(level = ?line.level, status = %line);
        // Receiver gone means nobody is watching; the work itself carries on.
        let _ = self.tx.send(line);
    }

    pub fn ok(&self, message: impl Into<String>) {
        self.emit(Level::Ok, message)
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(Level::Warn, message)
    }

    pub fn fail(&self, message: impl Into<String>) {
        self.emit(Level::Fail, message)
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(Level::Info, message)
    }

    /// Three-line `=====` banner around `title`.
    pub fn banner(&self, title: impl Into<String>) {
        let rule = "=".repeat(50);
        self.info(rule.clone());
        self.info(title);
        self.info(rule);
    }

    /// Same as `banner` but the title line is a success line.
    pub fn banner_ok(&self, title: impl Into<String>) {
        let rule = "=".repeat(50);
        self.info(rule.clone());
        self.ok(title);
        self.info(rule);
    }
}

#[cfg(test)]
pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<StatusLine>) -> Vec<StatusLine> {
    let mut lines = Vec::new();
    while let Ok(line) = rx.try_recv() {
        lines.push(line);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes_are_distinct() {
        let ok = StatusLine { level: Level::Ok, message: "done".into() };
        let warn = StatusLine { level: Level::Warn, message: "hmm".into() };
        let fail = StatusLine { level: Level::Fail, message: "broke".into() };
        let info = StatusLine { level: Level::Info, message: "note".into() };
        assert_eq!(ok.to_string(), "✓ done");
        assert_eq!(warn.to_string(), "⚠ hmm");
        assert_eq!(fail.to_string(), "✗ broke");
        assert_eq!(info.to_string(), "note");
    }

    #[test]
    fn test_render_has_clock_prefix() {
        let line = StatusLine { level: Level::Ok, message: "x".into() };
        let rendered = line.render();
        assert!(rendered.starts_with('['));
        assert_eq!(&rendered[9..11], "] ");
        assert!(rendered.ends_with("✓ x"));
    }

    #[test]
    fn test_lines_arrive_in_order() {
        let (log, mut rx) = StatusLog::channel();
        log.info("first");
        log.fail("second");
        log.banner("third");
        let lines = drain(&mut rx);
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0].message, "first");
        assert_eq!(lines[1].level, Level::Fail);
        assert_eq!(lines[3].message, "third");
    }

    #[test]
    fn test_closed_receiver_is_harmless() {
        let log = StatusLog::sink();
        log.ok("nobody listening");
    }
}
