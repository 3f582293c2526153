//! Output sinks. Every sink receives fully-formatted [`LogRecord`]s; the
//! [`crate::Logger`] is responsible for the tag/level filtering decision
//! before a record ever reaches one.

use std::io::Write as _;
use zorp_util::time::{format_syslog_timestamp, unix_seconds_now};

#[derive(Debug, Clone)]
pub struct LogRecord<'a> {
    pub tag: &'a str,
    pub level: u32,
    pub message: &'a str,
}

pub trait Sink: Send + Sync {
    fn emit(&self, record: &LogRecord<'_>);
}

/// Writes `Mon DD HH:MM:SS tag[level]: message` to stderr. This is the
/// default sink: every new `Logger` starts with one of these attached so
/// nothing is silently dropped before configuration runs.
pub struct StderrSink;

impl Sink for StderrSink {
    fn emit(&self, record: &LogRecord<'_>) {
        let ts = format_syslog_timestamp(unix_seconds_now());
        let mut stderr = std::io::stderr();
        let _ = writeln!(
            stderr,
            "{ts} {}[{}]: {}",
            record.tag, record.level, record.message
        );
    }
}

/// A sink for a platform debug channel (e.g. `OutputDebugString` on
/// Windows). This workspace only targets platforms with a real stderr, so
/// it is implemented as an alias of [`StderrSink`] tagged for clarity at
/// the call site; a native backend can replace the body without touching
/// callers.
pub struct DebugChannelSink;

impl Sink for DebugChannelSink {
    fn emit(&self, record: &LogRecord<'_>) {
        StderrSink.emit(record);
    }
}

#[cfg(feature = "syslog")]
pub struct SyslogSink {
    writer: parking_lot::Mutex<syslog::Logger<syslog::LoggerBackend, syslog::Formatter3164>>,
}

#[cfg(feature = "syslog")]
impl SyslogSink {
    pub fn new(process_name: &str) -> std::io::Result<Self> {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_DAEMON,
            hostname: None,
            process: process_name.into(),
            pid: std::process::id(),
        };
        let writer = syslog::unix(formatter)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(Self {
            writer: parking_lot::Mutex::new(writer),
        })
    }
}

#[cfg(feature = "syslog")]
impl Sink for SyslogSink {
    fn emit(&self, record: &LogRecord<'_>) {
        use syslog::Severity;
        // Map the 0..=7 verbosity scale onto syslog severities; anything
        // above debug-equivalent still gets logged at debug rather than
        // dropped, since severity mapping is advisory only.
        let severity = match record.level {
            0 => Severity::LOG_ERR,
            1 => Severity::LOG_WARNING,
            2 => Severity::LOG_NOTICE,
            3 => Severity::LOG_INFO,
            _ => Severity::LOG_DEBUG,
        };
        let mut writer = self.writer.lock();
        let _ = match severity {
            Severity::LOG_ERR => writer.err(record.message),
            Severity::LOG_WARNING => writer.warning(record.message),
            Severity::LOG_NOTICE => writer.notice(record.message),
            Severity::LOG_INFO => writer.info(record.message),
            _ => writer.debug(record.message),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_sink_does_not_panic() {
        StderrSink.emit(&LogRecord {
            tag: "core.test",
            level: 3,
            message: "hello",
        });
    }
}
