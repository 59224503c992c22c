use std::fmt;
use std::sync::Mutex;

/// Subsystem a log line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTag {
    Generic,
    HomeAssistant,
    Shelly,
    Config,
    Modbus,
}

impl fmt::Display for LogTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogTag::Generic => "GENERIC",
            LogTag::HomeAssistant => "HA",
            LogTag::Shelly => "SHELLY",
            LogTag::Config => "CONFIG",
            LogTag::Modbus => "MODBUS",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Warn,
}

/// Logging capability handed to the acquisition cycle and the Modbus service.
pub trait EventLog: Send + Sync {
    fn record(&self, severity: Severity, tag: LogTag, message: &str);

    fn debug(&self, tag: LogTag, message: &str) {
        self.record(Severity::Debug, tag, message);
    }

    fn info(&self, tag: LogTag, message: &str) {
        self.record(Severity::Info, tag, message);
    }

    fn warn(&self, tag: LogTag, message: &str) {
        self.record(Severity::Warn, tag, message);
    }
}

/// Forwards records to the `tracing` subscriber installed by `main`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl EventLog for TracingLog {
    fn record(&self, severity: Severity, tag: LogTag, message: &str) {
        match severity {
            Severity::Debug => tracing::debug!(tag = %tag, "{message}"),
            Severity::Info => tracing::info!(tag = %tag, "{message}"),
            Severity::Warn => tracing::warn!(tag = %tag, "{message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub severity: Severity,
    pub tag: LogTag,
    pub message: String,
}

/// Keeps every record in memory so tests can assert on what was logged.
#[derive(Debug, Default)]
pub struct RecordingLog {
    records: Mutex<Vec<LogRecord>>,
}

impl RecordingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, tag: LogTag, needle: &str) -> bool {
        self.records()
            .iter()
            .any(|r| r.tag == tag && r.message.contains(needle))
    }
}

impl EventLog for RecordingLog {
    fn record(&self, severity: Severity, tag: LogTag, message: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.push(LogRecord {
                severity,
                tag,
                message: message.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_log_captures_in_order() {
        let log = RecordingLog::new();
        log.info(LogTag::Shelly, "first");
        log.warn(LogTag::Modbus, "second");

        let records = log.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].severity, Severity::Info);
        assert_eq!(records[1].tag, LogTag::Modbus);
        assert!(log.contains(LogTag::Modbus, "sec"));
        assert!(!log.contains(LogTag::Shelly, "second"));
    }

    #[test]
    fn test_tag_names() {
        assert_eq!(LogTag::HomeAssistant.to_string(), "HA");
        assert_eq!(LogTag::Modbus.to_string(), "MODBUS");
    }
}
