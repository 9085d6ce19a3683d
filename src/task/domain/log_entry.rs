//! Timestamped log lines and the timezone they are rendered in.

use super::ParseLogEntryError;
use chrono::{DateTime, FixedOffset, SecondsFormat};
use chrono_tz::Tz;
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timezone used for record timestamps and log prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTimezone(Tz);

impl TaskTimezone {
    /// Coordinated Universal Time.
    pub const UTC: Self = Self(Tz::UTC);

    /// Wraps an IANA timezone.
    #[must_use]
    pub const fn new(timezone: Tz) -> Self {
        Self(timezone)
    }

    /// Parses an IANA timezone name such as `Asia/Seoul`.
    ///
    /// Returns `None` when the name is unknown.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        name.trim().parse::<Tz>().ok().map(Self)
    }

    /// Returns the IANA name of the timezone.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.0.name()
    }

    /// Returns the current clock time rendered in this timezone.
    #[must_use]
    pub fn now(self, clock: &impl Clock) -> DateTime<FixedOffset> {
        clock.utc().with_timezone(&self.0).fixed_offset()
    }
}

impl Default for TaskTimezone {
    fn default() -> Self {
        Self::UTC
    }
}

impl fmt::Display for TaskTimezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.name())
    }
}

/// Log line attached to a task, stored in wire format
/// `<RFC 3339 timestamp with offset>,<message>`.
///
/// For example `2025-11-17T10:00:16.515926+09:00,worker started`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogEntry(String);

impl LogEntry {
    /// Formats a message with the given timestamp prefix.
    #[must_use]
    pub fn new(at: DateTime<FixedOffset>, message: impl AsRef<str>) -> Self {
        Self(format!(
            "{},{}",
            at.to_rfc3339_opts(SecondsFormat::Micros, false),
            message.as_ref()
        ))
    }

    /// Validates a raw wire-format log line.
    ///
    /// # Errors
    ///
    /// Returns [`ParseLogEntryError`] when the line lacks a comma-separated
    /// RFC 3339 timestamp prefix.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ParseLogEntryError> {
        let entry = Self(raw.into());
        if entry.timestamp().is_none() {
            return Err(ParseLogEntryError(entry.0));
        }
        Ok(entry)
    }

    /// Returns the raw wire-format line.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the timestamp prefix, if it parses.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<FixedOffset>> {
        let (prefix, _) = self.0.split_once(',')?;
        DateTime::parse_from_rfc3339(prefix).ok()
    }

    /// Returns the message text after the timestamp prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        self.0.split_once(',').map_or(self.0.as_str(), |(_, message)| message)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
