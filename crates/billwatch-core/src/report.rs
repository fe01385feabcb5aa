//! Report assembly
//!
//! Turns a billing snapshot into the message text. Formatting is a read-only
//! projection of the records; the only input besides them is the clock,
//! consulted when no record carries a timestamp.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::models::{AggregateBilling, BillingRecord, BillingSnapshot};

/// Header date format
const DATE_FORMAT: &str = "%Y/%m/%d";

/// Gap between an amount and its service name
const AMOUNT_SEPARATOR: &str = "$    ";

/// Prefix of the total line
const TOTAL_PREFIX: &str = "合計";

/// Source of the current time
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// A formatted billing report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    date: NaiveDate,
    lines: Vec<String>,
}

impl Report {
    /// Date the report is headed with
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Header, one line per service, then the total
    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl fmt::Display for Report {
    /// Every line, including the first, is preceded by a newline.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            write!(f, "\n{line}")?;
        }
        Ok(())
    }
}

/// Builds [`Report`]s
#[derive(Clone)]
pub struct ReportFormatter {
    clock: Arc<dyn Clock>,
}

impl Default for ReportFormatter {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl ReportFormatter {
    /// Create a formatter using the given clock for the date fallback
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Build the report for a snapshot
    pub fn build(&self, records: &[BillingRecord], aggregate: &AggregateBilling) -> Report {
        let date = self.report_date(records);

        let mut lines = Vec::with_capacity(records.len() + 2);
        lines.push(date.format(DATE_FORMAT).to_string());
        lines.extend(
            records
                .iter()
                .map(|record| format!("{:.2}{AMOUNT_SEPARATOR}{}", record.amount, record.service)),
        );
        lines.push(format!("{TOTAL_PREFIX}{:.2}$", aggregate.amount));

        Report { date, lines }
    }

    /// Render a snapshot straight to message text
    pub fn format(&self, snapshot: &BillingSnapshot) -> String {
        self.build(&snapshot.records, &snapshot.aggregate).to_string()
    }

    /// The first record's timestamp, or yesterday when it has none
    fn report_date(&self, records: &[BillingRecord]) -> NaiveDate {
        records
            .first()
            .and_then(|record| record.observed_at)
            .unwrap_or_else(|| self.clock.now() - Duration::days(1))
            .date_naive()
    }
}

impl fmt::Debug for ReportFormatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportFormatter").finish_non_exhaustive()
    }
}
