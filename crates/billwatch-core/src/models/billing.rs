//! Billing data models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metric::MetricStatistics;

/// Opaque name of a billed service, as discovered from the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(String);

impl ServiceId {
    /// Create a service identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ServiceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Estimated charges for one service over the query window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingRecord {
    /// Service the charges belong to
    pub service: ServiceId,

    /// Charged amount (maximum statistic)
    pub amount: f64,

    /// Unit reported by the backend, empty when no datapoint existed
    pub unit: String,

    /// When the datapoint was observed, `None` when no datapoint existed
    pub observed_at: Option<DateTime<Utc>>,

    /// Metric label reported by the backend
    pub label: String,
}

impl BillingRecord {
    /// Build a record from raw statistics.
    ///
    /// A window with no datapoint is not an error for a single service: the
    /// record carries a zero amount, an empty unit and no timestamp.
    pub fn from_statistics(service: ServiceId, stats: &MetricStatistics) -> Self {
        match stats.latest() {
            Some(point) => Self {
                service,
                amount: point.maximum,
                unit: point.unit.clone(),
                observed_at: point.timestamp,
                label: stats.label.clone(),
            },
            None => Self {
                service,
                amount: 0.0,
                unit: String::new(),
                observed_at: None,
                label: stats.label.clone(),
            },
        }
    }
}

/// Estimated charges summed across all services by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateBilling {
    /// Total charged amount
    pub amount: f64,

    /// Unit reported by the backend
    pub unit: String,

    /// When the datapoint was observed
    pub observed_at: Option<DateTime<Utc>>,

    /// Metric label reported by the backend
    pub label: String,
}

impl AggregateBilling {
    /// Build the aggregate from raw statistics.
    ///
    /// Returns `None` when the window holds no datapoint; the total has no
    /// meaningful zero substitute.
    pub fn from_statistics(stats: &MetricStatistics) -> Option<Self> {
        stats.latest().map(|point| Self {
            amount: point.maximum,
            unit: point.unit.clone(),
            observed_at: point.timestamp,
            label: stats.label.clone(),
        })
    }
}

/// Everything fetched during one run, ready to be formatted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingSnapshot {
    /// One record per discovered service, in completion order
    pub records: Vec<BillingRecord>,

    /// Backend-computed total
    pub aggregate: AggregateBilling,
}
