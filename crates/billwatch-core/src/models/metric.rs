//! Raw metric data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::billing::ServiceId;

/// What a single statistics query is filtered by
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricScope {
    /// Charges for one service (currency + service dimensions)
    ByService(ServiceId),
    /// Charges across all services (currency dimension only)
    Aggregate,
}

impl MetricScope {
    /// The service filter, if any
    pub fn service(&self) -> Option<&ServiceId> {
        match self {
            Self::ByService(id) => Some(id),
            Self::Aggregate => None,
        }
    }
}

/// One observed value of the billing metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    /// Maximum statistic over the period
    pub maximum: f64,
    /// Unit reported by the backend
    pub unit: String,
    /// Start of the period this value covers
    pub timestamp: Option<DateTime<Utc>>,
}

/// Statistics returned by one query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricStatistics {
    /// Metric label
    pub label: String,
    /// Datapoints in backend order
    pub datapoints: Vec<Datapoint>,
}

impl MetricStatistics {
    /// Most recent datapoint; untimestamped points only win when nothing else exists
    pub fn latest(&self) -> Option<&Datapoint> {
        self.datapoints.iter().max_by_key(|point| point.timestamp)
    }
}

/// A metric as listed by the backend: its dimensions in backend order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDescriptor {
    /// `(name, value)` pairs
    pub dimensions: Vec<(String, String)>,
}
