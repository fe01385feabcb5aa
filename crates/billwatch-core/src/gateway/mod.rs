//! Metrics gateway - the I/O boundary to the billing metrics backend
//!
//! The core only ever talks to [`MetricsGateway`]. Backends implement the
//! two raw operations; the per-service and aggregate fetch rules are
//! provided on top of them so every backend applies them the same way.

mod cloudwatch;

pub use cloudwatch::CloudWatchGateway;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{
    AggregateBilling, BillingRecord, MetricDescriptor, MetricScope, MetricStatistics, ServiceId,
};

/// Pseudo-service some listings report alongside the real ones
const TOTAL_PSEUDO_SERVICE: &str = "Total";

/// Access to billing metrics
#[async_trait]
pub trait MetricsGateway: Send + Sync {
    /// Discover the services that currently report charges
    async fn list_services(&self) -> Result<Vec<ServiceId>>;

    /// Query the billing metric over the configured window
    async fn fetch_statistics(&self, scope: &MetricScope) -> Result<MetricStatistics>;

    /// Charges for one service; an empty window yields a zero record
    async fn fetch_service_cost(&self, id: ServiceId) -> Result<BillingRecord> {
        let stats = self
            .fetch_statistics(&MetricScope::ByService(id.clone()))
            .await?;
        Ok(BillingRecord::from_statistics(id, &stats))
    }

    /// Charges across all services; an empty window is an error
    async fn fetch_aggregate_cost(&self) -> Result<AggregateBilling> {
        let stats = self.fetch_statistics(&MetricScope::Aggregate).await?;
        AggregateBilling::from_statistics(&stats)
            .ok_or_else(|| Error::backend("aggregate charges returned no datapoints"))
    }
}

/// Extract service identifiers from a metric listing.
///
/// Only metrics whose first dimension is the service dimension count; a
/// listing that leads with the currency dimension is the all-services
/// metric and is skipped. Duplicates keep their first position.
pub fn services_from_metrics(
    metrics: &[MetricDescriptor],
    service_dimension: &str,
) -> Vec<ServiceId> {
    let mut seen = HashSet::new();

    metrics
        .iter()
        .filter_map(|metric| metric.dimensions.first())
        .filter(|(name, value)| name == service_dimension && value != TOTAL_PSEUDO_SERVICE)
        .filter(|(_, value)| seen.insert(value.clone()))
        .map(|(_, value)| ServiceId::new(value.clone()))
        .collect()
}
