//! Concurrent fan-out of per-service fetches
//!
//! Every service gets its own task; the calling task is the single point
//! where results are merged. The first failure aborts every task still in
//! flight and is returned as-is: there is no partial result.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::gateway::MetricsGateway;
use crate::models::{BillingRecord, BillingSnapshot, ServiceId};

/// Fetches per-service and aggregate charges for one run
pub struct Aggregator {
    gateway: Arc<dyn MetricsGateway>,
    limit: Option<Arc<Semaphore>>,
}

impl Aggregator {
    /// Create an aggregator with unbounded fan-out
    pub fn new(gateway: Arc<dyn MetricsGateway>) -> Self {
        Self {
            gateway,
            limit: None,
        }
    }

    /// Bound the number of per-service fetches in flight at once
    pub fn with_max_in_flight(mut self, max_in_flight: Option<usize>) -> Self {
        self.limit = max_in_flight.map(|n| Arc::new(Semaphore::new(n.max(1))));
        self
    }

    /// Fetch one record per service, concurrently.
    ///
    /// The returned order follows task completion, not input order.
    pub async fn collect(&self, services: Vec<ServiceId>) -> Result<Vec<BillingRecord>> {
        let mut tasks = JoinSet::new();

        for service in services {
            let gateway = Arc::clone(&self.gateway);
            let limit = self.limit.clone();

            tasks.spawn(async move {
                let _permit = match limit {
                    Some(semaphore) => Some(
                        semaphore
                            .acquire_owned()
                            .await
                            .map_err(|e| Error::internal(format!("fetch limiter closed: {e}")))?,
                    ),
                    None => None,
                };
                gateway.fetch_service_cost(service).await
            });
        }

        let mut records = Vec::with_capacity(tasks.len());

        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(|e| Error::internal(format!("service fetch task failed: {e}")))
                .and_then(|result| result);

            match outcome {
                Ok(record) => {
                    debug!(
                        service = %record.service,
                        amount = record.amount,
                        "Fetched service charges"
                    );
                    records.push(record);
                }
                Err(e) => {
                    warn!(
                        in_flight = tasks.len(),
                        error = %e,
                        "Service fetch failed, aborting remaining fetches"
                    );
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        Ok(records)
    }

    /// Fetch all per-service records, then the backend total
    pub async fn snapshot(&self, services: Vec<ServiceId>) -> Result<BillingSnapshot> {
        let records = self.collect(services).await?;
        let aggregate = self.gateway.fetch_aggregate_cost().await?;

        Ok(BillingSnapshot { records, aggregate })
    }
}
