//! One billing report run
//!
//! `ListServices -> FetchAll -> Format -> Notify`. Any phase failure ends the
//! run; nothing is retried and a report missing part of its data is never
//! sent.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::aggregator::Aggregator;
use crate::error::{Error, Result};
use crate::gateway::MetricsGateway;
use crate::models::{BillingSnapshot, ServiceId};
use crate::notifier::{Credential, Notifier};
use crate::report::{Clock, ReportFormatter};

/// Stages of a run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Discover billed services
    ListServices,
    /// Fetch per-service and total charges
    FetchAll,
    /// Build the message
    Format,
    /// Deliver the message
    Notify,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ListServices => "list_services",
            Self::FetchAll => "fetch_all",
            Self::Format => "format",
            Self::Notify => "notify",
        };
        f.write_str(name)
    }
}

/// A composed but not yet delivered report
#[derive(Debug, Clone)]
pub struct ComposedReport {
    /// Data the report was built from
    pub snapshot: BillingSnapshot,
    /// Message text
    pub message: String,
}

/// Outcome of a delivered run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Number of services reported
    pub services: usize,
    /// Backend total
    pub total: f64,
    /// Message that was delivered
    pub message: String,
}

/// Wires gateway, aggregation, formatting and delivery into a single run
pub struct Orchestrator {
    gateway: Arc<dyn MetricsGateway>,
    aggregator: Aggregator,
    formatter: ReportFormatter,
    notifier: Arc<dyn Notifier>,
    credential: Credential,
}

impl Orchestrator {
    /// Create an orchestrator. The credential is used as given; nothing is
    /// read from the environment here.
    pub fn new(
        gateway: Arc<dyn MetricsGateway>,
        notifier: Arc<dyn Notifier>,
        credential: Credential,
    ) -> Self {
        Self {
            aggregator: Aggregator::new(Arc::clone(&gateway)),
            gateway,
            formatter: ReportFormatter::default(),
            notifier,
            credential,
        }
    }

    /// Use `clock` for the report date fallback
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.formatter = ReportFormatter::new(clock);
        self
    }

    /// Bound concurrent per-service fetches
    pub fn with_max_in_flight(mut self, max_in_flight: Option<usize>) -> Self {
        self.aggregator =
            Aggregator::new(Arc::clone(&self.gateway)).with_max_in_flight(max_in_flight);
        self
    }

    /// Discover the services that will be reported
    pub async fn list_services(&self) -> Result<Vec<ServiceId>> {
        let services = self
            .gateway
            .list_services()
            .await
            .map_err(|e| fail(Phase::ListServices, e))?;

        if services.is_empty() {
            warn!("No billed services discovered; report will only carry the total");
        }
        info!(phase = %Phase::ListServices, services = services.len(), "Services discovered");
        Ok(services)
    }

    /// Run every phase except delivery
    pub async fn compose(&self) -> Result<ComposedReport> {
        let services = self.list_services().await?;

        let started = Instant::now();
        let snapshot = self
            .aggregator
            .snapshot(services)
            .await
            .map_err(|e| fail(Phase::FetchAll, e))?;
        info!(
            phase = %Phase::FetchAll,
            records = snapshot.records.len(),
            total = snapshot.aggregate.amount,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Charges fetched"
        );

        let message = self.formatter.format(&snapshot);
        info!(phase = %Phase::Format, lines = message.lines().count(), "Report formatted");

        Ok(ComposedReport { snapshot, message })
    }

    /// Run every phase, delivering the report exactly once on success
    pub async fn run(&self) -> Result<RunSummary> {
        let ComposedReport { snapshot, message } = self.compose().await?;

        self.notifier
            .notify(&message, &self.credential)
            .await
            .map_err(|e| fail(Phase::Notify, e))?;
        info!(phase = %Phase::Notify, "Run complete");

        Ok(RunSummary {
            services: snapshot.records.len(),
            total: snapshot.aggregate.amount,
            message,
        })
    }
}

fn fail(phase: Phase, err: Error) -> Error {
    error!(phase = %phase, error = %err, "Run failed");
    err
}
