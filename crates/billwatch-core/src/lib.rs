//! # billwatch
//!
//! Daily cloud billing digest.
//!
//! billwatch reads estimated charges per service from the billing metrics
//! backend, fetches the backend's own total, and posts a short text report
//! to a chat webhook.
//!
//! ## Architecture
//!
//! - **Gateway**: the I/O boundary to the metrics backend (CloudWatch)
//! - **Aggregator**: concurrent per-service fetches with fail-fast fan-in
//! - **Report**: deterministic text projection of the fetched charges
//! - **Notifier**: form-encoded webhook delivery with a bearer credential
//! - **Orchestrator**: one run, `list -> fetch -> format -> notify`
//!
//! ## Quick Start
//!
//! ```bash
//! # Print today's report without sending it
//! billwatch preview
//!
//! # Send it
//! BILLWATCH_TOKEN=... billwatch run
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod aggregator;
pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod notifier;
pub mod orchestrator;
pub mod report;

pub use crate::config::Config;
pub use crate::error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::aggregator::Aggregator;
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::gateway::{CloudWatchGateway, MetricsGateway};
    pub use crate::models::*;
    pub use crate::notifier::{Credential, Notifier, WebhookNotifier};
    pub use crate::orchestrator::{Orchestrator, Phase, RunSummary};
    pub use crate::report::{Clock, Report, ReportFormatter, SystemClock};
}
