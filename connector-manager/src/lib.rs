//! VEN Monitor Connector Manager - source connectors, run orchestration and
//! extracts for the Illumio PCE / ServiceNow CMDB reconciliation.
//!
//! The reconciliation core (fetcher, normalizer, engine, configuration) lives
//! in the `ven_monitor` crate; this crate specializes it for the two APIs and
//! drives one run end to end.
//!
//! # Architecture
//!
//! ```text
//!   Illumio PCE                     ServiceNow CMDB
//!  (labels, workloads)             (Table API, cmdb_ci_server)
//!          ↓                                ↓
//! ┌──────────────────────┐      ┌──────────────────────┐
//! │  IllumioConnector    │      │  ServiceNowConnector │
//! │  - probe + fetch     │      │  - probe + fetch     │
//! │  - resolve labels    │      │  - flatten u_* attrs │
//! └──────────────────────┘      └──────────────────────┘
//!          ↓   PaginatedFetcher (retry, rate limits)  ↓
//! ┌─────────────────────────────────────────────────────┐
//! │       Orchestrator (tokio::join! on both)           │
//! │  - Illumio failed        → run aborted              │
//! │  - ServiceNow failed     → Illumio-only + caveat    │
//! │  - otherwise             → full reconciliation      │
//! └─────────────────────────────────────────────────────┘
//!          ↓
//!     RunReport → ExtractWriter (JSON extracts)
//! ```
//!
//! # Core Types
//!
//! - [`Connector`] - Trait implemented by both sources
//! - [`IllumioConnector`] / [`ServiceNowConnector`] - The two sources
//! - [`RunReport`] / [`RunOutcome`] - Result of one run
//! - [`ExtractWriter`] - Writes the report and its views as JSON
//! - [`load_config`] - Reads the config file, resolving environment variables
//!
//! # Running a Reconciliation
//!
//! ```no_run
//! use connector_manager::{orchestrator, IllumioConnector, RunOutcome, ServiceNowConnector};
//! use anyhow::Result;
//!
//! async fn run_once() -> Result<()> {
//!     let config = connector_manager::load_config("config/monitor.toml")?;
//!     let illumio = IllumioConnector::from_config(&config)?;
//!     let servicenow = ServiceNowConnector::from_config(&config)?;
//!
//!     match orchestrator::run(&illumio, &servicenow).await {
//!         RunOutcome::Completed(report) => println!("{} records", report.reconciliation.records.len()),
//!         RunOutcome::Aborted { reason, .. } => eprintln!("aborted: {}", reason),
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
mod connector;
pub mod connectors;
pub mod export;
pub mod orchestrator;

// Re-export public types
pub use config::load_config;
pub use connector::Connector;
pub use connectors::{IllumioConnector, ServiceNowConnector};
pub use export::ExtractWriter;
pub use orchestrator::{Caveat, RunMode, RunOutcome, RunReport};
