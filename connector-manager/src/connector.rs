use anyhow::Result;
use async_trait::async_trait;
use ven_monitor::fetch::FetchReport;

/// Inventory source interface.
///
/// A connector owns the request shape and response parsing for one API and
/// drives a [`ven_monitor::PaginatedFetcher`] over it. Page-level failures
/// are reported inside the returned [`FetchReport`]; an `Err` means the
/// source could not be queried at all.
///
/// # Lifecycle
/// 1. Orchestrator calls `test_connection()` (a one-record probe)
/// 2. On success it calls `fetch()` to retrieve the full record set
/// 3. The report's outcome decides how the run degrades
///
/// # Example
/// ```no_run
/// use connector_manager::Connector;
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use ven_monitor::fetch::{FetchOutcome, FetchReport, FetchStats};
///
/// struct StaticSource(Vec<String>);
///
/// #[async_trait]
/// impl Connector for StaticSource {
///     type Record = String;
///
///     fn name(&self) -> &str {
///         "static"
///     }
///
///     async fn test_connection(&self) -> Result<()> {
///         Ok(())
///     }
///
///     async fn fetch(&self) -> Result<FetchReport<String>> {
///         Ok(FetchReport {
///             outcome: FetchOutcome::Complete { records: self.0.clone() },
///             stats: FetchStats::default(),
///         })
///     }
/// }
/// ```
#[async_trait]
pub trait Connector: Send + Sync {
    /// Record type produced by this source.
    type Record: Send;

    /// Returns the unique identifier for this connector.
    ///
    /// Used in logs, caveats and the run report (e.g. "illumio", "servicenow").
    fn name(&self) -> &str;

    /// Verifies the API is reachable and the credentials are accepted.
    async fn test_connection(&self) -> Result<()>;

    /// Retrieves every record of the source.
    async fn fetch(&self) -> Result<FetchReport<Self::Record>>;
}
