use anyhow::{bail, Context, Result};
use connector_manager::config::{config_path, load_config};
use connector_manager::orchestrator;
use connector_manager::{ExtractWriter, IllumioConnector, RunOutcome, ServiceNowConnector};
use tracing::{info, warn};
use ven_monitor::reconcile::ReconStatus;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "connector_manager=info,ven_monitor=info".into()),
        )
        .init();

    info!("VEN monitor starting...");

    let config_path = config_path();

    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    info!(
        config_path = %config_path,
        pce_url = %config.illumio.pce_url,
        servicenow_url = %config.servicenow.instance_url,
        table = %config.servicenow.table,
        "Configuration loaded"
    );

    let illumio = IllumioConnector::from_config(&config)?;
    let servicenow = ServiceNowConnector::from_config(&config)?;

    let report = match orchestrator::run(&illumio, &servicenow).await {
        RunOutcome::Completed(report) => report,
        RunOutcome::Aborted { run_id, reason } => {
            bail!("Run {} aborted: {}", run_id, reason);
        }
    };

    let summary = &report.reconciliation.summary;
    info!(
        run_id = %report.run_id,
        mode = ?report.mode,
        workloads = summary.total_illumio_workloads,
        servers = summary.total_cmdb_servers,
        records = summary.total_records,
        coverage_rate = summary.coverage_rate,
        active_rate = summary.active_rate,
        enforcement_rate = summary.enforcement_rate,
        "Reconciliation summary"
    );
    for status in ReconStatus::ALL {
        info!(status = %status, count = summary.count(status), "Status count");
    }
    for caveat in &report.caveats {
        warn!(caveat = ?caveat, "Report caveat");
    }

    let written = ExtractWriter::new(config.output.clone())
        .write(&report)
        .context("Failed to write extracts")?;
    for path in &written {
        info!(path = %path.display(), "Extract written");
    }

    info!("VEN monitor finished");
    Ok(())
}
