//! JSON extract writer.
//!
//! Layout: `{base_path}/{extracts_folder}[/{dd-mm-YYYY}]/{prefix}_{name}_{YYYYmmdd_HHMMSS}.json`.
//! The full report is always written; the gap, shadow-IT and health views
//! only when they hold records.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;
use ven_monitor::config::OutputConfig;
use ven_monitor::reconcile::ReconciledRecord;

use crate::orchestrator::RunReport;

/// One filtered view of a run, written as its own extract.
#[derive(Debug, Serialize)]
struct ViewExtract<'a> {
    run_id: Uuid,
    generated_at: DateTime<Utc>,
    view: &'a str,
    description: &'a str,
    count: usize,
    records: Vec<&'a ReconciledRecord>,
}

pub struct ExtractWriter {
    config: OutputConfig,
}

impl ExtractWriter {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }

    /// Directory the extracts of a run finished at `at` go to.
    pub fn extract_dir(&self, at: DateTime<Utc>) -> PathBuf {
        let dir = Path::new(&self.config.base_path).join(&self.config.extracts_folder);
        if self.config.create_date_subfolder {
            dir.join(at.format("%d-%m-%Y").to_string())
        } else {
            dir
        }
    }

    fn file_name(&self, name: &str, at: DateTime<Utc>) -> String {
        format!(
            "{}_{}_{}.json",
            self.config.file_prefix,
            name,
            at.format("%Y%m%d_%H%M%S")
        )
    }

    /// Writes every extract for `report` and returns the paths written.
    pub fn write(&self, report: &RunReport) -> Result<Vec<PathBuf>> {
        let at = report.finished_at;
        let dir = self.extract_dir(at);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create extract directory {}", dir.display()))?;

        let mut written = Vec::new();

        let path = dir.join(self.file_name("reconciliation", at));
        write_json(&path, report)?;
        written.push(path);

        let reconciliation = &report.reconciliation;
        let views = [
            (
                "gap_analysis",
                "CMDB servers with no agent deployed",
                reconciliation.gaps(),
            ),
            (
                "shadow_it",
                "Agents on hosts missing from the CMDB",
                reconciliation.shadow_it(),
            ),
            (
                "health_issues",
                "Offline, suspended or unreviewed agents",
                reconciliation.health_issues(),
            ),
        ];

        for (view, description, records) in views {
            if records.is_empty() {
                debug!(view, "Skipping empty extract");
                continue;
            }
            let extract = ViewExtract {
                run_id: report.run_id,
                generated_at: at,
                view,
                description,
                count: records.len(),
                records,
            };
            let path = dir.join(self.file_name(view, at));
            write_json(&path, &extract)?;
            written.push(path);
        }

        info!(
            directory = %dir.display(),
            files = written.len(),
            "Extracts written"
        );
        Ok(written)
    }
}

/// Atomic write: serialize to a `.tmp` sibling, fsync, then rename.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize extract")?;
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)
            .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
        file.write_all(json.as_bytes())
            .context("Failed to write extract data")?;
        file.sync_all().context("Failed to sync extract to disk")?;
    }
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to rename extract to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::RunMode;
    use chrono::TimeZone;
    use tempfile::TempDir;
    use ven_monitor::fetch::FetchStats;
    use ven_monitor::inventory::{AgentStatus, RawCmdbServer, RawWorkload};
    use ven_monitor::reconcile::{reconcile, Reconciliation};

    fn config(base: &Path, date_folder: bool) -> OutputConfig {
        OutputConfig {
            base_path: base.to_string_lossy().into_owned(),
            extracts_folder: "extracts".to_string(),
            create_date_subfolder: date_folder,
            file_prefix: "ven".to_string(),
        }
    }

    fn report(reconciliation: Reconciliation) -> RunReport {
        let at = Utc.with_ymd_and_hms(2026, 3, 7, 14, 5, 9).unwrap();
        RunReport {
            run_id: Uuid::now_v7(),
            started_at: at,
            finished_at: at,
            mode: RunMode::Full,
            caveats: vec![],
            illumio_stats: FetchStats::default(),
            servicenow_stats: Some(FetchStats::default()),
            reconciliation,
        }
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_extract_dir_layout() {
        let at = Utc.with_ymd_and_hms(2026, 3, 7, 0, 0, 0).unwrap();
        let dated = ExtractWriter::new(config(Path::new("/data"), true));
        let flat = ExtractWriter::new(config(Path::new("/data"), false));

        assert_eq!(dated.extract_dir(at), PathBuf::from("/data/extracts/07-03-2026"));
        assert_eq!(flat.extract_dir(at), PathBuf::from("/data/extracts"));
    }

    #[test]
    fn test_writes_report_and_non_empty_views() {
        let temp = TempDir::new().unwrap();
        let workloads = vec![
            RawWorkload::new("web01", AgentStatus::Active),
            RawWorkload::new("web02", AgentStatus::Suspended),
            RawWorkload::new("web04", AgentStatus::Offline),
        ];
        let servers = vec![
            RawCmdbServer::new("WEB01"),
            RawCmdbServer::new("WEB02"),
            RawCmdbServer::new("WEB03"),
        ];
        let report = report(reconcile(&workloads, &servers));

        let written = ExtractWriter::new(config(temp.path(), true)).write(&report).unwrap();

        assert_eq!(
            names(&written),
            vec![
                "ven_reconciliation_20260307_140509.json",
                "ven_gap_analysis_20260307_140509.json",
                "ven_shadow_it_20260307_140509.json",
                "ven_health_issues_20260307_140509.json",
            ]
        );
        for path in &written {
            assert!(path.starts_with(temp.path().join("extracts").join("07-03-2026")));
            assert!(path.exists());
            assert!(!path.with_extension("tmp").exists());
        }

        let full: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&written[0]).unwrap()).unwrap();
        assert_eq!(full["reconciliation"]["records"].as_array().map(Vec::len), Some(4));
        assert_eq!(full["mode"], "full");

        let gaps: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&written[1]).unwrap()).unwrap();
        assert_eq!(gaps["view"], "gap_analysis");
        assert_eq!(gaps["count"], 1);
        assert_eq!(gaps["records"][0]["key"], "WEB03");
        assert_eq!(gaps["records"][0]["status"], "not_deployed");

        let health: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&written[3]).unwrap()).unwrap();
        assert_eq!(health["count"], 1);
        assert_eq!(health["records"][0]["status"], "deployed_suspended");
    }

    #[test]
    fn test_empty_views_are_skipped() {
        let temp = TempDir::new().unwrap();
        let workloads = vec![RawWorkload::new("web01", AgentStatus::Active)];
        let servers = vec![RawCmdbServer::new("web01.corp.example.com")];
        let report = report(reconcile(&workloads, &servers));

        let written = ExtractWriter::new(config(temp.path(), false)).write(&report).unwrap();

        assert_eq!(names(&written), vec!["ven_reconciliation_20260307_140509.json"]);
    }
}
