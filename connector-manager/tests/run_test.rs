// End-to-end runs against mock PCE and ServiceNow servers: configuration,
// both connectors, the orchestrator and the extract writer.

use connector_manager::{
    orchestrator, Caveat, ExtractWriter, IllumioConnector, RunMode, RunOutcome, RunReport,
    ServiceNowConnector,
};
use mockito::{Matcher, Server, ServerGuard};
use tempfile::TempDir;
use ven_monitor::config::{parse_config, MonitorConfig};
use ven_monitor::reconcile::ReconStatus;

// ── Helpers ───────────────────────────────────────────────────────────────────

fn config(pce: &ServerGuard, cmdb: &ServerGuard, output: &TempDir) -> MonitorConfig {
    let contents = format!(
        r#"
        [illumio]
        pce_url = "http://127.0.0.1"
        port = {pce_port}
        org_id = "1"
        api_user = "api_user"
        api_secret = "${{PCE_SECRET}}"
        max_concurrent_requests = 1

        [servicenow]
        instance_url = "{cmdb_url}/"
        api_user = "svc_monitor"
        api_key = "$SN_KEY"
        max_concurrent_requests = 1

        [filtering]
        operating_entity_contains = "ACME"

        [retry]
        max_attempts = 2
        initial_delay_ms = 1
        max_delay_ms = 5

        [output]
        base_path = "{output}"
        create_date_subfolder = false
        file_prefix = "test"
        "#,
        pce_port = pce.socket_address().port(),
        cmdb_url = cmdb.url(),
        output = output.path().display(),
    );
    let lookup = |name: &str| match name {
        "PCE_SECRET" => Some("pce-secret".to_string()),
        "SN_KEY" => Some("sn-key".to_string()),
        _ => None,
    };
    parse_config(&contents, &lookup).unwrap()
}

async fn mock_pce(server: &mut ServerGuard) -> Vec<mockito::Mock> {
    let labels = server
        .mock("GET", "/api/v2/orgs/1/labels")
        .match_query(Matcher::UrlEncoded("offset".into(), "0".into()))
        .match_header("authorization", Matcher::Regex("^Basic ".to_string()))
        .with_status(200)
        .with_body(
            r#"[
                {"href": "/orgs/1/labels/1", "key": "env", "value": "Production"},
                {"href": "/orgs/1/labels/2", "key": "app", "value": "CRM"}
            ]"#,
        )
        .create_async()
        .await;
    let workloads = server
        .mock("GET", "/api/v2/orgs/1/workloads")
        .match_query(Matcher::UrlEncoded("offset".into(), "0".into()))
        .with_status(200)
        .with_body(
            r#"[
                {"href": "/orgs/1/workloads/1", "hostname": "web01.corp.example.com",
                 "managed": true, "online": true, "enforcement_mode": "full",
                 "labels": [{"href": "/orgs/1/labels/1"}, {"href": "/orgs/1/labels/2"}],
                 "agent": {"status": {"status": "active", "agent_version": "23.2.0"}}},
                {"href": "/orgs/1/workloads/3", "hostname": "WEB03", "managed": true,
                 "online": false, "enforcement_mode": "visibility_only",
                 "agent": {"status": {"status": "stopped"}}}
            ]"#,
        )
        .create_async()
        .await;
    vec![labels, workloads]
}

async fn mock_cmdb(server: &mut ServerGuard, status: usize) -> mockito::Mock {
    server
        .mock("GET", "/api/now/table/cmdb_ci_server")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("sysparm_offset".into(), "0".into()),
            Matcher::UrlEncoded(
                "sysparm_query".into(),
                "u_operating_entityLIKEACME^ORoperating_entityLIKEACME^ORcompanyLIKEACME".into(),
            ),
        ]))
        .with_status(status)
        .with_body(
            r#"{"result": [
                {"sys_id": "s1", "name": "web01", "u_environment": "Production",
                 "u_operating_entity": {"display_value": "ACME Retail", "value": "oe1"}},
                {"sys_id": "s2", "name": "web02", "u_environment": "Production",
                 "u_operating_entity": {"display_value": "ACME Retail", "value": "oe1"}}
            ]}"#,
        )
        .create_async()
        .await
}

async fn run(config: &MonitorConfig) -> RunReport {
    let illumio = IllumioConnector::from_config(config).unwrap();
    let servicenow = ServiceNowConnector::from_config(config).unwrap();
    match orchestrator::run(&illumio, &servicenow).await {
        RunOutcome::Completed(report) => *report,
        RunOutcome::Aborted { reason, .. } => panic!("run aborted: {}", reason),
    }
}

fn file_names(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_full_run_reconciles_and_writes_extracts() {
    let mut pce = Server::new_async().await;
    let mut cmdb = Server::new_async().await;
    let output = TempDir::new().unwrap();
    let _pce_mocks = mock_pce(&mut pce).await;
    let _cmdb_mock = mock_cmdb(&mut cmdb, 200).await;
    let config = config(&pce, &cmdb, &output);

    let report = run(&config).await;

    assert_eq!(report.mode, RunMode::Full);
    assert!(report.caveats.is_empty(), "caveats: {:?}", report.caveats);

    let recon = &report.reconciliation;
    let statuses: Vec<(&str, ReconStatus)> = recon
        .records
        .iter()
        .map(|r| (r.key.as_str(), r.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("WEB01", ReconStatus::DeployedActive),
            ("WEB02", ReconStatus::NotDeployed),
            ("WEB03", ReconStatus::NotInCmdb),
        ]
    );

    let web01 = &recon.records[0];
    assert_eq!(web01.attribute("illumio_label_app"), Some("CRM"));
    assert_eq!(web01.attribute("cmdb_operating_entity"), Some("ACME Retail"));
    assert_eq!(web01.attribute("illumio_ven_version"), Some("23.2.0"));

    // The unrecognized "stopped" status is flagged, not dropped.
    assert!(recon.records[2].needs_review);
    assert_eq!(recon.summary.coverage_rate, 50.0);
    assert_eq!(recon.summary.anomalies, 1);

    let written = ExtractWriter::new(config.output.clone()).write(&report).unwrap();
    assert_eq!(written.len(), 4);
    let extracts = output.path().join("extracts");
    let names = file_names(&extracts);
    assert!(names.iter().all(|n| n.starts_with("test_") && n.ends_with(".json")));
    assert!(names.iter().any(|n| n.starts_with("test_gap_analysis_")));
    assert!(names.iter().any(|n| n.starts_with("test_shadow_it_")));
}

#[tokio::test]
async fn test_cmdb_outage_degrades_to_illumio_only() {
    let mut pce = Server::new_async().await;
    let mut cmdb = Server::new_async().await;
    let output = TempDir::new().unwrap();
    let _pce_mocks = mock_pce(&mut pce).await;
    let _cmdb_mock = mock_cmdb(&mut cmdb, 401).await;
    let config = config(&pce, &cmdb, &output);

    let report = run(&config).await;

    assert_eq!(report.mode, RunMode::IllumioOnly);
    assert!(matches!(report.caveats.as_slice(), [Caveat::CmdbUnavailable { .. }]));
    assert!(report.servicenow_stats.is_none());

    let recon = &report.reconciliation;
    assert_eq!(recon.records.len(), 2);
    assert!(recon.gaps().is_empty());
    assert!(recon.shadow_it().is_empty());
    assert_eq!(recon.summary.count(ReconStatus::DeployedActive), 1);

    let written = ExtractWriter::new(config.output.clone()).write(&report).unwrap();
    let names = file_names(&output.path().join("extracts"));
    assert_eq!(written.len(), names.len());
    assert!(!names.iter().any(|n| n.contains("gap_analysis")));
    assert!(names.iter().any(|n| n.contains("health_issues")));
}

#[tokio::test]
async fn test_pce_outage_aborts_run() {
    let mut pce = Server::new_async().await;
    let mut cmdb = Server::new_async().await;
    let output = TempDir::new().unwrap();
    let _denied = pce
        .mock("GET", Matcher::Any)
        .with_status(403)
        .create_async()
        .await;
    let _cmdb_mock = mock_cmdb(&mut cmdb, 200).await;
    let config = config(&pce, &cmdb, &output);

    let illumio = IllumioConnector::from_config(&config).unwrap();
    let servicenow = ServiceNowConnector::from_config(&config).unwrap();

    match orchestrator::run(&illumio, &servicenow).await {
        RunOutcome::Aborted { reason, .. } => assert!(reason.contains("Illumio")),
        RunOutcome::Completed(_) => panic!("expected aborted run"),
    }
}
