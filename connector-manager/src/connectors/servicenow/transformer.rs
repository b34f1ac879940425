use serde_json::Value;
use std::collections::BTreeMap;
use ven_monitor::inventory::RawCmdbServer;

use super::api::TableRecord;

/// Flattens a Table API field to a string.
///
/// Reference fields arrive as `{"display_value": .., "value": ..}`; the
/// display value wins when present.
pub fn display_value(field: Option<&Value>) -> String {
    match field {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(map)) => {
            display_value(map.get("display_value").or_else(|| map.get("value")))
        }
        Some(other) => other.to_string(),
    }
}

fn first_non_empty(record: &TableRecord, fields: &[&str]) -> String {
    fields
        .iter()
        .map(|f| display_value(record.get(*f)))
        .find(|v| !v.trim().is_empty())
        .unwrap_or_default()
}

/// Transform a CMDB row into the inventory record.
///
/// The hostname is `name`, falling back to `host_name`. Every `u_*` field
/// is kept in `attributes`.
pub fn server_from_record(record: &TableRecord) -> RawCmdbServer {
    let attributes: BTreeMap<String, String> = record
        .iter()
        .filter(|(key, _)| key.starts_with("u_"))
        .map(|(key, value)| (key.clone(), display_value(Some(value))))
        .collect();

    RawCmdbServer {
        sys_id: display_value(record.get("sys_id")),
        name: display_value(record.get("name")),
        hostname: first_non_empty(record, &["name", "host_name"]),
        operating_entity: first_non_empty(record, &["u_operating_entity", "operating_entity"]),
        ip_address: display_value(record.get("ip_address")),
        environment: first_non_empty(record, &["u_environment", "environment"]),
        application: first_non_empty(record, &["u_application", "application"]),
        os: display_value(record.get("os")),
        operational_status: display_value(record.get("operational_status")),
        location: display_value(record.get("location")),
        attributes,
    }
}
