//! Source connectors: the Illumio PCE and the ServiceNow CMDB.

pub mod http;
pub mod illumio;
pub mod servicenow;

pub use illumio::IllumioConnector;
pub use servicenow::ServiceNowConnector;
