use kb_logging::{kb_info, kb_warn};
use serde::{Deserialize, Serialize};

use crate::{Harvester, Page};

/// Inbound request from the host, tagged by its `action` field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action")]
pub enum HostRequest {
    #[serde(rename = "triggerExport")]
    TriggerExport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HostResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"success":false,"error":"unserializable response"}"#.to_string())
    }
}

/// Answer one raw JSON request. Always returns a JSON response line.
pub async fn handle_request(harvester: &Harvester, page: &dyn Page, raw: &str) -> String {
    let request: HostRequest = match serde_json::from_str(raw) {
        Ok(request) => request,
        Err(err) => {
            kb_warn!("Rejected host request {:?}: {}", raw, err);
            return HostResponse::failed(format!("unsupported request: {err}")).to_json();
        }
    };

    let response = match request {
        HostRequest::TriggerExport => {
            kb_info!("Host requested an export");
            match harvester.run(page).await {
                Some(report) if report.succeeded() => HostResponse::ok(),
                Some(report) => HostResponse::failed(
                    report
                        .view
                        .last_summary
                        .unwrap_or_else(|| "export failed".to_string()),
                ),
                None => HostResponse::failed("an export is already running"),
            }
        }
    };
    response.to_json()
}
