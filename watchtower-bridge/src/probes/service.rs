use super::PROBE_TIMEOUT;
use crate::error::ProbeError;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::process::Command as AsyncCommand;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Stopped,
    StartPending,
    StopPending,
    Running,
    ContinuePending,
    PausePending,
    Paused,
    Unknown,
    /// The platform tool answered with something unreadable.
    Error,
    NotFound,
    NotSupported,
}

impl ServiceState {
    /// Maps the `ServiceControllerStatus` numeric code.
    pub fn from_code(code: Option<i64>) -> Self {
        match code {
            Some(1) => ServiceState::Stopped,
            Some(2) => ServiceState::StartPending,
            Some(3) => ServiceState::StopPending,
            Some(4) => ServiceState::Running,
            Some(5) => ServiceState::ContinuePending,
            Some(6) => ServiceState::PausePending,
            Some(7) => ServiceState::Paused,
            _ => ServiceState::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceState::Stopped => "stopped",
            ServiceState::StartPending => "start_pending",
            ServiceState::StopPending => "stop_pending",
            ServiceState::Running => "running",
            ServiceState::ContinuePending => "continue_pending",
            ServiceState::PausePending => "pause_pending",
            ServiceState::Paused => "paused",
            ServiceState::Unknown => "unknown",
            ServiceState::Error => "error",
            ServiceState::NotFound => "not_found",
            ServiceState::NotSupported => "not_supported",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceReport {
    pub state: ServiceState,
    pub display_name: Option<String>,
    pub description: Option<String>,
}

impl ServiceReport {
    pub fn bare(state: ServiceState) -> Self {
        Self {
            state,
            display_name: None,
            description: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetServiceRow {
    status: Option<serde_json::Value>,
    display_name: Option<String>,
    description: Option<String>,
}

/// Reads `Get-Service | ConvertTo-Json` output. Never fails: garbage maps to
/// [`ServiceState::Error`].
pub fn parse_service_json(stdout: &str) -> ServiceReport {
    let value: serde_json::Value = match serde_json::from_str(stdout.trim()) {
        Ok(value) => value,
        Err(e) => {
            warn!("Unreadable Get-Service output: {}", e);
            return ServiceReport::bare(ServiceState::Error);
        }
    };
    // Wildcard names come back as an array; the first match wins.
    let row = match value {
        serde_json::Value::Array(mut rows) if !rows.is_empty() => rows.swap_remove(0),
        other => other,
    };
    match serde_json::from_value::<GetServiceRow>(row) {
        Ok(row) => ServiceReport {
            state: ServiceState::from_code(row.status.as_ref().and_then(serde_json::Value::as_i64)),
            display_name: row.display_name,
            description: row.description,
        },
        Err(e) => {
            warn!("Unexpected Get-Service shape: {}", e);
            ServiceReport::bare(ServiceState::Error)
        }
    }
}

pub(super) async fn query(name: &str) -> Result<ServiceReport, ProbeError> {
    if !cfg!(target_os = "windows") {
        return Ok(ServiceReport::bare(ServiceState::NotSupported));
    }

    let script = format!(
        "Get-Service -Name '{}' | Select-Object -Property Name,DisplayName,Status,Description | ConvertTo-Json",
        name.replace('\'', "''")
    );
    let output = tokio::time::timeout(
        PROBE_TIMEOUT,
        AsyncCommand::new("powershell")
            .args(["-NoProfile", "-Command", script.as_str()])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| ProbeError::Timeout(PROBE_TIMEOUT.as_secs()))??;

    if !output.status.success() {
        return Ok(ServiceReport::bare(ServiceState::NotFound));
    }
    Ok(parse_service_json(&String::from_utf8_lossy(&output.stdout)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let expected = [
            "stopped",
            "start_pending",
            "stop_pending",
            "running",
            "continue_pending",
            "pause_pending",
            "paused",
        ];
        for (code, name) in (1..=7).zip(expected) {
            assert_eq!(ServiceState::from_code(Some(code)).as_str(), name);
        }
        assert_eq!(ServiceState::from_code(Some(0)), ServiceState::Unknown);
        assert_eq!(ServiceState::from_code(Some(8)), ServiceState::Unknown);
        assert_eq!(ServiceState::from_code(None), ServiceState::Unknown);
    }

    #[test]
    fn test_parse_get_service_object() {
        let stdout = r#"{
            "Name": "Spooler",
            "DisplayName": "Print Spooler",
            "Status": 4,
            "Description": "Queues print jobs"
        }"#;
        let report = parse_service_json(stdout);
        assert_eq!(report.state, ServiceState::Running);
        assert_eq!(report.display_name.as_deref(), Some("Print Spooler"));
        assert_eq!(report.description.as_deref(), Some("Queues print jobs"));
    }

    #[test]
    fn test_parse_array_and_null_status() {
        let report = parse_service_json(r#"[{"Name":"a","Status":1},{"Name":"b","Status":4}]"#);
        assert_eq!(report.state, ServiceState::Stopped);

        let report = parse_service_json(r#"{"Name":"a","Status":null}"#);
        assert_eq!(report.state, ServiceState::Unknown);
    }

    #[test]
    fn test_parse_garbage_is_error_state() {
        assert_eq!(parse_service_json("").state, ServiceState::Error);
        assert_eq!(parse_service_json("Get-Service : Cannot find").state, ServiceState::Error);
        assert_eq!(parse_service_json("42").state, ServiceState::Error);
    }

    #[cfg(not(target_os = "windows"))]
    #[tokio::test]
    async fn test_non_windows_reports_not_supported() {
        assert_eq!(query("sshd").await.unwrap().state, ServiceState::NotSupported);
    }
}
