use super::PROBE_TIMEOUT;
use crate::error::ProbeError;
use std::process::Stdio;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

pub(super) async fn is_running(name: &str) -> Result<bool, ProbeError> {
    if cfg!(target_os = "windows") {
        is_running_windows(name).await
    } else {
        Ok(is_running_sysinfo(name))
    }
}

async fn is_running_windows(name: &str) -> Result<bool, ProbeError> {
    let filter = format!("IMAGENAME eq {name}");
    let output = tokio::time::timeout(
        PROBE_TIMEOUT,
        AsyncCommand::new("tasklist")
            .args(["/FI", filter.as_str(), "/NH"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| ProbeError::Timeout(PROBE_TIMEOUT.as_secs()))??;

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(listing_mentions(&stdout, name))
}

fn is_running_sysinfo(name: &str) -> bool {
    let mut sys = sysinfo::System::new();
    sys.refresh_processes();
    let found = sys
        .processes()
        .values()
        .any(|p| listing_mentions(p.name(), name));
    debug!("Process {} present: {}", name, found);
    found
}

/// Case-insensitive containment, matching how `tasklist` output is read.
fn listing_mentions(listing: &str, name: &str) -> bool {
    !name.is_empty() && listing.to_lowercase().contains(&name.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tasklist_output_matching() {
        let hit = "notepad.exe                  4242 Console    1     12,345 K\r\n";
        let miss = "INFO: No tasks are running which match the specified criteria.\r\n";
        assert!(listing_mentions(hit, "Notepad.exe"));
        assert!(!listing_mentions(miss, "notepad.exe"));
        assert!(!listing_mentions(hit, ""));
    }

    #[cfg(not(target_os = "windows"))]
    #[tokio::test]
    async fn test_unknown_process_is_not_running() {
        let running = is_running("definitely-not-a-real-process-7f3a").await.unwrap();
        assert!(!running);
    }
}
