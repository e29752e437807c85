//! Submits ticker definitions found in a folder to the control API at startup

use reqwest::StatusCode;
use std::path::Path;

/// What happened to the files in the ticker folder
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub created: usize,
    /// Already running under the same id
    pub existing: usize,
    pub rejected: usize,
    pub skipped: usize,
}

/// Files with `.sample.` in their name are examples, not tickers
pub fn is_sample(file_name: &str) -> bool {
    file_name.contains(".sample.")
}

/// Control API ticker endpoint for a bind address. Wildcard binds are
/// reached over loopback.
pub fn ticker_endpoint(address: &str) -> String {
    let address = match address.strip_prefix("0.0.0.0:") {
        Some(port) => format!("127.0.0.1:{}", port),
        None => address.to_string(),
    };
    format!("http://{}/ticker", address)
}

/// POST every non-sample file in `dir` to `endpoint` as is.
///
/// Nothing here is fatal: a missing folder, unreadable file or rejected
/// definition is logged and skipped.
pub async fn provision_from_dir(dir: &Path, endpoint: &str, client: &reqwest::Client) -> ProvisionReport {
    let mut report = ProvisionReport::default();

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(folder = %dir.display(), "Ticker folder not readable, skipping auto-provision: {}", e);
            return report;
        }
    };

    let mut files = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
                if is_file {
                    files.push(entry.path());
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(folder = %dir.display(), "Failed to list ticker folder: {}", e);
                break;
            }
        }
    }
    files.sort();

    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if is_sample(&name) {
            tracing::debug!(file = %name, "Skipping sample ticker");
            report.skipped += 1;
            continue;
        }

        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(file = %name, "Failed to read ticker file: {}", e);
                report.rejected += 1;
                continue;
            }
        };

        let response = client
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await;

        match response {
            Ok(response) if response.status() == StatusCode::CREATED => {
                tracing::info!(file = %name, "Provisioned ticker");
                report.created += 1;
            }
            Ok(response) if response.status() == StatusCode::CONFLICT => {
                tracing::debug!(file = %name, "Ticker already exists");
                report.existing += 1;
            }
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                tracing::warn!(file = %name, status = %status, "Ticker file rejected: {}", text);
                report.rejected += 1;
            }
            Err(e) => {
                tracing::warn!(file = %name, "Failed to submit ticker file: {}", e);
                report.rejected += 1;
            }
        }
    }

    tracing::info!(
        created = report.created,
        existing = report.existing,
        rejected = report.rejected,
        skipped = report.skipped,
        "Auto-provision complete"
    );
    report
}
