//! Persistence seam for scan output.
//!
//! The engine only ever talks to `FindingStore`; storage technology is the
//! caller's choice. `JsonlStore` appends one JSON object per line, tagged with
//! the scan id, so several runs can share a file.

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::core::result_aggregator::ScanResult;
use crate::core::Finding;

#[async_trait]
pub trait FindingStore: Send + Sync {
    async fn store_findings(&self, scan_id: &str, findings: &[Finding]) -> anyhow::Result<()>;

    async fn store_surface_results(&self, scan_id: &str, result: &ScanResult) -> anyhow::Result<()>;
}

#[derive(Serialize)]
#[serde(tag = "record", rename_all = "camelCase")]
enum Record<'a> {
    #[serde(rename_all = "camelCase")]
    Finding {
        scan_id: &'a str,
        recorded_at: u64,
        finding: &'a Finding,
    },
    #[serde(rename_all = "camelCase")]
    SurfaceResult {
        scan_id: &'a str,
        recorded_at: u64,
        result: &'a ScanResult,
    },
}

pub struct JsonlStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, records: &[Record<'_>]) -> anyhow::Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open output file '{}'", self.path.display()))?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl FindingStore for JsonlStore {
    async fn store_findings(&self, scan_id: &str, findings: &[Finding]) -> anyhow::Result<()> {
        let recorded_at = unix_now();
        let records: Vec<Record<'_>> = findings
            .iter()
            .map(|finding| Record::Finding { scan_id, recorded_at, finding })
            .collect();
        self.append(&records).await
    }

    async fn store_surface_results(&self, scan_id: &str, result: &ScanResult) -> anyhow::Result<()> {
        let record = Record::SurfaceResult { scan_id, recorded_at: unix_now(), result };
        self.append(&[record]).await
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        ExpectedSignal, OracleKind, Payload, Surface, SurfaceMethod, Verdict, VulnerabilityClass,
    };
    use url::Url;

    fn finding() -> Finding {
        Finding {
            class: VulnerabilityClass::Xss,
            surface: Surface {
                action: "/search".into(),
                endpoint: Url::parse("http://lab.local/search").unwrap(),
                method: SurfaceMethod::Get,
                parameters: Vec::new(),
            },
            parameter: "q".into(),
            payload: Payload::new(VulnerabilityClass::Xss, "<script>alert(1)</script>", ExpectedSignal::Reflect),
            verdict: Verdict::positive(OracleKind::Reflect, "reflected"),
        }
    }

    #[tokio::test]
    async fn appends_tagged_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.jsonl");
        let store = JsonlStore::new(&path);

        store.store_findings("abc123", &[finding(), finding()]).await.unwrap();
        store
            .store_surface_results("abc123", &ScanResult::new(VulnerabilityClass::Xss))
            .await
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["record"], "finding");
        assert_eq!(lines[0]["scanId"], "abc123");
        assert_eq!(lines[0]["finding"]["parameter"], "q");
        assert_eq!(lines[2]["record"], "surfaceResult");
    }

    #[tokio::test]
    async fn empty_batch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.jsonl");
        JsonlStore::new(&path).store_findings("x", &[]).await.unwrap();
        assert!(!path.exists());
    }
}
