//! Result persistence and input loading.
//!
//! Results stream out as JSONL (one result object per line, appended as each
//! task finishes) so a crashed or cancelled run keeps everything already
//! extracted. Inputs load from a JSON array or JSONL of property records.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::model::{ExtractionResult, PropertyRecord};

/// Destination for terminal results. Each result is recorded exactly once.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn record(&self, result: &ExtractionResult) -> Result<()>;
}

/// Appends one JSON line per result.
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl JsonlSink {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResultSink for JsonlSink {
    async fn record(&self, result: &ExtractionResult) -> Result<()> {
        let line = serde_json::to_string(result)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("result file lock poisoned"))?;
        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        Ok(())
    }
}

/// Discards results. Used for dry runs.
pub struct NullSink;

#[async_trait]
impl ResultSink for NullSink {
    async fn record(&self, _result: &ExtractionResult) -> Result<()> {
        Ok(())
    }
}

/// In-memory sink for tests and summary collection.
#[derive(Default)]
pub struct MemorySink {
    results: Mutex<Vec<ExtractionResult>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<ExtractionResult> {
        self.results
            .lock()
            .map(|mut r| std::mem::take(&mut *r))
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Vec<ExtractionResult> {
        self.results.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.results.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn record(&self, result: &ExtractionResult) -> Result<()> {
        self.results
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink lock poisoned"))?
            .push(result.clone());
        Ok(())
    }
}

/// Load property records from a JSON array or JSONL file.
pub fn load_properties(path: &Path) -> Result<Vec<PropertyRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') {
        serde_json::from_str(&raw)
            .with_context(|| format!("{} is not a valid property array", path.display()))
    } else {
        raw.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .enumerate()
            .map(|(i, line)| {
                serde_json::from_str(line).with_context(|| {
                    format!("{} line {} is not a valid property record", path.display(), i + 1)
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExtractedFields, ExtractionStatus};
    use chrono::Utc;

    fn result(id: &str) -> ExtractionResult {
        ExtractionResult {
            property_id: id.into(),
            jurisdiction: "Wayne".into(),
            fields: ExtractedFields {
                amount_due: Some(8314.00),
                ..Default::default()
            },
            extraction_status: ExtractionStatus::Success,
            notes: vec![],
            attempts: 1,
            last_extraction_timestamp: Utc::now(),
            duration_ms: 900,
        }
    }

    #[tokio::test]
    async fn jsonl_sink_appends_one_line_per_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.jsonl");
        let sink = JsonlSink::create(&path).unwrap();

        sink.record(&result("p1")).await.unwrap();
        sink.record(&result("p2")).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: ExtractionResult = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.property_id, "p1");
    }

    #[test]
    fn loads_json_array_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("props.json");
        std::fs::write(
            &path,
            r#"[{"property_id":"p1","jurisdiction":"Maricopa","parcel_number":"214-05-025A","lookup_url":"https://treasurer.maricopa.gov/"}]"#,
        )
        .unwrap();
        let records = load_properties(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].parcel_number, "214-05-025A");
    }

    #[test]
    fn loads_jsonl_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("props.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"property_id":"p1","jurisdiction":"Wayne","parcel_number":"3659","lookup_url":"https://pwa.waynegov.com/"}"#,
                "\n",
                r#"{"property_id":"p2","jurisdiction":"Montgomery","parcel_number":"114834","lookup_url":"https://actweb.acttax.com/"}"#,
                "\n",
            ),
        )
        .unwrap();
        let records = load_properties(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].jurisdiction, "Montgomery");
    }

    #[test]
    fn bad_input_reports_the_offending_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("props.jsonl");
        std::fs::write(&path, "{\"property_id\":\"p1\"\nnot json\n").unwrap();
        let err = load_properties(&path).unwrap_err();
        assert!(format!("{err}").contains("line 1"));
    }
}
