use crate::diagnostics::IncidentReport;
use crate::state::WorkflowState;
use async_trait::async_trait;
use maestro_core::{MaestroError, MaestroResult};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Persists workflow snapshots.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn save(&self, state: &WorkflowState) -> MaestroResult<()>;
    async fn load(&self, id: &str) -> MaestroResult<Option<WorkflowState>>;
    async fn delete(&self, id: &str) -> MaestroResult<()>;
    async fn list(&self) -> MaestroResult<Vec<String>>;
}

/// Receives incident reports as failures happen.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn submit(&self, report: &IncidentReport) -> MaestroResult<()>;
}

/// Maps an id to a file stem of `[A-Za-z0-9_-]` plus `%XX` escapes for
/// every other byte. Distinct ids never share a file and no id can escape
/// the directory.
fn file_stem(id: &str) -> String {
    let mut stem = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("%{byte:02X}"));
        }
    }
    stem
}

/// Inverse of [`file_stem`]. `None` for names this store did not write.
fn id_from_stem(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// One pretty-printed JSON file per workflow.
pub struct FileWorkflowStore {
    dir: PathBuf,
}

impl FileWorkflowStore {
    pub async fn new(dir: impl Into<PathBuf>) -> MaestroResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn state_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(id)))
    }
}

#[async_trait]
impl WorkflowStore for FileWorkflowStore {
    async fn save(&self, state: &WorkflowState) -> MaestroResult<()> {
        let json = serde_json::to_string_pretty(state)?;
        tokio::fs::write(self.state_path(&state.id), json).await?;
        Ok(())
    }

    async fn load(&self, id: &str) -> MaestroResult<Option<WorkflowState>> {
        let path = self.state_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(path).await?;
        let state = serde_json::from_str(&data)
            .map_err(|e| MaestroError::Store(format!("Failed to parse workflow {id}: {e}")))?;
        Ok(Some(state))
    }

    async fn delete(&self, id: &str) -> MaestroResult<()> {
        let path = self.state_path(id);
        if path.exists() {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn list(&self) -> MaestroResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(id) = name.strip_suffix(".json").and_then(id_from_stem) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Writes each incident as `<id>.json` plus a rendered `<id>.md`.
pub struct FileReportStore {
    dir: PathBuf,
}

impl FileReportStore {
    pub async fn new(dir: impl Into<PathBuf>) -> MaestroResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub async fn load(&self, id: Uuid) -> MaestroResult<Option<IncidentReport>> {
        let path = self.dir.join(format!("{id}.json"));
        if !path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(path).await?;
        let report = serde_json::from_str(&data)
            .map_err(|e| MaestroError::Store(format!("Failed to parse incident {id}: {e}")))?;
        Ok(Some(report))
    }

    pub async fn list(&self) -> MaestroResult<Vec<Uuid>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(".json") {
                    if let Ok(id) = Uuid::parse_str(stem) {
                        ids.push(id);
                    }
                }
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl ReportSink for FileReportStore {
    async fn submit(&self, report: &IncidentReport) -> MaestroResult<()> {
        let json = serde_json::to_string_pretty(report)?;
        tokio::fs::write(self.dir.join(format!("{}.json", report.id)), json).await?;
        tokio::fs::write(
            self.dir.join(format!("{}.md", report.id)),
            report.to_markdown(),
        )
        .await?;
        Ok(())
    }
}
