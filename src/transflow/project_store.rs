//! The project-loading/saving boundary: turns whatever file format a caller
//! works with into the ordered item lists this crate translates, and back.
//!
//! Deliberately out of scope beyond the trait boundary and one in-memory
//! reference implementation — a real deployment supplies its own
//! [`ProjectStore`] backed by its document format (`.docx`, subtitle files,
//! markdown, ...).

use crate::transflow::config::BilingualTextOrder;
use crate::transflow::error::TransflowError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Keys the pipeline stores in an item's or project's `extra` map to make a
/// run resumable without re-inserting rows.
pub mod extra_keys {
    pub const DB_WORK_ID: &str = "dbWorkId";
    pub const DB_DOC_MAP: &str = "dbDocMap";
    pub const DB_ATOM_MAP: &str = "dbAtomMap";
}

/// One translatable unit as loaded from the source file, before it becomes a
/// store-backed atom.
#[derive(Debug, Clone, Default)]
pub struct ProjectItem {
    pub source_text: String,
    pub translated_text: Option<String>,
    pub translation_status: String,
    pub token_count: Option<u32>,
    pub row_index: usize,
    pub extra: HashMap<String, Value>,
}

/// One input file's parsed items, in source order.
#[derive(Debug, Clone, Default)]
pub struct ProjectFile {
    pub path: String,
    pub items: Vec<ProjectItem>,
}

/// A loaded project: its files in load order plus a free-form `extra` map
/// used for resumability bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct Project {
    pub id: String,
    pub files: Vec<ProjectFile>,
    pub extra: HashMap<String, Value>,
}

impl Project {
    /// Database-assigned project/work id, if this project was loaded from a
    /// previous run.
    pub fn db_work_id(&self) -> Option<&str> {
        self.extra.get(extra_keys::DB_WORK_ID).and_then(Value::as_str)
    }

    /// `file_path -> document_id` map restored from a previous run, with
    /// integer-valued JSON restored to `i64`.
    pub fn db_doc_map(&self) -> HashMap<String, i64> {
        parse_id_map(self.extra.get(extra_keys::DB_DOC_MAP))
    }

    /// `"document_id:position" -> atom_id` map restored from a previous run.
    pub fn db_atom_map(&self) -> HashMap<String, i64> {
        parse_id_map(self.extra.get(extra_keys::DB_ATOM_MAP))
    }
}

fn parse_id_map(value: Option<&Value>) -> HashMap<String, i64> {
    match value.and_then(Value::as_object) {
        Some(obj) => obj
            .iter()
            .filter_map(|(k, v)| v.as_i64().map(|n| (k.clone(), n)))
            .collect(),
        None => HashMap::new(),
    }
}

/// Where and how a translated project gets written back out.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub output_filename_suffix: String,
    pub bilingual_text_order: BilingualTextOrder,
}

/// Contract for loading a project from storage and writing translated output
/// back. Implementations own the actual file format.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Parse `path` into an ordered [`Project`], restoring any previously
    /// persisted `extra` bookkeeping so a resumed run can skip re-inserting
    /// rows already in the relational store.
    async fn load_project(&self, path: &str) -> Result<Project, TransflowError>;

    /// Write every file's translated items back out under `output_path`,
    /// honoring `output_config`. `input_path` is passed through for
    /// implementations that need it to resolve relative paths or copy
    /// untranslated sidecar assets.
    async fn save_project(
        &self,
        project: &Project,
        output_path: &str,
        input_path: &str,
        output_config: &OutputConfig,
    ) -> Result<(), TransflowError>;
}

/// In-memory [`ProjectStore`] sufficient for tests and small runs: projects
/// are registered by path up front (or loaded lazily via
/// [`MemoryProjectStore::with_project`]), and saves are captured rather than
/// written to disk.
#[derive(Default)]
pub struct MemoryProjectStore {
    projects: Mutex<HashMap<String, Project>>,
    saved: Mutex<Vec<(String, Project)>>,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a project to be returned by a later `load_project(path)`.
    pub async fn with_project(self, path: impl Into<String>, project: Project) -> Self {
        self.projects.lock().await.insert(path.into(), project);
        self
    }

    /// Every `(output_path, project)` pair captured by `save_project` calls
    /// so far, in call order.
    pub async fn saved_projects(&self) -> Vec<(String, Project)> {
        self.saved.lock().await.clone()
    }
}

#[async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn load_project(&self, path: &str) -> Result<Project, TransflowError> {
        self.projects
            .lock()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| TransflowError::Fatal(format!("no project registered at {path}")))
    }

    async fn save_project(
        &self,
        project: &Project,
        output_path: &str,
        _input_path: &str,
        _output_config: &OutputConfig,
    ) -> Result<(), TransflowError> {
        self.saved
            .lock()
            .await
            .push((output_path.to_string(), project.clone()));
        Ok(())
    }
}
