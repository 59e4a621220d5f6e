//! Relational + full-text persistence for projects, documents, atoms, traces
//! and terminology.
//!
//! Grounded on the `sqlx`-on-SQLite pattern used for session/event storage
//! elsewhere in the ecosystem: a single connection pool, `CREATE TABLE IF NOT
//! EXISTS` migrations run once at startup, and every multi-row mutation
//! wrapped in an explicit transaction. The full-text search surface is
//! SQLite's FTS5 virtual table rather than a separate engine — one storage
//! engine for both the relational and full-text requirements.

use crate::transflow::error::TransflowError;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

/// Who produced a [`Trace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    Translator,
    QualityAssessor,
    ConsistencyChecker,
    Human,
}

impl AgentRole {
    fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Translator => "translator",
            AgentRole::QualityAssessor => "quality_assessor",
            AgentRole::ConsistencyChecker => "consistency_checker",
            AgentRole::Human => "human",
        }
    }
}

/// What kind of action a [`Trace`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    Draft,
    Refine,
    Evaluate,
    Final,
    HumanEdit,
}

impl ActionType {
    fn as_str(&self) -> &'static str {
        match self {
            ActionType::Draft => "draft",
            ActionType::Refine => "refine",
            ActionType::Evaluate => "evaluate",
            ActionType::Final => "final",
            ActionType::HumanEdit => "human_edit",
        }
    }

    /// Whether adding a trace of this type flips the atom's active-trace
    /// pointer. `evaluate` traces annotate without ever becoming active.
    fn activates(&self) -> bool {
        !matches!(self, ActionType::Evaluate)
    }
}

/// Atom lifecycle status codes, matching the data model exactly:
/// 0 untranslated, 1 drafted, 2 refined, 3 human-reviewed, 4 finalized.
pub mod atom_status {
    pub const UNTRANSLATED: i64 = 0;
    pub const DRAFTED: i64 = 1;
    pub const REFINED: i64 = 2;
    pub const HUMAN_REVIEWED: i64 = 3;
    pub const FINALIZED: i64 = 4;
}

/// Input for [`Store::create_atoms_batch`]; `position` must be unique within
/// the owning document.
#[derive(Debug, Clone)]
pub struct NewAtom {
    pub position: i64,
    pub source_text: String,
}

/// A row read back from `atoms`.
#[derive(Debug, Clone)]
pub struct AtomRow {
    pub id: i64,
    pub position: i64,
    pub source_text: String,
    pub translated_text: Option<String>,
    pub status_code: i64,
}

/// Input for [`Store::upsert_term`].
#[derive(Debug, Clone)]
pub struct NewTerm {
    pub project_id: String,
    pub entry_key: String,
    pub entry_val: String,
    /// One of `entity`, `term`, `idiom`, `concept`, `keyword`, `acronym`.
    pub word_type: String,
    pub domain: Option<String>,
    pub variants: Vec<String>,
    pub examples: Vec<String>,
    pub candidates: Vec<TermCandidate>,
    pub atom_refs: Vec<i64>,
    pub confidence: f32,
}

/// A candidate translation surfaced during term verification.
#[derive(Debug, Clone, Serialize)]
pub struct TermCandidate {
    pub translation: String,
    pub source: String,
    pub confidence: f32,
}

/// A term row read back by [`Store::search_terms`].
#[derive(Debug, Clone)]
pub struct TermRow {
    pub entry_key: String,
    pub entry_val: String,
    pub word_type: String,
    pub domain: Option<String>,
    pub human_confirmed: bool,
}

/// Handle onto the SQLite-backed store. Cheap to clone (wraps a pool).
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (and implicitly create, if `database_url` points at a file URL
    /// with `mode=rwc`) the backing SQLite database. Does not run migrations;
    /// call [`Self::migrate`] once after connecting.
    pub async fn connect(database_url: &str) -> Result<Self, TransflowError> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| TransflowError::Persistence(format!("connect failed: {e}")))?;
        Ok(Self { pool })
    }

    /// Build a store directly from an existing pool (used by tests that want
    /// an in-memory database shared across assertions).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create every table and index this crate needs, idempotently.
    pub async fn migrate(&self) -> Result<(), TransflowError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                source_language TEXT NOT NULL,
                target_language TEXT NOT NULL,
                config_json TEXT NOT NULL,
                topic_domain TEXT,
                topic_style TEXT,
                translation_guide TEXT,
                prompt_templates_json TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id TEXT NOT NULL REFERENCES projects(id),
                file_path TEXT NOT NULL,
                atom_count INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending',
                UNIQUE(project_id, file_path)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS atoms (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id INTEGER NOT NULL REFERENCES documents(id),
                position INTEGER NOT NULL,
                source_text TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                translated_text TEXT,
                status_code INTEGER NOT NULL DEFAULT 0,
                quality_score REAL,
                examination_json TEXT,
                context_info_json TEXT,
                UNIQUE(document_id, position)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS traces (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                atom_id INTEGER NOT NULL REFERENCES atoms(id),
                agent_role TEXT NOT NULL,
                action_type TEXT NOT NULL,
                content TEXT NOT NULL,
                quality_report_json TEXT,
                metadata_json TEXT,
                prompt_tokens INTEGER NOT NULL DEFAULT 0,
                completion_tokens INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_traces_one_active_per_atom \
             ON traces(atom_id) WHERE is_active = 1",
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS terms (
                project_id TEXT NOT NULL,
                entry_key TEXT NOT NULL,
                entry_val TEXT NOT NULL,
                word_type TEXT NOT NULL,
                domain TEXT,
                variants_json TEXT,
                examples_json TEXT,
                candidates_json TEXT,
                atom_refs_json TEXT,
                confidence REAL,
                human_confirmed INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (project_id, entry_key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS knowledge_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id TEXT NOT NULL,
                content TEXT NOT NULL,
                kb_type TEXT NOT NULL,
                vector_json TEXT,
                tags_json TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            "CREATE VIRTUAL TABLE IF NOT EXISTS domain_lexicon_fts USING fts5( \
                entry_key, entry_val, variants_text, \
                content='terms', content_rowid='rowid' \
             )",
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    /// Create a project row. `config_json`/`prompt_templates_json` are
    /// caller-serialized blobs (the workflow config and prompt template set).
    #[allow(clippy::too_many_arguments)]
    pub async fn create_project(
        &self,
        id: &str,
        source_language: &str,
        target_language: &str,
        config_json: &str,
        topic_domain: Option<&str>,
        topic_style: Option<&str>,
        translation_guide: Option<&str>,
        prompt_templates_json: Option<&str>,
    ) -> Result<(), TransflowError> {
        sqlx::query(
            "INSERT INTO projects \
             (id, source_language, target_language, config_json, topic_domain, \
              topic_style, translation_guide, prompt_templates_json, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        )
        .bind(id)
        .bind(source_language)
        .bind(target_language)
        .bind(config_json)
        .bind(topic_domain)
        .bind(topic_style)
        .bind(translation_guide)
        .bind(prompt_templates_json)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    /// Get-or-create a document row for `(project_id, file_path)`, returning
    /// its id either way — idempotent across resumes.
    pub async fn upsert_doc(&self, project_id: &str, file_path: &str) -> Result<i64, TransflowError> {
        if let Some(row) = sqlx::query(
            "SELECT id FROM documents WHERE project_id = ? AND file_path = ?",
        )
        .bind(project_id)
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?
        {
            return Ok(row.get("id"));
        }

        let result = sqlx::query(
            "INSERT INTO documents (project_id, file_path, status) VALUES (?, ?, 'pending')",
        )
        .bind(project_id)
        .bind(file_path)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(result.last_insert_rowid())
    }

    /// Insert atoms for a document in one transaction, returning their ids in
    /// the same order as `atoms` (position order), not by re-querying and
    /// guessing a tail — safe under concurrent inserts into other documents.
    pub async fn create_atoms_batch(
        &self,
        document_id: i64,
        atoms: &[NewAtom],
    ) -> Result<Vec<i64>, TransflowError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let mut ids = Vec::with_capacity(atoms.len());

        for atom in atoms {
            let hash = content_hash(&atom.source_text);
            let result = sqlx::query(
                "INSERT INTO atoms (document_id, position, source_text, content_hash, status_code) \
                 VALUES (?, ?, ?, ?, 0)",
            )
            .bind(document_id)
            .bind(atom.position)
            .bind(&atom.source_text)
            .bind(&hash)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
            ids.push(result.last_insert_rowid());
        }

        sqlx::query("UPDATE documents SET atom_count = ? WHERE id = ?")
            .bind(atoms.len() as i64)
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;
        Ok(ids)
    }

    /// Fetch every atom belonging to a document, ordered by position.
    pub async fn list_atoms(&self, document_id: i64) -> Result<Vec<AtomRow>, TransflowError> {
        let rows = sqlx::query(
            "SELECT id, position, source_text, translated_text, status_code \
             FROM atoms WHERE document_id = ? ORDER BY position",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows
            .into_iter()
            .map(|row| AtomRow {
                id: row.get("id"),
                position: row.get("position"),
                source_text: row.get("source_text"),
                translated_text: row.get("translated_text"),
                status_code: row.get("status_code"),
            })
            .collect())
    }

    /// Update an atom's translated text and status code.
    pub async fn update_atom_translation(
        &self,
        atom_id: i64,
        text: &str,
        status_code: i64,
    ) -> Result<(), TransflowError> {
        sqlx::query("UPDATE atoms SET translated_text = ?, status_code = ? WHERE id = ?")
            .bind(text)
            .bind(status_code)
            .bind(atom_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// Attach or replace an atom's examination record (back-translation,
    /// score, warning level), stored as a JSON blob.
    pub async fn update_atom_examination(
        &self,
        atom_id: i64,
        examination_json: &str,
        quality_score: Option<f32>,
    ) -> Result<(), TransflowError> {
        sqlx::query("UPDATE atoms SET examination_json = ?, quality_score = ? WHERE id = ?")
            .bind(examination_json)
            .bind(quality_score)
            .bind(atom_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// Append a trace. If `action_type` is active-pointer-bearing (anything
    /// but `evaluate`), the insert runs inside a transaction that first
    /// clears the atom's current active trace, so the
    /// at-most-one-active-trace invariant never observes an intermediate
    /// state with zero or two active rows.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_trace(
        &self,
        atom_id: i64,
        role: AgentRole,
        action_type: ActionType,
        content: &str,
        quality_report_json: Option<&str>,
        metadata_json: Option<&str>,
        prompt_tokens: i64,
        completion_tokens: i64,
    ) -> Result<i64, TransflowError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        if action_type.activates() {
            sqlx::query("UPDATE traces SET is_active = 0 WHERE atom_id = ? AND is_active = 1")
                .bind(atom_id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }

        let result = sqlx::query(
            "INSERT INTO traces \
             (atom_id, agent_role, action_type, content, quality_report_json, metadata_json, \
              prompt_tokens, completion_tokens, is_active, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now', 'subsec'))",
        )
        .bind(atom_id)
        .bind(role.as_str())
        .bind(action_type.as_str())
        .bind(content)
        .bind(quality_report_json)
        .bind(metadata_json)
        .bind(prompt_tokens)
        .bind(completion_tokens)
        .bind(action_type.activates() as i64)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;
        Ok(result.last_insert_rowid())
    }

    /// The content of the atom's currently-active trace, if any.
    pub async fn get_active_translation(&self, atom_id: i64) -> Result<Option<String>, TransflowError> {
        let row = sqlx::query("SELECT content FROM traces WHERE atom_id = ? AND is_active = 1")
            .bind(atom_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.map(|r| r.get("content")))
    }

    /// Insert or replace a term keyed by `(project_id, entry_key)`. Audit
    /// fields (`human_confirmed`) are preserved across a re-upsert unless the
    /// caller is confirming (use [`Self::confirm_term`] for that).
    pub async fn upsert_term(&self, term: &NewTerm) -> Result<(), TransflowError> {
        let variants_json = serde_json::to_string(&term.variants).map_err(json_err)?;
        let examples_json = serde_json::to_string(&term.examples).map_err(json_err)?;
        let candidates_json = serde_json::to_string(&term.candidates).map_err(json_err)?;
        let atom_refs_json = serde_json::to_string(&term.atom_refs).map_err(json_err)?;

        let already_confirmed: bool = sqlx::query(
            "SELECT human_confirmed FROM terms WHERE project_id = ? AND entry_key = ?",
        )
        .bind(&term.project_id)
        .bind(&term.entry_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?
        .map(|row| row.get::<i64, _>("human_confirmed") != 0)
        .unwrap_or(false);

        sqlx::query(
            "INSERT INTO terms \
             (project_id, entry_key, entry_val, word_type, domain, variants_json, \
              examples_json, candidates_json, atom_refs_json, confidence, human_confirmed) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(project_id, entry_key) DO UPDATE SET \
                entry_val = excluded.entry_val, \
                word_type = excluded.word_type, \
                domain = excluded.domain, \
                variants_json = excluded.variants_json, \
                examples_json = excluded.examples_json, \
                candidates_json = excluded.candidates_json, \
                atom_refs_json = excluded.atom_refs_json, \
                confidence = excluded.confidence",
        )
        .bind(&term.project_id)
        .bind(&term.entry_key)
        .bind(&term.entry_val)
        .bind(&term.word_type)
        .bind(&term.domain)
        .bind(&variants_json)
        .bind(&examples_json)
        .bind(&candidates_json)
        .bind(&atom_refs_json)
        .bind(term.confidence)
        .bind(already_confirmed as i64)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        self.reindex_term_fts(&term.project_id, &term.entry_key).await
    }

    /// Mark a term as human-confirmed (set on human review acceptance).
    pub async fn confirm_term(&self, project_id: &str, entry_key: &str) -> Result<(), TransflowError> {
        sqlx::query(
            "UPDATE terms SET human_confirmed = 1 WHERE project_id = ? AND entry_key = ?",
        )
        .bind(project_id)
        .bind(entry_key)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    /// Re-sync the FTS index row for a single term after an upsert. SQLite's
    /// external-content FTS5 tables need an explicit `INSERT OR REPLACE`
    /// against the shadow table rather than firing off triggers here, since
    /// this crate keeps the trigger-free, explicit-call version for clarity.
    async fn reindex_term_fts(&self, project_id: &str, entry_key: &str) -> Result<(), TransflowError> {
        let row = sqlx::query("SELECT rowid, entry_val, variants_json FROM terms WHERE project_id = ? AND entry_key = ?")
            .bind(project_id)
            .bind(entry_key)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;

        let rowid: i64 = row.get("rowid");
        let entry_val: String = row.get("entry_val");
        let variants_json: Option<String> = row.get("variants_json");
        let variants_text = variants_json
            .and_then(|j| serde_json::from_str::<Vec<String>>(&j).ok())
            .map(|v| v.join(" "))
            .unwrap_or_default();

        sqlx::query(
            "INSERT INTO domain_lexicon_fts(rowid, entry_key, entry_val, variants_text) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(rowid)
        .bind(entry_key)
        .bind(&entry_val)
        .bind(&variants_text)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    /// Multi-match search over `entry_key`, `entry_val` and term variants,
    /// optionally filtered to a project and/or domain.
    pub async fn search_terms(
        &self,
        query: &str,
        project_id: Option<&str>,
        domain: Option<&str>,
        limit: i64,
    ) -> Result<Vec<TermRow>, TransflowError> {
        let mut sql = String::from(
            "SELECT t.entry_key, t.entry_val, t.word_type, t.domain, t.human_confirmed \
             FROM domain_lexicon_fts f \
             JOIN terms t ON t.rowid = f.rowid \
             WHERE domain_lexicon_fts MATCH ?",
        );
        if project_id.is_some() {
            sql.push_str(" AND t.project_id = ?");
        }
        if domain.is_some() {
            sql.push_str(" AND t.domain = ?");
        }
        sql.push_str(" ORDER BY rank LIMIT ?");

        let match_expr = format!("entry_key:{query} OR entry_val:{query} OR variants_text:{query}");
        let mut q = sqlx::query(&sql).bind(match_expr);
        if let Some(p) = project_id {
            q = q.bind(p);
        }
        if let Some(d) = domain {
            q = q.bind(d);
        }
        q = q.bind(limit);

        let rows = q.fetch_all(&self.pool).await.map_err(store_err)?;

        Ok(rows
            .into_iter()
            .map(|row| TermRow {
                entry_key: row.get("entry_key"),
                entry_val: row.get("entry_val"),
                word_type: row.get("word_type"),
                domain: row.get("domain"),
                human_confirmed: row.get::<i64, _>("human_confirmed") != 0,
            })
            .collect())
    }

    /// Insert a knowledge-base entry (translation memory, glossary, style
    /// guide, or external source).
    pub async fn add_knowledge_entry(
        &self,
        project_id: &str,
        content: &str,
        kb_type: &str,
        vector: Option<&[f32]>,
        tags: &[String],
    ) -> Result<i64, TransflowError> {
        let vector_json = vector.map(|v| serde_json::to_string(v)).transpose().map_err(json_err)?;
        let tags_json = serde_json::to_string(tags).map_err(json_err)?;

        let result = sqlx::query(
            "INSERT INTO knowledge_entries (project_id, content, kb_type, vector_json, tags_json) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(project_id)
        .bind(content)
        .bind(kb_type)
        .bind(vector_json)
        .bind(tags_json)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(result.last_insert_rowid())
    }

    /// Every persisted term for a project, unfiltered — used to build the
    /// enforcement table the translation stage consults for every chunk.
    pub async fn list_terms(&self, project_id: &str) -> Result<Vec<TermRow>, TransflowError> {
        let rows = sqlx::query(
            "SELECT entry_key, entry_val, word_type, domain, human_confirmed \
             FROM terms WHERE project_id = ?",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows
            .into_iter()
            .map(|row| TermRow {
                entry_key: row.get("entry_key"),
                entry_val: row.get("entry_val"),
                word_type: row.get("word_type"),
                domain: row.get("domain"),
                human_confirmed: row.get::<i64, _>("human_confirmed") != 0,
            })
            .collect())
    }

    /// Whether the project already has any persisted terms (used by
    /// [`crate::transflow::terminology`]'s reuse check).
    pub async fn has_terms(&self, project_id: &str) -> Result<bool, TransflowError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM terms WHERE project_id = ?")
            .bind(project_id)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        let count: i64 = row.get("n");
        Ok(count > 0)
    }
}

fn content_hash(source_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn store_err(e: sqlx::Error) -> TransflowError {
    TransflowError::Persistence(e.to_string())
}

fn json_err(e: serde_json::Error) -> TransflowError {
    TransflowError::Persistence(format!("json encode failed: {e}"))
}

/// Serialize an arbitrary quality report into the JSON blob `add_trace`
/// expects, so callers don't need `serde_json` in scope themselves.
pub fn quality_report_json(score: f32, back_translation: &str, issues: &[String]) -> Result<String, TransflowError> {
    let value = serde_json::json!({
        "score": score,
        "back_translation": back_translation,
        "issues": issues,
    });
    serde_json::to_string(&value).map_err(json_err)
}

/// Parse a previously-stored quality report blob back out, returning `None`
/// if the blob is absent or malformed rather than erroring — callers treat a
/// missing examination as "not yet evaluated".
pub fn parse_quality_report(blob: Option<&str>) -> Option<Value> {
    blob.and_then(|b| serde_json::from_str(b).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> Store {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = Store::from_pool(pool);
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn upsert_doc_is_idempotent() {
        let store = test_store().await;
        store
            .create_project("p1", "en", "es", "{}", None, None, None, None)
            .await
            .unwrap();
        let a = store.upsert_doc("p1", "chapter1.txt").await.unwrap();
        let b = store.upsert_doc("p1", "chapter1.txt").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn atoms_are_returned_in_position_order() {
        let store = test_store().await;
        store
            .create_project("p1", "en", "es", "{}", None, None, None, None)
            .await
            .unwrap();
        let doc_id = store.upsert_doc("p1", "doc.txt").await.unwrap();
        let atoms = vec![
            NewAtom { position: 0, source_text: "hello".into() },
            NewAtom { position: 1, source_text: "world".into() },
            NewAtom { position: 2, source_text: "!".into() },
        ];
        let ids = store.create_atoms_batch(doc_id, &atoms).await.unwrap();
        assert_eq!(ids.len(), 3);

        let rows = store.list_atoms(doc_id).await.unwrap();
        assert_eq!(rows.iter().map(|r| r.position).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(rows[0].id, ids[0]);
    }

    #[tokio::test]
    async fn adding_an_active_trace_deactivates_the_previous_one() {
        let store = test_store().await;
        store
            .create_project("p1", "en", "es", "{}", None, None, None, None)
            .await
            .unwrap();
        let doc_id = store.upsert_doc("p1", "doc.txt").await.unwrap();
        let ids = store
            .create_atoms_batch(doc_id, &[NewAtom { position: 0, source_text: "hi".into() }])
            .await
            .unwrap();
        let atom_id = ids[0];

        store
            .add_trace(atom_id, AgentRole::Translator, ActionType::Draft, "hola", None, None, 10, 5)
            .await
            .unwrap();
        store
            .add_trace(atom_id, AgentRole::Translator, ActionType::Refine, "hola!", None, None, 3, 2)
            .await
            .unwrap();

        let active = store.get_active_translation(atom_id).await.unwrap();
        assert_eq!(active.as_deref(), Some("hola!"));
    }

    #[tokio::test]
    async fn evaluate_traces_never_become_active() {
        let store = test_store().await;
        store
            .create_project("p1", "en", "es", "{}", None, None, None, None)
            .await
            .unwrap();
        let doc_id = store.upsert_doc("p1", "doc.txt").await.unwrap();
        let ids = store
            .create_atoms_batch(doc_id, &[NewAtom { position: 0, source_text: "hi".into() }])
            .await
            .unwrap();
        let atom_id = ids[0];

        store
            .add_trace(atom_id, AgentRole::Translator, ActionType::Draft, "hola", None, None, 1, 1)
            .await
            .unwrap();
        store
            .add_trace(
                atom_id,
                AgentRole::QualityAssessor,
                ActionType::Evaluate,
                "score=9",
                None,
                None,
                1,
                1,
            )
            .await
            .unwrap();

        let active = store.get_active_translation(atom_id).await.unwrap();
        assert_eq!(active.as_deref(), Some("hola"));
    }

    #[tokio::test]
    async fn upsert_term_then_search_finds_it() {
        let store = test_store().await;
        store
            .create_project("p1", "en", "es", "{}", None, None, None, None)
            .await
            .unwrap();
        store
            .upsert_term(&NewTerm {
                project_id: "p1".into(),
                entry_key: "pangolin".into(),
                entry_val: "pangolín".into(),
                word_type: "entity".into(),
                domain: Some("zoology".into()),
                variants: vec!["pangolins".into()],
                examples: vec![],
                candidates: vec![],
                atom_refs: vec![],
                confidence: 0.9,
            })
            .await
            .unwrap();

        let results = store.search_terms("pangolin", Some("p1"), None, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entry_val, "pangolín");
    }

    #[tokio::test]
    async fn confirming_a_term_survives_a_later_upsert() {
        let store = test_store().await;
        store
            .create_project("p1", "en", "es", "{}", None, None, None, None)
            .await
            .unwrap();
        let term = NewTerm {
            project_id: "p1".into(),
            entry_key: "k".into(),
            entry_val: "v".into(),
            word_type: "term".into(),
            domain: None,
            variants: vec![],
            examples: vec![],
            candidates: vec![],
            atom_refs: vec![],
            confidence: 0.5,
        };
        store.upsert_term(&term).await.unwrap();
        store.confirm_term("p1", "k").await.unwrap();
        store.upsert_term(&term).await.unwrap();

        let results = store.search_terms("k", Some("p1"), None, 10).await.unwrap();
        assert!(results[0].human_confirmed);
    }

    #[tokio::test]
    async fn has_terms_reflects_persisted_state() {
        let store = test_store().await;
        store
            .create_project("p1", "en", "es", "{}", None, None, None, None)
            .await
            .unwrap();
        assert!(!store.has_terms("p1").await.unwrap());
        store
            .upsert_term(&NewTerm {
                project_id: "p1".into(),
                entry_key: "k".into(),
                entry_val: "v".into(),
                word_type: "term".into(),
                domain: None,
                variants: vec![],
                examples: vec![],
                candidates: vec![],
                atom_refs: vec![],
                confidence: 0.5,
            })
            .await
            .unwrap();
        assert!(store.has_terms("p1").await.unwrap());
    }
}
