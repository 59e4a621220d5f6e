//! Top-level orchestration: the stage graph that drives a project from
//! on-disk source through planning, terminology, translation, and back out
//! to a saved, bilingual-or-not output file.
//!
//! [`WorkflowManager`] owns nothing the other modules don't already own — it
//! sequences calls into [`crate::transflow::planner::Planner`],
//! [`crate::transflow::terminology::TerminologyAgent`],
//! [`crate::transflow::translation_agent::TranslationAgent`], and
//! [`crate::transflow::project_store::ProjectStore`], publishing a
//! [`crate::transflow::event::TaskUpdate`] at each stage boundary and
//! persisting enough bookkeeping in [`crate::transflow::store::Store`] that a
//! later run can resume instead of re-translating finished atoms.

use crate::transflow::config::TranslationConfig;
use crate::transflow::error::TransflowError;
use crate::transflow::event::{HumanInterventionHandler, NoUiHandler, NoopProgressHandler, ProgressHandler};
use crate::transflow::llm_client::{LLMClient, PlatformConfig};
use crate::transflow::ner::{NERProvider, NoopNERProvider};
use crate::transflow::planner::Planner;
use crate::transflow::project_store::{extra_keys, OutputConfig, Project, ProjectStore};
use crate::transflow::rate_limiter::RateLimiter;
use crate::transflow::review::ReviewCoordinator;
use crate::transflow::runtime::Runtime;
use crate::transflow::stats::{AgentStage, StatsTracker};
use crate::transflow::store::{NewAtom, Store};
use crate::transflow::terminology::{TerminologyAgent, TerminologyItem};
use crate::transflow::translation_agent::{TranslationAgent, TranslationItem, TranslationOutcome};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// Everything one [`WorkflowManager::run`] call produced, for callers that
/// want more than "it didn't error".
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub project_id: String,
    pub total_atoms: usize,
    pub terms_identified: usize,
}

/// Drives one project end to end. Cheap to clone — every field is an `Arc`
/// or an already-`Clone` handle.
#[derive(Clone)]
pub struct WorkflowManager {
    config: TranslationConfig,
    store: Store,
    runtime: Runtime,
    project_store: Arc<dyn ProjectStore>,
    llm: Arc<dyn LLMClient>,
    ner: Arc<dyn NERProvider>,
    platform_config: PlatformConfig,
    progress: Arc<dyn ProgressHandler>,
    human: Arc<dyn HumanInterventionHandler>,
}

impl WorkflowManager {
    /// Build a manager around the minimum required dependencies. NER,
    /// progress reporting, and human review default to no-ops — wire them up
    /// with the `with_*` builders below.
    pub fn new(
        config: TranslationConfig,
        store: Store,
        project_store: Arc<dyn ProjectStore>,
        llm: Arc<dyn LLMClient>,
        platform_config: PlatformConfig,
    ) -> Self {
        Self {
            config,
            runtime: Runtime::new(store.clone()),
            store,
            project_store,
            llm,
            ner: Arc::new(NoopNERProvider),
            platform_config,
            progress: Arc::new(NoopProgressHandler),
            human: Arc::new(NoUiHandler),
        }
    }

    pub fn with_ner_provider(mut self, ner: Arc<dyn NERProvider>) -> Self {
        self.ner = ner;
        self
    }

    pub fn with_progress_handler(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_human_intervention_handler(mut self, human: Arc<dyn HumanInterventionHandler>) -> Self {
        self.human = human;
        self
    }

    /// Clone of the run-wide cancellation flag, so a caller can cancel a run
    /// in flight from another task.
    pub fn cancellation_flag(&self) -> Arc<std::sync::atomic::AtomicBool> {
        self.runtime.cancellation_flag()
    }

    /// Run the full pipeline for one project: load, plan, identify
    /// terminology, translate, and save. `project_id` is the store's project
    /// key (also used to resume a previous run via the loaded project's
    /// `extra` bookkeeping).
    pub async fn run(&self, project_id: &str, input_path: &str, output_path: &str) -> Result<RunSummary, TransflowError> {
        let mut project = self.project_store.load_project(input_path).await?;
        project.id = project_id.to_string();

        let all_source_texts: Vec<String> =
            project.files.iter().flat_map(|f| f.items.iter()).map(|i| i.source_text.clone()).collect();
        let stats = Arc::new(StatsTracker::new(all_source_texts.len() as u64));

        self.check_cancelled()?;
        stats.enter_stage(AgentStage::Planning, 1);
        self.publish(&stats).await;
        let planning = Planner::plan(&all_source_texts, &self.config);
        stats.advance_stage_progress(1);
        self.publish(&stats).await;

        self.check_cancelled()?;
        stats.enter_stage(AgentStage::Preprocessing, project.files.len() as u64);
        self.publish(&stats).await;
        let config_json = serde_json::to_string(&self.config).unwrap_or_else(|_| "{}".to_string());
        self.ensure_project_row(project_id, &config_json).await?;

        let doc_map = project.db_doc_map();
        let atom_map = project.db_atom_map();
        let mut file_atoms: Vec<(i64, Vec<i64>)> = Vec::with_capacity(project.files.len());

        for file in &project.files {
            self.check_cancelled()?;
            let document_id = if let Some(&id) = doc_map.get(&file.path) {
                id
            } else {
                self.store.upsert_doc(project_id, &file.path).await?
            };

            let mut atom_ids = Vec::with_capacity(file.items.len());
            let mut missing = Vec::new();
            for (position, item) in file.items.iter().enumerate() {
                let key = format!("{document_id}:{position}");
                if let Some(&atom_id) = atom_map.get(&key) {
                    atom_ids.push(atom_id);
                } else {
                    missing.push((position, item.source_text.clone()));
                }
            }

            if !missing.is_empty() {
                let new_atoms: Vec<NewAtom> = missing
                    .iter()
                    .map(|(position, text)| NewAtom { position: *position as i64, source_text: text.clone() })
                    .collect();
                let new_ids = self.store.create_atoms_batch(document_id, &new_atoms).await?;
                let mut new_ids = new_ids.into_iter();
                let mut merged = vec![0i64; file.items.len()];
                for (position, _) in &missing {
                    merged[*position] = new_ids.next().expect("one id per missing atom");
                }
                for (position, &atom_id) in atom_ids.iter().enumerate() {
                    merged[position] = atom_id;
                }
                atom_ids = merged;
            }

            file_atoms.push((document_id, atom_ids));
            stats.advance_stage_progress(1);
            self.publish(&stats).await;
        }

        let terminology_items: Vec<TerminologyItem> = file_atoms
            .iter()
            .zip(&project.files)
            .flat_map(|((_, atom_ids), file)| {
                atom_ids.iter().zip(&file.items).map(|(&atom_id, item)| TerminologyItem {
                    atom_id,
                    source_text: item.source_text.clone(),
                })
            })
            .collect();

        self.check_cancelled()?;
        stats.enter_stage(AgentStage::Terminology, 1);
        self.publish(&stats).await;
        let rate_limiter = Arc::new(RateLimiter::new(self.config.rpm_limit, self.config.tpm_limit, self.runtime.cancellation_flag()));
        let terminology_agent = TerminologyAgent::new(
            self.llm.clone(),
            self.ner.clone(),
            self.store.clone(),
            rate_limiter.clone(),
            stats.clone(),
            self.platform_config.clone(),
        );
        let domain = "general";
        let persisted_terms = terminology_agent
            .run(project_id, domain, &self.config.source_language, &terminology_items)
            .await?;
        stats.advance_stage_progress(1);
        self.publish(&stats).await;

        let term_table = self.load_term_table(project_id).await?;

        let review = if self.config.enable_human_review {
            Some(Arc::new(ReviewCoordinator::new(self.human.clone())))
        } else {
            None
        };
        let translation_agent = TranslationAgent::new(
            self.llm.clone(),
            rate_limiter,
            stats.clone(),
            self.store.clone(),
            self.platform_config.clone(),
            review,
            self.config.clone(),
            self.progress.clone(),
            self.runtime.cancellation_flag(),
        );

        let max_workers = if self.config.user_thread_counts > 0 {
            self.config.user_thread_counts as usize
        } else {
            planning.execution_plan.max_workers
        };
        let strategies: Vec<_> = planning.chunk_strategies.iter().map(|c| c.strategy).collect();

        let translation_items: Vec<TranslationItem> = terminology_items
            .iter()
            .map(|t| TranslationItem { atom_id: t.atom_id, source_text: t.source_text.clone() })
            .collect();

        self.check_cancelled()?;
        let outcomes = translation_agent.run(&translation_items, max_workers, &strategies, &term_table).await?;

        if !translation_items.is_empty() && outcomes.is_empty() {
            return Err(TransflowError::Fatal(
                "translation stage produced zero results for a non-empty project".to_string(),
            ));
        }

        self.check_cancelled()?;
        stats.enter_stage(AgentStage::Saving, file_atoms.len() as u64);
        self.publish(&stats).await;
        self.write_back(&mut project, &file_atoms, &outcomes, output_path, input_path).await?;
        stats.advance_stage_progress(1);
        self.publish(&stats).await;

        stats.enter_stage(AgentStage::Completed, 1);
        stats.advance_stage_progress(1);
        self.publish(&stats).await;

        Ok(RunSummary {
            project_id: project_id.to_string(),
            total_atoms: translation_items.len(),
            terms_identified: persisted_terms.len(),
        })
    }

    async fn publish(&self, stats: &StatsTracker) {
        self.progress.on_update(&stats.snapshot()).await;
    }

    /// Polled at the start of every stage and every per-file sub-step, so a
    /// cancellation requested mid-run unwinds to the nearest boundary instead
    /// of running the remaining stages to completion.
    fn check_cancelled(&self) -> Result<(), TransflowError> {
        if self.runtime.is_cancelled() {
            Err(TransflowError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn ensure_project_row(&self, project_id: &str, config_json: &str) -> Result<(), TransflowError> {
        match self
            .store
            .create_project(
                project_id,
                &self.config.source_language,
                &self.config.target_language,
                config_json,
                None,
                None,
                None,
                None,
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(TransflowError::Persistence(_)) => Ok(()), // already exists — resuming a prior run
            Err(e) => Err(e),
        }
    }

    async fn load_term_table(&self, project_id: &str) -> Result<Vec<crate::transflow::consistency::TermEntry>, TransflowError> {
        let rows = self.store.list_terms(project_id).await?;
        Ok(rows
            .into_iter()
            .map(|r| crate::transflow::consistency::TermEntry { key: r.entry_key, translation: r.entry_val })
            .collect())
    }

    async fn write_back(
        &self,
        project: &mut Project,
        file_atoms: &[(i64, Vec<i64>)],
        outcomes: &[TranslationOutcome],
        output_path: &str,
        input_path: &str,
    ) -> Result<(), TransflowError> {
        let by_atom: HashMap<i64, &TranslationOutcome> = outcomes.iter().map(|o| (o.atom_id, o)).collect();

        for (file, (document_id, atom_ids)) in project.files.iter_mut().zip(file_atoms) {
            for (item, &atom_id) in file.items.iter_mut().zip(atom_ids) {
                if let Some(outcome) = by_atom.get(&atom_id) {
                    item.translated_text = Some(outcome.final_text.clone());
                    item.translation_status = "finalized".to_string();
                }
            }
            project.extra.insert(
                format!("{}:{}", extra_keys::DB_DOC_MAP, file.path),
                json!(document_id),
            );
        }

        let mut doc_map = serde_json::Map::new();
        for (file, (document_id, _)) in project.files.iter().zip(file_atoms) {
            doc_map.insert(file.path.clone(), json!(document_id));
        }
        project.extra.insert(extra_keys::DB_DOC_MAP.to_string(), serde_json::Value::Object(doc_map));

        let mut atom_map = serde_json::Map::new();
        for (document_id, atom_ids) in file_atoms {
            for (position, atom_id) in atom_ids.iter().enumerate() {
                atom_map.insert(format!("{document_id}:{position}"), json!(atom_id));
            }
        }
        project.extra.insert(extra_keys::DB_ATOM_MAP.to_string(), serde_json::Value::Object(atom_map));

        let output_config = OutputConfig {
            output_filename_suffix: self.config.output_filename_suffix.clone(),
            bilingual_text_order: self.config.bilingual_text_order,
        };
        self.project_store.save_project(project, output_path, input_path, &output_config).await
    }
}
