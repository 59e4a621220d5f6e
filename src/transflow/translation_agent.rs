//! Strategy-based batch translation, TEaR scoring/refinement, human review,
//! and terminology-enforced commit — the densest subsystem in the pipeline.
//!
//! A run proceeds in three passes over the input:
//!
//! 1. **Per-chunk translate-evaluate-refine (TEaR).** Items are packed by
//!    [`chunk_by_chars`] and translated in one call per chunk under a
//!    strategy-tagged system prompt. Lines the model visibly mishandled are
//!    retried individually. Each resulting line is then back-translated,
//!    scored, and — if its score falls under
//!    [`TranslationConfig::REFINEMENT_SCORE_THRESHOLD`] — refined, all in
//!    batched calls scoped to the chunk.
//! 2. **Cross-batch stages**, run once over every chunk's output together:
//!    human review of the lowest-scoring lines (Stage A), terminology
//!    enforcement (Stage B), and persistence (Stage C).
//!
//! Chunks run under the same bounded-concurrency pattern as terminology
//! identification: a [`JoinSet`] of clones gated by a shared [`Semaphore`].

use crate::transflow::chunker::{chunk_by_chars, context_window};
use crate::transflow::consistency::{self, EnforcementResult, TermEntry};
use crate::transflow::config::TranslationConfig;
use crate::transflow::error::TransflowError;
use crate::transflow::event::{NoopProgressHandler, ProgressHandler, ReviewAction, ReviewDecision};
use crate::transflow::llm_client::{LLMClient, Message, PlatformConfig};
use crate::transflow::planner::StrategyTag;
use crate::transflow::rate_limiter::RateLimiter;
use crate::transflow::review::{ReviewCoordinator, ScoredLine};
use crate::transflow::stats::{AgentStage, StatsTracker};
use crate::transflow::store::{atom_status, quality_report_json, AgentRole, ActionType, Store};
use crate::transflow::textarea;
use log::warn;
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::OnceLock;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// One translatable unit handed to the translation agent.
#[derive(Debug, Clone)]
pub struct TranslationItem {
    pub atom_id: i64,
    pub source_text: String,
}

/// What a run produced for one atom, after every stage has settled.
#[derive(Debug, Clone)]
pub struct TranslationOutcome {
    pub atom_id: i64,
    pub final_text: String,
    pub score: f32,
}

/// One chunk's Step-1 output: drafted but not yet back-translated, scored, or
/// refined. The barrier between the drafting pass and the TEaR pass, so
/// progress reporting can publish a `Backtranslation` stage transition once
/// every chunk has a draft, rather than interleaving the two phases.
struct ChunkDraft {
    start_index: usize,
    atom_ids: Vec<i64>,
    sources: Vec<String>,
    draft_texts: Vec<String>,
    draft_tokens: Vec<(u32, u32)>,
}

/// In-flight state for one line as it moves through TEaR, review, and
/// enforcement. `current_text` is the best machine translation known at any
/// point; `human_text`, once set, takes priority over it for commit.
#[derive(Debug, Clone)]
struct LineWork {
    atom_id: i64,
    global_index: usize,
    source_text: String,
    draft_text: String,
    current_text: String,
    back_translation: String,
    score: f32,
    draft_tokens: (u32, u32),
    evaluate_tokens: (u32, u32),
    human_action: Option<ReviewAction>,
}

fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() / 4).max(1) as u32
}

fn split_tokens_evenly(total: (u32, u32), n: usize) -> Vec<(u32, u32)> {
    if n == 0 {
        return Vec::new();
    }
    let base = (total.0 / n as u32, total.1 / n as u32);
    let mut out = vec![base; n];
    if n > 0 {
        out[0].0 += total.0 % n as u32;
        out[0].1 += total.1 % n as u32;
    }
    out
}

fn reference_cue_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)et al\.|doi:").unwrap())
}

/// Whether a source line reads like a bibliography/reference entry — long,
/// comma-dense, and citation-shaped — which gets a note in the system prompt
/// asking the model to preserve names and punctuation rather than translate
/// prose-style.
fn looks_like_reference(source_text: &str) -> bool {
    if reference_cue_re().is_match(source_text) {
        return true;
    }
    let char_count = source_text.chars().count();
    let commas = source_text.chars().filter(|c| *c == ',').count();
    char_count > 500 && commas > 8
}

/// A line is "problem"-flagged when the model returned nothing, or returned
/// something implausibly short for a long source — both symptoms of a
/// dropped or truncated translation rather than a legitimately terse one.
fn is_problem_line(source_text: &str, translated_text: &str) -> bool {
    if translated_text.trim().is_empty() {
        return true;
    }
    let source_len = source_text.chars().count();
    let translated_len = translated_text.chars().count();
    source_len > 100 && (translated_len as f64) < (source_len as f64 * 0.3)
}

fn score_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*(\d+)[.、]\s*(?:Score|score|评分)\s*[:：]?\s*(-?\d+(?:\.\d+)?)").unwrap())
}

/// Parse `N. Score: X.X` / `N. 评分：X.X` lines out of a scoring reply,
/// substituting [`TranslationConfig::DEFAULT_QUALITY_SCORE`] for any index
/// the model dropped, returned unparsably, or scored outside `[1.0, 10.0]` —
/// an out-of-range value is treated as the model misreporting, not as a
/// rating to be pulled back in bounds.
fn parse_scores(content: &str, expected: usize) -> Vec<f32> {
    let mut found: HashMap<u32, f32> = HashMap::new();
    for caps in score_line_re().captures_iter(content) {
        let Some(index) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) else { continue };
        let Some(value) = caps.get(2).and_then(|m| m.as_str().parse::<f32>().ok()) else { continue };
        let value = if value < 1.0 || value > 10.0 { TranslationConfig::DEFAULT_QUALITY_SCORE } else { value };
        found.insert(index, value);
    }
    (1..=expected as u32)
        .map(|i| found.get(&i).copied().unwrap_or(TranslationConfig::DEFAULT_QUALITY_SCORE))
        .collect()
}

fn residue_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(?:原文|回译|修正后译文|Source|Back[- ]?translation|Revised)\s*[:：]\s*").unwrap()
    })
}

/// Strip leaked prompt-echo labels (`原文:`, `回译:`, `修正后译文:` and their
/// English equivalents) a refine call sometimes includes alongside the
/// replacement text itself.
fn strip_refine_residue(text: &str) -> String {
    residue_label_re().replace_all(text, "").trim().to_string()
}

/// Runs the translate/back-translate/score/refine loop over a run's items,
/// then human review, terminology enforcement, and persistence. Cloning is
/// cheap: every field is an `Arc`, already-`Clone` handle, or small value
/// type.
#[derive(Clone)]
pub struct TranslationAgent {
    llm: Arc<dyn LLMClient>,
    rate_limiter: Arc<RateLimiter>,
    stats: Arc<StatsTracker>,
    store: Store,
    platform_config: PlatformConfig,
    review: Option<Arc<ReviewCoordinator>>,
    config: TranslationConfig,
    progress: Arc<dyn ProgressHandler>,
    cancellation: Arc<AtomicBool>,
}

impl TranslationAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm: Arc<dyn LLMClient>,
        rate_limiter: Arc<RateLimiter>,
        stats: Arc<StatsTracker>,
        store: Store,
        platform_config: PlatformConfig,
        review: Option<Arc<ReviewCoordinator>>,
        config: TranslationConfig,
        progress: Arc<dyn ProgressHandler>,
        cancellation: Arc<AtomicBool>,
    ) -> Self {
        Self { llm, rate_limiter, stats, store, platform_config, review, config, progress, cancellation }
    }

    /// `true` once the run-wide stop flag has been observed; callers check
    /// this at the top of every stage and every chunk/line sub-step so an
    /// in-flight cancellation unwinds promptly instead of grinding through
    /// placeholder `[FAILED]` output.
    fn check_cancelled(&self) -> Result<(), TransflowError> {
        if self.cancellation.load(Ordering::SeqCst) {
            Err(TransflowError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn publish_stage(&self) {
        self.progress.on_update(&self.stats.snapshot()).await;
    }

    /// Translate every item in `items`, applying `terminology` for dynamic
    /// per-chunk term injection and enforcement. `strategies` supplies one
    /// [`StrategyTag`] per chunk (in chunk order); chunks beyond the slice's
    /// length reuse the last entry, or [`StrategyTag::Free`] if it's empty.
    pub async fn run(
        &self,
        items: &[TranslationItem],
        max_workers: usize,
        strategies: &[StrategyTag],
        terminology: &[TermEntry],
    ) -> Result<Vec<TranslationOutcome>, TransflowError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        self.check_cancelled()?;

        let source_texts: Vec<String> = items.iter().map(|i| i.source_text.clone()).collect();
        let chunks = chunk_by_chars(items, TranslationConfig::TRANSLATION_CHAR_BUDGET, |i| i.source_text.chars().count());

        let pool_size = max_workers.min(chunks.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(pool_size));

        self.stats.enter_stage(AgentStage::Translating, chunks.len() as u64);
        self.publish_stage().await;
        let mut draft_tasks = JoinSet::new();
        for (chunk_index, chunk) in chunks.into_iter().enumerate() {
            let agent = self.clone();
            let permit = semaphore.clone();
            let strategy = strategies
                .get(chunk_index)
                .copied()
                .or_else(|| strategies.last().copied())
                .unwrap_or(StrategyTag::Free);
            let context_before = context_window(&source_texts, chunk.start_index, self.config.pre_line_counts);
            let terms = terminology.to_vec();
            let start_index = chunk.start_index;
            let chunk_items = chunk.items;

            draft_tasks.spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore closed");
                agent.draft_chunk(&chunk_items, start_index, &context_before, strategy, &terms).await
            });
        }

        let mut drafts = Vec::new();
        let mut cancelled = false;
        while let Some(result) = draft_tasks.join_next().await {
            match result {
                Ok(Ok(draft)) => {
                    self.stats.advance_stage_progress(1);
                    drafts.push(draft);
                }
                Ok(Err(TransflowError::Cancelled)) => cancelled = true,
                Ok(Err(e)) => warn!("translation draft task failed: {e}"),
                Err(e) => warn!("translation draft task panicked: {e}"),
            }
        }
        if cancelled {
            return Err(TransflowError::Cancelled);
        }
        self.check_cancelled()?;
        drafts.sort_by_key(|d| d.start_index);

        self.stats.enter_stage(AgentStage::Backtranslation, drafts.len() as u64);
        self.publish_stage().await;
        let mut tear_tasks = JoinSet::new();
        for draft in drafts {
            let agent = self.clone();
            let permit = semaphore.clone();
            let terms = terminology.to_vec();
            tear_tasks.spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore closed");
                agent.tear_chunk(draft, &terms).await
            });
        }

        let mut lines = Vec::with_capacity(items.len());
        let mut cancelled = false;
        while let Some(result) = tear_tasks.join_next().await {
            match result {
                Ok(Ok(mut chunk_lines)) => {
                    self.stats.advance_stage_progress(1);
                    lines.append(&mut chunk_lines);
                }
                Ok(Err(TransflowError::Cancelled)) => cancelled = true,
                Ok(Err(e)) => warn!("translation TEaR task failed: {e}"),
                Err(e) => warn!("translation TEaR task panicked: {e}"),
            }
        }
        if cancelled {
            return Err(TransflowError::Cancelled);
        }
        self.check_cancelled()?;
        lines.sort_by_key(|l| l.global_index);

        if let Some(coordinator) = &self.review {
            if self.config.enable_human_review {
                self.run_human_review(coordinator, &mut lines).await;
            }
        }

        self.check_cancelled()?;
        if !terminology.is_empty() {
            self.stats.enter_stage(AgentStage::EntityCheck, lines.len() as u64);
            self.publish_stage().await;
        }

        let outcomes = self.commit(&lines, terminology).await?;
        Ok(outcomes)
    }

    async fn draft_chunk(
        &self,
        chunk_items: &[TranslationItem],
        start_index: usize,
        context_before: &[String],
        strategy: StrategyTag,
        terminology: &[TermEntry],
    ) -> Result<ChunkDraft, TransflowError> {
        self.check_cancelled()?;
        let sources: Vec<String> = chunk_items.iter().map(|i| i.source_text.clone()).collect();
        let combined = sources.join("\n");
        let relevant_terms = consistency::filter_terms_in_source(terminology, &combined);
        let reference_heavy = chunk_items.iter().any(|i| looks_like_reference(&i.source_text));

        let (draft_texts, draft_tokens) = self
            .translate_chunk(&sources, context_before, strategy, &relevant_terms, reference_heavy)
            .await;
        let draft_tokens = split_tokens_evenly(draft_tokens, sources.len());

        Ok(ChunkDraft {
            start_index,
            atom_ids: chunk_items.iter().map(|i| i.atom_id).collect(),
            sources,
            draft_texts,
            draft_tokens,
        })
    }

    async fn tear_chunk(&self, draft: ChunkDraft, terminology: &[TermEntry]) -> Result<Vec<LineWork>, TransflowError> {
        self.check_cancelled()?;
        let ChunkDraft { start_index, atom_ids, sources, draft_texts, draft_tokens } = draft;
        let combined = sources.join("\n");
        let relevant_terms = consistency::filter_terms_in_source(terminology, &combined);

        let (back_translations, _back_tokens) = self.back_translate_batch(&draft_texts, &relevant_terms).await;
        let (scores, evaluate_tokens) = self.score_batch(&sources, &draft_texts, &back_translations).await;
        let per_line_evaluate_tokens = split_tokens_evenly(evaluate_tokens, sources.len());

        let needs_refine: Vec<usize> = scores
            .iter()
            .enumerate()
            .filter(|(_, &s)| s < TranslationConfig::REFINEMENT_SCORE_THRESHOLD)
            .map(|(i, _)| i)
            .collect();

        let mut current_texts = draft_texts.clone();
        if !needs_refine.is_empty() {
            let refined = self.refine_batch(&needs_refine, &sources, &draft_texts, &back_translations).await;
            for (local_index, text) in refined {
                current_texts[local_index] = text;
            }
        }

        Ok((0..atom_ids.len())
            .map(|i| LineWork {
                atom_id: atom_ids[i],
                global_index: start_index + i,
                source_text: sources[i].clone(),
                draft_text: draft_texts[i].clone(),
                current_text: current_texts[i].clone(),
                back_translation: back_translations.get(i).cloned().unwrap_or_default(),
                score: scores[i],
                draft_tokens: draft_tokens[i],
                evaluate_tokens: per_line_evaluate_tokens[i],
                human_action: None,
            })
            .collect())
    }

    async fn translate_chunk(
        &self,
        sources: &[String],
        context_before: &[String],
        strategy: StrategyTag,
        terms: &[&TermEntry],
        reference_heavy: bool,
    ) -> (Vec<String>, (u32, u32)) {
        let (primary, tokens) = self.primary_batch_translate(sources, context_before, strategy, terms, reference_heavy).await;

        let Some(draft_texts) = primary else {
            return self.fallback_per_line_translate(sources, strategy, terms, reference_heavy).await;
        };

        let mut fixed = Vec::with_capacity(draft_texts.len());
        let mut extra_tokens = (0u32, 0u32);
        for (source, candidate) in sources.iter().zip(draft_texts) {
            if is_problem_line(source, &candidate) {
                let (retried, retry_tokens) = self.single_line_retranslate(source, strategy, terms, reference_heavy).await;
                extra_tokens.0 += retry_tokens.0;
                extra_tokens.1 += retry_tokens.1;
                fixed.push(retried.unwrap_or_else(|| format!("[FAILED]{source}")));
            } else {
                fixed.push(candidate);
            }
        }

        (fixed, (tokens.0 + extra_tokens.0, tokens.1 + extra_tokens.1))
    }

    fn build_system_prompt(&self, strategy: StrategyTag, terms: &[&TermEntry], reference_heavy: bool) -> String {
        let mut prompt = format!(
            "You are a professional translator rendering text into {target}. \
             Strategy: {strategy_note}",
            target = self.config.target_language,
            strategy_note = match strategy {
                StrategyTag::Literal => "translate literally, preserving sentence structure and register.",
                StrategyTag::Free => "translate for natural fluency in the target language.",
                StrategyTag::Stylized => "preserve the source's distinctive rhetorical style and rhythm.",
            }
        );

        if reference_heavy {
            prompt.push_str(
                " This batch looks like bibliographic references: keep author names, dates, \
                 and citation punctuation unchanged; translate only surrounding prose.",
            );
        }

        if !terms.is_empty() {
            let table = terms
                .iter()
                .map(|t| format!("- {} -> {}", t.key, t.translation))
                .collect::<Vec<_>>()
                .join("\n");
            prompt.push_str(&format!("\n\nUse these exact translations wherever the source term appears:\n{table}"));
        }

        prompt.push_str(
            "\n\nOutput contract: wrap every translation in a single <textarea> block, one line per \
             input line, numbered to match the input with no gaps, no merged lines, no commentary.",
        );
        prompt
    }

    async fn primary_batch_translate(
        &self,
        sources: &[String],
        context_before: &[String],
        strategy: StrategyTag,
        terms: &[&TermEntry],
        reference_heavy: bool,
    ) -> (Option<Vec<String>>, (u32, u32)) {
        let system_prompt = self.build_system_prompt(strategy, terms, reference_heavy);
        let mut user_content = String::new();
        if !context_before.is_empty() {
            user_content.push_str("Preceding context (already translated, do not re-translate):\n");
            for line in context_before {
                user_content.push_str(line);
                user_content.push('\n');
            }
            user_content.push_str("\nTranslate the following:\n");
        }
        user_content.push_str(&textarea::format_numbered_items(sources.iter().map(String::as_str)));

        let response = self.call_llm(&system_prompt, &user_content).await;
        let Some(response) = response else { return (None, (0, 0)) };

        let extracted = textarea::extract_numbered_items(&response.content);
        if extracted.len() != sources.len() {
            return (None, (response.prompt_tokens, response.completion_tokens));
        }

        let lines: Vec<String> = (1..=sources.len() as u32)
            .map(|i| extracted.get(&i).map(|s| crate::transflow::textarea::strip_decorations(s)).unwrap_or_default())
            .collect();
        (Some(lines), (response.prompt_tokens, response.completion_tokens))
    }

    async fn fallback_per_line_translate(
        &self,
        sources: &[String],
        strategy: StrategyTag,
        terms: &[&TermEntry],
        reference_heavy: bool,
    ) -> (Vec<String>, (u32, u32)) {
        let mut out = Vec::with_capacity(sources.len());
        let mut total = (0u32, 0u32);
        for source in sources {
            let (text, tokens) = self.single_line_retranslate(source, strategy, terms, reference_heavy).await;
            total.0 += tokens.0;
            total.1 += tokens.1;
            out.push(text.unwrap_or_else(|| format!("[FAILED]{source}")));
        }
        (out, total)
    }

    async fn single_line_retranslate(
        &self,
        source: &str,
        strategy: StrategyTag,
        terms: &[&TermEntry],
        reference_heavy: bool,
    ) -> (Option<String>, (u32, u32)) {
        let system_prompt = self.build_system_prompt(strategy, terms, reference_heavy);
        let response = self.call_llm(&system_prompt, source).await;
        match response {
            Some(r) if !r.content.trim().is_empty() => {
                let text = textarea::strip_decorations(r.content.trim());
                let text = if text.is_empty() { None } else { Some(text) };
                (text, (r.prompt_tokens, r.completion_tokens))
            }
            Some(r) => (None, (r.prompt_tokens, r.completion_tokens)),
            None => (None, (0, 0)),
        }
    }

    async fn back_translate_batch(&self, translated: &[String], terms: &[&TermEntry]) -> (Vec<String>, (u32, u32)) {
        if translated.is_empty() {
            return (Vec::new(), (0, 0));
        }
        let inverse_table = terms
            .iter()
            .map(|t| format!("- {} -> {}", t.translation, t.key))
            .collect::<Vec<_>>()
            .join("\n");
        let system_prompt = format!(
            "Translate each of the following {n} lines back into the original source language, \
             as literally as possible, to support a back-translation quality check.{terms_note}\n\n\
             Output contract: wrap every line in a single <textarea> block, numbered 1 to {n} \
             with no gaps, no merged lines, no commentary.",
            n = translated.len(),
            terms_note = if inverse_table.is_empty() {
                String::new()
            } else {
                format!("\n\nKnown term mappings (reverse direction):\n{inverse_table}")
            }
        );
        let user_content = textarea::format_numbered_items(translated.iter().map(String::as_str));

        let Some(response) = self.call_llm(&system_prompt, &user_content).await else {
            return (vec![String::new(); translated.len()], (0, 0));
        };

        let extracted = textarea::extract_numbered_items(&response.content);
        let lines = (1..=translated.len() as u32)
            .map(|i| extracted.get(&i).map(|s| textarea::strip_decorations(s)).unwrap_or_default())
            .collect();
        (lines, (response.prompt_tokens, response.completion_tokens))
    }

    async fn score_batch(&self, sources: &[String], translated: &[String], back_translations: &[String]) -> (Vec<f32>, (u32, u32)) {
        if sources.is_empty() {
            return (Vec::new(), (0, 0));
        }
        let system_prompt = format!(
            "You are a translation quality assessor. For each of the {n} numbered lines below, \
             compare the original, the translation, and its back-translation, then respond with \
             exactly one line per item: `N. Score: X.X` on a 1.0-10.0 scale, no commentary.",
            n = sources.len()
        );
        let mut user_content = String::new();
        for (i, ((source, translated), back)) in sources.iter().zip(translated).zip(back_translations).enumerate() {
            user_content.push_str(&format!(
                "{n}. Original: {source}\n   Translation: {translated}\n   Back-translation: {back}\n",
                n = i + 1
            ));
        }

        let Some(response) = self.call_llm(&system_prompt, &user_content).await else {
            return (vec![TranslationConfig::DEFAULT_QUALITY_SCORE; sources.len()], (0, 0));
        };

        let scores = parse_scores(&response.content, sources.len());
        (scores, (response.prompt_tokens, response.completion_tokens))
    }

    async fn refine_batch(
        &self,
        local_indices: &[usize],
        sources: &[String],
        translated: &[String],
        back_translations: &[String],
    ) -> Vec<(usize, String)> {
        let system_prompt = format!(
            "Revise the following {n} translations, which scored below an acceptable quality bar. \
             Use the original and the back-translation to spot the discrepancy and correct it.\n\n\
             Output contract: wrap every revision in a single <textarea> block, one line per item, \
             numbered 1 to {n} with no gaps, no merged lines, no commentary, no repeated labels.",
            n = local_indices.len()
        );
        let mut user_content = String::new();
        for (i, &idx) in local_indices.iter().enumerate() {
            user_content.push_str(&format!(
                "{n}. Original: {source}\n   Current translation: {current}\n   Back-translation: {back}\n",
                n = i + 1,
                source = sources[idx],
                current = translated[idx],
                back = back_translations.get(idx).map(String::as_str).unwrap_or("")
            ));
        }

        let Some(response) = self.call_llm(&system_prompt, &user_content).await else {
            return Vec::new();
        };

        let extracted = textarea::extract_numbered_items(&response.content);
        local_indices
            .iter()
            .enumerate()
            .filter_map(|(local_i, &global_local_idx)| {
                extracted
                    .get(&(local_i as u32 + 1))
                    .map(|text| (global_local_idx, strip_refine_residue(&textarea::strip_decorations(text))))
            })
            .filter(|(_, text)| !text.is_empty())
            .collect()
    }

    async fn call_llm(&self, system_prompt: &str, user_content: &str) -> Option<crate::transflow::llm_client::LLMResponse> {
        if self.rate_limiter.acquire(estimate_tokens(user_content)).await.is_err() {
            return None;
        }

        let message = Message::user(user_content.to_string());
        self.stats.call_started();
        let response = self.llm.send(std::slice::from_ref(&message), system_prompt, &self.platform_config).await;
        self.stats.call_finished();

        match response {
            Ok(r) if !r.skipped => {
                self.stats.record_call(r.prompt_tokens as u64, r.completion_tokens as u64);
                Some(r)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("translation call failed: {e}");
                None
            }
        }
    }

    async fn run_human_review(&self, coordinator: &ReviewCoordinator, lines: &mut [LineWork]) {
        let scored: Vec<ScoredLine> = lines
            .iter()
            .map(|l| ScoredLine {
                global_index: l.global_index,
                source_text: l.source_text.clone(),
                translated_text: l.current_text.clone(),
                back_translation: l.back_translation.clone(),
                score: l.score,
                context_before: Vec::new(),
                context_after: Vec::new(),
            })
            .collect();

        let Some(result) = coordinator.review_batch(&scored, self.config.review_threshold_scaled()).await else {
            return;
        };

        let by_index: HashMap<usize, ReviewAction> =
            result.review_results.into_iter().map(|d: ReviewDecision| (d.index, d.action)).collect();

        for line in lines.iter_mut() {
            if let Some(action) = by_index.get(&line.global_index) {
                match action {
                    ReviewAction::Accept => {
                        line.human_action = Some(ReviewAction::Accept);
                    }
                    ReviewAction::Custom(text) => {
                        line.current_text = text.clone();
                        line.human_action = Some(ReviewAction::Custom(text.clone()));
                    }
                    ReviewAction::Retranslate => {
                        let (retried, _tokens) =
                            self.single_line_retranslate(&line.source_text, StrategyTag::Free, &[], false).await;
                        if let Some(text) = retried {
                            line.current_text = text;
                        }
                        line.human_action = Some(ReviewAction::Retranslate);
                    }
                }
            }
        }
    }

    /// Stage C: persist every line's trace history and reach its terminal
    /// atom state.
    ///
    /// Exactly one `draft` trace and one `evaluate` trace are always written.
    /// If the TEaR loop refined the text and no human action touched the
    /// line, a `refine` trace carrying that refined text is written too —
    /// otherwise the active trace would stay pinned to the draft while
    /// `translated_text` moved on, and the two must always agree. A further
    /// trace — `human_edit` for an accept/custom decision, `refine` for a
    /// retranslate decision — is written only for lines Stage A actually
    /// touched, and advances `statusCode` to `HUMAN_REVIEWED` (3) in either
    /// case, for auditability. A `final` trace is written only when
    /// terminology enforcement found at least one applicable term for that
    /// line's source text; every atom still reaches `statusCode` 4 regardless,
    /// via a direct `update_atom_translation` call when no such trace fires.
    async fn commit(&self, lines: &[LineWork], terminology: &[TermEntry]) -> Result<Vec<TranslationOutcome>, TransflowError> {
        let term_table: Vec<TermEntry> = terminology.to_vec();
        let mut outcomes = Vec::with_capacity(lines.len());

        for line in lines {
            self.check_cancelled()?;
            self.store
                .add_trace(
                    line.atom_id,
                    AgentRole::Translator,
                    ActionType::Draft,
                    &line.draft_text,
                    None,
                    None,
                    line.draft_tokens.0 as i64,
                    line.draft_tokens.1 as i64,
                )
                .await?;
            self.store.update_atom_translation(line.atom_id, &line.draft_text, atom_status::DRAFTED).await?;

            let report = quality_report_json(line.score, &line.back_translation, &[])?;
            self.store
                .add_trace(
                    line.atom_id,
                    AgentRole::QualityAssessor,
                    ActionType::Evaluate,
                    &line.current_text,
                    Some(&report),
                    None,
                    line.evaluate_tokens.0 as i64,
                    line.evaluate_tokens.1 as i64,
                )
                .await?;
            self.store.update_atom_examination(line.atom_id, &report, Some(line.score)).await?;

            if line.human_action.is_none() && line.current_text != line.draft_text {
                self.store
                    .add_trace(line.atom_id, AgentRole::Translator, ActionType::Refine, &line.current_text, None, None, 0, 0)
                    .await?;
                self.store.update_atom_translation(line.atom_id, &line.current_text, atom_status::REFINED).await?;
            }

            if let Some(action) = &line.human_action {
                let action_type = match action {
                    ReviewAction::Retranslate => ActionType::Refine,
                    ReviewAction::Accept | ReviewAction::Custom(_) => ActionType::HumanEdit,
                };
                self.store
                    .add_trace(line.atom_id, AgentRole::Human, action_type, &line.current_text, None, None, 0, 0)
                    .await?;
                self.store.update_atom_translation(line.atom_id, &line.current_text, atom_status::HUMAN_REVIEWED).await?;
            }

            let relevant_terms = consistency::filter_terms_in_source(&term_table, &line.source_text);
            let EnforcementResult { text: final_text, remaining_inconsistencies, .. } =
                consistency::enforce(&line.source_text, &line.current_text, &term_table);

            if !remaining_inconsistencies.is_empty() {
                warn!(
                    "atom {}: {} terminology inconsistencies left unresolved",
                    line.atom_id,
                    remaining_inconsistencies.len()
                );
            }

            if !relevant_terms.is_empty() {
                self.store
                    .add_trace(line.atom_id, AgentRole::ConsistencyChecker, ActionType::Final, &final_text, None, None, 0, 0)
                    .await?;
            }
            self.store.update_atom_translation(line.atom_id, &final_text, atom_status::FINALIZED).await?;
            self.stats.record_lines(1);

            outcomes.push(TranslationOutcome { atom_id: line.atom_id, final_text, score: line.score });
        }

        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transflow::llm_client::LLMResponse;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePool;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Mutex as TokioMutex;

    #[test]
    fn problem_line_flags_empty_and_truncated_output() {
        assert!(is_problem_line("hello", ""));
        let long_source = "a".repeat(200);
        assert!(is_problem_line(&long_source, "short"));
        assert!(!is_problem_line("short source", "a reasonably complete translation"));
    }

    #[test]
    fn reference_heuristic_catches_citation_shapes() {
        assert!(looks_like_reference("Smith, J. et al. (2020). A study. doi:10.1/xyz"));
        assert!(!looks_like_reference("A short ordinary sentence."));
    }

    #[test]
    fn parse_scores_defaults_out_of_range_and_missing() {
        let content = "1. Score: 9.5\n2. Score: 0.2\n3. 评分：7.0";
        let scores = parse_scores(content, 4);
        assert_eq!(scores[0], 9.5);
        assert_eq!(scores[1], TranslationConfig::DEFAULT_QUALITY_SCORE);
        assert_eq!(scores[2], 7.0);
        assert_eq!(scores[3], TranslationConfig::DEFAULT_QUALITY_SCORE);
    }

    #[test]
    fn refine_residue_labels_are_stripped() {
        let text = "原文: hello\n修正后译文: hola mundo";
        assert_eq!(strip_refine_residue(text), "hello\nhola mundo");
    }

    #[test]
    fn split_tokens_evenly_assigns_remainder_to_first() {
        let parts = split_tokens_evenly((10, 7), 3);
        assert_eq!(parts.len(), 3);
        let total: (u32, u32) = parts.iter().fold((0, 0), |acc, p| (acc.0 + p.0, acc.1 + p.1));
        assert_eq!(total, (10, 7));
    }

    struct ScriptedClient {
        replies: TokioMutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(replies: Vec<&str>) -> Self {
            Self {
                replies: TokioMutex::new(replies.into_iter().map(str::to_string).collect()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LLMClient for ScriptedClient {
        async fn send(
            &self,
            _messages: &[Message],
            _system_prompt: &str,
            _platform_config: &PlatformConfig,
        ) -> Result<LLMResponse, TransflowError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut replies = self.replies.lock().await;
            let content = if replies.is_empty() { String::new() } else { replies.remove(0) };
            Ok(LLMResponse { skipped: false, reasoning: String::new(), content, prompt_tokens: 10, completion_tokens: 5 })
        }
    }

    async fn test_store() -> Store {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = Store::from_pool(pool);
        store.migrate().await.unwrap();
        store.create_project("p1", "en", "es", "{}", None, None, None, None).await.unwrap();
        store
    }

    fn agent(client: Arc<ScriptedClient>, store: Store, config: TranslationConfig) -> TranslationAgent {
        let cancellation = Arc::new(AtomicBool::new(false));
        TranslationAgent::new(
            client,
            Arc::new(RateLimiter::new(None, None, cancellation.clone())),
            Arc::new(StatsTracker::new(10)),
            store,
            PlatformConfig::new("test-model", "key"),
            None,
            config,
            Arc::new(NoopProgressHandler),
            cancellation,
        )
    }

    #[tokio::test]
    async fn simple_run_with_no_low_scores_reaches_finalized_without_a_final_trace() {
        let store = test_store().await;
        let doc_id = store.upsert_doc("p1", "doc.txt").await.unwrap();
        let atom_ids = store
            .create_atoms_batch(doc_id, &[crate::transflow::store::NewAtom { position: 0, source_text: "Hello world.".into() }])
            .await
            .unwrap();
        let atom_id = atom_ids[0];

        let replies = vec![
            "<textarea>\n1.Hola mundo.\n</textarea>",
            "<textarea>\n1.Hello world.\n</textarea>",
            "1. Score: 9.0",
        ];
        let client = Arc::new(ScriptedClient::new(replies));
        let agent = agent(client, store.clone(), TranslationConfig::default());

        let items = vec![TranslationItem { atom_id, source_text: "Hello world.".into() }];
        let outcomes = agent.run(&items, 2, &[StrategyTag::Free], &[]).await.unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].final_text, "Hola mundo.");

        let atoms = store.list_atoms(doc_id).await.unwrap();
        assert_eq!(atoms[0].status_code, atom_status::FINALIZED);
        assert_eq!(atoms[0].translated_text.as_deref(), Some("Hola mundo."));
    }

    #[tokio::test]
    async fn chunk_mismatch_triggers_per_line_fallback() {
        let store = test_store().await;
        let doc_id = store.upsert_doc("p1", "doc.txt").await.unwrap();
        let atom_ids = store
            .create_atoms_batch(
                doc_id,
                &[
                    crate::transflow::store::NewAtom { position: 0, source_text: "One.".into() },
                    crate::transflow::store::NewAtom { position: 1, source_text: "Two.".into() },
                ],
            )
            .await
            .unwrap();

        let replies = vec![
            "<textarea>\n1.Uno.\n</textarea>", // only 1 line back for 2 inputs: mismatch
            "Uno.",                            // fallback single-line retry for item 1
            "Dos.",                            // fallback single-line retry for item 2
            "<textarea>\n1.One.\n2.Two.\n</textarea>",
            "1. Score: 9.0\n2. Score: 9.0",
        ];
        let client = Arc::new(ScriptedClient::new(replies));
        let agent = agent(client, store.clone(), TranslationConfig::default());

        let items = vec![
            TranslationItem { atom_id: atom_ids[0], source_text: "One.".into() },
            TranslationItem { atom_id: atom_ids[1], source_text: "Two.".into() },
        ];
        let outcomes = agent.run(&items, 1, &[StrategyTag::Free], &[]).await.unwrap();

        assert_eq!(outcomes.len(), 2);
        let texts: Vec<&str> = outcomes.iter().map(|o| o.final_text.as_str()).collect();
        assert_eq!(texts, vec!["Uno.", "Dos."]);
    }

    #[tokio::test]
    async fn terminology_fix_gets_a_final_trace() {
        let store = test_store().await;
        let doc_id = store.upsert_doc("p1", "doc.txt").await.unwrap();
        let atom_ids = store
            .create_atoms_batch(doc_id, &[crate::transflow::store::NewAtom { position: 0, source_text: "The Shogun ruled.".into() }])
            .await
            .unwrap();
        let atom_id = atom_ids[0];

        let replies = vec![
            "<textarea>\n1.El Shogun gobernó.\n</textarea>", // leaks untranslated term
            "<textarea>\n1.The Shogun ruled.\n</textarea>",
            "1. Score: 9.0",
        ];
        let client = Arc::new(ScriptedClient::new(replies));
        let agent = agent(client, store.clone(), TranslationConfig::default());

        let terms = vec![TermEntry { key: "Shogun".into(), translation: "Shōgun".into() }];
        let items = vec![TranslationItem { atom_id, source_text: "The Shogun ruled.".into() }];
        let outcomes = agent.run(&items, 1, &[StrategyTag::Literal], &terms).await.unwrap();

        assert_eq!(outcomes[0].final_text, "El Shōgun gobernó.");
        let atoms = store.list_atoms(doc_id).await.unwrap();
        assert_eq!(atoms[0].status_code, atom_status::FINALIZED);
        assert_eq!(atoms[0].translated_text.as_deref(), Some("El Shōgun gobernó."));
    }

    #[tokio::test]
    async fn tear_refine_without_human_or_terminology_keeps_active_trace_in_sync() {
        let store = test_store().await;
        let doc_id = store.upsert_doc("p1", "doc.txt").await.unwrap();
        let atom_ids = store
            .create_atoms_batch(doc_id, &[crate::transflow::store::NewAtom { position: 0, source_text: "Tricky line.".into() }])
            .await
            .unwrap();
        let atom_id = atom_ids[0];

        let replies = vec![
            "<textarea>\n1.Línea difícil.\n</textarea>",
            "<textarea>\n1.Tricky line.\n</textarea>",
            "1. Score: 3.0", // below threshold, triggers a TEaR refine with no human review configured
            "<textarea>\n1.Línea complicada.\n</textarea>",
        ];
        let client = Arc::new(ScriptedClient::new(replies));
        let agent = agent(client, store.clone(), TranslationConfig::default());

        let items = vec![TranslationItem { atom_id, source_text: "Tricky line.".into() }];
        let outcomes = agent.run(&items, 1, &[StrategyTag::Free], &[]).await.unwrap();

        assert_eq!(outcomes[0].final_text, "Línea complicada.");
        let atoms = store.list_atoms(doc_id).await.unwrap();
        assert_eq!(atoms[0].translated_text.as_deref(), Some("Línea complicada."));
        let active = store.get_active_translation(atom_id).await.unwrap();
        assert_eq!(active.as_deref(), atoms[0].translated_text.as_deref());
    }

    #[tokio::test]
    async fn cancellation_flag_aborts_a_run_in_progress() {
        let store = test_store().await;
        let doc_id = store.upsert_doc("p1", "doc.txt").await.unwrap();
        let atom_ids = store
            .create_atoms_batch(doc_id, &[crate::transflow::store::NewAtom { position: 0, source_text: "Hello world.".into() }])
            .await
            .unwrap();

        let client = Arc::new(ScriptedClient::new(vec![]));
        let cancellation = Arc::new(AtomicBool::new(true));
        let agent = TranslationAgent::new(
            client,
            Arc::new(RateLimiter::new(None, None, cancellation.clone())),
            Arc::new(StatsTracker::new(10)),
            store,
            PlatformConfig::new("test-model", "key"),
            None,
            TranslationConfig::default(),
            Arc::new(NoopProgressHandler),
            cancellation,
        );

        let items = vec![TranslationItem { atom_id: atom_ids[0], source_text: "Hello world.".into() }];
        let result = agent.run(&items, 1, &[StrategyTag::Free], &[]).await;
        assert!(matches!(result, Err(TransflowError::Cancelled)));
    }

    #[tokio::test]
    async fn human_accept_advances_status_to_human_reviewed_then_finalized() {
        struct AcceptAllHandler;
        #[async_trait]
        impl crate::transflow::event::HumanInterventionHandler for AcceptAllHandler {
            async fn request(
                &self,
                _task_type: crate::transflow::event::TaskType,
                task_data: &crate::transflow::event::TaskData,
            ) -> Option<crate::transflow::event::HumanReviewResult> {
                Some(crate::transflow::event::HumanReviewResult {
                    review_results: task_data
                        .review_items
                        .iter()
                        .map(|item| ReviewDecision { index: item.global_index, action: ReviewAction::Accept })
                        .collect(),
                })
            }
        }

        let store = test_store().await;
        let doc_id = store.upsert_doc("p1", "doc.txt").await.unwrap();
        let atom_ids = store
            .create_atoms_batch(doc_id, &[crate::transflow::store::NewAtom { position: 0, source_text: "Hard line.".into() }])
            .await
            .unwrap();
        let atom_id = atom_ids[0];

        let replies = vec![
            "<textarea>\n1.Línea difícil.\n</textarea>",
            "<textarea>\n1.Hard line.\n</textarea>",
            "1. Score: 3.0", // below threshold, triggers both TEaR refine and human review
            "<textarea>\n1.Línea difícil (revisada).\n</textarea>", // TEaR refine reply
        ];
        let client = Arc::new(ScriptedClient::new(replies));
        let mut config = TranslationConfig::default();
        config.enable_human_review = true;
        config.review_threshold = 0.7;

        let mut agent = agent(client, store.clone(), config);
        agent.review = Some(Arc::new(ReviewCoordinator::new(Arc::new(AcceptAllHandler))));

        let items = vec![TranslationItem { atom_id, source_text: "Hard line.".into() }];
        let outcomes = agent.run(&items, 1, &[StrategyTag::Free], &[]).await.unwrap();

        assert_eq!(outcomes.len(), 1);
        let atoms = store.list_atoms(doc_id).await.unwrap();
        assert_eq!(atoms[0].status_code, atom_status::FINALIZED);
    }
}
