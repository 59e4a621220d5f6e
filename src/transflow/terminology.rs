//! Term and named-entity identification, verification, and persistence.
//!
//! Grounded on the original source's terminology stage: an optional NER pass
//! seeds high-priority entities, a parallel LLM pass identifies domain terms
//! and culture-bound expressions over byte-budgeted chunks, unseen terms are
//! batch-verified for a translation in numbered `<textarea>` format, and
//! everything is upserted into the store with word-type normalization.

use crate::transflow::chunker::chunk_by_chars;
use crate::transflow::error::TransflowError;
use crate::transflow::llm_client::{LLMClient, Message, PlatformConfig};
use crate::transflow::ner::{EntityType, NERProvider, NamedTerm};
use crate::transflow::rate_limiter::RateLimiter;
use crate::transflow::stats::StatsTracker;
use crate::transflow::store::{NewTerm, Store, TermCandidate};
use crate::transflow::textarea;
use log::warn;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const IDENTIFICATION_CHAR_BUDGET: usize = 6000;
const VERIFICATION_CHAR_BUDGET: usize = 3000;
const DEFAULT_POOL_SIZE: usize = 5;
const CONTEXT_SAMPLE_CHARS: usize = 200;

/// One translatable unit handed to the terminology pipeline, tied back to the
/// atom it was loaded from.
#[derive(Debug, Clone)]
pub struct TerminologyItem {
    pub atom_id: i64,
    pub source_text: String,
}

/// The raw category an identification pass assigns, before word-type
/// normalization for persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermCategory {
    NamedEntity,
    DomainTerm,
    CulturalExpression,
}

impl TermCategory {
    fn from_llm_label(label: &str) -> Self {
        match label {
            "cultural_expression" => TermCategory::CulturalExpression,
            _ => TermCategory::DomainTerm,
        }
    }

    /// Word-type tag persisted in the store
    /// (`named_entity→entity`, `domain_term→term`, `cultural_expression→idiom`).
    fn word_type(&self) -> &'static str {
        match self {
            TermCategory::NamedEntity => "entity",
            TermCategory::DomainTerm => "term",
            TermCategory::CulturalExpression => "idiom",
        }
    }
}

/// A term surfaced during identification, before verification fills in a
/// translation.
#[derive(Debug, Clone)]
struct IdentifiedTerm {
    term: String,
    category: TermCategory,
    context: String,
}

/// A fully verified and persisted term, returned to the caller as a summary
/// of what the run produced.
#[derive(Debug, Clone)]
pub struct PersistedTerm {
    pub entry_key: String,
    pub entry_val: String,
    pub word_type: String,
}

fn language_model_map(source_language: &str) -> Option<&'static str> {
    match source_language {
        "japanese" => Some("ja_core_news_md"),
        "english" => Some("en_core_web_sm"),
        "chinese_simplified" | "chinese_traditional" => Some("zh_core_web_sm"),
        "korean" => Some("ko_core_news_sm"),
        "german" => Some("de_core_news_sm"),
        "french" => Some("fr_core_news_sm"),
        "spanish" => Some("es_core_news_sm"),
        "russian" => Some("ru_core_news_sm"),
        _ => None,
    }
}

/// Chooses an NER model for `source_language`, skipping NER entirely for
/// `"auto"` (there is no text-level language detection at this layer).
fn select_ner_model(source_language: &str) -> Option<&'static str> {
    if source_language == "auto" {
        return None;
    }
    language_model_map(source_language)
}

#[derive(Debug, Deserialize)]
struct TermJson {
    term: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    context: String,
}

#[derive(Debug, Deserialize)]
struct TermsResponseJson {
    #[serde(default)]
    terms: Vec<TermJson>,
}

fn bold_italic_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"\*\*(.+?)\*\*|\*(.+?)\*|__(.+?)__|_(.+?)_").unwrap())
}

fn strip_numeric_prefix_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^\d+\.\s*").unwrap())
}

fn clean_translation_text(raw: &str) -> String {
    let no_prefix = strip_numeric_prefix_re().replace(raw, "");
    let no_markup = bold_italic_re().replace_all(&no_prefix, |caps: &regex::Captures| {
        caps.iter()
            .skip(1)
            .find_map(|g| g.map(|m| m.as_str().to_string()))
            .unwrap_or_default()
    });
    no_markup.trim_matches(|c: char| c == '*' || c == '_' || c.is_whitespace()).to_string()
}

/// Identifies, verifies, and persists a project's terminology. Cloning is
/// cheap: every field is an `Arc` or already-`Clone` handle.
#[derive(Clone)]
pub struct TerminologyAgent {
    llm: Arc<dyn LLMClient>,
    ner: Arc<dyn NERProvider>,
    store: Store,
    rate_limiter: Arc<RateLimiter>,
    stats: Arc<StatsTracker>,
    platform_config: PlatformConfig,
    pool_size: usize,
}

impl TerminologyAgent {
    pub fn new(
        llm: Arc<dyn LLMClient>,
        ner: Arc<dyn NERProvider>,
        store: Store,
        rate_limiter: Arc<RateLimiter>,
        stats: Arc<StatsTracker>,
        platform_config: PlatformConfig,
    ) -> Self {
        Self {
            llm,
            ner,
            store,
            rate_limiter,
            stats,
            platform_config,
            pool_size: DEFAULT_POOL_SIZE,
        }
    }

    /// Run the full pipeline: reuse check, optional NER, parallel LLM
    /// identification, batch verification, and persistence.
    pub async fn run(
        &self,
        project_id: &str,
        domain: &str,
        source_language: &str,
        items: &[TerminologyItem],
    ) -> Result<Vec<PersistedTerm>, TransflowError> {
        if self.store.has_terms(project_id).await? {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = items
            .iter()
            .filter(|i| !i.source_text.trim().is_empty())
            .map(|i| i.source_text.clone())
            .collect();

        let mut identified: Vec<IdentifiedTerm> = Vec::new();

        if let Some(model_name) = select_ner_model(source_language) {
            let named: Vec<NamedTerm> = self
                .ner
                .extract(&texts, model_name, &EntityType::ALL)
                .await;
            identified.extend(named.into_iter().map(|n| IdentifiedTerm {
                term: n.text,
                category: TermCategory::NamedEntity,
                context: String::new(),
            }));
        }

        let llm_terms = self.identify_terminology_with_llm(&texts, domain).await;
        identified.extend(llm_terms);

        let deduped = dedup_by_lowercased_term(identified);
        if deduped.is_empty() {
            return Ok(Vec::new());
        }

        let verified = self.verify_terms(&deduped).await;

        let mut persisted = Vec::with_capacity(verified.len());
        for (term, translation) in verified {
            let atom_refs: Vec<i64> = items
                .iter()
                .filter(|i| i.source_text.to_lowercase().contains(&term.term.to_lowercase()))
                .take(10)
                .map(|i| i.atom_id)
                .collect();

            let new_term = NewTerm {
                project_id: project_id.to_string(),
                entry_key: term.term.clone(),
                entry_val: translation.clone(),
                word_type: term.category.word_type().to_string(),
                domain: Some(domain.to_string()),
                variants: Vec::new(),
                examples: if term.context.is_empty() { Vec::new() } else { vec![term.context.clone()] },
                candidates: if translation.is_empty() {
                    Vec::new()
                } else {
                    vec![TermCandidate { translation: translation.clone(), source: "llm".to_string(), confidence: 1.0 }]
                },
                atom_refs,
                confidence: 1.0,
            };

            self.store.upsert_term(&new_term).await?;
            persisted.push(PersistedTerm {
                entry_key: term.term,
                entry_val: translation,
                word_type: term.category.word_type().to_string(),
            });
        }

        Ok(persisted)
    }

    async fn identify_terminology_with_llm(&self, texts: &[String], domain: &str) -> Vec<IdentifiedTerm> {
        let chunks = chunk_by_chars(texts, IDENTIFICATION_CHAR_BUDGET, |s| s.chars().count());
        if chunks.is_empty() {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(self.pool_size.min(chunks.len()).max(1)));
        let mut tasks = JoinSet::new();

        for chunk in chunks {
            let agent = self.clone();
            let domain = domain.to_string();
            let permit = semaphore.clone();
            tasks.spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore closed");
                agent.identify_chunk_terms(&chunk.items, &domain).await
            });
        }

        let mut all_terms = Vec::new();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(terms) => all_terms.extend(terms),
                Err(e) => warn!("terminology identification task panicked: {e}"),
            }
        }
        all_terms
    }

    async fn identify_chunk_terms(&self, chunk: &[String], domain: &str) -> Vec<IdentifiedTerm> {
        let sample_texts: Vec<String> = chunk
            .iter()
            .map(|t| t.chars().take(CONTEXT_SAMPLE_CHARS).collect())
            .collect();
        let sample_text = sample_texts.join("\n---\n");

        let system_prompt = format!(
            "You are an expert terminology analyst. From the text below, identify:\n\
             1. Domain terms: specialized vocabulary for the \"{domain}\" domain\n\
             2. Cultural expressions: idioms or phrases with no direct equivalent\n\n\
             Only flag terms that genuinely need a fixed translation. Respond as JSON: \
             {{\"terms\": [{{\"term\": \"...\", \"category\": \"domain_term\" | \"cultural_expression\", \"context\": \"...\"}}]}}"
        );
        let user_message = Message::user(format!("Identify domain terms and cultural expressions in:\n\n{sample_text}"));

        if self.rate_limiter.acquire(estimate_tokens(&sample_text)).await.is_err() {
            return Vec::new();
        }

        self.stats.call_started();
        let response = self
            .llm
            .send(std::slice::from_ref(&user_message), &system_prompt, &self.platform_config)
            .await;
        self.stats.call_finished();

        let response = match response {
            Ok(r) if !r.skipped => {
                self.stats.record_call(r.prompt_tokens as u64, r.completion_tokens as u64);
                r
            }
            Ok(_) => return Vec::new(),
            Err(e) => {
                warn!("terminology identification call failed: {e}");
                return Vec::new();
            }
        };

        parse_terms_json(&response.content)
    }

    async fn verify_terms(&self, terms: &[IdentifiedTerm]) -> Vec<(IdentifiedTerm, String)> {
        let batches = chunk_by_chars(terms, VERIFICATION_CHAR_BUDGET, |t| t.term.chars().count());
        let mut out = Vec::with_capacity(terms.len());

        for batch in batches {
            let translations = self.verify_batch(&batch.items).await;
            for (term, translation) in batch.items.into_iter().zip(translations) {
                out.push((term, translation));
            }
        }
        out
    }

    async fn verify_batch(&self, batch: &[IdentifiedTerm]) -> Vec<String> {
        if batch.is_empty() {
            return Vec::new();
        }

        let system_prompt = format!(
            "You are a professional terminology translator. Translate each of the following \
             {n} terms accurately and consistently.\n\n\
             Output contract: wrap every translation in a single <textarea> block, one line per \
             term, numbered 1 to {n} with no gaps, no merged lines, no commentary.",
            n = batch.len()
        );
        let terms_block = textarea::format_numbered_items(batch.iter().map(|t| t.term.as_str()));
        let user_message = Message::user(format!("Translate the following terms:\n\n{terms_block}"));

        if self.rate_limiter.acquire(estimate_tokens(&terms_block)).await.is_err() {
            return vec![String::new(); batch.len()];
        }

        self.stats.call_started();
        let response = self
            .llm
            .send(std::slice::from_ref(&user_message), &system_prompt, &self.platform_config)
            .await;
        self.stats.call_finished();

        let response = match response {
            Ok(r) if !r.skipped => {
                self.stats.record_call(r.prompt_tokens as u64, r.completion_tokens as u64);
                r
            }
            _ => return vec![String::new(); batch.len()],
        };

        let extracted = textarea::extract_numbered_items(&response.content);
        (1..=batch.len() as u32)
            .map(|i| extracted.get(&i).map(|s| clean_translation_text(s)).unwrap_or_default())
            .collect()
    }
}

fn dedup_by_lowercased_term(terms: Vec<IdentifiedTerm>) -> Vec<IdentifiedTerm> {
    let mut seen: HashMap<String, IdentifiedTerm> = HashMap::new();
    for term in terms {
        let key = term.term.to_lowercase();
        if key.is_empty() {
            continue;
        }
        seen.entry(key).or_insert(term);
    }
    seen.into_values().collect()
}

fn parse_terms_json(content: &str) -> Vec<IdentifiedTerm> {
    let start = match content.find('{') {
        Some(i) => i,
        None => return Vec::new(),
    };
    let end = match content.rfind('}') {
        Some(i) => i + 1,
        None => return Vec::new(),
    };
    if end <= start {
        return Vec::new();
    }

    match serde_json::from_str::<TermsResponseJson>(&content[start..end]) {
        Ok(parsed) => parsed
            .terms
            .into_iter()
            .filter(|t| !t.term.trim().is_empty())
            .map(|t| IdentifiedTerm {
                term: t.term,
                category: TermCategory::from_llm_label(t.category.as_deref().unwrap_or("domain_term")),
                context: t.context,
            })
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() / 4).max(1) as u32
}
