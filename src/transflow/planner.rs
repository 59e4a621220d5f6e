//! Pure, deterministic planning: task-complexity analysis, execution/resource
//! sizing, per-chunk strategy tagging, and a style guide — no LLM calls.
//!
//! Grounded on the original source's planning stage: the same complexity
//! tiers, per-tier worker counts, per-chunk heuristics (terminology density,
//! formal/informal cue words, Chinese-punctuation ratio), and the first-50
//! sample used for the overall style guide.

use crate::transflow::chunker::{chunk_by_chars, ChunkedItem};
use crate::transflow::config::TranslationConfig;
use regex::Regex;
use std::sync::OnceLock;

/// Overall complexity tier of a translation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

/// Per-chunk translation approach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyTag {
    Literal,
    Free,
    Stylized,
}

/// Register the chunk content leans toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Formal,
    Informal,
    Literary,
}

/// Overall tone for the style guide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Professional,
    Casual,
    Artistic,
}

/// Retry backoff shape, scaled with complexity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Linear,
    Exponential,
}

/// Step 1 of planning: counts and complexity classification.
#[derive(Debug, Clone)]
pub struct TaskAnalysis {
    pub total_units: usize,
    pub avg_length: f64,
    pub complexity: Complexity,
    pub estimated_time_secs: u64,
}

/// Step 2: how the run will be executed.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub batch_size: usize,
    pub max_workers: usize,
    pub max_retries: u32,
    pub backoff: Backoff,
}

/// Per-strategy share of the estimated API call budget.
#[derive(Debug, Clone)]
pub struct StrategyBreakdown {
    pub strategy: StrategyTag,
    pub chunk_count: usize,
    pub api_calls: u64,
}

/// Step 3: resource estimate, derived from the chunk strategies (3 calls per
/// chunk: translate, back-translate, refine).
#[derive(Debug, Clone)]
pub struct ResourcePlan {
    pub estimated_tokens: u64,
    pub api_calls: u64,
    pub memory_usage_mb: f64,
    pub strategy_breakdown: Vec<StrategyBreakdown>,
}

/// Step 4: the strategy tag and supporting heuristics for a single chunk.
#[derive(Debug, Clone)]
pub struct ChunkStrategy {
    pub chunk_index: usize,
    pub strategy: StrategyTag,
    pub complexity: Complexity,
    pub style: Style,
    pub terminology_density: f64,
    pub avg_sentence_length: f64,
}

/// Step 5: overall style guide derived from a sample of untranslated items.
#[derive(Debug, Clone)]
pub struct StyleGuide {
    pub overall_style: Style,
    pub tone: Tone,
    pub use_honorifics: bool,
    pub preserve_formatting: bool,
    pub maintain_rhythm: bool,
}

/// The full output of a planning pass.
#[derive(Debug, Clone)]
pub struct PlanningResult {
    pub task_analysis: TaskAnalysis,
    pub execution_plan: ExecutionPlan,
    pub resource_plan: ResourcePlan,
    pub chunk_strategies: Vec<ChunkStrategy>,
    pub style_guide: StyleGuide,
}

const STYLE_GUIDE_SAMPLE_SIZE: usize = 50;

fn formal_cue_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(therefore|thus|furthermore|moreover|whereas|hereby)\b").unwrap()
    })
}

fn informal_cue_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(gonna|wanna|yeah|ok|hey)\b").unwrap())
}

fn chinese_punctuation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[，。！？—…“”‘’；：]").unwrap())
}

fn sentence_split_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?。！？]+").unwrap())
}

/// Pure planner: runs over an ordered list of untranslated item texts and a
/// config, producing every facet of a [`PlanningResult`]. Makes no LLM calls.
pub struct Planner;

impl Planner {
    /// Run the full planning pass.
    pub fn plan(items: &[String], config: &TranslationConfig) -> PlanningResult {
        let task_analysis = Self::analyze_task_complexity(items);
        let chunk_strategies = Self::analyze_chunks(items, config);
        let execution_plan = Self::create_execution_plan(&task_analysis);
        let resource_plan = Self::estimate_resources(&task_analysis, &chunk_strategies);
        let style_guide = Self::determine_style_guide(items);

        PlanningResult {
            task_analysis,
            execution_plan,
            resource_plan,
            chunk_strategies,
            style_guide,
        }
    }

    fn analyze_task_complexity(items: &[String]) -> TaskAnalysis {
        let total_units = items.len();
        let total_length: usize = items.iter().map(|s| s.chars().count()).sum();
        let avg_length = if total_units > 0 {
            total_length as f64 / total_units as f64
        } else {
            0.0
        };

        let (complexity, per_unit_secs) = if total_units < 50 && avg_length < 100.0 {
            (Complexity::Simple, 2)
        } else if total_units < 300 && avg_length < 500.0 {
            (Complexity::Medium, 5)
        } else {
            (Complexity::Complex, 10)
        };

        TaskAnalysis {
            total_units,
            avg_length,
            complexity,
            estimated_time_secs: total_units as u64 * per_unit_secs,
        }
    }

    fn create_execution_plan(task_analysis: &TaskAnalysis) -> ExecutionPlan {
        let total = task_analysis.total_units;
        match task_analysis.complexity {
            Complexity::Simple => ExecutionPlan {
                batch_size: total.min(50),
                max_workers: 5,
                max_retries: 2,
                backoff: Backoff::Linear,
            },
            Complexity::Medium => ExecutionPlan {
                batch_size: total.min(100),
                max_workers: 10,
                max_retries: 3,
                backoff: Backoff::Exponential,
            },
            Complexity::Complex => ExecutionPlan {
                batch_size: total.min(200),
                max_workers: 15,
                max_retries: 5,
                backoff: Backoff::Exponential,
            },
        }
    }

    fn estimate_resources(
        task_analysis: &TaskAnalysis,
        chunk_strategies: &[ChunkStrategy],
    ) -> ResourcePlan {
        let tokens_per_unit = task_analysis.avg_length * 2.0;
        let estimated_tokens = (task_analysis.total_units as f64 * tokens_per_unit) as u64;

        let mut breakdown: Vec<StrategyBreakdown> = Vec::new();
        for tag in [StrategyTag::Literal, StrategyTag::Free, StrategyTag::Stylized] {
            let count = chunk_strategies.iter().filter(|c| c.strategy == tag).count();
            if count > 0 {
                breakdown.push(StrategyBreakdown {
                    strategy: tag,
                    chunk_count: count,
                    api_calls: count as u64 * 3,
                });
            }
        }

        ResourcePlan {
            estimated_tokens,
            api_calls: chunk_strategies.len() as u64 * 3,
            memory_usage_mb: task_analysis.total_units as f64 * 0.1,
            strategy_breakdown: breakdown,
        }
    }

    fn analyze_chunks(items: &[String], config: &TranslationConfig) -> Vec<ChunkStrategy> {
        let chunks: Vec<ChunkedItem<String>> =
            chunk_by_chars(items, TranslationConfig::TRANSLATION_CHAR_BUDGET, |s| s.chars().count());

        let _ = config;
        chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| Self::analyze_chunk_strategy(&chunk.items, index))
            .collect()
    }

    fn analyze_chunk_strategy(chunk: &[String], chunk_index: usize) -> ChunkStrategy {
        let combined: String = chunk.join(" ");

        let sentences: Vec<&str> = sentence_split_re()
            .split(&combined)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        let avg_sentence_length = if sentences.is_empty() {
            0.0
        } else {
            sentences.iter().map(|s| s.chars().count()).sum::<usize>() as f64 / sentences.len() as f64
        };

        let words: Vec<&str> = combined.split_whitespace().collect();
        let technical_words = words
            .iter()
            .filter(|w| {
                w.chars().next().is_some_and(|c| c.is_uppercase()) || w.contains('_') || w.contains('-')
            })
            .count();
        let terminology_density = if words.is_empty() {
            0.0
        } else {
            technical_words as f64 / words.len() as f64
        };

        let formal_hits = formal_cue_re().find_iter(&combined).count();
        let informal_hits = informal_cue_re().find_iter(&combined).count();
        let literary_hits = chinese_punctuation_re().find_iter(&combined).count();
        let combined_len = combined.chars().count().max(1);

        let style = if formal_hits > informal_hits {
            Style::Formal
        } else if literary_hits as f64 > combined_len as f64 * 0.05 {
            Style::Literary
        } else {
            Style::Informal
        };

        let complexity = if avg_sentence_length < 50.0 && terminology_density < 0.1 {
            Complexity::Simple
        } else if avg_sentence_length < 150.0 && terminology_density < 0.3 {
            Complexity::Medium
        } else {
            Complexity::Complex
        };

        let strategy = if terminology_density > 0.3 || style == Style::Formal {
            StrategyTag::Literal
        } else if style == Style::Literary || complexity == Complexity::Complex {
            StrategyTag::Stylized
        } else {
            StrategyTag::Free
        };

        ChunkStrategy {
            chunk_index,
            strategy,
            complexity,
            style,
            terminology_density,
            avg_sentence_length,
        }
    }

    fn determine_style_guide(items: &[String]) -> StyleGuide {
        let sample: Vec<&String> = items.iter().take(STYLE_GUIDE_SAMPLE_SIZE).collect();
        if sample.is_empty() {
            return StyleGuide {
                overall_style: Style::Informal,
                tone: Tone::Casual,
                use_honorifics: false,
                preserve_formatting: true,
                maintain_rhythm: false,
            };
        }

        let combined_sample = sample
            .iter()
            .take(20)
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let formal_score = formal_cue_re().find_iter(&combined_sample).count();
        let informal_score = informal_cue_re().find_iter(&combined_sample).count();
        let literary_score = chinese_punctuation_re().find_iter(&combined_sample).count();

        let (overall_style, tone, use_honorifics) = if formal_score > informal_score.max(literary_score) {
            (Style::Formal, Tone::Professional, true)
        } else if literary_score > formal_score.max(informal_score) {
            (Style::Literary, Tone::Artistic, false)
        } else {
            (Style::Informal, Tone::Casual, false)
        };

        StyleGuide {
            overall_style,
            tone,
            use_honorifics,
            preserve_formatting: true,
            maintain_rhythm: overall_style == Style::Literary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: usize, text: &str) -> Vec<String> {
        (0..n).map(|_| text.to_string()).collect()
    }

    #[test]
    fn small_short_project_is_classified_simple() {
        let result = Planner::plan(&items(10, "hi"), &TranslationConfig::default());
        assert_eq!(result.task_analysis.complexity, Complexity::Simple);
        assert_eq!(result.execution_plan.max_workers, 5);
    }

    #[test]
    fn large_long_project_is_classified_complex() {
        let long_text = "word ".repeat(200);
        let result = Planner::plan(&items(400, &long_text), &TranslationConfig::default());
        assert_eq!(result.task_analysis.complexity, Complexity::Complex);
        assert_eq!(result.execution_plan.max_workers, 15);
    }

    #[test]
    fn resource_plan_estimates_three_calls_per_chunk() {
        let result = Planner::plan(&items(5, "short line"), &TranslationConfig::default());
        let chunk_count = result.chunk_strategies.len() as u64;
        assert_eq!(result.resource_plan.api_calls, chunk_count * 3);
    }

    #[test]
    fn formal_cue_words_select_literal_strategy() {
        let text = "Therefore, the parties hereby agree to the terms set forth.".to_string();
        let result = Planner::plan(&[text], &TranslationConfig::default());
        assert_eq!(result.chunk_strategies[0].strategy, StrategyTag::Literal);
    }

    #[test]
    fn chinese_punctuation_heavy_text_selects_stylized_strategy() {
        let text = "他说：“你好，世界！这是一个测试，真的吗？当然，没问题。”".to_string();
        let result = Planner::plan(&[text], &TranslationConfig::default());
        assert_eq!(result.chunk_strategies[0].strategy, StrategyTag::Stylized);
    }

    #[test]
    fn planner_is_deterministic_for_the_same_input() {
        let data = items(30, "The quick brown fox jumps over the lazy dog.");
        let a = Planner::plan(&data, &TranslationConfig::default());
        let b = Planner::plan(&data, &TranslationConfig::default());
        assert_eq!(a.chunk_strategies.len(), b.chunk_strategies.len());
        for (x, y) in a.chunk_strategies.iter().zip(b.chunk_strategies.iter()) {
            assert_eq!(x.strategy, y.strategy);
            assert_eq!(x.chunk_index, y.chunk_index);
        }
    }

    #[test]
    fn empty_project_yields_zero_units_and_no_chunks() {
        let result = Planner::plan(&[], &TranslationConfig::default());
        assert_eq!(result.task_analysis.total_units, 0);
        assert!(result.chunk_strategies.is_empty());
    }
}
