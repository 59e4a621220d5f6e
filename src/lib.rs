// src/lib.rs

// Import the top-level `transflow` module.
pub mod transflow;

// Re-exporting the most commonly used items for easier external access.
pub use transflow::config::TranslationConfig;
pub use transflow::error::TransflowError;
pub use transflow::llm_client::{LLMClient, LLMResponse, Message, PlatformConfig, Role};
pub use transflow::workflow::{RunSummary, WorkflowManager};
