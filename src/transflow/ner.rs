//! Optional named-entity extraction, used by [`crate::transflow::terminology`]
//! to seed high-priority terms before the LLM-driven identification pass.

use async_trait::async_trait;

/// One of the entity categories the terminology pipeline recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    Person,
    Org,
    Gpe,
    Loc,
    Product,
    Event,
    WorkOfArt,
}

impl EntityType {
    /// All types the terminology pipeline asks an [`NERProvider`] to extract.
    pub const ALL: [EntityType; 7] = [
        EntityType::Person,
        EntityType::Org,
        EntityType::Gpe,
        EntityType::Loc,
        EntityType::Product,
        EntityType::Event,
        EntityType::WorkOfArt,
    ];
}

/// A named entity found in one of the supplied items.
#[derive(Debug, Clone)]
pub struct NamedTerm {
    pub text: String,
    pub entity_type: EntityType,
    /// Index into the `items` slice passed to [`NERProvider::extract`] where
    /// this entity was found.
    pub item_index: usize,
}

/// Contract for an external named-entity recognizer. Optional: the
/// terminology pipeline proceeds without NER when no provider is configured.
#[async_trait]
pub trait NERProvider: Send + Sync {
    /// Extract entities of `entity_types` from `items`, tagged with the item
    /// index they were found in. `model_name` selects among whatever models
    /// the implementation has available for `source_language`.
    async fn extract(
        &self,
        items: &[String],
        model_name: &str,
        entity_types: &[EntityType],
    ) -> Vec<NamedTerm>;
}

/// An [`NERProvider`] that finds nothing, used when no NER backend is wired
/// up. The terminology pipeline treats an empty result identically to "NER
/// unavailable".
pub struct NoopNERProvider;

#[async_trait]
impl NERProvider for NoopNERProvider {
    async fn extract(&self, _items: &[String], _model_name: &str, _entity_types: &[EntityType]) -> Vec<NamedTerm> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_provider_returns_nothing() {
        let provider = NoopNERProvider;
        let result = provider
            .extract(&["Alice went to Paris".to_string()], "any-model", &EntityType::ALL)
            .await;
        assert!(result.is_empty());
    }
}
