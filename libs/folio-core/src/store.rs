//! Vocabulary persistence interface.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::types::{CardPatch, VocabularyCard};

/// Record storage for vocabulary cards.
///
/// No multi-record transactions are required; each call stands alone.
pub trait VocabularyStore: Send + Sync {
    /// All cards matching `predicate`, in no particular order.
    fn get_all(&self, predicate: &dyn Fn(&VocabularyCard) -> bool) -> Result<Vec<VocabularyCard>>;

    fn get(&self, id: Uuid) -> Result<Option<VocabularyCard>>;

    fn insert(&self, card: &VocabularyCard) -> Result<()>;

    /// Apply `patch` to the card with `id`.
    fn update(&self, id: Uuid, patch: &CardPatch) -> Result<()>;

    fn remove(&self, id: Uuid) -> Result<()>;
}

/// In-process store backed by a hash map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    cards: RwLock<HashMap<Uuid, VocabularyCard>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cards(cards: impl IntoIterator<Item = VocabularyCard>) -> Self {
        Self {
            cards: RwLock::new(cards.into_iter().map(|c| (c.id, c)).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.cards.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.read().is_empty()
    }
}

impl VocabularyStore for MemoryStore {
    fn get_all(&self, predicate: &dyn Fn(&VocabularyCard) -> bool) -> Result<Vec<VocabularyCard>> {
        let cards = self.cards.read();
        Ok(cards.values().filter(|c| predicate(c)).cloned().collect())
    }

    fn get(&self, id: Uuid) -> Result<Option<VocabularyCard>> {
        Ok(self.cards.read().get(&id).cloned())
    }

    fn insert(&self, card: &VocabularyCard) -> Result<()> {
        let mut cards = self.cards.write();
        if cards.contains_key(&card.id) {
            return Err(StoreError::Duplicate(card.id));
        }
        cards.insert(card.id, card.clone());
        Ok(())
    }

    fn update(&self, id: Uuid, patch: &CardPatch) -> Result<()> {
        let mut cards = self.cards.write();
        let card = cards.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        card.apply(patch);
        Ok(())
    }

    fn remove(&self, id: Uuid) -> Result<()> {
        self.cards
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }
}
