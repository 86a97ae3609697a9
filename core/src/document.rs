//! Sparse document records.

/// A single `(token id, count)` entry of a document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token {
    pub id: u32,
    pub count: f64,
}

/// A document: a 64-bit identifier and an ordered list of token counts.
///
/// Documents are immutable once built. Token ids are validated against the
/// vocabulary size when the partition stage hands documents to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    id: u64,
    tokens: Vec<Token>,
}

impl Document {
    pub fn new(id: u64, tokens: Vec<Token>) -> Self {
        Self { id, tokens }
    }

    /// Builds a document from `(token id, count)` pairs.
    pub fn from_pairs(id: u64, pairs: impl IntoIterator<Item = (u32, f64)>) -> Self {
        let tokens = pairs
            .into_iter()
            .map(|(id, count)| Token { id, count })
            .collect();
        Self { id, tokens }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Number of distinct token entries.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Sum of all token counts.
    pub fn total_count(&self) -> f64 {
        self.tokens.iter().map(|t| t.count).sum()
    }
}
