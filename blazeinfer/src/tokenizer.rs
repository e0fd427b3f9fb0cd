//! Word-level tokenizer backed by a fixed vocabulary.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{ProvisioningError, ProvisioningResult};
use crate::template::{IM_END, IM_START};
use crate::TokenId;

pub const UNK: &str = "<unk>";
pub const PAD: &str = "<pad>";
pub const END_OF_TEXT: &str = "<|endoftext|>";

/// Small demo vocabulary used when no vocabulary file is configured.
pub const BUILTIN_VOCAB: &[&str] = &[
    PAD, UNK, END_OF_TEXT, IM_START, IM_END, "system", "user", "assistant",
    "hello", "world", "how", "are", "you", "i", "am", "fine", "what", "is", "your", "name",
    "my", "help", "can", "please", "thank", "yes", "no", "the", "and", "a", "to", "of",
    "in", "that", "have", "it", "for", "not", "on", "with", "he", "as", "his", "they",
    "be", "at", "this", "from", "or", "had", "good", "great", "nice", "bad", "ok", "sure",
    "maybe", "think", "know", "see", ".", ",", "?", "!",
];

/// Maps whitespace-separated words to ids and back.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    vocab: HashMap<String, TokenId>,
    inv_vocab: Vec<String>,
    unk_id: TokenId,
}

impl Tokenizer {
    /// Create a tokenizer from a list of tokens. `<unk>` is the unknown token
    /// when present, otherwise the first entry. Later duplicates are ignored
    /// when encoding.
    pub fn new(tokens: Vec<String>) -> Self {
        let mut vocab = HashMap::with_capacity(tokens.len());
        for (i, tok) in tokens.iter().enumerate() {
            vocab.entry(tok.clone()).or_insert(i);
        }
        let unk_id = vocab.get(UNK).copied().unwrap_or(0);
        Self {
            vocab,
            inv_vocab: tokens,
            unk_id,
        }
    }

    pub fn builtin() -> Self {
        Self::new(BUILTIN_VOCAB.iter().map(|s| s.to_string()).collect())
    }

    /// Load a vocabulary file with one token per line. Blank lines are skipped.
    pub fn from_file(path: &Path) -> ProvisioningResult<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ProvisioningError::io(path, e))?;
        let tokens: Vec<String> = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        if tokens.is_empty() {
            return Err(ProvisioningError::EmptyVocabulary(path.to_path_buf()));
        }
        Ok(Self::new(tokens))
    }

    /// Encode a string using whitespace splitting. Words missing from the
    /// vocabulary are retried lowercased, then map to the unknown id.
    pub fn encode(&self, text: &str) -> Vec<TokenId> {
        text.split_whitespace()
            .map(|word| {
                self.vocab
                    .get(word)
                    .or_else(|| self.vocab.get(&word.to_lowercase()))
                    .copied()
                    .unwrap_or(self.unk_id)
            })
            .collect()
    }

    /// Decode token ids back into a space separated string.
    pub fn decode(&self, tokens: &[TokenId]) -> String {
        tokens
            .iter()
            .map(|&id| self.token_text(id).unwrap_or(self.unk_text()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn token_id(&self, token: &str) -> Option<TokenId> {
        self.vocab.get(token).copied()
    }

    pub fn token_text(&self, id: TokenId) -> Option<&str> {
        self.inv_vocab.get(id).map(String::as_str)
    }

    /// Id of a required special token.
    pub fn special_id(&self, token: &str) -> ProvisioningResult<TokenId> {
        self.token_id(token)
            .ok_or_else(|| ProvisioningError::MissingSpecialToken(token.to_string()))
    }

    pub fn unk_id(&self) -> TokenId {
        self.unk_id
    }

    fn unk_text(&self) -> &str {
        self.inv_vocab.get(self.unk_id).map_or(UNK, String::as_str)
    }

    pub fn vocab_size(&self) -> usize {
        self.inv_vocab.len()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.vocab.contains_key(token)
    }
}

impl crate::decode::Detokenizer for Tokenizer {
    fn detokenize(&self, ids: &[TokenId]) -> String {
        self.decode(ids)
    }
}
