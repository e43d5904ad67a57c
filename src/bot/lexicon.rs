// src/bot/lexicon.rs - Vocabulary scan feeding the swear ledger

use log::{debug, info};
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

/// Counts occurrences of a closed vocabulary in message text.
///
/// Tokens are maximal runs of word characters (alphanumerics of any script
/// plus underscore), lowercased. The count is token-exact: a vocabulary entry
/// embedded inside a longer word does not count. A substring pre-check only
/// decides whether a message is worth tokenizing at all.
pub struct LexiconMatcher {
    vocabulary: HashSet<String>,
}

impl LexiconMatcher {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let vocabulary: HashSet<String> = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        info!("Lexicon loaded with {} entries", vocabulary.len());
        Self { vocabulary }
    }

    pub fn is_empty(&self) -> bool {
        self.vocabulary.is_empty()
    }

    /// Count vocabulary hits in `text`. A message with three flagged tokens
    /// reports 3, not 1.
    pub fn scan(&self, text: &str) -> usize {
        if self.vocabulary.is_empty() || text.is_empty() {
            return 0;
        }
        let normalized = text.nfc().collect::<String>().to_lowercase();

        // Fast path for clean messages: gates tokenization only, never the count.
        if !self
            .vocabulary
            .iter()
            .any(|word| normalized.contains(word.as_str()))
        {
            return 0;
        }

        let hits = normalized
            .split(|c: char| !is_word_char(c))
            .filter(|token| !token.is_empty() && self.vocabulary.contains(*token))
            .count();
        if hits > 0 {
            debug!("Lexicon scan found {} hits", hits);
        }
        hits
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
