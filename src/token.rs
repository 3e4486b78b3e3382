use crate::error::{Error, Result};
use serde::Deserialize;
use tiktoken_rs::CoreBPE;
use tracing::warn;

const SIMPLE_CHARS_PER_TOKEN: usize = 4;
const ENHANCED_WORD_MULTIPLIER: f64 = 1.3;
const ENHANCED_SPECIAL_DIVISOR: usize = 10;

/// Type of tokenizer to use for counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerKind {
    /// BPE tokenizer resolved from the configured model name
    #[default]
    Tiktoken,
    /// Simple character-based tokenizer (~4 chars per token)
    Simple,
    /// Enhanced tokenizer with word and special character analysis
    Enhanced,
}

impl TokenizerKind {
    /// Creates a new tokenizer instance of this kind.
    ///
    /// `model` is only consulted by [`TokenizerKind::Tiktoken`]. An unknown
    /// model does not fail here; every count made with it fails instead.
    #[must_use]
    pub fn create(self, model: &str) -> Box<dyn TokenEstimator> {
        match self {
            Self::Tiktoken => Box::new(TiktokenCounter::for_model(model)),
            Self::Simple => Box::new(SimpleTokenizer),
            Self::Enhanced => Box::new(EnhancedTokenizer),
        }
    }
}

/// Counts tokens in text.
pub trait TokenEstimator {
    /// Counts the tokens in `text`, reporting why counting was impossible.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying model cannot be resolved or applied.
    fn try_estimate(&self, text: &str) -> Result<usize>;

    /// Counts the tokens in `text`, degrading to zero on failure.
    ///
    /// A zero from a failed count lets real content slip under the packing
    /// ceiling; callers that care use [`TokenEstimator::try_estimate`].
    fn estimate(&self, text: &str) -> usize {
        match self.try_estimate(text) {
            Ok(count) => count,
            Err(e) => {
                warn!("Token count failed, using 0: {}", e);
                0
            }
        }
    }
}

/// Exact counter backed by a `tiktoken` BPE table.
pub(crate) struct TiktokenCounter {
    model: String,
    bpe: std::result::Result<CoreBPE, String>,
}

impl TiktokenCounter {
    /// Resolves the encoding for `model` once, remembering a failure.
    pub(crate) fn for_model(model: &str) -> Self {
        let bpe = tiktoken_rs::get_bpe_from_model(model).map_err(|e| e.to_string());
        if let Err(ref message) = bpe {
            warn!("Unknown tokenizer model '{}': {}", model, message);
        }

        Self {
            model: model.to_string(),
            bpe,
        }
    }
}

impl TokenEstimator for TiktokenCounter {
    fn try_estimate(&self, text: &str) -> Result<usize> {
        match &self.bpe {
            Ok(bpe) => Ok(bpe.encode_with_special_tokens(text).len()),
            Err(message) => Err(Error::tokenizer(&self.model, message)),
        }
    }
}

/// Simple character-based tokenizer.
///
/// Uses a heuristic of approximately 4 characters per token.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SimpleTokenizer;

impl TokenEstimator for SimpleTokenizer {
    fn try_estimate(&self, text: &str) -> Result<usize> {
        if text.is_empty() {
            return Ok(0);
        }

        let char_count = text.chars().count();
        Ok(char_count
            .saturating_add(SIMPLE_CHARS_PER_TOKEN - 1)
            .saturating_div(SIMPLE_CHARS_PER_TOKEN)
            .max(1))
    }
}

/// Enhanced tokenizer with multiple heuristics.
///
/// This tokenizer considers:
/// - Word count (weighted by 1.3)
/// - Character count (divided by 4)
/// - Special characters (penalty factor)
#[derive(Debug, Clone, Copy)]
pub(crate) struct EnhancedTokenizer;

impl TokenEstimator for EnhancedTokenizer {
    fn try_estimate(&self, text: &str) -> Result<usize> {
        if text.is_empty() {
            return Ok(0);
        }

        let words = count_words(text);
        let chars = text.chars().count();
        let special_chars = count_special_chars(text);

        let word_estimate = (words as f64 * ENHANCED_WORD_MULTIPLIER) as usize;
        let char_estimate = chars.saturating_div(SIMPLE_CHARS_PER_TOKEN);
        let special_penalty = special_chars.saturating_div(ENHANCED_SPECIAL_DIVISOR);

        let base_estimate = word_estimate
            .saturating_add(char_estimate)
            .saturating_div(2);

        Ok(base_estimate.saturating_add(special_penalty).max(1))
    }
}

/// Counts words in text (whitespace-separated).
#[inline]
fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Counts special (non-alphanumeric) characters.
#[inline]
fn count_special_chars(text: &str) -> usize {
    text.chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl TokenEstimator for Failing {
        fn try_estimate(&self, _text: &str) -> Result<usize> {
            Err(Error::tokenizer("broken", "injected"))
        }
    }

    #[test]
    fn test_simple_tokenizer_empty() {
        assert_eq!(SimpleTokenizer.estimate(""), 0);
    }

    #[test]
    fn test_simple_tokenizer_basic() {
        assert_eq!(SimpleTokenizer.estimate("test"), 1);
        assert_eq!(SimpleTokenizer.estimate("hello world"), 3);
    }

    #[test]
    fn test_simple_tokenizer_long_text() {
        let text = "a".repeat(1000);
        assert_eq!(SimpleTokenizer.estimate(&text), 250);
    }

    #[test]
    fn test_enhanced_tokenizer_basic() {
        let result = EnhancedTokenizer.estimate("hello world");
        assert!(result > 0);
        assert!(result < 10);
    }

    #[test]
    fn test_tiktoken_known_model() {
        let counter = TokenizerKind::Tiktoken.create("gpt-4");
        let count = counter.try_estimate("hello world").unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_tiktoken_unknown_model_degrades_to_zero() {
        let counter = TokenizerKind::Tiktoken.create("definitely-not-a-model");
        assert!(counter.try_estimate("hello world").is_err());
        assert_eq!(counter.estimate("hello world"), 0);
    }

    #[test]
    fn test_failure_degrades_to_zero() {
        assert_eq!(Failing.estimate("plenty of real content here"), 0);
    }

    #[test]
    fn test_count_special_chars() {
        assert_eq!(count_special_chars("hello"), 0);
        assert_eq!(count_special_chars("hello!"), 1);
        assert_eq!(count_special_chars("fn main() {}"), 4);
    }
}
