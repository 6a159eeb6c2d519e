//! Splitting normalized text into platform-sized segments

use crate::error::{ConfigError, Result};

/// Greedy whitespace segmenter
///
/// Lengths are counted in `char`s. A single word longer than the limit is
/// emitted alone and unmodified rather than truncated.
#[derive(Debug, Clone, Copy)]
pub struct TextSegmenter {
    max_len: usize,
}

impl TextSegmenter {
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when `max_len` is zero.
    pub fn new(max_len: usize) -> Result<Self> {
        if max_len == 0 {
            return Err(ConfigError::invalid(
                "publish.max_segment_length",
                "must be greater than 0",
            )
            .into());
        }
        Ok(Self { max_len })
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Split `text` into ordered segments
    pub fn segment(&self, text: &str) -> Vec<String> {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut current_len = 0usize;

        for word in text.split_whitespace() {
            let word_len = word.chars().count();

            if current_len > 0 && current_len + 1 + word_len > self.max_len {
                segments.push(std::mem::take(&mut current));
                current_len = 0;
            }

            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current.push_str(word);
            current_len += word_len;
        }

        if current_len > 0 {
            segments.push(current);
        }

        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_segment() {
        let segmenter = TextSegmenter::new(140).unwrap();
        assert_eq!(
            segmenter.segment("New entry added: hello world"),
            vec!["New entry added: hello world"]
        );
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        let segmenter = TextSegmenter::new(140).unwrap();
        assert!(segmenter.segment("").is_empty());
        assert!(segmenter.segment("   \n ").is_empty());
    }

    #[test]
    fn test_splits_on_word_boundaries() {
        let segmenter = TextSegmenter::new(11).unwrap();
        assert_eq!(
            segmenter.segment("aaa bbb ccc ddd eee"),
            vec!["aaa bbb ccc", "ddd eee"]
        );
    }

    #[test]
    fn test_word_exactly_at_limit_fits() {
        let segmenter = TextSegmenter::new(5).unwrap();
        assert_eq!(segmenter.segment("abcde fghij"), vec!["abcde", "fghij"]);
    }

    #[test]
    fn test_oversized_word_stands_alone() {
        let segmenter = TextSegmenter::new(140).unwrap();
        let word = "a".repeat(200);
        let segments = segmenter.segment(&word);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].len(), 200);
    }

    #[test]
    fn test_oversized_word_between_short_words() {
        let segmenter = TextSegmenter::new(10).unwrap();
        let long = "x".repeat(15);
        let text = format!("hi {} there", long);
        assert_eq!(segmenter.segment(&text), vec!["hi".to_string(), long, "there".to_string()]);
    }

    #[test]
    fn test_length_counts_chars_not_bytes() {
        let segmenter = TextSegmenter::new(5).unwrap();
        assert_eq!(segmenter.segment("éé éé"), vec!["éé éé"]);
    }

    #[test]
    fn test_zero_limit_is_rejected() {
        assert!(TextSegmenter::new(0).is_err());
    }
}
