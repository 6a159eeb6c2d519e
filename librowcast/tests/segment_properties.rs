//! Property tests for segmentation and normalization

use librowcast::normalize::TextNormalizer;
use librowcast::segment::TextSegmenter;
use librowcast::types::{NormalizationMode, RawText};
use proptest::prelude::*;

fn words() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("[a-zA-Z0-9éü'.,!?-]{1,40}", 0..60)
}

fn separators() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("[ \t\n]{1,3}", 60)
}

fn join_with(words: &[String], seps: &[String]) -> String {
    let mut text = String::new();
    for (i, word) in words.iter().enumerate() {
        if i > 0 {
            text.push_str(&seps[i % seps.len()]);
        }
        text.push_str(word);
    }
    text
}

proptest! {
    #[test]
    fn prop_segments_fit_unless_single_long_word(
        words in words(),
        seps in separators(),
        max_len in 1usize..120,
    ) {
        let segmenter = TextSegmenter::new(max_len).unwrap();
        let text = join_with(&words, &seps);

        for segment in segmenter.segment(&text) {
            let len = segment.chars().count();
            prop_assert!(len > 0);
            if len > max_len {
                prop_assert!(!segment.contains(' '), "oversized segment {:?} has several words", segment);
            }
        }
    }

    #[test]
    fn prop_segments_preserve_word_sequence(
        words in words(),
        seps in separators(),
        max_len in 1usize..120,
    ) {
        let segmenter = TextSegmenter::new(max_len).unwrap();
        let text = join_with(&words, &seps);

        let segments = segmenter.segment(&text);
        let rejoined: Vec<String> = segments
            .join(" ")
            .split(' ')
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();
        prop_assert_eq!(rejoined, words);

        for segment in &segments {
            prop_assert!(!segment.starts_with(' '));
            prop_assert!(!segment.ends_with(' '));
        }
    }

    #[test]
    fn prop_segments_are_greedy(
        words in words(),
        max_len in 1usize..120,
    ) {
        let segmenter = TextSegmenter::new(max_len).unwrap();
        let segments = segmenter.segment(&words.join(" "));

        // The next segment's first word would not have fit on the previous one
        for pair in segments.windows(2) {
            let first_word = pair[1].split(' ').next().unwrap_or_default();
            let joined = pair[0].chars().count() + 1 + first_word.chars().count();
            prop_assert!(joined > max_len);
        }
    }

    #[test]
    fn prop_normalized_text_has_no_ragged_whitespace(input in "\\PC{0,200}") {
        let normalizer = TextNormalizer::default();
        let out = normalizer.normalize(&RawText::Text(input));

        prop_assert_eq!(out.trim(), out.as_str());
        prop_assert!(!out.contains("  "));
        prop_assert!(!out.contains('\n'));
    }

    #[test]
    fn prop_ascii_strip_output_is_ascii(bytes in proptest::collection::vec(any::<u8>(), 0..200)) {
        let normalizer = TextNormalizer::new(NormalizationMode::AsciiStrip, "windows-1252").unwrap();
        let out = normalizer.normalize(&RawText::Bytes(bytes));
        prop_assert!(out.is_ascii());
    }
}
