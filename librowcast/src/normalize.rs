//! Text normalization for stored row content
//!
//! Turns whatever the source table holds (legacy-charset bytes, HTML entities,
//! typographic punctuation, ragged whitespace) into text that can be posted.

use std::borrow::Cow;

use encoding_rs::Encoding;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use unicode_normalization::UnicodeNormalization;

use crate::error::{ConfigError, Result};
use crate::types::{NormalizationMode, RawText};

/// Charset MySQL calls `latin1`
pub const DEFAULT_CHARSET: &str = "windows-1252";

#[derive(Debug, Clone)]
pub struct TextNormalizer {
    mode: NormalizationMode,
    encoding: &'static Encoding,
}

impl TextNormalizer {
    /// Create a normalizer decoding byte input with the given `encoding_rs` label
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the charset label is unknown.
    pub fn new(mode: NormalizationMode, charset: &str) -> Result<Self> {
        let encoding = Encoding::for_label(charset.trim().as_bytes()).ok_or_else(|| {
            ConfigError::invalid("source.charset", format!("unknown charset '{}'", charset))
        })?;

        Ok(Self { mode, encoding })
    }

    pub fn mode(&self) -> NormalizationMode {
        self.mode
    }

    /// Normalize raw row text into publishable text
    ///
    /// Never fails; malformed input degrades to replacement characters or
    /// passes through untouched.
    pub fn normalize(&self, raw: &RawText) -> String {
        let decoded: Cow<'_, str> = match raw {
            RawText::Text(text) => Cow::Borrowed(text.as_str()),
            RawText::Bytes(bytes) => {
                let (text, _, had_errors) = self.encoding.decode(bytes);
                if had_errors {
                    tracing::debug!(
                        charset = self.encoding.name(),
                        "row text contained undecodable bytes"
                    );
                }
                text
            }
        };

        let unescaped = decode_entities(&decoded);
        let composed: String = unescaped.nfc().collect();
        let plain_quotes = canonicalize_quotes(&composed);

        let text = match self.mode {
            NormalizationMode::PreserveUnicode => plain_quotes,
            NormalizationMode::AsciiStrip => strip_to_ascii(&plain_quotes),
        };

        collapse_whitespace(&text)
    }
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self {
            mode: NormalizationMode::PreserveUnicode,
            encoding: encoding_rs::WINDOWS_1252,
        }
    }
}

/// Decode numeric and common named HTML entities in a single pass
pub fn decode_entities(input: &str) -> Cow<'_, str> {
    static RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"&(?:#([0-9]{1,7})|#[xX]([0-9A-Fa-f]{1,6})|([A-Za-z][A-Za-z0-9]{1,31}));")
            .unwrap()
    });

    RE.replace_all(input, |caps: &Captures<'_>| {
        let decoded = if let Some(dec) = caps.get(1) {
            dec.as_str().parse::<u32>().ok().and_then(char::from_u32)
        } else if let Some(hex) = caps.get(2) {
            u32::from_str_radix(hex.as_str(), 16)
                .ok()
                .and_then(char::from_u32)
        } else {
            caps.get(3).and_then(|name| named_entity(name.as_str()))
        };

        match decoded {
            Some(c) => c.to_string(),
            None => caps[0].to_string(),
        }
    })
}

fn named_entity(name: &str) -> Option<char> {
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "hellip" => '\u{2026}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "sbquo" => '\u{201a}',
        "ldquo" => '\u{201c}',
        "rdquo" => '\u{201d}',
        "bdquo" => '\u{201e}',
        "laquo" => '\u{ab}',
        "raquo" => '\u{bb}',
        "prime" => '\u{2032}',
        "Prime" => '\u{2033}',
        "bull" => '\u{2022}',
        "middot" => '\u{b7}',
        "copy" => '\u{a9}',
        "reg" => '\u{ae}',
        "trade" => '\u{2122}',
        "deg" => '\u{b0}',
        "euro" => '\u{20ac}',
        "pound" => '\u{a3}',
        "yen" => '\u{a5}',
        "cent" => '\u{a2}',
        "sect" => '\u{a7}',
        "para" => '\u{b6}',
        "times" => '\u{d7}',
        "divide" => '\u{f7}',
        "iexcl" => '\u{a1}',
        "iquest" => '\u{bf}',
        "agrave" => 'à',
        "aacute" => 'á',
        "acirc" => 'â',
        "auml" => 'ä',
        "ccedil" => 'ç',
        "egrave" => 'è',
        "eacute" => 'é',
        "ecirc" => 'ê',
        "euml" => 'ë',
        "iacute" => 'í',
        "iuml" => 'ï',
        "ntilde" => 'ñ',
        "oacute" => 'ó',
        "ocirc" => 'ô',
        "ouml" => 'ö',
        "uacute" => 'ú',
        "uuml" => 'ü',
        "szlig" => 'ß',
        "Aacute" => 'Á',
        "Eacute" => 'É',
        "Ntilde" => 'Ñ',
        "Ouml" => 'Ö',
        "Uuml" => 'Ü',
        _ => return None,
    };
    Some(c)
}

fn canonicalize_quotes(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{201a}' | '\u{201b}' | '\u{2032}' => '\'',
            '\u{201c}' | '\u{201d}' | '\u{201e}' | '\u{201f}' | '\u{2033}' | '\u{ab}' | '\u{bb}' => {
                '"'
            }
            other => other,
        })
        .collect()
}

/// Fold to ASCII: dashes and ellipses get ASCII spellings, accented letters
/// lose their marks, anything else outside ASCII is dropped.
fn strip_to_ascii(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\u{2010}'..='\u{2015}' | '\u{2212}' => out.push('-'),
            '\u{2026}' => out.push_str("..."),
            c if c.is_ascii() => out.push(c),
            c if c.is_whitespace() => out.push(' '),
            c => out.extend(c.nfkd().filter(char::is_ascii)),
        }
    }
    out
}

fn collapse_whitespace(input: &str) -> String {
    input
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| !c.is_control())
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preserve() -> TextNormalizer {
        TextNormalizer::new(NormalizationMode::PreserveUnicode, DEFAULT_CHARSET).unwrap()
    }

    fn ascii() -> TextNormalizer {
        TextNormalizer::new(NormalizationMode::AsciiStrip, DEFAULT_CHARSET).unwrap()
    }

    #[test]
    fn test_collapses_whitespace_and_newlines() {
        let raw = RawText::from("  hello \n\n  world\t again  ");
        assert_eq!(preserve().normalize(&raw), "hello world again");
    }

    #[test]
    fn test_decodes_legacy_bytes() {
        // "caf\xe9 \x93quoted\x94" in windows-1252
        let raw = RawText::Bytes(vec![
            b'c', b'a', b'f', 0xe9, b' ', 0x93, b'q', b'u', b'o', b't', b'e', b'd', 0x94,
        ]);
        assert_eq!(preserve().normalize(&raw), "café \"quoted\"");
    }

    #[test]
    fn test_decodes_entities() {
        let raw = RawText::from("Tom &amp; Jerry &#39;cartoon&#39; &lt;b&gt; &#x2014; &hellip;");
        assert_eq!(preserve().normalize(&raw), "Tom & Jerry 'cartoon' <b> \u{2014} \u{2026}");
    }

    #[test]
    fn test_entity_decoding_is_single_pass() {
        assert_eq!(decode_entities("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_unknown_entities_are_left_alone() {
        assert_eq!(decode_entities("a &bogus; b &#xFFFFFF; c"), "a &bogus; b &#xFFFFFF; c");
    }

    #[test]
    fn test_smart_quotes_become_ascii() {
        let raw = RawText::from("\u{201c}It\u{2019}s fine,\u{201d} she said");
        assert_eq!(preserve().normalize(&raw), "\"It's fine,\" she said");
    }

    #[test]
    fn test_composes_decomposed_characters() {
        let raw = RawText::from("cafe\u{301}");
        assert_eq!(preserve().normalize(&raw), "caf\u{e9}");
    }

    #[test]
    fn test_preserve_mode_keeps_unicode() {
        let raw = RawText::from("Zürich \u{2013} 東京 \u{1f600}");
        assert_eq!(preserve().normalize(&raw), "Zürich \u{2013} 東京 \u{1f600}");
    }

    #[test]
    fn test_ascii_strip_mode() {
        let raw = RawText::from("Zürich \u{2013} 東京 caf\u{e9}\u{2026} \u{1f600} end");
        assert_eq!(ascii().normalize(&raw), "Zurich - cafe... end");
    }

    #[test]
    fn test_empty_and_blank_input() {
        assert_eq!(preserve().normalize(&RawText::from("")), "");
        assert_eq!(preserve().normalize(&RawText::from(" \n\t ")), "");
        assert_eq!(preserve().normalize(&RawText::Bytes(Vec::new())), "");
    }

    #[test]
    fn test_control_characters_are_dropped() {
        let raw = RawText::from("bell\u{7} here");
        assert_eq!(preserve().normalize(&raw), "bell here");
    }

    #[test]
    fn test_unknown_charset_is_rejected() {
        let result = TextNormalizer::new(NormalizationMode::PreserveUnicode, "klingon-8");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("source.charset"));
    }

    #[test]
    fn test_charset_labels_are_case_insensitive() {
        assert!(TextNormalizer::new(NormalizationMode::PreserveUnicode, "LATIN1").is_ok());
        assert!(TextNormalizer::new(NormalizationMode::PreserveUnicode, "utf-8").is_ok());
    }
}
