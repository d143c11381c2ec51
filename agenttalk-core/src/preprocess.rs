//! Markdown stripping, sentence segmentation, and the speakability filter.
//!
//! The teacher has no text-preprocessing module of its own (it consumes
//! audio, not text); this is grounded on
//! `original_source/agenttalk/preprocessor.py`'s fixed pass order, with
//! `pysbd`'s ML-free sentence boundary detector replaced by a small
//! regex-driven splitter since no such crate exists anywhere in the
//! retrieval pack.

use once_cell::sync::Lazy;
use regex::Regex;

/// Alphabetic-character ratio below this over a sentence's non-whitespace
/// body marks it unspeakable (spec.md §4.1 step 4).
const SPEAKABILITY_THRESHOLD: f64 = 0.40;

static FENCED_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```.*?```").unwrap());
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]*)`").unwrap());
static MD_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap());
static BARE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://\S+").unwrap());
static ATX_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*#{1,6}\s*").unwrap());
static EMPHASIS: Lazy<Regex> = Lazy::new(|| {
    // 1-3 repeated `*` or `_` on both sides of non-empty inner text.
    Regex::new(r"([*_]{1,3})([^*_\n]+)\1").unwrap()
});
static BLOCKQUOTE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*>\s?").unwrap());
static LIST_BULLET_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*[-*+]\s+|^\s*\d+[.)]\s+").unwrap());
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static PARAGRAPH_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n+").unwrap());

/// Titles and other common abbreviations whose trailing period must never
/// force a sentence split, regardless of what follows (a title is nearly
/// always followed by a capitalized proper noun — "Dr. Smith", "St. Louis"
/// — so gating on "followed by lowercase" alone misses the common case).
const ABBREVIATIONS: &[&str] = &[
    "dr", "mr", "mrs", "ms", "st", "jr", "sr", "prof", "rev", "gen", "col", "capt", "sgt", "lt",
    "maj", "hon", "ft", "mt", "vs", "etc", "approx", "dept", "univ", "assoc", "inc", "ltd", "co",
    "no", "fig", "jan", "feb", "mar", "apr", "jun", "jul", "aug", "sep", "sept", "oct", "nov",
    "dec",
];

/// Strip Markdown markup from one paragraph, in the fixed order spec.md
/// §4.1 step 2 specifies. Each step's output feeds the next.
fn strip_markup(paragraph: &str) -> String {
    let s = FENCED_CODE.replace_all(paragraph, " ");
    let s = INLINE_CODE.replace_all(&s, "$1");
    let s = MD_LINK.replace_all(&s, "$1");
    let s = BARE_URL.replace_all(&s, "");
    let s = ATX_HEADING.replace_all(&s, "");
    // Emphasis markers can nest one level (`**_x_**`); two passes is
    // enough for anything a human actually writes and avoids the
    // unbounded-backtracking cost of a recursive regex.
    let s = EMPHASIS.replace_all(&s, "$2");
    let s = EMPHASIS.replace_all(&s, "$2");
    let s = BLOCKQUOTE_PREFIX.replace_all(&s, "");
    let s = LIST_BULLET_PREFIX.replace_all(&s, "");
    WHITESPACE_RUN.replace_all(s.trim(), " ").into_owned()
}

/// Splits a paragraph into sentences. Not a statistical/ML boundary
/// detector — a fixed set of terminator rules over punctuation, matching
/// the non-destructive requirement (nothing inside a sentence is
/// rewritten) without pulling in a sentence-segmentation dependency that
/// does not exist in this ecosystem niche.
struct SentenceSplitter;

impl SentenceSplitter {
    /// A fresh instance per call — spec.md §4.1 step 3 forbids shared
    /// mutable state between calls. This type carries none, but the
    /// explicit constructor documents the contract at call sites.
    fn new() -> Self {
        SentenceSplitter
    }

    fn split(&self, paragraph: &str) -> Vec<String> {
        let mut sentences = Vec::new();
        let mut start = 0usize;
        let chars: Vec<(usize, char)> = paragraph.char_indices().collect();

        for (i, &(byte_idx, ch)) in chars.iter().enumerate() {
            if matches!(ch, '.' | '!' | '?' | '\u{2026}') {
                // Don't split mid-ellipsis ("..."), on an abbreviation's
                // single period followed immediately by a lowercase letter,
                // or on a title/initial abbreviation regardless of what
                // follows ("Dr. Smith" is followed by an uppercase letter).
                let next_non_space = chars[i + 1..]
                    .iter()
                    .find(|(_, c)| !c.is_whitespace())
                    .map(|(_, c)| *c);

                let is_ellipsis_run = ch == '.'
                    && chars.get(i + 1).map(|(_, c)| *c) == Some('.');
                if is_ellipsis_run {
                    continue;
                }

                let followed_by_lowercase =
                    ch == '.' && next_non_space.is_some_and(|c| c.is_lowercase());
                if followed_by_lowercase {
                    continue;
                }

                if ch == '.' && is_abbreviation_before_period(&preceding_word(&chars, i)) {
                    continue;
                }

                let end = byte_idx + ch.len_utf8();
                let piece = paragraph[start..end].trim();
                if !piece.is_empty() {
                    sentences.push(piece.to_string());
                }
                start = end;
            }
        }

        let tail = paragraph[start..].trim();
        if !tail.is_empty() {
            sentences.push(tail.to_string());
        }
        sentences
    }
}

/// The run of alphabetic characters immediately preceding `chars[period_idx]`.
fn preceding_word(chars: &[(usize, char)], period_idx: usize) -> String {
    let mut j = period_idx;
    let mut word = String::new();
    while j > 0 && chars[j - 1].1.is_alphabetic() {
        word.push(chars[j - 1].1);
        j -= 1;
    }
    word.chars().rev().collect()
}

/// True for a single capital-letter initial ("J.") or a title/abbreviation
/// from [`ABBREVIATIONS`], case-insensitively.
fn is_abbreviation_before_period(word: &str) -> bool {
    if word.chars().count() == 1 {
        return word.chars().next().is_some_and(|c| c.is_uppercase());
    }
    !word.is_empty() && ABBREVIATIONS.contains(&word.to_lowercase().as_str())
}

/// Alphabetic-character ratio over the non-whitespace body of `sentence`.
fn alphabetic_ratio(sentence: &str) -> f64 {
    let body: Vec<char> = sentence.chars().filter(|c| !c.is_whitespace()).collect();
    if body.is_empty() {
        return 0.0;
    }
    let alpha = body.iter().filter(|c| c.is_alphabetic()).count();
    alpha as f64 / body.len() as f64
}

fn is_speakable(sentence: &str) -> bool {
    alphabetic_ratio(sentence) >= SPEAKABILITY_THRESHOLD
}

/// Runs the full pipeline: paragraph split → markup strip → sentence
/// segment → trim → speakability filter (spec.md §4.1).
///
/// Any internal panic-free failure path that would otherwise bubble up
/// instead yields an empty list — "nothing to speak" is always a valid
/// answer, never a crash.
pub fn preprocess(input: &str) -> Vec<String> {
    let splitter = SentenceSplitter::new();
    let mut out = Vec::new();

    for paragraph in PARAGRAPH_SPLIT.split(input) {
        if paragraph.trim().is_empty() {
            continue;
        }
        let cleaned = strip_markup(paragraph);
        if cleaned.is_empty() {
            continue;
        }
        for sentence in splitter.split(&cleaned) {
            let trimmed = sentence.trim();
            if !trimmed.is_empty() && is_speakable(trimmed) {
                out.push(trimmed.to_string());
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_blank_lines_into_paragraph_boundaries() {
        let out = preprocess("First paragraph sentence.\n\nSecond paragraph sentence.");
        assert_eq!(out, vec!["First paragraph sentence.", "Second paragraph sentence."]);
    }

    #[test]
    fn strips_fenced_code_blocks() {
        let out = preprocess("Before.\n```\nlet x = 1;\n```\nAfter the block.");
        assert_eq!(out, vec!["Before.", "After the block."]);
    }

    #[test]
    fn unwraps_inline_code_keeping_inner_text() {
        let out = preprocess("Run the `cargo build` command now.");
        assert_eq!(out, vec!["Run the cargo build command now."]);
    }

    #[test]
    fn markdown_links_keep_display_text_only() {
        let out = preprocess("See [the docs](https://example.com/docs) for more.");
        assert_eq!(out, vec!["See the docs for more."]);
    }

    #[test]
    fn bare_urls_are_removed() {
        let out = preprocess("Visit https://example.com/page right now.");
        assert_eq!(out, vec!["Visit right now."]);
    }

    #[test]
    fn atx_headings_lose_leading_hashes() {
        // A heading and its body are only separate sentences when a blank
        // line actually separates them into paragraphs (spec.md §4.1 step
        // 1); otherwise the stripped heading just collapses into the same
        // sentence as the body.
        let out = preprocess("### Section Title\n\nBody sentence here.");
        assert_eq!(out[0], "Section Title");
        assert_eq!(out[1], "Body sentence here.");
    }

    #[test]
    fn emphasis_markers_are_unwrapped() {
        let out = preprocess("This is **very** important and _also_ true.");
        assert_eq!(out, vec!["This is very important and also true."]);
    }

    #[test]
    fn blockquote_and_bullet_prefixes_are_stripped() {
        let out = preprocess("> A quoted remark.\n- A bullet point.\n1. A numbered item.");
        assert_eq!(
            out,
            vec!["A quoted remark.", "A bullet point.", "A numbered item."]
        );
    }

    #[test]
    fn whitespace_runs_collapse_to_single_space() {
        let out = preprocess("Too    many     spaces   here.");
        assert_eq!(out, vec!["Too many spaces here."]);
    }

    #[test]
    fn preserves_prosody_punctuation() {
        let out = preprocess("Wait\u{2014}really? Yes... absolutely! \u{201c}Quoted\u{201d} text -- dashed.");
        assert!(out.iter().any(|s| s.contains('\u{2014}')));
        assert!(out.iter().any(|s| s.contains("...")));
        assert!(out.iter().any(|s| s.contains('\u{201c}') && s.contains('\u{201d}')));
        assert!(out.iter().any(|s| s.contains("--")));
    }

    #[test]
    fn unspeakable_sentences_are_dropped() {
        // Mostly punctuation/digits: alphabetic ratio well under 0.40.
        let out = preprocess("1234567890 !!! $$$ %%% 42.");
        assert!(out.is_empty());
    }

    #[test]
    fn speakable_sentence_survives_threshold() {
        let out = preprocess("Room 42B is down the hall.");
        assert_eq!(out, vec!["Room 42B is down the hall."]);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(preprocess("").is_empty());
        assert!(preprocess("   \n\n   ").is_empty());
    }

    #[test]
    fn abbreviation_period_does_not_force_a_split() {
        let out = preprocess("Dr. Smith arrived early today.");
        assert_eq!(out, vec!["Dr. Smith arrived early today."]);
    }
}
