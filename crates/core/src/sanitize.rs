//! Prompt sanitization
//!
//! LLM output sometimes carries tokenizer artifacts and typographic
//! punctuation that the text encoder handles poorly. [`sanitize`] strips
//! them; [`is_problematic`] flags prompts that are still risky.

use regex::Regex;
use std::sync::LazyLock;

/// Sanitized prompts shorter than this (in characters) are reported.
pub const SHORT_PROMPT_CHARS: usize = 10;

/// Minimum number of word characters a usable prompt keeps.
const MIN_WORD_CHARS: usize = 3;

/// Literal tokens replaced by a single space, in this order.
const PROBLEMATIC_TOKENS: &[&str] = &[
    "\u{2014}</w>",
    "</w>",
    "<|endoftext|>",
    "<|end|>",
    "\u{2014}", // em dash
    "\u{2013}", // en dash
    "\u{2018}",
    "\u{2019}",
    "\u{201C}",
    "\u{201D}",
    "\u{2026}", // ellipsis
];

static END_OF_WORD_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\S*</w>").unwrap());
static ANGLE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]").unwrap());

static PROBLEMATIC_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"</w>",
        r"<\|.*?\|>",
        r"<[^>]*>",
        r"\[\[.*?\]\]",
        r"\{\{.*?\}\}",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

/// Remove tokenizer artifacts, tags and typographic punctuation, then
/// normalize whitespace. Non-Latin scripts are left untouched.
pub fn sanitize(prompt: &str) -> String {
    if prompt.is_empty() {
        return String::new();
    }

    let mut sanitized = prompt.to_string();

    for token in PROBLEMATIC_TOKENS {
        if sanitized.contains(token) {
            sanitized = sanitized.replace(token, " ");
            tracing::warn!("Removed special token '{}' from prompt", token);
        }
    }

    if END_OF_WORD_RUN.is_match(&sanitized) {
        sanitized = END_OF_WORD_RUN.replace_all(&sanitized, "").into_owned();
        tracing::warn!("Removed </w> token patterns from prompt");
    }

    if ANGLE_TAG.is_match(&sanitized) {
        sanitized = ANGLE_TAG.replace_all(&sanitized, "").into_owned();
        tracing::warn!("Removed angle bracket tokens from prompt");
    }

    let sanitized = WHITESPACE.replace_all(&sanitized, " ").trim().to_string();

    if sanitized != prompt {
        tracing::info!("Prompt was sanitized to remove special tokens");
        if sanitized.chars().count() < SHORT_PROMPT_CHARS {
            tracing::warn!(
                "Sanitized prompt is very short ({:?}). This may affect generation quality.",
                sanitized
            );
        }
    }

    sanitized
}

/// Advisory check for prompts likely to produce poor output.
pub fn is_problematic(prompt: &str) -> bool {
    if prompt.trim().is_empty() {
        return true;
    }

    if PROBLEMATIC_PATTERNS.iter().any(|re| re.is_match(prompt)) {
        return true;
    }

    let clean = NON_WORD.replace_all(prompt, "");
    clean.trim().chars().count() < MIN_WORD_CHARS
}
