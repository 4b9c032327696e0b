//! Clean up prompts produced by other tools before they reach the tokenizer.
//!
//! LLM-written prompts often carry tokenizer artifacts (`</w>`, `<|endoftext|>`)
//! and typographic punctuation that the text encoder handles poorly.

use std::sync::OnceLock;

use regex::Regex;

const REPLACED_TOKENS: [&str; 11] = [
    "\u{2014}</w>",
    "</w>",
    "<|endoftext|>",
    "<|end|>",
    "\u{2014}",
    "\u{2013}",
    "\u{2018}",
    "\u{2019}",
    "\u{201C}",
    "\u{201D}",
    "\u{2026}",
];

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern"))
}

fn end_of_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\S*</w>")
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"<[^>]*>")
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\s+")
}

fn problematic_res() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [r"</w>", r"<\|.*?\|>", r"<[^>]*>", r"\[\[.*?\]\]", r"\{\{.*?\}\}"]
            .iter()
            .map(|p| Regex::new(p).expect("static pattern"))
            .collect()
    })
}

/// Strip special tokens and awkward punctuation, collapse whitespace.
pub fn sanitize_prompt(prompt: &str) -> String {
    if prompt.is_empty() {
        return String::new();
    }

    let mut sanitized = prompt.to_string();
    for token in REPLACED_TOKENS {
        if sanitized.contains(token) {
            sanitized = sanitized.replace(token, " ");
            tracing::debug!("removed {:?} from prompt", token);
        }
    }

    let sanitized = end_of_word_re().replace_all(&sanitized, "");
    let sanitized = tag_re().replace_all(&sanitized, "");
    let sanitized = whitespace_re().replace_all(&sanitized, " ").trim().to_string();

    if sanitized != prompt {
        tracing::info!("prompt sanitized to remove special tokens");
        if sanitized.chars().count() < 10 {
            tracing::warn!("sanitized prompt is very short: {:?}", sanitized);
        }
    }
    sanitized
}

/// True when a prompt is empty, tag-like, or has almost no words in it.
pub fn is_prompt_problematic(prompt: &str) -> bool {
    if prompt.trim().is_empty() {
        return true;
    }
    if problematic_res().iter().any(|re| re.is_match(prompt)) {
        return true;
    }
    let word_chars = prompt
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect::<String>();
    word_chars.trim().chars().count() < 3
}
