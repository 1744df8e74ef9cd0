//! Text heuristics used by episodic summarization and search.

use std::collections::HashMap;

/// Words ignored by keyword extraction.
const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "am", "an", "and", "any", "are", "as", "at", "be",
    "because", "been", "before", "being", "but", "by", "can", "could", "did", "do", "does",
    "doing", "for", "from", "had", "has", "have", "having", "he", "her", "here", "him", "his",
    "how", "i", "if", "in", "into", "is", "it", "its", "just", "me", "more", "my", "no", "not",
    "now", "of", "on", "or", "our", "out", "please", "she", "should", "so", "some", "than",
    "that", "the", "their", "them", "then", "there", "these", "they", "this", "those", "to",
    "too", "up", "us", "very", "was", "we", "were", "what", "when", "where", "which", "while",
    "who", "why", "will", "with", "would", "yes", "you", "your",
];

/// Characters that break CJK runs before bigram extraction.
const CJK_STOP_CHARS: &[char] = &[
    '的', '了', '是', '在', '我', '你', '他', '她', '它', '们', '吗', '呢', '吧', '和', '就', '都',
    '也', '这', '那',
];

/// Phrases that mark a sentence as a decision.
const DECISION_MARKERS: &[&str] = &[
    "decided",
    "decide",
    "agreed",
    "agree to",
    "we will",
    "i will",
    "let's",
    "going with",
    "plan to",
    "决定",
    "同意",
];

/// Characters per token for CJK text.
const CJK_CHARS_PER_TOKEN: f64 = 1.5;
/// Characters per token for other text.
const OTHER_CHARS_PER_TOKEN: f64 = 4.0;

/// Top `limit` keywords by frequency, ties broken by first appearance.
pub fn extract_keywords<'a>(texts: impl IntoIterator<Item = &'a str>, limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let mut order = 0usize;
    for text in texts {
        for token in tokenize(text) {
            if token.chars().count() < 2 || STOP_WORDS.contains(&token.as_str()) {
                continue;
            }
            let entry = counts.entry(token).or_insert_with(|| {
                order += 1;
                (0, order)
            });
            entry.0 += 1;
        }
    }
    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
        count_b.cmp(count_a).then(first_a.cmp(first_b))
    });
    ranked.into_iter().take(limit).map(|(word, _)| word).collect()
}

/// Lower-cased alphanumeric runs. CJK runs are cut at stop characters and
/// emitted as overlapping bigrams.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let words = text
        .split(|ch: char| !ch.is_alphanumeric() && ch != '\'')
        .map(|token| token.trim_matches('\'').to_lowercase())
        .filter(|token| !token.is_empty());
    for word in words {
        if !word.chars().any(is_cjk) {
            tokens.push(word);
            continue;
        }
        let mut latin = String::new();
        let mut run: Vec<char> = Vec::new();
        for ch in word.chars() {
            if is_cjk(ch) {
                if !latin.is_empty() {
                    tokens.push(std::mem::take(&mut latin));
                }
                if CJK_STOP_CHARS.contains(&ch) {
                    push_bigrams(&mut tokens, &mut run);
                } else {
                    run.push(ch);
                }
            } else {
                push_bigrams(&mut tokens, &mut run);
                latin.push(ch);
            }
        }
        if !latin.is_empty() {
            tokens.push(latin);
        }
        push_bigrams(&mut tokens, &mut run);
    }
    tokens
}

fn push_bigrams(tokens: &mut Vec<String>, run: &mut Vec<char>) {
    tokens.extend(run.windows(2).map(|pair| pair.iter().collect::<String>()));
    run.clear();
}

/// Estimated token count for one message.
pub fn estimate_tokens(text: &str) -> usize {
    let (cjk, other) = text.chars().fold((0usize, 0usize), |(cjk, other), ch| {
        if is_cjk(ch) {
            (cjk + 1, other)
        } else {
            (cjk, other + 1)
        }
    });
    let cjk_tokens = (cjk as f64 / CJK_CHARS_PER_TOKEN).ceil() as usize;
    let other_tokens = (other as f64 / OTHER_CHARS_PER_TOKEN).ceil() as usize;
    cjk_tokens + other_tokens
}

fn is_cjk(ch: char) -> bool {
    matches!(ch as u32,
        0x3040..=0x30FF      // Hiragana, Katakana
        | 0x3400..=0x4DBF    // CJK Extension A
        | 0x4E00..=0x9FFF    // CJK Unified Ideographs
        | 0xAC00..=0xD7AF    // Hangul syllables
        | 0xF900..=0xFAFF    // CJK Compatibility Ideographs
        | 0x20000..=0x2A6DF) // CJK Extension B
}

/// Sentences that read like decisions, truncated to `max_chars`.
pub fn extract_decisions<'a>(
    texts: impl IntoIterator<Item = &'a str>,
    limit: usize,
    max_chars: usize,
) -> Vec<String> {
    let mut decisions = Vec::new();
    for text in texts {
        for sentence in text.split(['.', '!', '?', '\n', '。', '！', '？']) {
            let sentence = sentence.trim();
            if sentence.is_empty() {
                continue;
            }
            let lowered = sentence.to_lowercase();
            if DECISION_MARKERS.iter().any(|marker| lowered.contains(marker)) {
                decisions.push(truncate_chars(sentence, max_chars));
                if decisions.len() >= limit {
                    return decisions;
                }
            }
        }
    }
    decisions
}

/// Fraction of whitespace-delimited query terms found in the target.
pub fn term_overlap_score(query: &str, target: &str) -> f32 {
    let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
    if terms.is_empty() {
        return 0.0;
    }
    let target = target.to_lowercase();
    let found = terms
        .iter()
        .filter(|term| target.contains(term.as_str()))
        .count();
    found as f32 / terms.len() as f32
}

/// Truncate a string to a maximum character count.
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::{
        estimate_tokens, extract_decisions, extract_keywords, term_overlap_score, truncate_chars,
    };
    use pretty_assertions::assert_eq;

    #[test]
    fn keywords_rank_by_frequency_without_stop_words() {
        let keywords = extract_keywords(
            [
                "The deploy failed on the staging cluster",
                "Retry the deploy on staging",
                "Deploy works now",
            ],
            3,
        );
        assert_eq!(keywords, vec!["deploy", "staging", "failed"]);
    }

    #[test]
    fn cjk_keywords_are_bigrams_without_stop_characters() {
        let keywords = extract_keywords(["我想学习编程，我喜欢编程", "编程是很好的爱好"], 5);
        assert_eq!(keywords[0], "编程");
        assert_eq!(keywords.len(), 5);
        assert!(
            keywords
                .iter()
                .all(|word| word.chars().count() == 2 && !word.contains(['我', '是', '的']))
        );
    }

    #[test]
    fn mixed_script_words_split_at_script_boundary() {
        let keywords = extract_keywords(["rust语言 rust语言"], 5);
        assert_eq!(keywords, vec!["rust", "语言"]);
    }

    #[test]
    fn token_estimate_mixes_cjk_and_latin() {
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("你好世"), 2);
        assert_eq!(estimate_tokens("abcd你好世"), 3);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn overlap_score_counts_substring_terms() {
        assert_eq!(term_overlap_score("Rust memory", "rusty memory banks"), 1.0);
        assert_eq!(term_overlap_score("rust python", "rust only"), 0.5);
        assert_eq!(term_overlap_score("   ", "anything"), 0.0);
    }

    #[test]
    fn decisions_are_detected_per_sentence() {
        let decisions = extract_decisions(
            ["Hello there. We decided to ship on Friday! Anything else?"],
            5,
            100,
        );
        assert_eq!(decisions, vec!["We decided to ship on Friday"]);
    }

    #[test]
    fn truncate_chars_handles_limits() {
        assert_eq!(truncate_chars("hello", 0), "");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("hello", 10), "hello");
    }
}
