use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Function words that never carry topical meaning on their own.
const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "of", "for", "to", "in", "on", "at", "is",
    "are", "was", "were", "be", "with", "this", "that", "it", "from", "by",
    "about", "how", "what", "when", "where", "why", "who", "your", "you",
    "my", "we", "they", "i",
];

fn word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Words may carry `+` or `-` after the first character (c++, t-shirt).
    PATTERN.get_or_init(|| Regex::new(r"\b[a-z0-9][a-z0-9+\-]*\b").expect("static pattern compiles"))
}

fn stopwords() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOPWORDS.iter().copied().collect())
}

/// Lowercase `text` and split it into content words, dropping stopwords and
/// tokens of two characters or fewer.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    word_pattern()
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .filter(|t| t.len() > 2 && !stopwords().contains(t.as_str()))
        .collect()
}

/// Build deduplicated 1- to 3-gram candidate phrases from `text`, longest
/// phrases first (ties broken alphabetically), truncated to `max_phrases`.
pub fn candidate_phrases(text: &str, max_phrases: usize) -> Vec<String> {
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return Vec::new();
    }

    let mut phrases = HashSet::new();
    for n in 1..=3.min(tokens.len()) {
        for window in tokens.windows(n) {
            phrases.insert(window.join(" "));
        }
    }

    let mut list: Vec<String> = phrases.into_iter().collect();
    list.sort_by(|a, b| {
        let words_a = a.split(' ').count();
        let words_b = b.split(' ').count();
        words_b.cmp(&words_a).then_with(|| a.cmp(b))
    });
    list.truncate(max_phrases);
    list
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_stopwords_and_short_tokens() {
        let tokens = tokenize("How to fix my broken TV in an hour");
        assert_eq!(tokens, vec!["fix", "broken", "hour"]);
    }

    #[test]
    fn keeps_hyphen_inside_words() {
        let tokens = tokenize("learning about t-shirt printing");
        assert_eq!(tokens, vec!["learning", "t-shirt", "printing"]);
    }

    #[test]
    fn empty_text_yields_no_candidates() {
        assert!(candidate_phrases("", 15).is_empty());
        assert!(candidate_phrases("a an the", 15).is_empty());
    }

    #[test]
    fn ngrams_are_deduplicated_and_longest_first() {
        let phrases = candidate_phrases("solar panel solar panel", 50);
        // "solar panel solar" and friends exist once each.
        let count = phrases.iter().filter(|p| *p == "solar panel").count();
        assert_eq!(count, 1);
        // Longest phrases sort before shorter ones.
        let first_words = phrases[0].split(' ').count();
        let last_words = phrases[phrases.len() - 1].split(' ').count();
        assert!(first_words >= last_words);
    }

    #[test]
    fn candidate_list_respects_ceiling() {
        let text = "one two three four five six seven eight nine ten \
                    alpha beta gamma delta epsilon zeta eta theta";
        let phrases = candidate_phrases(text, 10);
        assert_eq!(phrases.len(), 10);
    }

    #[test]
    fn single_token_text_yields_only_unigram() {
        assert_eq!(candidate_phrases("photography", 15), vec!["photography"]);
    }
}
