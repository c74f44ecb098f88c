//! Keyword-overlap topic drift heuristic.
//!
//! A user utterance is reduced to its content words: lower-cased, split on
//! whitespace, stripped of surrounding punctuation, longer than three
//! characters and not on the stop-list. Two consecutive utterances are
//! compared by the fraction of the earlier keywords that reappear. Only the
//! previous utterance is ever considered.

use std::collections::HashSet;

/// Words ignored by default; they show up in nearly every weather question.
pub const DEFAULT_STOP_WORDS: &[&str] = &["weather", "temperature", "forecast", "climate"];

/// Default overlap below which the topic counts as changed.
pub const DEFAULT_DRIFT_THRESHOLD: f64 = 0.3;

const MIN_KEYWORD_CHARS: usize = 4;

/// Ordered, de-duplicated content words of one utterance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicKeywordSet {
    words: Vec<String>,
}

impl TopicKeywordSet {
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for word in words {
            set.insert(word.into());
        }
        set
    }

    fn insert(&mut self, word: String) {
        if !self.words.contains(&word) {
            self.words.push(word);
        }
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.iter().any(|w| w == word)
    }
}

/// Tokenizer and comparison rule.
#[derive(Debug, Clone, PartialEq)]
pub struct DriftDetector {
    threshold: f64,
    stop_words: HashSet<String>,
}

impl Default for DriftDetector {
    fn default() -> Self {
        Self::new(DEFAULT_DRIFT_THRESHOLD, DEFAULT_STOP_WORDS.iter().copied())
    }
}

impl DriftDetector {
    pub fn new<I, S>(threshold: f64, stop_words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            threshold,
            stop_words: stop_words
                .into_iter()
                .map(|w| w.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Content words of `text`.
    pub fn keywords(&self, text: &str) -> TopicKeywordSet {
        let lowered = text.to_lowercase();
        TopicKeywordSet::from_words(
            lowered
                .split_whitespace()
                .map(|word| word.trim_matches(|c: char| c.is_ascii_punctuation()))
                .filter(|word| word.chars().count() >= MIN_KEYWORD_CHARS)
                .filter(|word| !self.stop_words.contains(*word)),
        )
    }

    /// `|previous ∩ current| / |previous|`, or `None` when `previous` is empty.
    pub fn overlap(&self, previous: &TopicKeywordSet, current: &TopicKeywordSet) -> Option<f64> {
        if previous.is_empty() {
            return None;
        }
        let shared = previous
            .words()
            .iter()
            .filter(|word| current.contains(word))
            .count();
        Some(shared as f64 / previous.len() as f64)
    }

    /// Whether `current` moved away from `previous`.
    pub fn has_drifted(&self, previous: &TopicKeywordSet, current: &TopicKeywordSet) -> bool {
        self.overlap(previous, current)
            .is_some_and(|ratio| ratio < self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paris_trip() -> TopicKeywordSet {
        TopicKeywordSet::from_words(["paris", "weather", "trip"])
    }

    #[test]
    fn test_keywords_filters_short_and_stop_words() {
        let detector = DriftDetector::default();
        let set = detector.keywords("What is the WEATHER like in Paris, for my trip?");
        assert_eq!(set.words(), &["what", "like", "paris", "trip"]);
    }

    #[test]
    fn test_keywords_length_is_measured_after_trimming_punctuation() {
        let detector = DriftDetector::new(0.3, Vec::<String>::new());
        let set = detector.keywords("so far. \"rome\", (oslo) ... nice!");
        assert_eq!(set.words(), &["rome", "oslo", "nice"]);
        assert!(!set.contains("far"));
        assert!(!set.contains("far."));
    }

    #[test]
    fn test_keywords_deduplicates() {
        let detector = DriftDetector::new(0.3, Vec::<String>::new());
        let set = detector.keywords("rain rain rain again");
        assert_eq!(set.words(), &["rain", "again"]);
    }

    #[test]
    fn test_unrelated_utterance_drifts() {
        let detector = DriftDetector::new(0.3, Vec::<String>::new());
        let current = detector.keywords("tell me a joke about cats");
        assert_eq!(detector.overlap(&paris_trip(), &current), Some(0.0));
        assert!(detector.has_drifted(&paris_trip(), &current));
    }

    #[test]
    fn test_related_utterance_is_retained() {
        let detector = DriftDetector::new(0.3, Vec::<String>::new());
        let current = detector.keywords("what about the weather in paris tomorrow");
        let ratio = detector.overlap(&paris_trip(), &current).unwrap();
        assert!((ratio - 2.0 / 3.0).abs() < f64::EPSILON);
        assert!(!detector.has_drifted(&paris_trip(), &current));
    }

    #[test]
    fn test_related_utterance_is_retained_with_default_stop_words() {
        let detector = DriftDetector::default();
        let current = detector.keywords("what about the weather in paris tomorrow");
        let ratio = detector.overlap(&paris_trip(), &current).unwrap();
        assert!((ratio - 1.0 / 3.0).abs() < f64::EPSILON);
        assert!(!detector.has_drifted(&paris_trip(), &current));
    }

    #[test]
    fn test_empty_previous_never_drifts() {
        let detector = DriftDetector::default();
        let current = detector.keywords("anything goes here");
        assert_eq!(detector.overlap(&TopicKeywordSet::default(), &current), None);
        assert!(!detector.has_drifted(&TopicKeywordSet::default(), &current));
    }
}
