use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use unicode_segmentation::UnicodeSegmentation;

const STOPWORDS: &[&str] = &[
    "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "you're", "you've",
    "you'll", "you'd", "your", "yours", "yourself", "yourselves", "he", "him", "his", "himself",
    "she", "she's", "her", "hers", "herself", "it", "it's", "its", "itself", "they", "them",
    "their", "theirs", "themselves", "what", "which", "who", "whom", "this", "that", "that'll",
    "these", "those", "am", "is", "are", "was", "were", "be", "been", "being", "have", "has",
    "had", "having", "do", "does", "did", "doing", "a", "an", "the", "and", "but", "if", "or",
    "because", "as", "until", "while", "of", "at", "by", "for", "with", "about", "against",
    "between", "into", "through", "during", "before", "after", "above", "below", "to", "from",
    "up", "down", "in", "out", "on", "off", "over", "under", "again", "further", "then", "once",
    "here", "there", "when", "where", "why", "how", "all", "any", "both", "each", "few", "more",
    "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than",
    "too", "very", "s", "t", "can", "will", "just", "don", "don't", "should", "should've", "now",
    "d", "ll", "m", "o", "re", "ve", "y", "ain", "aren", "aren't", "couldn", "couldn't", "didn",
    "didn't", "doesn", "doesn't", "hadn", "hadn't", "hasn", "hasn't", "haven", "haven't", "isn",
    "isn't", "ma", "mightn", "mightn't", "mustn", "mustn't", "needn", "needn't", "shan", "shan't",
    "shouldn", "shouldn't", "wasn", "wasn't", "weren", "weren't", "won", "won't", "wouldn",
    "wouldn't",
];

/// Canonical form of a feature name, so "Rooms" and "the room" share a node.
pub struct FeatureNormalizer {
    stopwords: HashSet<&'static str>,
    stemmer: Stemmer,
}

impl FeatureNormalizer {
    pub fn new() -> Self {
        Self {
            stopwords: STOPWORDS.iter().copied().collect(),
            stemmer: Stemmer::create(Algorithm::English),
        }
    }

    /// Lowercase, drop stop-words, stem each remaining word.
    ///
    /// Falls back to the trimmed lowercase input when every word is a stop-word.
    pub fn normalize(&self, feature: &str) -> String {
        let lowered = feature.trim().to_lowercase();

        let stems: Vec<String> = tokenize(&lowered)
            .into_iter()
            .filter(|word| !self.stopwords.contains(word.as_str()))
            .map(|word| self.stemmer.stem(&word).into_owned())
            .collect();

        if stems.is_empty() {
            return lowered;
        }
        stems.join(" ")
    }
}

/// Words on Unicode word boundaries. Words joined by a single hyphen stay one token, so "wi-fi" is kept whole.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut hyphen = false;

    for segment in text.split_word_bounds() {
        if segment.chars().any(char::is_alphanumeric) {
            if hyphen {
                current.push('-');
            } else if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            current.push_str(segment);
            hyphen = false;
        } else if segment == "-" && !current.is_empty() && !hyphen {
            hyphen = true;
        } else {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            hyphen = false;
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

impl Default for FeatureNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        let normalizer = FeatureNormalizer::new();

        assert_eq!(normalizer.normalize("Rooms"), "room");
        assert_eq!(normalizer.normalize("  the rooms "), "room");
        assert_eq!(normalizer.normalize("Front desk staff"), "front desk staff");
        assert_eq!(normalizer.normalize("swimming pools"), "swim pool");
    }

    #[test]
    fn test_variants_share_a_form() {
        let normalizer = FeatureNormalizer::new();

        assert_eq!(normalizer.normalize("beds"), normalizer.normalize("the bed"));
    }

    #[test]
    fn test_stopword_only_feature_is_kept() {
        let normalizer = FeatureNormalizer::new();

        assert_eq!(normalizer.normalize(" It "), "it");
    }

    #[test]
    fn test_hyphenated_words_stay_whole() {
        let normalizer = FeatureNormalizer::new();

        assert_eq!(tokenize("free wi-fi, e-mail"), vec!["free", "wi-fi", "e-mail"]);
        assert_eq!(tokenize("room - view"), vec!["room", "view"]);
        assert_eq!(tokenize("check-"), vec!["check"]);
        assert_eq!(normalizer.normalize("The Wi-Fi"), "wi-fi");
    }

    #[test]
    fn test_plural_stems_match_singular() {
        let normalizer = FeatureNormalizer::new();

        assert_eq!(normalizer.normalize("dies"), "die");
        assert_eq!(normalizer.normalize("ponies"), "poni");
        assert_eq!(normalizer.normalize("hopping"), "hop");
    }
}
