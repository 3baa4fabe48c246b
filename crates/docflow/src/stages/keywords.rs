use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::StageError;
use crate::stages::language::is_stopword;
use crate::stages::{Stage, StageInput, StageKind, StageOutput};

const DEFAULT_MAX_KEYWORDS: usize = 10;
const DEFAULT_MIN_LENGTH: usize = 3;

pub(crate) static RE_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}][\p{L}\p{N}'-]*").unwrap());

/// Frequency-based keyword extraction.
///
/// Words are lowercased, stopwords of the supported languages and short tokens
/// are dropped, and the most frequent words win. Ties are broken by first
/// occurrence so the output is deterministic.
pub struct KeywordStage {
    max_keywords: usize,
    min_length: usize,
}

impl Default for KeywordStage {
    fn default() -> Self {
        Self {
            max_keywords: DEFAULT_MAX_KEYWORDS,
            min_length: DEFAULT_MIN_LENGTH,
        }
    }
}

impl KeywordStage {
    pub fn with_max_keywords(mut self, max_keywords: usize) -> Self {
        self.max_keywords = max_keywords;
        self
    }

    pub fn extract(&self, text: &str) -> Vec<String> {
        // word -> (count, first position)
        let mut counts: HashMap<String, (usize, usize)> = HashMap::new();

        for (position, token) in RE_WORD.find_iter(text).enumerate() {
            let word = token
                .as_str()
                .trim_matches(|c: char| c == '\'' || c == '-')
                .to_lowercase();
            if word.chars().count() < self.min_length || is_stopword(&word) {
                continue;
            }
            counts.entry(word).or_insert((0, position)).0 += 1;
        }

        let mut ranked: Vec<(String, usize, usize)> = counts
            .into_iter()
            .map(|(word, (count, first))| (word, count, first))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        ranked
            .into_iter()
            .take(self.max_keywords)
            .map(|(word, _, _)| word)
            .collect()
    }
}

impl Stage for KeywordStage {
    fn kind(&self) -> StageKind {
        StageKind::ExtractKeywords
    }

    fn execute(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        Ok(StageOutput::Keywords(self.extract(&input.text_or_metadata())))
    }
}
