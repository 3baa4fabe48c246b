//! Stopword-based language detection.

use crate::error::StageError;
use crate::stages::keywords::RE_WORD;
use crate::stages::{Stage, StageInput, StageKind, StageOutput};

/// Reported when no language can be told apart from the others.
pub const UNKNOWN_LANGUAGE: &str = "unknown";

const ENGLISH: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "are", "was", "were", "have", "has",
    "not", "but", "you", "your", "our", "all", "any", "can", "will", "would", "there", "their",
    "which", "about", "into", "been", "is", "of", "to", "in", "it", "on", "by", "an", "a", "be",
    "as", "at", "or",
];

const GERMAN: &[&str] = &[
    "der", "die", "das", "und", "ist", "nicht", "ein", "eine", "einer", "mit", "den", "dem",
    "des", "von", "sich", "auf", "für", "auch", "wird", "wurde", "sind", "oder", "aber", "wie",
    "bei", "nach", "zum", "zur", "ich", "sie", "es", "im", "zu", "an",
];

const FRENCH: &[&str] = &[
    "le", "la", "les", "des", "une", "est", "et", "pour", "dans", "que", "qui", "pas", "sur",
    "avec", "sont", "mais", "par", "aux", "ces", "nous", "vous", "ont", "été", "du", "au", "ne",
    "se",
];

const SPANISH: &[&str] = &[
    "el", "los", "las", "y", "es", "que", "por", "para", "con", "una", "del", "está", "son",
    "como", "pero", "sus", "fue", "han", "muy", "también", "al", "lo",
];

const ITALIAN: &[&str] = &[
    "il", "gli", "della", "delle", "di", "che", "è", "per", "con", "una", "sono", "non", "nel",
    "alla", "dei", "degli", "anche", "come", "ma", "questo", "questa", "ed",
];

/// ISO 639-1 code and stopwords for each supported language.
const LANGUAGES: &[(&str, &[&str])] = &[
    ("en", ENGLISH),
    ("de", GERMAN),
    ("fr", FRENCH),
    ("es", SPANISH),
    ("it", ITALIAN),
];

/// Whether `word` (lowercase) is a stopword in any supported language.
pub fn is_stopword(word: &str) -> bool {
    LANGUAGES.iter().any(|(_, words)| words.contains(&word))
}

/// Returns the ISO 639-1 code of the language whose stopwords occur most
/// often, or [`UNKNOWN_LANGUAGE`] when there are none or the top two tie.
pub fn detect_language(text: &str) -> &'static str {
    let mut scores = [0usize; LANGUAGES.len()];

    for token in RE_WORD.find_iter(text) {
        let word = token.as_str().to_lowercase();
        for (i, (_, words)) in LANGUAGES.iter().enumerate() {
            if words.contains(&word.as_str()) {
                scores[i] += 1;
            }
        }
    }

    let mut ranked: Vec<(usize, usize)> = scores.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    match (ranked.first(), ranked.get(1)) {
        (Some(&(_, 0)), _) | (None, _) => UNKNOWN_LANGUAGE,
        (Some(&(_, best)), Some(&(_, second))) if best == second => UNKNOWN_LANGUAGE,
        (Some(&(index, _)), _) => LANGUAGES[index].0,
    }
}

#[derive(Debug, Default)]
pub struct LanguageStage;

impl LanguageStage {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for LanguageStage {
    fn kind(&self) -> StageKind {
        StageKind::DetectLanguage
    }

    fn execute(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        let text = input.text_or_metadata();
        Ok(StageOutput::Language(detect_language(&text).to_string()))
    }
}
