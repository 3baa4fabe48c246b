use crate::error::StageError;
use crate::stages::{Stage, StageInput, StageKind, StageOutput};

const DEFAULT_MAX_SENTENCES: usize = 3;
const DEFAULT_MAX_CHARS: usize = 280;

/// Extractive summary made of the document's leading sentences.
pub struct SummaryStage {
    max_sentences: usize,
    max_chars: usize,
}

impl Default for SummaryStage {
    fn default() -> Self {
        Self {
            max_sentences: DEFAULT_MAX_SENTENCES,
            max_chars: DEFAULT_MAX_CHARS,
        }
    }
}

impl SummaryStage {
    pub fn new(max_sentences: usize, max_chars: usize) -> Self {
        Self {
            max_sentences: max_sentences.max(1),
            max_chars: max_chars.max(1),
        }
    }

    pub fn summarize(&self, text: &str) -> String {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let sentences = split_sentences(&collapsed);

        let mut summary = String::new();
        for sentence in sentences.iter().take(self.max_sentences) {
            let extra = if summary.is_empty() { 0 } else { 1 };
            if summary.chars().count() + extra + sentence.chars().count() > self.max_chars {
                break;
            }
            if !summary.is_empty() {
                summary.push(' ');
            }
            summary.push_str(sentence);
        }

        if summary.is_empty() {
            if let Some(first) = sentences.first() {
                summary = truncate_words(first, self.max_chars);
            }
        }
        summary
    }
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, ch)) = chars.next() {
        if matches!(ch, '.' | '!' | '?') {
            let at_boundary = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
            if at_boundary {
                let end = i + ch.len_utf8();
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = end;
            }
        }
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

/// Cuts `text` to at most `max_chars` characters (ellipsis included),
/// preferring a word boundary.
fn truncate_words(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let budget = max_chars.saturating_sub(1);
    let cut: String = text.chars().take(budget).collect();
    let ends_on_word = text.chars().nth(budget).is_some_and(char::is_whitespace);
    let trimmed = match cut.rfind(' ') {
        _ if ends_on_word => cut.as_str(),
        Some(pos) if pos > 0 => &cut[..pos],
        _ => cut.as_str(),
    };
    format!("{}…", trimmed.trim_end())
}

impl Stage for SummaryStage {
    fn kind(&self) -> StageKind {
        StageKind::GenerateSummary
    }

    fn execute(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        Ok(StageOutput::Summary(self.summarize(&input.text_or_metadata())))
    }
}
