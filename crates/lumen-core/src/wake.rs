//! Wake-phrase detection tolerant of transcription noise.
//!
//! Speech providers routinely insert spaces mid-word ("hey lume n"), vary
//! case, and split the tail of the phrase across utterance boundaries. Each
//! phrase is compiled into three patterns:
//! - a full pattern allowing optional whitespace between adjacent characters
//!   of a word and requiring at least one where the phrase has a space,
//! - an end-anchored pattern matching the phrase with 1..N-1 trailing
//!   characters of the last word missing (the split-utterance case),
//! - a residue pattern matching the orphaned tail of the last word at the
//!   start of the *next* utterance, but only when followed by punctuation so
//!   real words are never stripped.
//!
//! Also hosts the query classifiers used by the pipeline to decide whether a
//! query wants coordinates, an address, or neither.

use regex::Regex;

/// Default wake phrase.
pub const DEFAULT_WAKE_PHRASES: &[&str] = &["hey lumen"];

const VISION_KEYWORDS: &[&str] = &[
    "look at", "looking at", "what is this", "what's this", "what am i",
    "in front of me", "do you see", "can you see", "read this", "read the",
    "what color", "holding", "wearing", "this sign", "this label",
];

const LOCATION_KEYWORDS: &[&str] = &[
    "where am i", "near me", "nearby", "around here", "closest", "nearest",
    "directions", "what street", "what city", "what neighborhood",
    "my location", "this address",
];

const WEATHER_KEYWORDS: &[&str] = &[
    "weather", "temperature", "forecast", "raining", "rain today",
    "snowing", "umbrella", "hot outside", "cold outside", "windy",
];

/// Successful wake-phrase detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Byte offset of the match within the input.
    pub index: usize,
    /// Cleaned text after the phrase, empty for an end-split match.
    pub tail: String,
}

struct PhrasePatterns {
    full: Regex,
    split_end: Regex,
    residue: Regex,
}

pub struct WakeWordMatcher {
    phrases: Vec<PhrasePatterns>,
    leading_punct: Regex,
}

impl WakeWordMatcher {
    pub fn new(phrases: &[&str]) -> Self {
        let phrases = phrases
            .iter()
            .filter(|p| !p.trim().is_empty())
            .map(|p| compile_phrase(p))
            .collect();
        Self {
            phrases,
            leading_punct: Regex::new(r"^[,.\s]+").expect("static pattern"),
        }
    }

    /// Look for any wake phrase in `text`. A phrase cut off at the end of the
    /// text (missing up to all-but-one characters of its last word) counts;
    /// the residue rule on the next utterance picks up the orphaned tail.
    pub fn detect(&self, text: &str) -> Option<Detection> {
        for patterns in &self.phrases {
            if let Some(m) = patterns.full.find(text) {
                let tail = self.clean_leading(&text[m.end()..]);
                return Some(Detection {
                    index: m.start(),
                    tail,
                });
            }
            if let Some(m) = patterns.split_end.find(text) {
                return Some(Detection {
                    index: m.start(),
                    tail: String::new(),
                });
            }
        }
        None
    }

    /// Remove the first full wake-phrase occurrence, if any, along with the
    /// punctuation that follows it.
    pub fn remove_wake_word(&self, text: &str) -> String {
        for patterns in &self.phrases {
            if let Some(m) = patterns.full.find(text) {
                let mut out = String::with_capacity(text.len());
                out.push_str(&text[..m.start()]);
                out.push_str(&self.clean_leading(&text[m.end()..]));
                return out.trim().to_string();
            }
        }
        text.trim().to_string()
    }

    /// Strip an orphaned wake-word fragment from the start of `text`.
    ///
    /// Matches any 1..len-1 character suffix of a phrase's last word followed
    /// by at least one of `, . ! ? ; :` and is the identity otherwise.
    pub fn strip_residue<'a>(&self, text: &'a str) -> std::borrow::Cow<'a, str> {
        for patterns in &self.phrases {
            if let Some(m) = patterns.residue.find(text) {
                return std::borrow::Cow::Owned(text[m.end()..].to_string());
            }
        }
        std::borrow::Cow::Borrowed(text)
    }

    fn clean_leading(&self, tail: &str) -> String {
        self.leading_punct.replace(tail, "").trim().to_string()
    }

    // --- query classifiers -------------------------------------------------

    pub fn is_vision_query(&self, query: &str) -> bool {
        contains_any(query, VISION_KEYWORDS)
    }

    pub fn is_location_query(&self, query: &str) -> bool {
        contains_any(query, LOCATION_KEYWORDS)
    }

    pub fn is_weather_query(&self, query: &str) -> bool {
        contains_any(query, WEATHER_KEYWORDS)
    }

    /// Whether the pipeline should fetch device coordinates for this query.
    /// Weather queries naming a place ("weather in Paris") need neither.
    pub fn query_needs_location(&self, query: &str) -> bool {
        self.is_location_query(query)
            || (self.is_weather_query(query) && !names_a_place(query))
    }

    /// Whether coordinates should be reverse-geocoded into an address.
    /// Local weather only needs raw coordinates.
    pub fn query_needs_geocoding(&self, query: &str) -> bool {
        self.is_location_query(query)
    }
}

impl Default for WakeWordMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_WAKE_PHRASES)
    }
}

fn contains_any(query: &str, keywords: &[&str]) -> bool {
    let lower = query.to_lowercase();
    keywords.iter().any(|k| lower.contains(k))
}

fn names_a_place(query: &str) -> bool {
    let lower = format!(" {} ", query.to_lowercase());
    lower.contains(" in ") || lower.contains(" at ")
}

fn compile_phrase(phrase: &str) -> PhrasePatterns {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    let full = Regex::new(&format!("(?i){}", tolerant(&words)))
        .expect("phrase pattern");

    // End-anchored truncations: the whole phrase with 1..len-1 trailing
    // characters of the last word missing.
    let last = words.last().copied().unwrap_or_default();
    let last_chars: Vec<char> = last.chars().collect();
    let mut truncations = Vec::new();
    for keep in (1..last_chars.len()).rev() {
        let partial: String = last_chars[..keep].iter().collect();
        let mut truncated: Vec<&str> = words[..words.len() - 1].to_vec();
        truncated.push(&partial);
        truncations.push(tolerant(&truncated));
    }
    // Single-word phrases cannot be split; use a never-matching pattern.
    let split_end = if truncations.is_empty() {
        Regex::new(r"(?i)\b\B").expect("static pattern")
    } else {
        Regex::new(&format!(r"(?i)(?:{})\s*$", truncations.join("|"))).expect("split pattern")
    };

    // Residue: any proper suffix of the last word, longest first, followed by
    // at least one punctuation mark.
    let mut suffixes = Vec::new();
    for start in 1..last_chars.len() {
        let suffix: String = last_chars[start..].iter().collect();
        suffixes.push(regex::escape(&suffix));
    }
    let residue = if suffixes.is_empty() {
        Regex::new(r"(?i)\b\B").expect("static pattern")
    } else {
        Regex::new(&format!(r"(?i)^\s*(?:{})[,.!?;:]+\s*", suffixes.join("|")))
            .expect("residue pattern")
    };

    PhrasePatterns {
        full,
        split_end,
        residue,
    }
}

/// Tolerant pattern: `\s*` between adjacent characters of a word, `\s+`
/// between words.
fn tolerant(words: &[&str]) -> String {
    words
        .iter()
        .map(|word| {
            word.chars()
                .map(|c| regex::escape(&c.to_string()))
                .collect::<Vec<_>>()
                .join(r"\s*")
        })
        .collect::<Vec<_>>()
        .join(r"\s+")
}
