//! Speech formatting for devices with speakers but no display.
//!
//! Model output is written for reading; a TTS engine stumbles over markdown,
//! abbreviations, and run-on lines. This module flattens a response into
//! plain sentences:
//! - markdown structure removed (fences, emphasis, links, headers, bullets)
//! - common abbreviations expanded to their spoken form
//! - sentences separated by a single space with terminal punctuation kept

use std::sync::OnceLock;

use regex::Regex;

/// Abbreviation → spoken-form table. Matched case-insensitively on word
/// boundaries; trailing periods are part of the match so "e.g." does not
/// leave a stray full stop behind.
const ABBREVIATIONS: &[(&str, &str)] = &[
    (r"e\.g\.", "for example"),
    (r"i\.e\.", "that is"),
    (r"etc\.", "and so on"),
    (r"vs\.", "versus"),
    (r"approx\.", "approximately"),
    (r"min\.", "minutes"),
    (r"hr\.", "hours"),
    (r"km/h", "kilometers per hour"),
    (r"mph", "miles per hour"),
    (r"°C", " degrees Celsius"),
    (r"°F", " degrees Fahrenheit"),
];

fn markdown_patterns() -> &'static [Regex; 7] {
    static PATTERNS: OnceLock<[Regex; 7]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // Fenced code blocks, including the fence lines.
            Regex::new(r"(?s)```.*?```").unwrap(),
            // Inline code.
            Regex::new(r"`([^`]*)`").unwrap(),
            // Links: keep the label, drop the target.
            Regex::new(r"\[([^\]]+)\]\([^)]*\)").unwrap(),
            // Bold and italic markers.
            Regex::new(r"\*{1,3}([^*]+)\*{1,3}").unwrap(),
            Regex::new(r"_{1,3}([^_]+)_{1,3}").unwrap(),
            // Headers and bullets at line start.
            Regex::new(r"(?m)^\s*#{1,6}\s*").unwrap(),
            Regex::new(r"(?m)^\s*[-*+]\s+").unwrap(),
        ]
    })
}

/// Strip markdown structure, keeping the readable text.
pub fn strip_markdown(text: &str) -> String {
    let [fences, inline_code, links, bold, italic, headers, bullets] = markdown_patterns();

    let text = fences.replace_all(text, " ");
    let text = inline_code.replace_all(&text, "$1");
    let text = links.replace_all(&text, "$1");
    let text = bold.replace_all(&text, "$1");
    let text = italic.replace_all(&text, "$1");
    let text = headers.replace_all(&text, "");
    let text = bullets.replace_all(&text, "");
    text.into_owned()
}

/// Expand abbreviations to their spoken form.
pub fn expand_abbreviations(text: &str) -> String {
    static TABLE: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    let table = TABLE.get_or_init(|| {
        ABBREVIATIONS
            .iter()
            .map(|(pattern, spoken)| {
                let re = Regex::new(&format!(r"(?i)\b{pattern}")).unwrap();
                (re, *spoken)
            })
            .collect()
    });

    let mut out = text.to_string();
    for (re, spoken) in table {
        out = re.replace_all(&out, *spoken).into_owned();
    }
    out
}

/// Split into sentences on terminal punctuation followed by whitespace.
/// Keeps the punctuation with its sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    static BOUNDARY: OnceLock<Regex> = OnceLock::new();
    let boundary = BOUNDARY.get_or_init(|| Regex::new(r"([.!?])\s+").unwrap());

    let marked = boundary.replace_all(text, "$1\u{1f}");
    marked
        .split('\u{1f}')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Full speech formatting pass for a display-less device.
pub fn format_for_speech(text: &str) -> String {
    let stripped = strip_markdown(text);
    let expanded = expand_abbreviations(&stripped);
    let collapsed = expanded.split_whitespace().collect::<Vec<_>>().join(" ");
    split_sentences(&collapsed).join(" ")
}
