//! Mapping free-text model output onto a known label.

use crate::config::Vocabulary;

/// Spelling variants per label: accented forms, other languages, stems.
const SYNONYMS: &[(&str, &[&str])] = &[
    ("quimica", &["química", "quimica"]),
    ("fisica", &["física", "fisica"]),
    ("historia", &["história", "historia"]),
    ("geografia", &["geografia"]),
    ("filosofia", &["filosofia"]),
    ("sociologia", &["sociologia"]),
    ("biologia", &["biologia", "biology"]),
    ("portugues", &["português", "portugues"]),
    ("literatura", &["literatura"]),
    ("artes", &["arte", "artes"]),
    ("ingles", &["inglês", "ingles", "english"]),
    ("espanhol", &["espanhol", "español"]),
    ("matematica", &["matemática", "matematica", "math"]),
];

/// Known variants of `label`.
fn variants(label: &str) -> &'static [&'static str] {
    SYNONYMS
        .iter()
        .find(|(key, _)| *key == label)
        .map_or(&[], |(_, variants)| variants)
}

/// Finds the label in a model answer.
///
/// Every rule is tried against the record's own area before any label of
/// another area is considered. Rules, first match wins:
///
/// 1. a label appears anywhere in the lower-cased, trimmed answer
/// 2. one of a label's spelling variants appears
/// 3. the first word, stripped of trailing punctuation, is a label
/// 4. a templated answer such as `é: label`, `é label`, `label.` or
///    `is: label`
///
/// A label from another area is only returned when the own area yields
/// nothing; the caller reports it as an invalid mapping.
#[must_use]
pub fn extract_label<'v>(response: &str, vocabulary: &Vocabulary<'v>) -> Option<&'v str> {
    let response = response.trim().to_lowercase();
    if response.is_empty() {
        return None;
    }
    match_labels(&response, vocabulary.own())
        .or_else(|| match_labels(&response, vocabulary.others()))
}

/// Applies the rules in order to `labels`, which are searched in order.
fn match_labels<'v>(response: &str, labels: &[&'v str]) -> Option<&'v str> {
    if let Some(label) = labels.iter().copied().find(|l| response.contains(*l)) {
        return Some(label);
    }

    if let Some(label) = labels
        .iter()
        .copied()
        .find(|l| variants(l).iter().any(|v| response.contains(*v)))
    {
        return Some(label);
    }

    if let Some(first) = response.split_whitespace().next() {
        let first = first.trim_end_matches(['.', ',', '!', '?', ';', ':']);
        if let Some(label) = labels.iter().copied().find(|l| *l == first) {
            return Some(label);
        }
    }

    labels.iter().copied().find(|l| {
        [
            format!("é: {l}"),
            format!("é {l}"),
            format!("{l}."),
            format!("is: {l}"),
        ]
        .iter()
        .any(|pattern| response.contains(pattern.as_str()))
    })
}
