//! Prompt construction and token estimation.

use crate::config::Area;
use crate::models::Record;
use std::fmt::Write;

/// Tokens reserved for the answer on top of the prompt estimate.
pub const RESPONSE_TOKEN_ALLOWANCE: u64 = 100;

/// Coarse pre-call cost: one token per four bytes of prompt plus the
/// answer allowance. Stable and conservative rather than exact.
#[must_use]
pub fn estimate_tokens(prompt: &str) -> u64 {
    (prompt.len() as u64) / 4 + RESPONSE_TOKEN_ALLOWANCE
}

/// Builds the classification prompt for `record` within `area`.
#[must_use]
pub fn build_prompt(record: &Record, area: &Area) -> String {
    let labels = area.labels.join(", ");

    let mut alternatives = String::new();
    for (i, alternative) in record.alternatives().iter().enumerate() {
        if i > 0 {
            alternatives.push('\n');
        }
        let _ = write!(alternatives, "{}) {}", alternative.letter, alternative.text);
    }

    let files = record.files();
    let assets = if files.is_empty() {
        String::new()
    } else {
        format!("\nIMAGENS/ASSETS: {}", files.join(", "))
    };

    format!(
        "Classifique esta questão do ENEM em UMA disciplina específica.\n\
         \n\
         ÁREA: {area_name}\n\
         DISCIPLINAS VÁLIDAS: {labels}\n\
         \n\
         ENUNCIADO: {context}\n\
         CONTEXTO: {introduction}\n\
         ALTERNATIVAS: {alternatives}{assets}\n\
         \n\
         REGRAS:\n\
         - Responda APENAS o nome da disciplina\n\
         - Use apenas: {labels}\n\
         - NÃO explique, NÃO justifique\n\
         - Exemplo: \"geografia\" ou \"biologia\"\n\
         \n\
         RESPOSTA:",
        area_name = area.display(),
        context = record.context(),
        introduction = record.alternatives_introduction(),
    )
}
