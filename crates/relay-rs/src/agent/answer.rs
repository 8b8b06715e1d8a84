//! Final-answer extraction for reasoning models that think out loud.

use regex::Regex;
use std::sync::LazyLock;

static ANSWER_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\b(?:answer|conclusion|therefore|thus|hence|result)\b:?\s*(.*?)(?:\n\n|$)")
        .expect("valid regex")
});

static STEP_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bstep\s+\d+:?\s*").expect("valid regex"));

static CALCULATED_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:=|\bequals\b|\bis\b)\s*([\d.]+\s*\w+)").expect("valid regex")
});

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]\s+").expect("valid regex"));

/// The conclusion of a step-by-step response.
///
/// Tries, in order: an explicit marker (`Answer:`, `Conclusion:`,
/// `Therefore`, `Thus`, `Hence`, `Result`), the last `Step N:` section, the
/// sentence holding the last `= <number> <unit>` style value, and finally
/// the last paragraph. Blank input comes back unchanged.
pub fn extract_final_answer(response: &str) -> String {
    if response.trim().is_empty() {
        return response.to_string();
    }

    if let Some(answer) = ANSWER_MARKER
        .captures(response)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|a| !a.is_empty())
    {
        return answer.to_string();
    }

    if let Some(last_step) = STEP_HEADER.find_iter(response).last() {
        let step = response.get(last_step.end()..).unwrap_or_default().trim();
        if !step.is_empty() {
            return step.to_string();
        }
    }

    if let Some(value) = CALCULATED_VALUE
        .captures_iter(response)
        .last()
        .and_then(|c| c.get(1))
    {
        if let Some(sentence) = split_sentences(response)
            .into_iter()
            .rev()
            .find(|s| s.contains(value.as_str()))
        {
            return sentence.trim().to_string();
        }
    }

    response
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .last()
        .unwrap_or(response)
        .to_string()
}

/// Apply [`extract_final_answer`] only for reasoner models, and only when asked.
pub fn process_model_response(response: &str, model: &str, extract_answer_only: bool) -> String {
    if extract_answer_only && model.to_ascii_lowercase().contains("reasoner") {
        extract_final_answer(response)
    } else {
        response.to_string()
    }
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        // Keep the punctuation with its sentence.
        if let Some(sentence) = text.get(start..m.start() + 1) {
            sentences.push(sentence);
        }
        start = m.end();
    }
    if let Some(rest) = text.get(start..) {
        sentences.push(rest);
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_marker() {
        let text = "First I add the numbers.\n\nAnswer: 42 apples\n\nHope that helps.";
        assert_eq!(extract_final_answer(text), "42 apples");
    }

    #[test]
    fn last_step() {
        let text = "Step 1: read the input.\nStep 2: multiply by two.\nStep 3: the total is 18";
        assert_eq!(extract_final_answer(text), "the total is 18");
    }

    #[test]
    fn sentence_with_last_value() {
        let text = "The train leaves at noon. Travel time is 3 hours. Enjoy the ride";
        assert_eq!(extract_final_answer(text), "Travel time is 3 hours.");
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let steps = "Step 1: déjà vu.\nStep 2: café costs 3 €";
        assert_eq!(extract_final_answer(steps), "café costs 3 €");

        let text = "Un café… très bon. Le total equals 12 euros. Merci beaucoup";
        assert_eq!(extract_final_answer(text), "Le total equals 12 euros.");
    }

    #[test]
    fn last_paragraph_fallback() {
        let text = "Some musing.\n\nThe capital of France is Paris\n\n";
        assert_eq!(extract_final_answer(text), "The capital of France is Paris");
    }

    #[test]
    fn only_reasoner_models_are_processed() {
        let text = "Thinking...\n\nAnswer: 7";
        assert_eq!(process_model_response(text, "deepseek-reasoner", true), "7");
        assert_eq!(process_model_response(text, "deepseek-reasoner", false), text);
        assert_eq!(process_model_response(text, "deepseek-chat", true), text);
    }

    #[test]
    fn blank_is_unchanged() {
        assert_eq!(extract_final_answer("  \n"), "  \n");
    }
}
