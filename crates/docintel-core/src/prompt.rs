//! Prompt rendering.
//!
//! Turns a question, the retrieved sources, and opaque domain instructions
//! into the single prompt string handed to a language model. Generation
//! itself happens elsewhere; nothing here performs I/O.

use crate::budget::CHUNK_SEPARATOR;
use crate::models::SearchResult;

/// Render sources as `[Source N | Pages X-Y]` blocks, numbered from 1 in
/// the order given.
pub fn render_sources(sources: &[SearchResult]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "[Source {} | Pages {}-{}]\n{}",
                i + 1,
                r.chunk.start_page,
                r.chunk.end_page,
                r.chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join(CHUNK_SEPARATOR)
}

/// Build a prompt that answers `question` from the supplied sources.
pub fn render_prompt(question: &str, sources: &[SearchResult], instructions: &str) -> String {
    let mut out = String::new();
    push_instructions(&mut out, instructions);
    out.push_str(
        "Answer the question using only the document excerpts below. \
         Cite the excerpts you rely on as [Source N].\n\n",
    );
    out.push_str(&render_sources(sources));
    out.push_str("\n\nQuestion: ");
    out.push_str(question.trim());
    out.push_str("\nAnswer:");
    out
}

/// Build a prompt for when retrieval produced nothing usable.
pub fn render_fallback_prompt(question: &str, instructions: &str) -> String {
    let mut out = String::new();
    push_instructions(&mut out, instructions);
    out.push_str(
        "No relevant content was found in the document for this question. \
         Tell the user the document does not appear to contain this information \
         rather than guessing.\n\n",
    );
    out.push_str("Question: ");
    out.push_str(question.trim());
    out.push_str("\nAnswer:");
    out
}

/// Build a prompt over a whole (possibly truncated) document.
pub fn render_document_prompt(question: &str, document: &str, instructions: &str) -> String {
    let mut out = String::new();
    push_instructions(&mut out, instructions);
    out.push_str("Answer the question using the document below.\n\n");
    out.push_str(document);
    out.push_str("\n\nQuestion: ");
    out.push_str(question.trim());
    out.push_str("\nAnswer:");
    out
}

/// Prefix `prompt` with prior conversation. Empty history leaves it as is.
pub fn with_history(history: &str, prompt: String) -> String {
    if history.trim().is_empty() {
        return prompt;
    }
    format!("Previous conversation:\n{}\n\n{}", history, prompt)
}

fn push_instructions(out: &mut String, instructions: &str) {
    let instructions = instructions.trim();
    if !instructions.is_empty() {
        out.push_str(instructions);
        out.push_str("\n\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn result(start: u32, end: u32, text: &str) -> SearchResult {
        SearchResult {
            chunk: Chunk {
                id: text.to_string(),
                document_id: "d".to_string(),
                chunk_index: 0,
                text: text.to_string(),
                start_page: start,
                end_page: end,
                token_count: 1,
                overlap_with_previous: false,
                hash: String::new(),
            },
            score: 0.9,
        }
    }

    #[test]
    fn test_sources_numbered_from_one() {
        let rendered = render_sources(&[result(1, 2, "alpha"), result(4, 4, "beta")]);
        assert_eq!(
            rendered,
            "[Source 1 | Pages 1-2]\nalpha\n\n---\n\n[Source 2 | Pages 4-4]\nbeta"
        );
    }

    #[test]
    fn test_prompt_contains_instructions_sources_and_question() {
        let prompt = render_prompt(
            "  What is the term? ",
            &[result(3, 3, "The term is five years.")],
            "You are a contracts analyst.",
        );
        assert!(prompt.starts_with("You are a contracts analyst.\n\n"));
        assert!(prompt.contains("[Source 1 | Pages 3-3]\nThe term is five years."));
        assert!(prompt.ends_with("Question: What is the term?\nAnswer:"));
    }

    #[test]
    fn test_empty_instructions_omitted() {
        let prompt = render_fallback_prompt("Why?", "   ");
        assert!(prompt.starts_with("No relevant content was found"));
    }

    #[test]
    fn test_history_prefix() {
        let prompt = with_history("User: hi\nAssistant: hello", "Question: x".to_string());
        assert!(prompt.starts_with("Previous conversation:\nUser: hi"));
        assert!(prompt.ends_with("Question: x"));
        assert_eq!(with_history("", "p".to_string()), "p");
    }
}
