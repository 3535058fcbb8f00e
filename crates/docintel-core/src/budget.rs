//! Token-budgeted context assembly.
//!
//! Fits whole documents, retrieved chunks, or chat history into a token
//! budget. Every function here is deterministic and side-effect free.
//!
//! Token counts are estimated as `ceil(chars / 3.5)`, deliberately more
//! conservative than the chunker's `chars / 4` so assembled prompts err
//! toward fitting the consuming model's context window.

use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, Chunk, Page, Role};

/// Characters per token for budgeting estimates.
pub const CHARS_PER_TOKEN: f64 = 3.5;

/// Minimum remaining budget (in tokens) before a partial page is included.
pub const PARTIAL_PAGE_MIN_TOKENS: usize = 100;

/// Separator placed between rendered chunks.
pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

/// Separator placed between whole pages.
const PAGE_SEPARATOR: &str = "\n\n";

/// Appended to a page cut short by the budget.
pub const TRUNCATION_MARKER: &str = "...";

/// Tunables for budgeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// A partial page is only included when more than this many tokens remain.
    pub partial_page_min_tokens: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            partial_page_min_tokens: PARTIAL_PAGE_MIN_TOKENS,
        }
    }
}

/// Estimate the token count of `text` as `ceil(chars / 3.5)`.
///
/// ```rust
/// use docintel_core::budget::estimate_tokens;
/// assert_eq!(estimate_tokens("abcdefg"), 2);
/// ```
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() as f64 / CHARS_PER_TOKEN).ceil() as usize
}

/// Result of [`fit_whole_document`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WholeDocumentFit {
    pub context: String,
    /// Page numbers included, fully or partially, in document order.
    pub included_pages: Vec<u32>,
    pub truncated: bool,
    pub total_tokens: usize,
}

/// Fit a whole document into `max_tokens`.
///
/// If the full text fits it is returned verbatim. Otherwise pages are added
/// in order until the next one would overflow; if more than
/// `partial_page_min_tokens` remain, a prefix of that page (cut at the
/// character count the remaining budget allows, plus `...`) is included too.
pub fn fit_whole_document(
    full_text: &str,
    pages: &[Page],
    max_tokens: usize,
    config: &BudgetConfig,
) -> WholeDocumentFit {
    let total = estimate_tokens(full_text);
    if total <= max_tokens {
        return WholeDocumentFit {
            context: full_text.to_string(),
            included_pages: pages.iter().map(|p| p.number).collect(),
            truncated: false,
            total_tokens: total,
        };
    }

    let mut context = String::new();
    let mut included = Vec::new();
    let mut partial = false;

    for page in pages {
        let separator = if included.is_empty() { "" } else { PAGE_SEPARATOR };
        let candidate = format!("{}{}{}", context, separator, page.text);
        if estimate_tokens(&candidate) <= max_tokens {
            context = candidate;
            included.push(page.number);
            continue;
        }

        // Budget left once the separator is paid for.
        let prefix = format!("{}{}", context, separator);
        let remaining = max_tokens.saturating_sub(estimate_tokens(&prefix));
        if remaining > config.partial_page_min_tokens {
            let max_chars = (remaining as f64 * CHARS_PER_TOKEN).floor() as usize;
            let keep = max_chars.saturating_sub(TRUNCATION_MARKER.len());
            let slice: String = page.text.chars().take(keep).collect();
            context = format!("{}{}{}", prefix, slice.trim_end(), TRUNCATION_MARKER);
            included.push(page.number);
            partial = true;
        }
        break;
    }

    WholeDocumentFit {
        total_tokens: estimate_tokens(&context),
        truncated: partial || included.len() < pages.len(),
        included_pages: included,
        context,
    }
}

/// Result of [`fit_chunks`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkFit {
    pub context: String,
    /// Number of leading input chunks that fit.
    pub included_chunks: usize,
    pub truncated: bool,
    pub total_tokens: usize,
}

/// Render a chunk with its page-range annotation.
pub fn annotate_chunk(chunk: &Chunk) -> String {
    format!(
        "[Pages {}-{}]\n{}",
        chunk.start_page, chunk.end_page, chunk.text
    )
}

/// Fit chunks into `max_tokens`, strictly in input order.
///
/// Inclusion stops at the first chunk whose annotated estimate would exceed
/// the remaining budget; chunks are never cut. `truncated` is true iff fewer
/// chunks were included than supplied. Zero included chunks is a valid result.
pub fn fit_chunks<'a, I>(chunks: I, max_tokens: usize) -> ChunkFit
where
    I: IntoIterator<Item = &'a Chunk>,
{
    let mut rendered = Vec::new();
    let mut used = 0usize;
    let mut supplied = 0usize;
    let mut full = false;

    for chunk in chunks {
        supplied += 1;
        if full {
            continue;
        }
        let text = annotate_chunk(chunk);
        let cost = estimate_tokens(&text);
        if used + cost > max_tokens {
            full = true;
            continue;
        }
        used += cost;
        rendered.push(text);
    }

    ChunkFit {
        context: rendered.join(CHUNK_SEPARATOR),
        included_chunks: rendered.len(),
        truncated: rendered.len() < supplied,
        total_tokens: used,
    }
}

/// Result of [`fit_history`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryFit {
    /// Chronological `User:` / `Assistant:` lines.
    pub text: String,
    pub tokens: usize,
    /// User turns included.
    pub turns: usize,
}

/// Fit the most recent chat turns into `max_tokens`.
///
/// Scans backward from the newest message. A turn is counted at each user
/// message; scanning stops once `max_turns` turns are in, or when the next
/// message would not fit. System messages are skipped.
pub fn fit_history(messages: &[ChatMessage], max_tokens: usize, max_turns: usize) -> HistoryFit {
    let mut lines = Vec::new();
    let mut used = 0usize;
    let mut turns = 0usize;

    for msg in messages.iter().rev() {
        let label = match msg.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => continue,
        };
        if turns >= max_turns {
            break;
        }

        let line = format!("{}: {}", label, msg.content.trim());
        let cost = estimate_tokens(&line);
        if used + cost > max_tokens {
            break;
        }
        used += cost;
        lines.push(line);

        if msg.role == Role::User {
            turns += 1;
        }
    }

    lines.reverse();
    HistoryFit {
        text: lines.join("\n"),
        tokens: used,
        turns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(start: u32, end: u32, text: &str) -> Chunk {
        Chunk {
            id: format!("c{}", start),
            document_id: "d".to_string(),
            chunk_index: 0,
            text: text.to_string(),
            start_page: start,
            end_page: end,
            token_count: 0,
            overlap_with_previous: false,
            hash: String::new(),
        }
    }

    fn msg(role: Role, content: &str) -> ChatMessage {
        ChatMessage {
            role,
            content: content.to_string(),
            timestamp: 0,
        }
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcdefg"), 2);
        assert_eq!(estimate_tokens("abcdefgh"), 3);
        assert_eq!(estimate_tokens("ééé"), 1);
    }

    #[test]
    fn test_whole_document_fits_verbatim() {
        let pages = vec![Page::new(1, "One."), Page::new(2, "Two.")];
        let full = "One.\n\nTwo.";
        let fit = fit_whole_document(full, &pages, 100, &BudgetConfig::default());
        assert_eq!(fit.context, full);
        assert_eq!(fit.included_pages, vec![1, 2]);
        assert!(!fit.truncated);
        assert_eq!(fit.total_tokens, estimate_tokens(full));
    }

    #[test]
    fn test_whole_document_three_pages_small_budget() {
        let pages: Vec<Page> = (1..=3).map(|n| Page::new(n, "p".repeat(100))).collect();
        let full = pages
            .iter()
            .map(|p| p.text.clone())
            .collect::<Vec<_>>()
            .join("\n\n");
        let fit = fit_whole_document(&full, &pages, 50, &BudgetConfig::default());
        assert!(fit.truncated);
        assert_eq!(fit.included_pages, vec![1]);
        assert!(fit.total_tokens <= 50);
    }

    #[test]
    fn test_whole_document_partial_page_included() {
        let pages = vec![Page::new(1, "a".repeat(350)), Page::new(2, "b".repeat(3500))];
        let full = format!("{}\n\n{}", pages[0].text, pages[1].text);
        // page 1 costs 100 tokens, leaving 200 > 100 for a partial page 2.
        let fit = fit_whole_document(&full, &pages, 300, &BudgetConfig::default());
        assert!(fit.truncated);
        assert_eq!(fit.included_pages, vec![1, 2]);
        assert!(fit.context.ends_with(TRUNCATION_MARKER));
        assert!(fit.total_tokens <= 300);
    }

    #[test]
    fn test_whole_document_partial_threshold_configurable() {
        let pages = vec![Page::new(1, "a".repeat(350)), Page::new(2, "b".repeat(3500))];
        let full = format!("{}\n\n{}", pages[0].text, pages[1].text);
        let strict = BudgetConfig {
            partial_page_min_tokens: 500,
        };
        let fit = fit_whole_document(&full, &pages, 300, &strict);
        assert_eq!(fit.included_pages, vec![1]);
        assert!(!fit.context.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_whole_document_charges_page_separators() {
        // Each page alone is 2 tokens; joined they are 8, over a budget of 6.
        let pages: Vec<Page> = (1..=3).map(|n| Page::new(n, "x".repeat(7))).collect();
        let full = pages
            .iter()
            .map(|p| p.text.clone())
            .collect::<Vec<_>>()
            .join("\n\n");
        let fit = fit_whole_document(&full, &pages, 6, &BudgetConfig::default());
        assert!(fit.truncated);
        assert_eq!(fit.included_pages, vec![1, 2]);
        assert_eq!(fit.total_tokens, estimate_tokens(&fit.context));
        assert!(fit.total_tokens <= 6);
    }

    #[test]
    fn test_whole_document_context_never_exceeds_budget() {
        let config = BudgetConfig::default();
        for first in [0usize, 1, 3, 7, 50, 349, 350, 351] {
            for second in [1usize, 5, 700, 5000] {
                let pages = vec![
                    Page::new(1, "a".repeat(first)),
                    Page::new(2, "b".repeat(second)),
                    Page::new(3, "c".repeat(40)),
                ];
                let full = pages
                    .iter()
                    .map(|p| p.text.clone())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                for budget in [0usize, 6, 50, 120, 150, 300, 1000] {
                    let fit = fit_whole_document(&full, &pages, budget, &config);
                    assert!(
                        estimate_tokens(&fit.context) <= budget,
                        "first={} second={} budget={}",
                        first,
                        second,
                        budget
                    );
                    assert_eq!(fit.total_tokens, estimate_tokens(&fit.context));
                    if fit.context != full {
                        assert!(fit.truncated);
                    }
                }
            }
        }
    }

    #[test]
    fn test_fit_chunks_stops_at_first_overflow() {
        let chunks = vec![
            chunk(1, 1, &"x".repeat(70)),
            chunk(2, 2, &"y".repeat(700)),
            chunk(3, 3, &"z".repeat(7)),
        ];
        let fit = fit_chunks(&chunks, 60);
        assert_eq!(fit.included_chunks, 1);
        assert!(fit.truncated);
        assert!(fit.context.starts_with("[Pages 1-1]\n"));
        assert!(!fit.context.contains('z'));
    }

    #[test]
    fn test_fit_chunks_all_fit() {
        let chunks = vec![chunk(1, 2, "alpha"), chunk(3, 3, "beta")];
        let fit = fit_chunks(&chunks, 1000);
        assert_eq!(fit.included_chunks, 2);
        assert!(!fit.truncated);
        assert_eq!(
            fit.context,
            "[Pages 1-2]\nalpha\n\n---\n\n[Pages 3-3]\nbeta"
        );
    }

    #[test]
    fn test_fit_chunks_budget_never_exceeded() {
        let chunks: Vec<Chunk> = (1..=10)
            .map(|i| chunk(i, i, &"w".repeat(i as usize * 13)))
            .collect();
        for budget in [0usize, 5, 17, 40, 90, 200] {
            let fit = fit_chunks(&chunks, budget);
            assert!(fit.total_tokens <= budget);
            assert_eq!(fit.truncated, fit.included_chunks < chunks.len());
        }
    }

    #[test]
    fn test_fit_chunks_first_does_not_fit() {
        let chunks = vec![chunk(1, 1, &"q".repeat(1000))];
        let fit = fit_chunks(&chunks, 10);
        assert_eq!(fit.included_chunks, 0);
        assert!(fit.truncated);
        assert!(fit.context.is_empty());
    }

    #[test]
    fn test_history_respects_turn_cap() {
        let history = vec![
            msg(Role::User, "first question"),
            msg(Role::Assistant, "first answer"),
            msg(Role::System, "ignored"),
            msg(Role::User, "second question"),
            msg(Role::Assistant, "second answer"),
        ];
        let fit = fit_history(&history, 1000, 1);
        assert_eq!(fit.turns, 1);
        assert_eq!(fit.text, "User: second question\nAssistant: second answer");

        let fit = fit_history(&history, 1000, 5);
        assert_eq!(fit.turns, 2);
        assert!(fit.text.starts_with("User: first question"));
        assert!(!fit.text.contains("ignored"));
    }

    #[test]
    fn test_history_respects_budget() {
        let history = vec![
            msg(Role::User, &"long ".repeat(100)),
            msg(Role::Assistant, "short"),
        ];
        let fit = fit_history(&history, 10, 3);
        assert_eq!(fit.text, "Assistant: short");
        assert_eq!(fit.turns, 0);
        assert!(fit.tokens <= 10);
    }

    #[test]
    fn test_history_zero_turns_is_empty() {
        let history = vec![msg(Role::User, "q"), msg(Role::Assistant, "a")];
        assert_eq!(fit_history(&history, 1000, 0), HistoryFit::default());
    }
}
