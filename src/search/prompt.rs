//! Prompt construction for the optional text generator.

use crate::storage::SearchResult;

/// Total words of source text placed in a prompt.
pub const DEFAULT_CONTEXT_WORDS: usize = 1000;

/// Token budget for a generated answer.
pub const MAX_ANSWER_TOKENS: usize = 200;

/// Numbered source blocks for the prompt, best result first.
///
/// Each block carries a `[n]` citation marker, the source domain and title,
/// the item text, and its stored quotes. At most `max_words` words of item
/// text are included across all blocks; once the budget is spent no further
/// sources are added.
pub fn build_context(results: &[SearchResult], max_words: usize) -> String {
    let mut context = String::new();
    let mut remaining = max_words;

    for (n, result) in results.iter().enumerate() {
        if remaining == 0 {
            break;
        }
        let item = &result.item;
        let text = if item.text_clean.is_empty() {
            &item.text_snippet
        } else {
            &item.text_clean
        };

        let words: Vec<&str> = text.split_whitespace().take(remaining).collect();
        remaining -= words.len();

        context.push_str(&format!("\n[{}] {}\nTitle: {}\n", n + 1, item.source_domain, item.title));
        context.push_str(&words.join(" "));
        context.push('\n');

        if !item.quotes.is_empty() {
            let quotes: Vec<String> = item.quotes.iter().map(|q| format!("\"{q}\"")).collect();
            context.push_str(&format!("Key quotes: {}\n", quotes.join(" ")));
        }
    }

    context
}

/// Instruction prompt asking for an answer grounded in `context` only.
pub fn build_prompt(query: &str, context: &str) -> String {
    format!(
        "You are a careful research assistant. \
         Answer the question using ONLY the information in the sources below. \
         Do not rely on outside knowledge. \
         If the sources do not contain enough information, say so. \
         Cite sources by their number, like [1], when making claims.\n\n\
         SOURCES:\n{context}\n---\n\n\
         QUESTION: {query}\n\n\
         ANSWER (clear, concise, with citations):\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::VaultItem;

    fn result(domain: &str, title: &str, clean: &str, quotes: &[&str]) -> SearchResult {
        SearchResult {
            item: VaultItem {
                id: title.to_string(),
                title: title.to_string(),
                url: String::new(),
                source_domain: domain.to_string(),
                author: None,
                published_at: None,
                retrieved_at: 0,
                topic_tags: Vec::new(),
                text_snippet: "fallback snippet".to_string(),
                text_clean: clean.to_string(),
                quotes: quotes.iter().map(|q| q.to_string()).collect(),
                language: "en".to_string(),
                content_type: "article".to_string(),
                license_note: None,
            },
            score: 1.0,
            matched_snippets: Vec::new(),
        }
    }

    #[test]
    fn test_context_blocks() {
        let results = vec![
            result("a.org", "Boiling", "Boil water   for a minute.", &["Boil it well"]),
            result("b.org", "Filters", "", &[]),
        ];

        let context = build_context(&results, 100);
        assert_eq!(
            context,
            "\n[1] a.org\nTitle: Boiling\nBoil water for a minute.\nKey quotes: \"Boil it well\"\n\
             \n[2] b.org\nTitle: Filters\nfallback snippet\n"
        );
    }

    #[test]
    fn test_context_word_budget_is_global() {
        let results = vec![
            result("a.org", "A", "one two three four", &[]),
            result("b.org", "B", "five six seven", &[]),
            result("c.org", "C", "eight", &[]),
        ];

        let context = build_context(&results, 6);
        assert!(context.contains("one two three four\n"));
        assert!(context.contains("five six\n"));
        assert!(!context.contains("seven"));
        assert!(!context.contains("[3]"));
    }

    #[test]
    fn test_prompt_contains_context_and_question() {
        let prompt = build_prompt("how to purify water", "\n[1] a.org\n");
        assert!(prompt.contains("SOURCES:\n\n[1] a.org\n"));
        assert!(prompt.contains("QUESTION: how to purify water\n"));
        assert!(prompt.ends_with("ANSWER (clear, concise, with citations):\n"));
    }
}
