//! Grounded prompt construction.

use std::fmt::Write;

use crate::document::Candidate;

/// The answer expected when the context does not cover the question.
pub const NOT_FOUND_ANSWER: &str =
    "The requested information is not available in the provided documents.";

/// Marks the start of the context section.
pub const CONTEXT_MARKER: &str = "### Context";
/// Marks the start of the question section.
pub const QUESTION_MARKER: &str = "### Question";

const RULES: &str = "\
You are an assistant that answers strictly from the context below.
Rules:
- Use only facts stated in the context. Do not rely on prior knowledge.
- Cite the blocks you use by their number, for example [1] or [2][3].
- If the context does not contain the answer, reply exactly with:";

/// Build the generation prompt from the reranked candidates and the query.
///
/// Each candidate becomes a numbered block headed `[n] filename (chunk i)`.
/// With no candidates the context section states that nothing was found,
/// so the model answers with [`NOT_FOUND_ANSWER`].
pub fn build_prompt(query: &str, candidates: &[Candidate]) -> String {
    let mut prompt = String::with_capacity(
        RULES.len() + query.len() + candidates.iter().map(|c| c.chunk.text.len() + 64).sum::<usize>(),
    );
    let _ = writeln!(prompt, "{RULES}\n\"{NOT_FOUND_ANSWER}\"\n");
    let _ = writeln!(prompt, "{CONTEXT_MARKER}");

    if candidates.is_empty() {
        let _ = writeln!(prompt, "(no documents matched the question)");
    }
    for (n, candidate) in candidates.iter().enumerate() {
        let chunk = &candidate.chunk;
        let filename = chunk.metadata.get("filename").map(String::as_str).unwrap_or("unknown");
        let _ = writeln!(prompt, "[{}] {} (chunk {})", n + 1, filename, chunk.index);
        let _ = writeln!(prompt, "{}\n", chunk.text.trim());
    }

    let _ = writeln!(prompt, "\n{QUESTION_MARKER}");
    let _ = write!(prompt, "{}", query.trim());
    prompt
}

/// Split a prompt produced by [`build_prompt`] back into its context blocks
/// and question. Used by the local generators.
pub(crate) fn parse_prompt(prompt: &str) -> (Vec<&str>, &str) {
    let Some((head, question)) = prompt.rsplit_once(QUESTION_MARKER) else {
        return (Vec::new(), prompt.trim());
    };
    let context = head.split_once(CONTEXT_MARKER).map(|(_, c)| c).unwrap_or("");
    let blocks = context
        .split("\n\n")
        .filter_map(|block| {
            let block = block.trim();
            let (header, body) = block.split_once('\n')?;
            header.starts_with('[').then_some(body.trim())
        })
        .filter(|body| !body.is_empty())
        .collect();
    (blocks, question.trim())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::document::Chunk;

    fn candidate(filename: &str, index: usize, text: &str) -> Candidate {
        Candidate::similarity(
            Chunk {
                id: format!("d_{index}"),
                text: text.into(),
                index,
                document_id: "d".into(),
                embedding: None,
                metadata: HashMap::from([("filename".to_string(), filename.to_string())]),
            },
            0.8,
        )
    }

    #[test]
    fn numbers_blocks_with_sources() {
        let prompt = build_prompt(
            " What is Qdrant? ",
            &[candidate("db.md", 3, "Qdrant is a vector database."), candidate("x.txt", 0, "Other.")],
        );
        assert!(prompt.contains("[1] db.md (chunk 3)\nQdrant is a vector database."));
        assert!(prompt.contains("[2] x.txt (chunk 0)\nOther."));
        assert!(prompt.ends_with("### Question\nWhat is Qdrant?"));
        assert!(prompt.contains(NOT_FOUND_ANSWER));
    }

    #[test]
    fn empty_context_is_stated() {
        let prompt = build_prompt("q", &[]);
        assert!(prompt.contains("(no documents matched the question)"));
        let (blocks, question) = parse_prompt(&prompt);
        assert!(blocks.is_empty());
        assert_eq!(question, "q");
    }

    #[test]
    fn parse_recovers_blocks() {
        let prompt = build_prompt("q?", &[candidate("a", 0, "alpha"), candidate("b", 1, "beta")]);
        let (blocks, question) = parse_prompt(&prompt);
        assert_eq!(blocks, ["alpha", "beta"]);
        assert_eq!(question, "q?");
    }
}
