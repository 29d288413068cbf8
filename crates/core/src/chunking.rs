use crate::error::IngestError;
use crate::models::ThesisChunk;
use sha2::{Digest, Sha256};

/// Share of `chunk_size` (in words) repeated between consecutive chunks.
pub const OVERLAP_RATIO: f64 = 0.2;

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Splits on the literal ". " and gives every sentence a closing period.
pub fn split_sentences(text: &str) -> Vec<String> {
    text.split(". ")
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .map(|candidate| {
            if candidate.ends_with('.') {
                candidate.to_string()
            } else {
                format!("{candidate}.")
            }
        })
        .collect()
}

/// Greedy sentence windows of at most `chunk_size` words with ~20% overlap.
///
/// A sentence longer than `chunk_size` forms a chunk on its own. The next
/// window starts at the sentence where the cumulative word count of the
/// current window reaches `window_words - overlap`.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let sentences = split_sentences(text);
    let word_counts: Vec<usize> = sentences
        .iter()
        .map(|sentence| sentence.split_whitespace().count())
        .collect();
    let overlap = (OVERLAP_RATIO * chunk_size as f64) as usize;

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < sentences.len() {
        let mut end = start;
        let mut window_words = 0;
        while end < sentences.len() {
            let words = word_counts[end];
            if end > start && window_words + words > chunk_size {
                break;
            }
            window_words += words;
            end += 1;
        }

        chunks.push(sentences[start..end].join(" "));

        if end >= sentences.len() {
            break;
        }

        let step = window_words.saturating_sub(overlap).max(1);
        let mut next = start;
        let mut advanced = 0;
        while next < end && advanced < step {
            advanced += word_counts[next];
            next += 1;
        }

        if advanced < step {
            break;
        }
        start = next;
    }

    chunks
}

/// Chunks a whole document into records ready for embedding.
pub fn build_chunks(
    document_id: &str,
    source_file: &str,
    text: &str,
    chunk_size: usize,
) -> Result<Vec<ThesisChunk>, IngestError> {
    if chunk_size == 0 {
        return Err(IngestError::InvalidChunkConfig(
            "chunk_size must be at least one word".to_string(),
        ));
    }

    let chunks = chunk_text(&normalize_whitespace(text), chunk_size)
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| {
            let chunk_idx = index as u64;
            ThesisChunk {
                chunk_id: make_chunk_id(document_id, chunk_idx, &chunk),
                document_id: document_id.to_string(),
                source_file: source_file.to_string(),
                chunk_idx,
                text: chunk,
            }
        })
        .collect();

    Ok(chunks)
}

fn make_chunk_id(document_id: &str, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence(word: &str, words: usize) -> String {
        vec![word; words].join(" ")
    }

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof   spacing";
        let normalized = normalize_whitespace(input);
        assert_eq!(normalized, "A lot of spacing");
    }

    #[test]
    fn sentences_get_trailing_period() {
        let sentences = split_sentences("Rice grows. Soil is saline. No period at end");
        assert_eq!(
            sentences,
            vec!["Rice grows.", "Soil is saline.", "No period at end."]
        );
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = (0..40)
            .map(|index| format!("Sentence number {index} talks about soil salinity"))
            .collect::<Vec<_>>()
            .join(". ");

        assert_eq!(chunk_text(&text, 30), chunk_text(&text, 30));
    }

    #[test]
    fn consecutive_chunks_overlap_by_whole_sentences() {
        // Ten sentences of ten words, chunk size fifty: windows of five
        // sentences advancing by four, so each pair shares one sentence.
        let text = (0..10)
            .map(|index| sentence(&format!("w{index}"), 10))
            .collect::<Vec<_>>()
            .join(". ");

        let chunks = chunk_text(&text, 50);
        assert_eq!(chunks.len(), 3);

        for pair in chunks.windows(2) {
            let left = split_sentences(&pair[0]);
            let right = split_sentences(&pair[1]);
            assert_eq!(left.last(), right.first());
        }
        assert!(chunks[2].ends_with(&format!("{}.", sentence("w9", 10))));
    }

    #[test]
    fn oversized_sentence_is_admitted_alone() {
        let text = format!("{}. {}", sentence("long", 12), sentence("short", 3));
        let chunks = chunk_text(&text, 5);

        assert_eq!(chunks[0], format!("{}.", sentence("long", 12)));
        assert_eq!(chunks.last().map(String::as_str), Some("short short short."));
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk_text("One sentence. Two sentence.", 200);
        assert_eq!(chunks, vec!["One sentence. Two sentence."]);
        assert!(chunk_text("   ", 200).is_empty());
    }

    #[test]
    fn build_chunks_assigns_sequential_indices() -> Result<(), IngestError> {
        let text = (0..10)
            .map(|index| sentence(&format!("w{index}"), 10))
            .collect::<Vec<_>>()
            .join(". ");

        let chunks = build_chunks("doc-1", "thesis.pdf", &text, 50)?;
        let indices: Vec<u64> = chunks.iter().map(|chunk| chunk.chunk_idx).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(chunks.iter().all(|chunk| chunk.source_file == "thesis.pdf"));
        assert_ne!(chunks[0].chunk_id, chunks[1].chunk_id);
        Ok(())
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert!(build_chunks("doc", "a.txt", "text.", 0).is_err());
    }
}
