use crate::error::IngestError;
use crate::models::{ChunkDraft, ChunkMetadata};
use regex::Regex;

pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Page separator emitted by the PDF extractor.
pub const PAGE_BREAK: char = '\u{000c}';

#[derive(Debug, Clone)]
pub struct ChunkingOptions {
    /// Target chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared between neighbouring chunks. Must be below `chunk_size`.
    pub overlap: usize,
    pub section_heading_regex: &'static str,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
            section_heading_regex: r"^(?:\d+(?:\.\d+)*\.?\s+\S.*|[A-Z][A-Z0-9 &/,'-]{3,})$",
        }
    }
}

impl ChunkingOptions {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidConfiguration(
                "chunk size must be positive".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(IngestError::InvalidConfiguration(format!(
                "overlap {} must be smaller than chunk size {}",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

/// Split `text` into overlapping chunks with character offsets.
///
/// Each chunk spans `[cursor, min(cursor + chunk_size, len))` and the cursor
/// advances by `chunk_size - overlap`. The walk ends with the chunk that
/// reaches the end of the text, so only the last chunk can be short.
pub fn chunk_text(text: &str, options: &ChunkingOptions) -> Result<Vec<ChunkDraft>, IngestError> {
    options.validate()?;
    let heading_re = Regex::new(options.section_heading_regex)?;

    let chars: Vec<char> = text.chars().collect();
    let length = chars.len();
    if length == 0 {
        return Ok(Vec::new());
    }

    let headings = heading_positions(text, &heading_re);
    let page_breaks: Vec<usize> = chars
        .iter()
        .enumerate()
        .filter(|(_, c)| **c == PAGE_BREAK)
        .map(|(position, _)| position)
        .collect();

    let mut drafts = Vec::new();
    let mut cursor = 0usize;
    while cursor < length {
        let end = (cursor + options.chunk_size).min(length);
        let content: String = chars[cursor..end].iter().collect();

        let page = (!page_breaks.is_empty())
            .then(|| page_breaks.partition_point(|position| *position < cursor) as u32 + 1);

        drafts.push(ChunkDraft {
            chunk_index: drafts.len() as u32,
            content,
            start_index: cursor,
            end_index: end,
            metadata: ChunkMetadata {
                overlap_start: cursor.saturating_sub(options.overlap),
                overlap_end: (end + options.overlap).min(length),
                page,
                section: section_for(&headings, cursor, end),
            },
        });

        if end == length {
            break;
        }
        cursor += options.step();
    }

    Ok(drafts)
}

/// Rebuild the source text from ordered `(start_index, content)` pairs by
/// dropping the prefix each chunk shares with its predecessor.
pub fn reassemble<'a, I>(chunks: I) -> String
where
    I: IntoIterator<Item = (usize, &'a str)>,
{
    let mut output = String::new();
    let mut covered = 0usize;

    for (start, content) in chunks {
        let skip = covered.saturating_sub(start);
        let fresh: String = content.chars().skip(skip).collect();
        covered = covered.max(start + content.chars().count());
        output.push_str(&fresh);
    }

    output
}

/// First paragraph of `text`, cut to `max_chars` characters.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let paragraph = text
        .split("\n\n")
        .map(str::trim)
        .find(|paragraph| !paragraph.is_empty())
        .unwrap_or_default();
    truncate_chars(&normalize_whitespace(paragraph), max_chars)
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

fn heading_positions(text: &str, heading_re: &Regex) -> Vec<(usize, String)> {
    let mut headings = Vec::new();
    let mut offset = 0usize;

    for line in text.split_inclusive(['\n', PAGE_BREAK]) {
        let trimmed = line.trim();
        if !trimmed.is_empty() && heading_re.is_match(trimmed) {
            headings.push((offset, trimmed.to_string()));
        }
        offset += line.chars().count();
    }

    headings
}

fn section_for(headings: &[(usize, String)], start: usize, end: usize) -> Option<String> {
    headings
        .iter()
        .rev()
        .find(|(position, _)| *position <= start)
        .or_else(|| {
            headings
                .iter()
                .find(|(position, _)| *position >= start && *position < end)
        })
        .map(|(_, heading)| heading.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(chunk_size: usize, overlap: usize) -> ChunkingOptions {
        ChunkingOptions {
            chunk_size,
            overlap,
            ..ChunkingOptions::default()
        }
    }

    fn sample_text(length: usize) -> String {
        "abcdefghijklmnopqrstuvwxyz0123456789 "
            .chars()
            .cycle()
            .take(length)
            .collect()
    }

    #[test]
    fn splits_2500_characters_into_three_overlapping_chunks() {
        let text = sample_text(2_500);
        let chunks = chunk_text(&text, &options(1_000, 200)).unwrap();

        let spans: Vec<_> = chunks
            .iter()
            .map(|chunk| (chunk.chunk_index, chunk.start_index, chunk.end_index))
            .collect();
        assert_eq!(spans, vec![(0, 0, 1_000), (1, 800, 1_800), (2, 1_600, 2_500)]);

        assert_eq!(chunks[0].metadata.overlap_start, 0);
        assert_eq!(chunks[0].metadata.overlap_end, 1_200);
        assert_eq!(chunks[2].metadata.overlap_start, 1_400);
        assert_eq!(chunks[2].metadata.overlap_end, 2_500);
    }

    #[test]
    fn spans_cover_text_with_exact_overlap_and_contiguous_indices() {
        for (length, size, overlap) in [(1, 10, 3), (999, 100, 30), (4_321, 512, 64), (77, 7, 6)] {
            let text = sample_text(length);
            let chunks = chunk_text(&text, &options(size, overlap)).unwrap();

            assert_eq!(chunks.first().map(|c| c.start_index), Some(0));
            assert_eq!(chunks.last().map(|c| c.end_index), Some(length));
            for (position, chunk) in chunks.iter().enumerate() {
                assert_eq!(chunk.chunk_index as usize, position);
                assert!(chunk.end_index > chunk.start_index);
                assert!(chunk.metadata.overlap_end <= length);
            }
            for pair in chunks.windows(2) {
                assert!(pair[1].start_index <= pair[0].end_index, "gap between chunks");
                assert_eq!(pair[0].end_index - pair[1].start_index, overlap);
            }
        }
    }

    #[test]
    fn short_text_yields_one_clamped_chunk() {
        let chunks = chunk_text("Short policy.", &ChunkingOptions::default()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_index, 0);
        assert_eq!(chunks[0].end_index, 13);
        assert_eq!(chunks[0].metadata.overlap_start, 0);
        assert_eq!(chunks[0].metadata.overlap_end, 13);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", &ChunkingOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let error = chunk_text("anything", &options(100, 100)).unwrap_err();
        assert!(matches!(error, IngestError::InvalidConfiguration(_)));
    }

    #[test]
    fn offsets_count_characters_not_bytes() {
        let text = "Überstunden werden vergütet. Ärztliche Bescheinigung nötig.";
        let chunks = chunk_text(text, &options(20, 5)).unwrap();
        for chunk in &chunks {
            let expected: String = text
                .chars()
                .skip(chunk.start_index)
                .take(chunk.end_index - chunk.start_index)
                .collect();
            assert_eq!(chunk.content, expected);
        }
        let pairs = chunks.iter().map(|c| (c.start_index, c.content.as_str()));
        assert_eq!(reassemble(pairs), text);
    }

    #[test]
    fn reassembly_reconstructs_the_source() {
        let text = sample_text(3_333);
        let chunks = chunk_text(&text, &options(400, 150)).unwrap();
        let pairs = chunks.iter().map(|c| (c.start_index, c.content.as_str()));
        assert_eq!(reassemble(pairs), text);
    }

    #[test]
    fn chunks_carry_section_and_page_hints() {
        let text = format!(
            "1. Eligibility\n{}\n{}2. Equipment\n{}",
            "a".repeat(60),
            PAGE_BREAK,
            "b".repeat(60)
        );
        let chunks = chunk_text(&text, &options(50, 10)).unwrap();

        assert_eq!(chunks[0].metadata.section.as_deref(), Some("1. Eligibility"));
        assert_eq!(chunks[0].metadata.page, Some(1));

        let last = chunks.last().unwrap();
        assert_eq!(last.metadata.section.as_deref(), Some("2. Equipment"));
        assert_eq!(last.metadata.page, Some(2));
    }

    #[test]
    fn page_hint_counts_breaks_before_the_chunk_start() {
        let page = "x".repeat(25);
        let separator = PAGE_BREAK.to_string();
        let text = [page.as_str(); 4].join(separator.as_str());
        let chunks = chunk_text(&text, &options(20, 5)).unwrap();

        let chars: Vec<char> = text.chars().collect();
        for chunk in &chunks {
            let breaks = chars[..chunk.start_index]
                .iter()
                .filter(|c| **c == PAGE_BREAK)
                .count();
            assert_eq!(chunk.metadata.page, Some(breaks as u32 + 1));
        }
        assert_eq!(chunks.last().unwrap().metadata.page, Some(4));
        assert!(chunk_text("no pages", &options(20, 5)).unwrap()[0].metadata.page.is_none());
    }

    #[test]
    fn excerpt_takes_first_paragraph() {
        let text = "\n\nRemote   work is allowed.\nTwo days.\n\nSecond paragraph.";
        assert_eq!(excerpt(text, 100), "Remote work is allowed. Two days.");
        assert_eq!(excerpt(text, 6), "Remote...");
    }
}
