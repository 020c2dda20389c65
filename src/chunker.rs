use crate::config::{CHUNK_OVERLAP, CHUNK_SIZE, MIN_CHUNK_SIZE};
use crate::extractor::{language_for_extension, SymbolExtractor};
use crate::types::CodeSymbol;

// ---------------------------------------------------------------------------
// Chunking: symbol-aware splitting with a plain-text fallback.
//
// The text chunker is the base case and the safety net: the code chunker
// delegates to it for oversized symbol groups, for trailing text, for
// unsupported languages, and whenever the extractor fails.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ChunkerOptions {
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters of overlap between successive text chunks.
    pub chunk_overlap: usize,
    /// Chunks shorter than this merge into their neighbor (code path only).
    pub min_chunk_size: usize,
    /// Extension of the source file, used to pick a language profile.
    pub file_extension: Option<String>,
}

impl Default for ChunkerOptions {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            chunk_overlap: CHUNK_OVERLAP,
            min_chunk_size: MIN_CHUNK_SIZE,
            file_extension: None,
        }
    }
}

/// One emitted chunk: trimmed content plus the symbols whose spans fed it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPiece {
    pub content: String,
    pub symbols: Vec<CodeSymbol>,
}

impl ChunkPiece {
    fn text(content: String) -> Self {
        Self {
            content,
            symbols: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Text chunking
// ---------------------------------------------------------------------------

/// Deterministic sliding-window splitter.
///
/// CRLF is normalized to LF and the input trimmed; empty input yields no
/// chunks. Each successive window starts at `max(prev_start + 1,
/// prev_end - overlap)`, so progress is guaranteed even with a degenerate
/// overlap. Sizes are in characters, not bytes.
pub fn chunk_text(source: &str, opts: &ChunkerOptions) -> Vec<ChunkPiece> {
    let normalized = source.replace("\r\n", "\n");
    let trimmed = normalized.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let size = opts.chunk_size.max(1);
    let bounds = char_boundaries(trimmed);
    let char_count = bounds.len() - 1;

    let mut out = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + size).min(char_count);
        let piece = trimmed[bounds[start]..bounds[end]].trim();
        if !piece.is_empty() {
            out.push(ChunkPiece::text(piece.to_string()));
        }
        if end == char_count {
            break;
        }
        start = (start + 1).max(end.saturating_sub(opts.chunk_overlap));
    }
    out
}

/// Byte offset of every char boundary, with the total length appended.
fn char_boundaries(s: &str) -> Vec<usize> {
    let mut bounds: Vec<usize> = s.char_indices().map(|(i, _)| i).collect();
    bounds.push(s.len());
    bounds
}

// ---------------------------------------------------------------------------
// Code chunking
// ---------------------------------------------------------------------------

/// Split source along AST symbol boundaries when the extension has a
/// language profile, falling back to `chunk_text` otherwise.
pub fn chunk_source(
    source: &str,
    opts: &ChunkerOptions,
    extractor: &dyn SymbolExtractor,
) -> Vec<ChunkPiece> {
    let Some(language) = opts
        .file_extension
        .as_deref()
        .and_then(language_for_extension)
    else {
        return chunk_text(source, opts);
    };

    let normalized = source.replace("\r\n", "\n");
    let symbols = match extractor.extract_symbols(&normalized, language) {
        Ok(symbols) => symbols,
        Err(e) => {
            tracing::debug!("symbol extraction failed, using text chunking: {e}");
            return chunk_text(&normalized, opts);
        }
    };

    let chunks = chunk_by_symbols(&normalized, &symbols, opts);
    if chunks.is_empty() {
        return chunk_text(&normalized, opts);
    }
    merge_small_chunks(chunks, opts.min_chunk_size)
}

struct Pending {
    content: String,
    chars: usize,
    symbols: Vec<CodeSymbol>,
}

impl Pending {
    fn new() -> Self {
        Self {
            content: String::new(),
            chars: 0,
            symbols: Vec::new(),
        }
    }

    fn push(&mut self, text: &str) {
        if !self.content.is_empty() {
            self.content.push('\n');
            self.chars += 1;
        }
        self.content.push_str(text);
        self.chars += text.chars().count();
    }
}

fn chunk_by_symbols(source: &str, symbols: &[CodeSymbol], opts: &ChunkerOptions) -> Vec<ChunkPiece> {
    // Valid spans: clamped into the source, non-empty, forward.
    let mut spans: Vec<(usize, usize, &CodeSymbol)> = symbols
        .iter()
        .filter_map(|sym| {
            let start = sym.content_range.start.offset.min(source.len());
            let end = sym.content_range.end.offset.min(source.len());
            (start < end).then_some((start, end, sym))
        })
        .collect();
    spans.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    if spans.is_empty() {
        return Vec::new();
    }

    let mut out: Vec<ChunkPiece> = Vec::new();
    let mut pending = Pending::new();
    let mut cursor = 0usize;

    for (start, end, sym) in spans {
        if start > cursor {
            if let Some(gap) = source.get(cursor..start) {
                let gap = gap.trim();
                if !gap.is_empty() {
                    append_with_overflow(&mut pending, gap, &mut out, opts);
                }
            }
        }
        if cursor < end {
            if let Some(text) = source.get(start.max(cursor)..end) {
                let text = text.trim_end();
                if !text.is_empty() {
                    append_with_overflow(&mut pending, text, &mut out, opts);
                    pending.symbols.push(sym.clone());
                }
            }
        }
        cursor = cursor.max(end);
    }

    flush(&mut pending, &mut out, opts);

    // Trailing text after the last span carries no symbol metadata.
    if let Some(tail) = source.get(cursor..) {
        if !tail.trim().is_empty() {
            out.extend(chunk_text(tail, opts));
        }
    }

    out
}

/// Append `text` to the pending buffer, flushing first when the addition
/// (plus the joining newline) would exceed the chunk size.
fn append_with_overflow(
    pending: &mut Pending,
    text: &str,
    out: &mut Vec<ChunkPiece>,
    opts: &ChunkerOptions,
) {
    if !pending.content.is_empty()
        && pending.chars + 1 + text.chars().count() > opts.chunk_size
    {
        flush(pending, out, opts);
    }
    pending.push(text);
}

/// Emit the pending buffer. Oversized buffers are re-split as text with the
/// accumulated symbols attached to every resulting sub-chunk.
fn flush(pending: &mut Pending, out: &mut Vec<ChunkPiece>, opts: &ChunkerOptions) {
    let content = std::mem::take(&mut pending.content);
    let symbols = std::mem::take(&mut pending.symbols);
    pending.chars = 0;

    let trimmed = content.trim();
    if trimmed.is_empty() {
        return;
    }
    if trimmed.chars().count() > opts.chunk_size {
        for sub in chunk_text(trimmed, opts) {
            out.push(ChunkPiece {
                content: sub.content,
                symbols: symbols.clone(),
            });
        }
    } else {
        out.push(ChunkPiece {
            content: trimmed.to_string(),
            symbols,
        });
    }
}

/// Merge chunks shorter than `min_chars` into the previous emission,
/// concatenating content and unioning symbol lists. A still-short final
/// chunk is merged backward as a last resort.
fn merge_small_chunks(chunks: Vec<ChunkPiece>, min_chars: usize) -> Vec<ChunkPiece> {
    if min_chars == 0 || chunks.len() < 2 {
        return chunks;
    }

    let mut merged: Vec<ChunkPiece> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let short = chunk.content.chars().count() < min_chars;
        match merged.last_mut() {
            Some(prev) if short => merge_into(prev, chunk),
            _ => merged.push(chunk),
        }
    }

    if merged.len() >= 2
        && merged
            .last()
            .is_some_and(|c| c.content.chars().count() < min_chars)
    {
        let last = merged.pop().expect("checked non-empty");
        let prev = merged.last_mut().expect("checked len >= 2");
        merge_into(prev, last);
    }

    merged
}

fn merge_into(target: &mut ChunkPiece, source: ChunkPiece) {
    target.content.push('\n');
    target.content.push_str(&source.content);
    for sym in source.symbols {
        if !target.symbols.contains(&sym) {
            target.symbols.push(sym);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::LanguageProfile;
    use crate::types::{Position, SymbolKind, SymbolRange};

    fn opts(size: usize, overlap: usize) -> ChunkerOptions {
        ChunkerOptions {
            chunk_size: size,
            chunk_overlap: overlap,
            min_chunk_size: 0,
            file_extension: None,
        }
    }

    #[test]
    fn empty_and_whitespace_input_yield_nothing() {
        assert!(chunk_text("", &opts(100, 10)).is_empty());
        assert!(chunk_text("   \n\t  ", &opts(100, 10)).is_empty());
    }

    #[test]
    fn short_input_is_one_trimmed_chunk() {
        let chunks = chunk_text("  hello world  ", &opts(100, 10));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "hello world");
    }

    #[test]
    fn crlf_is_normalized() {
        let chunks = chunk_text("a\r\nb", &opts(100, 10));
        assert_eq!(chunks[0].content, "a\nb");
    }

    #[test]
    fn windows_cover_the_source_with_overlap() {
        // 300 digits, no whitespace: trimming is a no-op, so window contents
        // are exact slices and the step arithmetic is directly observable.
        let source: String = std::iter::repeat("0123456789").take(30).collect();
        let chunks = chunk_text(&source, &opts(100, 20));

        assert_eq!(chunks[0].content, source[0..100]);
        assert_eq!(chunks[1].content, source[80..180]);
        assert_eq!(chunks[2].content, source[160..260]);
        assert_eq!(chunks[3].content, source[240..300]);
        assert_eq!(chunks.len(), 4);

        // Concatenating the non-overlap portions reconstructs the source.
        let mut rebuilt = chunks[0].content.clone();
        for c in &chunks[1..] {
            rebuilt.push_str(&c.content[20..]);
        }
        assert_eq!(rebuilt, source);
    }

    #[test]
    fn overlap_larger_than_size_still_progresses() {
        let source: String = std::iter::repeat("x").take(50).collect();
        let chunks = chunk_text(&source, &opts(10, 100));
        assert!(chunks.len() > 1);
        assert!(chunks.len() <= 50);
    }

    #[test]
    fn sizes_are_in_characters_not_bytes() {
        let source: String = std::iter::repeat('é').take(40).collect();
        let chunks = chunk_text(&source, &opts(25, 5));
        assert!(chunks[0].content.chars().count() <= 25);
        assert!(chunks.len() >= 2);
    }

    // ── code chunker ─────────────────────────────────────────────────────

    /// Extractor stub returning a fixed symbol list.
    struct FixedSymbols(Vec<CodeSymbol>);

    impl SymbolExtractor for FixedSymbols {
        fn extract_symbols(
            &self,
            _source: &str,
            _language: LanguageProfile,
        ) -> anyhow::Result<Vec<CodeSymbol>> {
            Ok(self.0.clone())
        }
    }

    struct FailingExtractor;

    impl SymbolExtractor for FailingExtractor {
        fn extract_symbols(
            &self,
            _source: &str,
            _language: LanguageProfile,
        ) -> anyhow::Result<Vec<CodeSymbol>> {
            anyhow::bail!("no parser")
        }
    }

    fn sym(name: &str, start: usize, end: usize) -> CodeSymbol {
        let pos = |offset: usize| Position {
            line: 0,
            column: 0,
            offset,
        };
        CodeSymbol {
            name: name.into(),
            kind: SymbolKind::Function,
            name_range: SymbolRange {
                start: pos(start),
                end: pos(start + name.len()),
            },
            content_range: SymbolRange {
                start: pos(start),
                end: pos(end),
            },
        }
    }

    fn code_opts(size: usize) -> ChunkerOptions {
        ChunkerOptions {
            chunk_size: size,
            chunk_overlap: 4,
            min_chunk_size: 0,
            file_extension: Some(".rs".into()),
        }
    }

    #[test]
    fn unsupported_extension_falls_back_to_text() {
        let chunks = chunk_source(
            "plain prose",
            &ChunkerOptions {
                file_extension: Some(".md".into()),
                ..ChunkerOptions::default()
            },
            &FixedSymbols(vec![]),
        );
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].symbols.is_empty());
    }

    #[test]
    fn extractor_failure_falls_back_to_text() {
        let chunks = chunk_source("fn a() {}", &code_opts(100), &FailingExtractor);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].symbols.is_empty());
    }

    #[test]
    fn no_symbols_falls_back_to_text() {
        let chunks = chunk_source("fn a() {}", &code_opts(100), &FixedSymbols(vec![]));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "fn a() {}");
    }

    #[test]
    fn symbols_group_until_the_size_budget_overflows() {
        //              0         1         2
        //              0123456789012345678901234567
        let source = "fn a() {}\nfn b() {}\nfn c() {}";
        let symbols = vec![sym("a", 0, 9), sym("b", 10, 19), sym("c", 20, 29)];
        // Budget fits two symbols (9 + 1 + 9 = 19) but not three.
        let chunks = chunk_source(source, &code_opts(20), &FixedSymbols(symbols));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "fn a() {}\nfn b() {}");
        assert_eq!(
            chunks[0].symbols.iter().map(|s| &s.name).collect::<Vec<_>>(),
            ["a", "b"]
        );
        assert_eq!(chunks[1].content, "fn c() {}");
        assert_eq!(chunks[1].symbols.len(), 1);
    }

    #[test]
    fn gap_text_lands_in_the_pending_chunk_without_symbol_metadata() {
        let source = "// header\nfn a() {}";
        let symbols = vec![sym("a", 10, 19)];
        let chunks = chunk_source(source, &code_opts(100), &FixedSymbols(symbols));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "// header\nfn a() {}");
        assert_eq!(chunks[0].symbols.len(), 1);
    }

    #[test]
    fn trailing_text_is_chunked_without_symbols() {
        let source = "fn a() {}\n// trailing notes";
        let symbols = vec![sym("a", 0, 9)];
        let chunks = chunk_source(source, &code_opts(100), &FixedSymbols(symbols));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].content, "// trailing notes");
        assert!(chunks[1].symbols.is_empty());
    }

    #[test]
    fn oversized_symbol_is_split_with_symbols_on_every_sub_chunk() {
        let body: String = std::iter::repeat("x").take(60).collect();
        let source = format!("fn a() {{{body}}}");
        let symbols = vec![sym("a", 0, source.len())];
        let chunks = chunk_source(&source, &code_opts(30), &FixedSymbols(symbols));
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.symbols.len() == 1));
        assert!(chunks.iter().all(|c| c.content.chars().count() <= 30));
    }

    #[test]
    fn invalid_spans_are_rejected() {
        // Backward and zero-length spans must not panic or emit chunks.
        let source = "fn a() {}";
        let mut bad = sym("a", 5, 5);
        bad.content_range.end.offset = 5;
        let mut backward = sym("b", 8, 2);
        backward.content_range.start.offset = 8;
        backward.content_range.end.offset = 2;
        let chunks = chunk_source(source, &code_opts(100), &FixedSymbols(vec![bad, backward]));
        // Falls back to text chunking since no valid span produced output.
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].symbols.is_empty());
    }

    #[test]
    fn overlapping_spans_do_not_duplicate_text() {
        let source = "fn a() { inner() }";
        let outer = sym("a", 0, source.len());
        let mut inner = sym("inner", 9, 16);
        inner.content_range.start.offset = 9;
        inner.content_range.end.offset = 16;
        let chunks = chunk_source(source, &code_opts(100), &FixedSymbols(vec![outer, inner]));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, source);
    }

    #[test]
    fn small_chunks_merge_into_the_previous_emission() {
        let chunks = vec![
            ChunkPiece::text("long enough to stand alone".into()),
            ChunkPiece::text("tiny".into()),
            ChunkPiece::text("also long enough to stand".into()),
        ];
        let merged = merge_small_chunks(chunks, 10);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].content, "long enough to stand alone\ntiny");
    }

    #[test]
    fn short_final_chunk_merges_backward() {
        let chunks = vec![
            ChunkPiece::text("first substantial chunk".into()),
            ChunkPiece::text("second substantial chunk".into()),
            ChunkPiece::text("tail".into()),
        ];
        let merged = merge_small_chunks(chunks, 10);
        assert_eq!(merged.len(), 2);
        assert!(merged[1].content.ends_with("\ntail"));
    }

    #[test]
    fn merging_unions_symbol_lists_without_duplicates() {
        let shared = sym("dup", 0, 5);
        let a = ChunkPiece {
            content: "a substantial piece of code".into(),
            symbols: vec![shared.clone()],
        };
        let b = ChunkPiece {
            content: "tiny".into(),
            symbols: vec![shared.clone(), sym("other", 10, 20)],
        };
        let merged = merge_small_chunks(vec![a, b], 10);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].symbols.len(), 2);
    }
}
